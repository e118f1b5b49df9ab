//! Grouped parallel activation.
//!
//! A [`LoadPlan`] is a list of groups. Groups run strictly one after the
//! other: no unit of group `n + 1` starts before every unit of group `n` has
//! finished, successfully or not. Inside a group units run on a `JoinSet`
//! gated by a `Semaphore` whose size comes from the override or the
//! throttle's mixed-workload recommendation, capped by the group size.
//!
//! Per-unit failures are recorded and never stop the run. When workers
//! cannot be spawned (no tokio runtime) or the runtime cancels them, the
//! remaining units are activated one at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::activator::{Activator, Location};
use super::cache::{ActivationCache, Claim};
use super::metrics::{ConcurrencyKind, ThrottleController};
use crate::core::graph::DependencyGraph;
use crate::core::resolver::ResolvedOrder;
use crate::core::unit::{ActivationRecord, UnitDescriptor};
use crate::error::Error;
use crate::{shlog, shlog_debug, shlog_error, shlog_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Imported,
    AlreadyLoaded,
    PathNotFound,
    NoEntriesFound,
    /// Another orchestration holds the unit's claim.
    InProgress,
    Failed,
}

impl LoadStatus {
    /// The unit is active once this result is in.
    pub fn is_active(&self) -> bool {
        matches!(self, LoadStatus::Imported | LoadStatus::AlreadyLoaded)
    }
}

impl std::fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoadStatus::Imported => "imported",
            LoadStatus::AlreadyLoaded => "already loaded",
            LoadStatus::PathNotFound => "path not found",
            LoadStatus::NoEntriesFound => "no entries found",
            LoadStatus::InProgress => "in progress",
            LoadStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    fn for_outcome(status: LoadStatus, required: bool) -> Self {
        match (status.is_active(), required) {
            (true, _) => Severity::Info,
            (false, true) => Severity::Critical,
            (false, false) => Severity::Warning,
        }
    }
}

/// Outcome of one unit in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadResult {
    pub name: String,
    pub status: LoadStatus,
    pub success: bool,
    pub message: String,
    pub duration_seconds: f64,
    pub error_detail: Option<String>,
    pub severity: Severity,
}

impl LoadResult {
    fn new(unit: &UnitDescriptor, status: LoadStatus, message: String, started: Instant) -> Self {
        Self {
            name: unit.name.clone(),
            status,
            success: status.is_active(),
            message,
            duration_seconds: started.elapsed().as_secs_f64(),
            error_detail: None,
            severity: Severity::for_outcome(status, unit.required),
        }
    }

    fn failed(unit: &UnitDescriptor, err: &Error, started: Instant) -> Self {
        let mut result = Self::new(
            unit,
            LoadStatus::Failed,
            format!("Activation of {} failed", unit.name),
            started,
        );
        result.error_detail = Some(err.to_string());
        result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationMode {
    DependencyAware,
    DegradedFallback,
}

impl std::fmt::Display for OrchestrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestrationMode::DependencyAware => write!(f, "dependency-aware"),
            OrchestrationMode::DegradedFallback => write!(f, "degraded fallback"),
        }
    }
}

/// Summary of one loader run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationReport {
    pub run_id: Uuid,
    pub imported_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    /// Results in completion order.
    pub details: Vec<LoadResult>,
    pub load_order: Vec<String>,
    pub mode: OrchestrationMode,
    /// The loader ran units one at a time.
    pub sequential: bool,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl OrchestrationReport {
    pub fn result(&self, name: &str) -> Option<&LoadResult> {
        self.details.iter().find(|r| r.name == name)
    }

    /// Units active after the run, newly or from an earlier run.
    pub fn active_count(&self) -> usize {
        self.details.iter().filter(|r| r.status.is_active()).count()
    }

    pub fn critical_failures(&self) -> Vec<&LoadResult> {
        self.details
            .iter()
            .filter(|r| r.severity == Severity::Critical)
            .collect()
    }
}

/// Options for one loader run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Re-activate units that are already active.
    pub force: bool,
    /// Fixed per-group worker count instead of the throttle recommendation.
    pub concurrency_override: Option<usize>,
    /// Activations running longer than this are recorded as failed.
    pub unit_timeout: Option<Duration>,
}

/// Units to activate, grouped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadPlan {
    pub groups: Vec<Vec<UnitDescriptor>>,
    pub load_order: Vec<String>,
    /// Force one-at-a-time activation.
    pub sequential: bool,
}

impl LoadPlan {
    /// One group per dependency depth.
    pub fn from_resolved(order: &ResolvedOrder, graph: &DependencyGraph) -> Self {
        let groups = order
            .groups()
            .into_iter()
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| graph.get_unit(n).cloned())
                    .collect::<Vec<_>>()
            })
            .filter(|g| !g.is_empty())
            .collect();
        Self {
            groups,
            load_order: order.load_order.clone(),
            sequential: false,
        }
    }

    /// A single group activated in the given order.
    pub fn sequential(units: Vec<UnitDescriptor>) -> Self {
        let load_order = units.iter().map(|u| u.name.clone()).collect();
        let groups = if units.is_empty() { Vec::new() } else { vec![units] };
        Self {
            groups,
            load_order,
            sequential: true,
        }
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn units(&self) -> impl Iterator<Item = &UnitDescriptor> {
        self.groups.iter().flatten()
    }
}

/// Releases a claim unless the activation was recorded. Covers worker
/// panics and cancellation as well as ordinary failures.
struct ClaimGuard<'a> {
    cache: &'a ActivationCache,
    name: &'a str,
    armed: bool,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cache.release(self.name);
        }
    }
}

/// Activates a [`LoadPlan`] group by group.
#[derive(Clone)]
pub struct GroupedLoader {
    activator: Arc<dyn Activator>,
    cache: Arc<ActivationCache>,
    throttle: Arc<ThrottleController>,
}

impl GroupedLoader {
    pub fn new(
        activator: Arc<dyn Activator>,
        cache: Arc<ActivationCache>,
        throttle: Arc<ThrottleController>,
    ) -> Self {
        Self {
            activator,
            cache,
            throttle,
        }
    }

    pub fn cache(&self) -> &Arc<ActivationCache> {
        &self.cache
    }

    pub async fn load(
        &self,
        plan: &LoadPlan,
        mode: OrchestrationMode,
        options: &LoadOptions,
    ) -> OrchestrationReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        let mut sequential = plan.sequential;
        let mut details = Vec::with_capacity(plan.len());

        shlog!(
            "Run {}: loading {} units in {} groups ({})",
            run_id,
            plan.len(),
            plan.groups.len(),
            mode
        );

        for (index, group) in plan.groups.iter().enumerate() {
            shlog_debug!(
                "Group {}: {}",
                index,
                group.iter().map(|u| u.name.as_str()).collect::<Vec<_>>().join(", ")
            );

            if !sequential && tokio::runtime::Handle::try_current().is_err() {
                shlog_warn!(
                    "{}; activating remaining units sequentially",
                    Error::ConcurrencyUnavailable("no async runtime to spawn workers on".into())
                );
                sequential = true;
            }

            if sequential || group.len() == 1 {
                for unit in group {
                    details.push(self.load_unit(unit, options).await);
                }
                continue;
            }

            let (done, cancelled) = self.load_group(group, options).await;
            details.extend(done);
            if !cancelled.is_empty() {
                shlog_warn!(
                    "{}; activating remaining units sequentially",
                    Error::ConcurrencyUnavailable(format!(
                        "{} workers cancelled by the runtime",
                        cancelled.len()
                    ))
                );
                sequential = true;
                for unit in cancelled {
                    details.push(self.load_unit(unit, options).await);
                }
            }
        }

        let count = |pred: fn(LoadStatus) -> bool| {
            details.iter().filter(|r: &&LoadResult| pred(r.status)).count()
        };
        let imported_count = count(|s| s == LoadStatus::Imported);
        let failed_count = count(|s| s == LoadStatus::Failed);
        let skipped_count = details.len() - imported_count - failed_count;

        let report = OrchestrationReport {
            run_id,
            imported_count,
            failed_count,
            skipped_count,
            details,
            load_order: plan.load_order.clone(),
            mode,
            sequential,
            started_at,
            duration_seconds: started.elapsed().as_secs_f64(),
        };
        shlog!(
            "Run {} finished in {:.2}s: {} imported, {} failed, {} skipped",
            run_id,
            report.duration_seconds,
            report.imported_count,
            report.failed_count,
            report.skipped_count
        );
        report
    }

    /// Run one group on bounded workers. Returns the finished results and
    /// the units whose workers were cancelled.
    async fn load_group<'g>(
        &self,
        group: &'g [UnitDescriptor],
        options: &LoadOptions,
    ) -> (Vec<LoadResult>, Vec<&'g UnitDescriptor>) {
        let limit = options
            .concurrency_override
            .unwrap_or_else(|| self.throttle.recommend(ConcurrencyKind::Mixed).optimal)
            .min(group.len())
            .max(1);
        shlog_debug!("Activating {} units with {} workers", group.len(), limit);

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut set = JoinSet::new();
        for unit in group {
            let loader = self.clone();
            let unit = unit.clone();
            let options = *options;
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                loader.load_unit(&unit, &options).await
            });
        }

        let mut done = Vec::with_capacity(group.len());
        let mut cancelled = false;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => done.push(result),
                Err(e) if e.is_cancelled() => cancelled = true,
                Err(e) => shlog_error!("{}", Error::TaskJoin(e.to_string())),
            }
        }

        let missing: Vec<&UnitDescriptor> = group
            .iter()
            .filter(|u| !done.iter().any(|r| r.name == u.name))
            .collect();
        if cancelled {
            return (done, missing);
        }
        // Panicked workers leave no result; report them as failed.
        for unit in missing {
            let err = Error::TaskJoin(format!("worker for {} panicked", unit.name));
            let result = LoadResult::failed(unit, &err, Instant::now());
            log_result(unit, &result);
            done.push(result);
        }
        (done, Vec::new())
    }

    async fn load_unit(&self, unit: &UnitDescriptor, options: &LoadOptions) -> LoadResult {
        let started = Instant::now();

        match self.cache.try_claim(&unit.name, options.force) {
            Claim::Claimed => {}
            Claim::AlreadyActive(record) => {
                return LoadResult::new(
                    unit,
                    LoadStatus::AlreadyLoaded,
                    format!("Already active since {}", record.activated_at.to_rfc3339()),
                    started,
                );
            }
            Claim::InProgress => {
                let result = LoadResult::new(
                    unit,
                    LoadStatus::InProgress,
                    format!("{} is being activated elsewhere", unit.name),
                    started,
                );
                log_result(unit, &result);
                return result;
            }
        }
        let mut guard = ClaimGuard {
            cache: &self.cache,
            name: &unit.name,
            armed: true,
        };

        let result = match self.activator.locate(unit) {
            Location::PathNotFound => LoadResult::new(
                unit,
                LoadStatus::PathNotFound,
                format!("Location {} not found", unit.location),
                started,
            ),
            Location::NoEntries(dir) => LoadResult::new(
                unit,
                LoadStatus::NoEntriesFound,
                format!("No entries in {}", dir.display()),
                started,
            ),
            Location::Found { dir, .. } => {
                let activation = self.activator.activate(unit, &dir);
                let outcome = match options.unit_timeout {
                    Some(limit) if tokio::runtime::Handle::try_current().is_ok() => {
                        tokio::time::timeout(limit, activation)
                            .await
                            .unwrap_or(Err(Error::Timeout(limit)))
                    }
                    _ => activation.await,
                };
                match outcome {
                    Ok(entry_count) => {
                        self.cache.record(ActivationRecord::new(unit, entry_count));
                        guard.armed = false;
                        LoadResult::new(
                            unit,
                            LoadStatus::Imported,
                            format!("Activated {} entries", entry_count),
                            started,
                        )
                    }
                    Err(e) => LoadResult::failed(unit, &e, started),
                }
            }
        };
        drop(guard);

        log_result(unit, &result);
        result
    }
}

impl std::fmt::Debug for GroupedLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupedLoader")
            .field("cache", &self.cache)
            .field("throttle", &self.throttle)
            .finish()
    }
}

fn log_result(unit: &UnitDescriptor, result: &LoadResult) {
    let detail = result.error_detail.as_deref().unwrap_or(&result.message);
    match result.severity {
        Severity::Info => shlog_debug!(
            "{}: {} in {:.3}s",
            unit.name,
            result.status,
            result.duration_seconds
        ),
        Severity::Warning => shlog_warn!("{}: {} ({})", unit.name, result.status, detail),
        Severity::Critical => shlog_error!(
            "CRITICAL: required unit {}: {} ({})",
            unit.name,
            result.status,
            detail
        ),
    }
}
