//! Host resource sampling and concurrency recommendations.
//!
//! The [`ThrottleController`] turns a [`ResourceSnapshot`] into a bound on
//! simultaneous unit activations:
//!
//! ```text
//! optimal  = max(1, floor(base * memory * load * environment))
//! max_safe = max(2, min(base * 2, floor(optimal * 1.5)))
//! ```
//!
//! Sampled values are heuristics. When the platform offers no source for a
//! figure it is replaced by a random value in 15..=45 percent and flagged.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::DEFAULT_RECOMMENDATION_TTL_SECS;
use crate::{shlog_debug, shlog_trace};

/// Gap between the two `/proc/stat` reads of a detailed sample.
pub const DETAILED_SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Workload profile a recommendation is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyKind {
    Cpu,
    Io,
    Network,
    Mixed,
}

impl ConcurrencyKind {
    pub const ALL: [ConcurrencyKind; 4] = [
        ConcurrencyKind::Cpu,
        ConcurrencyKind::Io,
        ConcurrencyKind::Network,
        ConcurrencyKind::Mixed,
    ];

    /// Baseline worker count for this kind on a host with `cores` cores.
    pub fn base_cores(&self, cores: usize) -> usize {
        let cores = cores.max(1);
        match self {
            ConcurrencyKind::Cpu => cores,
            ConcurrencyKind::Io => cores * 2,
            ConcurrencyKind::Network => cores * 4,
            ConcurrencyKind::Mixed => (cores * 3).div_ceil(2),
        }
    }
}

impl std::fmt::Display for ConcurrencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConcurrencyKind::Cpu => "cpu",
            ConcurrencyKind::Io => "io",
            ConcurrencyKind::Network => "network",
            ConcurrencyKind::Mixed => "mixed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ConcurrencyKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(ConcurrencyKind::Cpu),
            "io" => Ok(ConcurrencyKind::Io),
            "network" | "net" => Ok(ConcurrencyKind::Network),
            "mixed" => Ok(ConcurrencyKind::Mixed),
            other => Err(crate::error::Error::Validation(format!(
                "Unknown concurrency kind: {}",
                other
            ))),
        }
    }
}

/// A point-in-time view of host pressure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_load_percent: f64,
    pub memory_pressure_percent: f64,
    pub io_wait_percent: f64,
    pub available_memory_bytes: Option<u64>,
    pub logical_cores: usize,
    pub sampled_at: DateTime<Utc>,
    /// Which of the percentages were made up rather than measured.
    pub heuristic: HeuristicFlags,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeuristicFlags {
    pub cpu: bool,
    pub memory: bool,
    pub io_wait: bool,
}

impl HeuristicFlags {
    pub fn any(&self) -> bool {
        self.cpu || self.memory || self.io_wait
    }
}

/// Safe-concurrency bounds for one workload kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyRecommendation {
    pub kind: ConcurrencyKind,
    pub optimal: usize,
    pub max_safe: usize,
    pub computed_at: DateTime<Utc>,
}

/// Raw platform readings. Every figure is optional; missing ones are filled
/// in heuristically by the controller.
pub trait MetricsProbe: Send + Sync {
    fn logical_cores(&self) -> usize;

    /// Load as a percentage of the host's capacity.
    fn cpu_load_percent(&self) -> Option<f64>;

    /// `(total, available)` memory in bytes.
    fn memory(&self) -> Option<(u64, u64)>;

    /// I/O wait percentage. `detailed` asks for a short measured interval
    /// instead of the since-boot ratio.
    fn io_wait_percent(&self, detailed: bool) -> Option<f64>;
}

/// Reads `/proc` on Linux. On other platforms every reading is `None`.
#[derive(Debug, Clone)]
pub struct ProcProbe {
    proc_root: std::path::PathBuf,
}

impl Default for ProcProbe {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcProbe {
    pub fn new(proc_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    fn read(&self, file: &str) -> Option<String> {
        std::fs::read_to_string(self.proc_root.join(file)).ok()
    }

    fn cpu_times(&self) -> Option<CpuTimes> {
        self.read("stat").and_then(|s| parse_cpu_times(&s))
    }
}

impl MetricsProbe for ProcProbe {
    fn logical_cores(&self) -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    fn cpu_load_percent(&self) -> Option<f64> {
        let load = parse_loadavg(&self.read("loadavg")?)?;
        Some((load / self.logical_cores() as f64 * 100.0).clamp(0.0, 100.0))
    }

    fn memory(&self) -> Option<(u64, u64)> {
        parse_meminfo(&self.read("meminfo")?)
    }

    fn io_wait_percent(&self, detailed: bool) -> Option<f64> {
        let first = self.cpu_times()?;
        if !detailed {
            return first.io_wait_ratio(None);
        }
        std::thread::sleep(DETAILED_SAMPLE_INTERVAL);
        let second = self.cpu_times()?;
        second.io_wait_ratio(Some(&first))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    total: u64,
    iowait: u64,
}

impl CpuTimes {
    fn io_wait_ratio(&self, since: Option<&CpuTimes>) -> Option<f64> {
        let (total, iowait) = match since {
            Some(prev) => (
                self.total.saturating_sub(prev.total),
                self.iowait.saturating_sub(prev.iowait),
            ),
            None => (self.total, self.iowait),
        };
        if total == 0 {
            return None;
        }
        Some(iowait as f64 / total as f64 * 100.0)
    }
}

/// First field of `/proc/loadavg`.
fn parse_loadavg(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

/// `MemTotal` and `MemAvailable` from `/proc/meminfo`, in bytes.
fn parse_meminfo(content: &str) -> Option<(u64, u64)> {
    let mut total = None;
    let mut available = None;
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let key = parts.next();
        let kib: Option<u64> = parts.next().and_then(|v| v.parse().ok());
        match key {
            Some("MemTotal:") => total = kib,
            Some("MemAvailable:") => available = kib,
            _ => {}
        }
    }
    Some((total? * 1024, available? * 1024))
}

/// The aggregate `cpu` line of `/proc/stat`.
fn parse_cpu_times(content: &str) -> Option<CpuTimes> {
    let line = content.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    // user nice system idle iowait ...
    let iowait = *fields.get(4)?;
    Some(CpuTimes {
        total: fields.iter().sum(),
        iowait,
    })
}

/// True when running unattended: CI, a container, or no terminal.
pub fn detect_automated_environment() -> bool {
    const CI_VARS: [&str; 6] = [
        "CI",
        "GITHUB_ACTIONS",
        "GITLAB_CI",
        "JENKINS_URL",
        "BUILDKITE",
        "TF_BUILD",
    ];
    let ci = CI_VARS.iter().any(|v| std::env::var_os(v).is_some());
    let container = std::env::var_os("container").is_some()
        || Path::new("/.dockerenv").exists()
        || Path::new("/run/.containerenv").exists();
    let headless = !std::io::stdin().is_terminal();
    shlog_trace!(
        "environment detection: ci={} container={} headless={}",
        ci,
        container,
        headless
    );
    ci || container || headless
}

/// Pure recommendation formula.
pub fn compute_recommendation(
    kind: ConcurrencyKind,
    snapshot: &ResourceSnapshot,
    automated: bool,
) -> ConcurrencyRecommendation {
    let base = kind.base_cores(snapshot.logical_cores);
    let memory_factor = snapshot
        .available_memory_bytes
        .map(|b| (b as f64 / GIB / 4.0).clamp(0.5, 1.5))
        .unwrap_or(1.0);
    let load_factor = (1.0 - snapshot.cpu_load_percent / 100.0).clamp(0.3, 1.0);
    let environment_factor = if automated { 0.7 } else { 1.0 };

    let optimal =
        ((base as f64 * memory_factor * load_factor * environment_factor).floor() as usize).max(1);
    let max_safe = (base * 2)
        .min((optimal as f64 * 1.5).floor() as usize)
        .max(2);

    ConcurrencyRecommendation {
        kind,
        optimal,
        max_safe,
        computed_at: Utc::now(),
    }
}

/// Samples the host and caches per-kind recommendations.
pub struct ThrottleController {
    probe: Arc<dyn MetricsProbe>,
    automated: bool,
    ttl: Duration,
    cache: Mutex<HashMap<ConcurrencyKind, (Instant, ConcurrencyRecommendation)>>,
}

impl ThrottleController {
    /// Controller over `/proc` with environment auto-detection.
    pub fn new() -> Self {
        Self::with_probe(
            Arc::new(ProcProbe::default()),
            detect_automated_environment(),
        )
    }

    pub fn with_probe(probe: Arc<dyn MetricsProbe>, automated: bool) -> Self {
        Self {
            probe,
            automated,
            ttl: Duration::from_secs(DEFAULT_RECOMMENDATION_TTL_SECS),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn is_automated(&self) -> bool {
        self.automated
    }

    pub fn sample(&self, detailed: bool) -> ResourceSnapshot {
        let mut rng = rand::thread_rng();
        let mut heuristic = HeuristicFlags::default();

        let cpu_load_percent = self.probe.cpu_load_percent().unwrap_or_else(|| {
            heuristic.cpu = true;
            rng.gen_range(15.0..=45.0)
        });

        let memory = self.probe.memory();
        let memory_pressure_percent = match memory {
            Some((total, available)) if total > 0 => {
                (1.0 - available as f64 / total as f64) * 100.0
            }
            _ => {
                heuristic.memory = true;
                rng.gen_range(15.0..=45.0)
            }
        };

        let io_wait_percent = self.probe.io_wait_percent(detailed).unwrap_or_else(|| {
            heuristic.io_wait = true;
            rng.gen_range(15.0..=45.0)
        });

        let snapshot = ResourceSnapshot {
            cpu_load_percent,
            memory_pressure_percent,
            io_wait_percent,
            available_memory_bytes: memory.map(|(_, available)| available),
            logical_cores: self.probe.logical_cores().max(1),
            sampled_at: Utc::now(),
            heuristic,
        };
        shlog_debug!(
            "Resource sample: cpu={:.1}% mem={:.1}% iowait={:.1}% heuristic={}",
            snapshot.cpu_load_percent,
            snapshot.memory_pressure_percent,
            snapshot.io_wait_percent,
            snapshot.heuristic.any()
        );
        snapshot
    }

    /// Cached for the controller's TTL per kind.
    pub fn recommend(&self, kind: ConcurrencyKind) -> ConcurrencyRecommendation {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((at, rec)) = cache.get(&kind) {
            if at.elapsed() < self.ttl {
                return rec.clone();
            }
        }

        let snapshot = self.sample(false);
        let rec = compute_recommendation(kind, &snapshot, self.automated);
        shlog_debug!(
            "Concurrency recommendation for {}: optimal={} max_safe={}",
            kind,
            rec.optimal,
            rec.max_safe
        );
        cache.insert(kind, (Instant::now(), rec.clone()));
        rec
    }

    pub fn clear_cache(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Default for ThrottleController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ThrottleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleController")
            .field("automated", &self.automated)
            .field("ttl", &self.ttl)
            .finish()
    }
}
