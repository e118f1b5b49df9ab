//! The orchestration entry point.
//!
//! The [`Orchestrator`] owns the dependency graph and the activation cache
//! for its lifetime. Each run resolves a plan, hands it to the
//! [`GroupedLoader`] and walks the lifecycle state machine. When the
//! dependency graph cannot be built the run degrades to the source's
//! declaration order, required units only, one at a time.

use std::sync::Arc;
use std::time::Duration;

use super::activator::{Activator, FsActivator};
use super::cache::ActivationCache;
use super::health::{self, HealthReport};
use super::loader::{GroupedLoader, LoadOptions, LoadPlan, OrchestrationMode, OrchestrationReport};
use super::metrics::ThrottleController;
use super::state::{OrchestratorState, StateHistoryEntry, StateMachine};
use crate::config::{Config, DEFAULT_LOGGING_UNIT};
use crate::core::graph::DependencyGraph;
use crate::core::resolver::{ResolvedOrder, Resolver};
use crate::core::unit::{validate_unit_name, UnitDescriptor, UnitStatus};
use crate::error::Result;
use crate::registry::{build_graph, FilesystemScan, StaticRegistry, UnitLocator, UnitSource};
use crate::{shlog, shlog_debug, shlog_error, shlog_warn};

pub struct Orchestrator {
    source: Arc<dyn UnitSource>,
    locator: UnitLocator,
    resolver: Resolver,
    include_optional: bool,
    unit_timeout: Option<Duration>,
    cache: Arc<ActivationCache>,
    throttle: Arc<ThrottleController>,
    activator: Arc<dyn Activator>,
    graph: Option<DependencyGraph>,
    state: StateMachine,
    last_health: Option<HealthReport>,
    last_report: Option<OrchestrationReport>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn UnitSource>,
        locator: UnitLocator,
        activator: Arc<dyn Activator>,
    ) -> Self {
        Self {
            source,
            locator,
            resolver: Resolver::new(DEFAULT_LOGGING_UNIT),
            include_optional: false,
            unit_timeout: None,
            cache: Arc::new(ActivationCache::new()),
            throttle: Arc::new(ThrottleController::new()),
            activator,
            graph: None,
            state: StateMachine::new(),
            last_health: None,
            last_report: None,
        }
    }

    /// Wire up discovery, location and activation from configuration.
    ///
    /// A configured registry file selects [`StaticRegistry`]; otherwise the
    /// units search path is scanned.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let project_root = config.effective_project_root();
        let search_paths = config.effective_units_path();
        let locator = UnitLocator::new(&project_root, search_paths.clone());

        let source: Arc<dyn UnitSource> = match config.registry_path() {
            Some(path) => Arc::new(StaticRegistry::from_file(&path, &project_root)?),
            None => Arc::new(FilesystemScan::new(search_paths)),
        };
        shlog_debug!(
            "Orchestrator::from_config root={} source={}",
            project_root.display(),
            source.kind()
        );

        let activator = Arc::new(FsActivator::new(locator.clone()));
        let throttle = ThrottleController::new().with_ttl(config.recommendation_ttl());

        Ok(Self::new(source, locator, activator)
            .with_logging_unit(&config.logging_unit)
            .with_optional_dependencies(config.include_optional)
            .with_unit_timeout(config.unit_timeout())
            .with_throttle(Arc::new(throttle)))
    }

    pub fn with_logging_unit(mut self, name: &str) -> Self {
        self.resolver = Resolver::new(name);
        self
    }

    pub fn with_optional_dependencies(mut self, include: bool) -> Self {
        self.include_optional = include;
        self.graph = None;
        self
    }

    pub fn with_unit_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.unit_timeout = timeout;
        self
    }

    pub fn with_throttle(mut self, throttle: Arc<ThrottleController>) -> Self {
        self.throttle = throttle;
        self
    }

    /// Share an activation cache, e.g. between orchestrators.
    pub fn with_cache(mut self, cache: Arc<ActivationCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<ActivationCache> {
        &self.cache
    }

    pub fn throttle(&self) -> &Arc<ThrottleController> {
        &self.throttle
    }

    pub fn state(&self) -> OrchestratorState {
        self.state.current()
    }

    pub fn state_history(&self) -> &[StateHistoryEntry] {
        self.state.history()
    }

    pub fn last_health(&self) -> Option<&HealthReport> {
        self.last_health.as_ref()
    }

    pub fn last_report(&self) -> Option<&OrchestrationReport> {
        self.last_report.as_ref()
    }

    /// The dependency graph, built on first use.
    pub fn graph(&mut self) -> Result<&DependencyGraph> {
        let graph = match self.graph.take() {
            Some(graph) => graph,
            None => build_graph(self.source.as_ref(), &self.locator, self.include_optional)?,
        };
        Ok(&*self.graph.insert(graph))
    }

    /// Drop the cached graph and rebuild it from the source.
    pub fn refresh_graph(&mut self) -> Result<&DependencyGraph> {
        self.graph = None;
        self.graph()
    }

    /// Activation order for the whole graph or for `subset` and its
    /// dependencies.
    pub fn resolve(&mut self, subset: Option<&[String]>) -> Result<ResolvedOrder> {
        let resolver = self.resolver.clone();
        let graph = self.graph()?;
        Ok(resolver.resolve(graph, subset))
    }

    /// Bring the system to the requested state and report what happened.
    ///
    /// Only lifecycle violations are errors; everything that goes wrong with
    /// discovery or individual units is in the report.
    pub async fn load_all(
        &mut self,
        required_only: bool,
        force: bool,
        concurrency_override: Option<usize>,
    ) -> Result<OrchestrationReport> {
        let (_, report) = self
            .run(required_only, force, concurrency_override)
            .await?;
        Ok(report)
    }

    /// Load and health-check. False when nothing is active afterwards or a
    /// required unit in the plan is not active.
    ///
    /// Units left active by an earlier run count as active here, so a re-run
    /// that imports nothing because every unit is already loaded is healthy.
    pub async fn initialize(&mut self, required_only: bool, force: bool) -> bool {
        self.initialize_with_concurrency(required_only, force, None)
            .await
    }

    pub async fn initialize_with_concurrency(
        &mut self,
        required_only: bool,
        force: bool,
        concurrency_override: Option<usize>,
    ) -> bool {
        match self.run(required_only, force, concurrency_override).await {
            Ok((plan, report)) => {
                let health = health::assess(&plan, &report, &self.cache);
                let healthy = health.healthy;
                self.last_health = Some(health);
                healthy
            }
            Err(e) => {
                shlog_error!("Initialization failed: {}", e);
                false
            }
        }
    }

    async fn run(
        &mut self,
        required_only: bool,
        force: bool,
        concurrency_override: Option<usize>,
    ) -> Result<(LoadPlan, OrchestrationReport)> {
        if self.state.is_interrupted() {
            shlog_warn!(
                "Previous run stopped in state {}; resolving again",
                self.state.current()
            );
        }
        self.state.transition(OrchestratorState::Resolving)?;

        let (plan, mode) = match self.plan(required_only) {
            Ok(plan) => (plan, OrchestrationMode::DependencyAware),
            Err(e) => {
                if e.triggers_fallback() {
                    shlog_warn!("{}; falling back to declaration order", e);
                } else {
                    shlog_error!("Dependency resolution failed: {}; falling back", e);
                }
                self.state.transition(OrchestratorState::DegradedFallback)?;
                (self.fallback_plan(), OrchestrationMode::DegradedFallback)
            }
        };

        let options = LoadOptions {
            force,
            concurrency_override,
            unit_timeout: self.unit_timeout,
        };
        let loader = GroupedLoader::new(
            Arc::clone(&self.activator),
            Arc::clone(&self.cache),
            Arc::clone(&self.throttle),
        );
        let report = loader.load(&plan, mode, &options).await;

        self.state.transition(OrchestratorState::Loaded)?;
        self.last_report = Some(report.clone());
        Ok((plan, report))
    }

    fn plan(&mut self, required_only: bool) -> Result<LoadPlan> {
        let resolver = self.resolver.clone();
        let graph = self.graph()?;

        let subset: Option<Vec<String>> = required_only.then(|| {
            graph
                .units()
                .filter(|u| u.required || u.name.eq_ignore_ascii_case(resolver.logging_unit()))
                .map(|u| u.name.clone())
                .collect()
        });
        let order = resolver.resolve(graph, subset.as_deref());
        if let Err(e) = order.ensure_acyclic() {
            shlog_warn!("{}; members load after everything else", e);
        }
        shlog!(
            "Resolved {} units into {} groups",
            order.len(),
            order.groups().len()
        );
        Ok(LoadPlan::from_resolved(&order, graph))
    }

    /// Declaration order, required units only, strictly sequential.
    fn fallback_plan(&self) -> LoadPlan {
        let units: Vec<UnitDescriptor> = self
            .source
            .declared()
            .into_iter()
            .filter(|entry| entry.required)
            .filter(|entry| validate_unit_name(&entry.name).is_ok())
            .map(|entry| UnitDescriptor::from_entry(&entry, None))
            .collect();
        shlog_warn!(
            "Degraded fallback: activating {} required units sequentially",
            units.len()
        );
        LoadPlan::sequential(units)
    }

    /// Status of every known unit, requested or not.
    pub fn get_status(&mut self) -> Vec<UnitStatus> {
        let units: Vec<UnitDescriptor> = match self.graph() {
            Ok(graph) => graph.units().cloned().collect(),
            Err(e) => {
                shlog_debug!("Status from declarations: {}", e);
                self.source
                    .declared()
                    .iter()
                    .map(|entry| UnitDescriptor::from_entry(entry, None))
                    .collect()
            }
        };

        units
            .into_iter()
            .map(|unit| {
                let record = self.cache.get(&unit.name);
                UnitStatus {
                    available: self.locator.is_available(&unit.location),
                    active: record.is_some(),
                    last_activated_at: record.map(|r| r.activated_at),
                    required: unit.required,
                    name: unit.name,
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("source", &self.source.kind())
            .field("locator", &self.locator)
            .field("resolver", &self.resolver)
            .field("state", &self.state.current())
            .field("graph", &self.graph)
            .finish()
    }
}
