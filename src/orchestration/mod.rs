//! Orchestration layer: bringing units online.
//!
//! The [`Orchestrator`] turns a resolved order into a grouped [`LoadPlan`],
//! runs it through the [`GroupedLoader`] with bounds from the
//! [`ThrottleController`], and records successes in the
//! [`ActivationCache`].

mod activator;
mod cache;
mod health;
mod loader;
mod metrics;
mod orchestrator;
mod state;

pub use activator::{Activator, FsActivator, Location};
pub use cache::{ActivationCache, Claim};
pub use health::{assess as assess_health, HealthReport};
pub use loader::{
    GroupedLoader, LoadOptions, LoadPlan, LoadResult, LoadStatus, OrchestrationMode,
    OrchestrationReport, Severity,
};
pub use metrics::{
    compute_recommendation, detect_automated_environment, ConcurrencyKind,
    ConcurrencyRecommendation, HeuristicFlags, MetricsProbe, ProcProbe, ResourceSnapshot,
    ThrottleController,
};
pub use orchestrator::Orchestrator;
pub use state::{OrchestratorState, StateHistoryEntry, StateMachine};
