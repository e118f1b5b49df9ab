//! stagehand: dependency-aware bring-up of capability units.
//!
//! Units are discovered through a [`registry::UnitSource`], ordered by the
//! [`core::Resolver`] and activated group by group by the
//! [`orchestration::Orchestrator`], with concurrency bounded by host load.

pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod registry;
pub mod report;

pub use config::Config;
pub use core::{DependencyGraph, ResolvedOrder, Resolver, UnitDescriptor, UnitStatus};
pub use error::{Error, Result};
pub use orchestration::{
    ActivationCache, GroupedLoader, LoadStatus, OrchestrationReport, Orchestrator,
    OrchestratorState, ThrottleController,
};
pub use registry::{FilesystemScan, StaticRegistry, UnitLocator, UnitSource};
