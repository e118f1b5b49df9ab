//! Core domain model for unit orchestration.
//!
//! Units, the dependency graph built from them, and the topological resolver
//! that turns the graph into a grouped activation order. Everything here is
//! pure in-memory logic; discovery and activation live elsewhere.

pub mod graph;
pub mod resolver;
pub mod unit;

pub use graph::{DependencyGraph, DependencyKind, GraphView, PhantomEdge};
pub use resolver::{dependency_closure, ResolvedOrder, Resolver};
pub use unit::{
    validate_unit_name, ActivationRecord, RegistryEntry, UnitDescriptor, UnitManifest,
    UnitStatus, MANIFEST_FILE,
};
