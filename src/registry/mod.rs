//! Unit discovery and graph construction.
//!
//! A [`UnitSource`] yields the catalog of known units. The [`builder`] reads
//! each unit's manifest through the [`UnitLocator`] and produces the
//! in-memory [`DependencyGraph`](crate::core::DependencyGraph); nothing past
//! this module touches the filesystem to learn about dependencies.

pub mod builder;
mod locator;
mod scan;
mod static_registry;

pub use builder::{build_graph, read_descriptors};
pub use locator::UnitLocator;
pub use scan::FilesystemScan;
pub use static_registry::StaticRegistry;

use crate::core::unit::RegistryEntry;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Which discovery strategy a source uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    StaticRegistry,
    FilesystemScan,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::StaticRegistry => write!(f, "static registry"),
            SourceKind::FilesystemScan => write!(f, "filesystem scan"),
        }
    }
}

/// A catalog of known units.
pub trait UnitSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Entries in declaration order.
    ///
    /// # Errors
    /// `RegistryUnavailable` when the registry location cannot be reached.
    fn discover(&self) -> Result<Vec<RegistryEntry>>;

    /// Declaration order used when `discover` fails. May be empty.
    fn declared(&self) -> Vec<RegistryEntry>;
}
