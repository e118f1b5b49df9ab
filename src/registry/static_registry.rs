//! Declarative unit catalog loaded from a TOML registry file.
//!
//! ```toml
//! [[unit]]
//! name = "Logging"
//! location = "units/logging"
//! description = "Structured logging"
//! required = true
//! ```
//!
//! Declaration order is significant: it is the resolver's tie-break order
//! and the activation order in fallback mode.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::{SourceKind, UnitSource};
use crate::core::unit::RegistryEntry;
use crate::error::{Error, Result};
use crate::shlog_debug;

#[derive(Debug, Default, Deserialize)]
struct RegistryFile {
    #[serde(rename = "unit", default)]
    units: Vec<RegistryEntry>,
}

/// A fixed list of units whose manifests live under `root`.
#[derive(Debug, Clone)]
pub struct StaticRegistry {
    entries: Vec<RegistryEntry>,
    root: PathBuf,
}

impl StaticRegistry {
    pub fn new(entries: Vec<RegistryEntry>, root: impl Into<PathBuf>) -> Self {
        Self {
            entries,
            root: root.into(),
        }
    }

    /// Parse registry TOML.
    pub fn parse(content: &str, root: impl Into<PathBuf>) -> Result<Self> {
        let file: RegistryFile = toml::from_str(content)?;
        Ok(Self::new(file.units, root))
    }

    /// Load a registry file. Failing to read the file is a configuration
    /// error, not `RegistryUnavailable`: without it there is no declaration
    /// order to fall back to.
    pub fn from_file(path: &Path, root: impl Into<PathBuf>) -> Result<Self> {
        shlog_debug!("StaticRegistry::from_file path={}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, root)
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl UnitSource for StaticRegistry {
    fn kind(&self) -> SourceKind {
        SourceKind::StaticRegistry
    }

    fn discover(&self) -> Result<Vec<RegistryEntry>> {
        if !self.root.is_dir() {
            return Err(Error::RegistryUnavailable {
                path: self.root.clone(),
                reason: "registry root is not a reachable directory".to_string(),
            });
        }
        Ok(self.entries.clone())
    }

    fn declared(&self) -> Vec<RegistryEntry> {
        self.entries.clone()
    }
}
