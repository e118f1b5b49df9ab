//! Unit data model.
//!
//! A unit is an independently activatable capability package. Sources
//! declare [`RegistryEntry`] values; once the unit's manifest has been read
//! the entry becomes an immutable [`UnitDescriptor`].

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

use crate::error::{Error, Result};

/// File name of the manifest inside a unit directory.
pub const MANIFEST_FILE: &str = "unit.toml";

static UNIT_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap());

/// Check that a unit name is usable as a graph key and on the command line.
pub fn validate_unit_name(name: &str) -> Result<()> {
    if UNIT_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::Validation(format!("Invalid unit name: {:?}", name)))
    }
}

/// A unit as declared by a source, before its manifest is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    /// Directory reference, absolute or relative to the project root / units path.
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl RegistryEntry {
    pub fn new(name: &str, location: &str) -> Self {
        Self {
            name: name.to_string(),
            location: location.to_string(),
            description: String::new(),
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// The manifest stored as `unit.toml` in a unit directory.
///
/// Only dependency lists matter to ordering; the remaining fields are
/// optional metadata used by discovery and activation. Unknown keys are
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub required: Option<bool>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub optional_dependencies: Vec<String>,
    /// Entry files relative to the unit directory.
    #[serde(default)]
    pub entries: Vec<String>,
    /// Command run inside the unit directory to activate it.
    pub activate: Option<String>,
}

impl UnitManifest {
    /// Read `unit.toml` from a unit directory.
    pub fn read(unit_dir: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(unit_dir.join(MANIFEST_FILE))?;
        Ok(toml::from_str(&content)?)
    }
}

/// Immutable description of a unit with its declared dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    pub name: String,
    pub location: String,
    pub description: String,
    pub required: bool,
    /// Declared dependencies, deduplicated, declaration order kept.
    pub dependencies: Vec<String>,
    pub optional_dependencies: Vec<String>,
}

impl UnitDescriptor {
    /// Build a descriptor from an entry and (optionally) its manifest.
    pub fn from_entry(entry: &RegistryEntry, manifest: Option<&UnitManifest>) -> Self {
        let (dependencies, optional_dependencies, description) = match manifest {
            Some(m) => (
                dedup(&m.dependencies),
                dedup(&m.optional_dependencies),
                m.description.clone(),
            ),
            None => (Vec::new(), Vec::new(), None),
        };
        let description = if entry.description.is_empty() {
            description.unwrap_or_default()
        } else {
            entry.description.clone()
        };
        Self {
            name: entry.name.clone(),
            location: entry.location.clone(),
            description,
            required: entry.required,
            dependencies,
            optional_dependencies,
        }
    }

    /// Descriptor with the given dependencies and no manifest on disk.
    pub fn new(name: &str, dependencies: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            location: name.to_lowercase(),
            description: String::new(),
            required: false,
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            optional_dependencies: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_optional(mut self, optional: &[&str]) -> Self {
        self.optional_dependencies = optional.iter().map(|d| d.to_string()).collect();
        self
    }
}

fn dedup(names: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty() && seen.insert(n.to_string()))
        .map(str::to_string)
        .collect()
}

/// Proof of a successful activation, kept for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRecord {
    pub name: String,
    pub location: String,
    pub activated_at: DateTime<Utc>,
    pub description: String,
    pub entry_count: usize,
}

impl ActivationRecord {
    pub fn new(unit: &UnitDescriptor, entry_count: usize) -> Self {
        Self {
            name: unit.name.clone(),
            location: unit.location.clone(),
            activated_at: Utc::now(),
            description: unit.description.clone(),
            entry_count,
        }
    }
}

/// Status line for one known unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub name: String,
    pub required: bool,
    /// The location reference resolves to a directory.
    pub available: bool,
    pub active: bool,
    pub last_activated_at: Option<DateTime<Utc>>,
}
