use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Registry unavailable at {}: {reason}", path.display())]
    RegistryUnavailable { path: PathBuf, reason: String },

    #[error("Manifest unreadable for unit {unit}: {reason}")]
    ManifestUnreadable { unit: String, reason: String },

    #[error("Circular dependency among: {}", members.join(", "))]
    CircularDependency { members: Vec<String> },

    #[error("Activation of {unit} failed: {reason}")]
    ActivationFailed { unit: String, reason: String },

    #[error("Concurrency unavailable: {0}")]
    ConcurrencyUnavailable(String),

    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

impl Error {
    /// True for failures that only disable dependency-aware mode.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            Error::RegistryUnavailable { .. } | Error::CircularDependency { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
