use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{shlog_debug, Error, Result};

/// Default name of the unit that is always activated first.
pub const DEFAULT_LOGGING_UNIT: &str = "Logging";

/// Default lifetime of a cached concurrency recommendation.
pub const DEFAULT_RECOMMENDATION_TTL_SECS: u64 = 300; // 5 minutes

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Root that relative unit locations resolve against.
    pub project_root: Option<String>,
    /// Extra directories searched for units.
    #[serde(default)]
    pub units_path: Vec<String>,
    /// Static registry file. Without one, units are discovered by scanning.
    pub registry: Option<String>,
    #[serde(default = "default_logging_unit")]
    pub logging_unit: String,
    #[serde(default)]
    pub include_optional: bool,
    /// Fixed per-group concurrency, bypassing the throttle recommendation.
    pub concurrency: Option<usize>,
    pub unit_timeout_secs: Option<u64>,
    #[serde(default = "default_recommendation_ttl")]
    pub recommendation_ttl_secs: u64,
}

fn default_logging_unit() -> String {
    DEFAULT_LOGGING_UNIT.to_string()
}

fn default_recommendation_ttl() -> u64 {
    DEFAULT_RECOMMENDATION_TTL_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_root: None,
            units_path: Vec::new(),
            registry: None,
            logging_unit: default_logging_unit(),
            include_optional: false,
            concurrency: None,
            unit_timeout_secs: None,
            recommendation_ttl_secs: DEFAULT_RECOMMENDATION_TTL_SECS,
        }
    }
}

impl Config {
    pub fn stagehand_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".stagehand"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::stagehand_dir()?.join("stagehand.toml"))
    }

    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env();
        Ok(config)
    }

    /// Load from an explicit file; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        shlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            shlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        shlog_debug!(
            "Config loaded: project_root={:?}, registry={:?}, units_path={:?}",
            config.project_root,
            config.registry,
            config.units_path
        );
        Ok(config)
    }

    /// `STAGEHAND_PROJECT_ROOT` and `STAGEHAND_UNITS_PATH` take precedence over the file.
    pub fn apply_env(&mut self) {
        if let Ok(root) = std::env::var("STAGEHAND_PROJECT_ROOT") {
            if !root.is_empty() {
                self.project_root = Some(root);
            }
        }
        if let Ok(paths) = std::env::var("STAGEHAND_UNITS_PATH") {
            let parsed = split_search_path(&paths);
            if !parsed.is_empty() {
                self.units_path = parsed;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == Some(0) {
            return Err(Error::Validation(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.logging_unit.trim().is_empty() {
            return Err(Error::Validation("logging_unit cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Project root, falling back to the current directory.
    pub fn effective_project_root(&self) -> PathBuf {
        match &self.project_root {
            Some(root) => expand_tilde(root),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Units search path; defaults to `<project_root>/units`.
    pub fn effective_units_path(&self) -> Vec<PathBuf> {
        if self.units_path.is_empty() {
            return vec![self.effective_project_root().join("units")];
        }
        self.units_path.iter().map(|p| expand_tilde(p)).collect()
    }

    pub fn registry_path(&self) -> Option<PathBuf> {
        self.registry.as_deref().map(expand_tilde)
    }

    pub fn unit_timeout(&self) -> Option<Duration> {
        self.unit_timeout_secs.map(Duration::from_secs)
    }

    pub fn recommendation_ttl(&self) -> Duration {
        Duration::from_secs(self.recommendation_ttl_secs)
    }
}

/// Split a platform search path (`:` on unix, `;` on windows).
pub fn split_search_path(value: &str) -> Vec<String> {
    std::env::split_paths(value)
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_string_lossy().into_owned())
        .collect()
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
