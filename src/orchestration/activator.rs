//! Bringing a single unit online.
//!
//! The loader only decides *when* a unit activates. [`Activator`] decides
//! *where* it lives and *how* it comes up, so tests can swap in fakes.

use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;

use crate::core::unit::{UnitDescriptor, UnitManifest, MANIFEST_FILE};
use crate::error::{Error, Result};
use crate::registry::UnitLocator;
use crate::shlog_debug;

/// Where a unit's files were found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Found { dir: PathBuf, entries: Vec<PathBuf> },
    /// The location reference resolves to nothing.
    PathNotFound,
    /// The directory exists but holds nothing to activate.
    NoEntries(PathBuf),
}

pub trait Activator: Send + Sync {
    fn locate(&self, unit: &UnitDescriptor) -> Location;

    /// Activate a located unit and return how many entries were brought up.
    fn activate<'a>(
        &'a self,
        unit: &'a UnitDescriptor,
        location: &'a Path,
    ) -> BoxFuture<'a, Result<usize>>;
}

/// Activates units from their directories on disk.
///
/// Entries are the manifest's `entries` that exist, or every file in the
/// unit directory besides the manifest when none are listed. If the
/// manifest names an `activate` command it is run through `sh -c` inside the
/// unit directory and must exit successfully.
#[derive(Debug, Clone)]
pub struct FsActivator {
    locator: UnitLocator,
}

impl FsActivator {
    pub fn new(locator: UnitLocator) -> Self {
        Self { locator }
    }

    pub fn locator(&self) -> &UnitLocator {
        &self.locator
    }

    fn entries(dir: &Path, manifest: Option<&UnitManifest>) -> Vec<PathBuf> {
        match manifest {
            Some(m) if !m.entries.is_empty() => m
                .entries
                .iter()
                .map(|e| dir.join(e))
                .filter(|p| p.exists())
                .collect(),
            _ => {
                let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
                    .into_iter()
                    .flatten()
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .filter(|p| p.is_file() && p.file_name().is_some_and(|n| n != MANIFEST_FILE))
                    .collect();
                files.sort();
                files
            }
        }
    }

    async fn run_command(command: &str, dir: &Path) -> Result<Output> {
        // Without a tokio reactor (sequential fallback under a plain
        // executor) the child is run synchronously.
        if tokio::runtime::Handle::try_current().is_err() {
            return Ok(std::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(dir)
                .output()?);
        }
        Ok(Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(dir)
            .kill_on_drop(true)
            .output()
            .await?)
    }
}

impl Activator for FsActivator {
    fn locate(&self, unit: &UnitDescriptor) -> Location {
        let Some(dir) = self.locator.resolve(&unit.location) else {
            return Location::PathNotFound;
        };
        let manifest = UnitManifest::read(&dir).ok();
        let entries = Self::entries(&dir, manifest.as_ref());
        if entries.is_empty() && manifest.as_ref().and_then(|m| m.activate.as_ref()).is_none() {
            return Location::NoEntries(dir);
        }
        Location::Found { dir, entries }
    }

    fn activate<'a>(
        &'a self,
        unit: &'a UnitDescriptor,
        location: &'a Path,
    ) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            let manifest = UnitManifest::read(location).ok();
            let entry_count = Self::entries(location, manifest.as_ref()).len();

            if let Some(command) = manifest.as_ref().and_then(|m| m.activate.as_deref()) {
                shlog_debug!("Activating {} with `{}`", unit.name, command);
                let output = Self::run_command(command, location).await?;
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let reason = if stderr.trim().is_empty() {
                        format!(
                            "activate command exited with code {}",
                            output.status.code().unwrap_or(-1)
                        )
                    } else {
                        stderr.trim().to_string()
                    };
                    return Err(Error::ActivationFailed {
                        unit: unit.name.clone(),
                        reason,
                    });
                }
            }

            Ok(entry_count)
        })
    }
}
