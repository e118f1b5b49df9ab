//! Unit discovery by scanning the units search path for manifests.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{SourceKind, UnitSource};
use crate::core::unit::{RegistryEntry, UnitManifest, MANIFEST_FILE};
use crate::error::{Error, Result};
use crate::{shlog_debug, shlog_warn};

/// Discovers units as `<search path>/<dir>/unit.toml`.
///
/// Directories are visited in search-path order and, within a directory,
/// by file name, so discovery order is stable across runs. The first unit
/// found with a given name shadows later ones.
#[derive(Debug)]
pub struct FilesystemScan {
    search_paths: Vec<PathBuf>,
    /// Last successful scan, served as the fallback declaration list.
    last_scan: Mutex<Vec<RegistryEntry>>,
}

impl FilesystemScan {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            last_scan: Mutex::new(Vec::new()),
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    fn scan_dir(dir: &Path, found: &mut Vec<RegistryEntry>) -> Result<()> {
        let mut children: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir() && path.join(MANIFEST_FILE).is_file())
            .collect();
        children.sort();

        for child in children {
            let dir_name = child
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            // A broken manifest still yields an entry; the graph builder
            // reports it and treats the unit as dependency-free.
            let manifest = UnitManifest::read(&child).unwrap_or_default();
            let name = manifest.name.clone().unwrap_or(dir_name);
            if found.iter().any(|e| e.name == name) {
                shlog_warn!(
                    "Unit {} at {} shadowed by an earlier search path entry",
                    name,
                    child.display()
                );
                continue;
            }
            found.push(RegistryEntry {
                name,
                location: child.to_string_lossy().into_owned(),
                description: manifest.description.unwrap_or_default(),
                required: manifest.required.unwrap_or(false),
            });
        }
        Ok(())
    }
}

impl UnitSource for FilesystemScan {
    fn kind(&self) -> SourceKind {
        SourceKind::FilesystemScan
    }

    fn discover(&self) -> Result<Vec<RegistryEntry>> {
        let reachable: Vec<&PathBuf> = self.search_paths.iter().filter(|p| p.is_dir()).collect();
        if reachable.is_empty() {
            return Err(Error::RegistryUnavailable {
                path: self.search_paths.first().cloned().unwrap_or_default(),
                reason: "no units search path entry is a reachable directory".to_string(),
            });
        }

        let mut found = Vec::new();
        for dir in reachable {
            shlog_debug!("Scanning {} for units", dir.display());
            Self::scan_dir(dir, &mut found)?;
        }

        *self.last_scan.lock().unwrap_or_else(|e| e.into_inner()) = found.clone();
        Ok(found)
    }

    fn declared(&self) -> Vec<RegistryEntry> {
        self.last_scan
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
