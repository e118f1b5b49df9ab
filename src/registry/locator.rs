//! Resolution of unit location references to directories.

use std::path::{Path, PathBuf};

/// Resolves location references against the project root and the units
/// search path, in that order.
#[derive(Debug, Clone)]
pub struct UnitLocator {
    project_root: PathBuf,
    search_paths: Vec<PathBuf>,
}

impl UnitLocator {
    pub fn new(project_root: impl Into<PathBuf>, search_paths: Vec<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            search_paths,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Directory for a location reference, if one exists.
    ///
    /// Absolute references are used as-is. Relative references are tried
    /// under the project root, then under each search path entry.
    pub fn resolve(&self, location: &str) -> Option<PathBuf> {
        let location = location.trim();
        if location.is_empty() {
            return None;
        }
        let reference = Path::new(location);
        if reference.is_absolute() {
            return reference.is_dir().then(|| reference.to_path_buf());
        }
        std::iter::once(&self.project_root)
            .chain(self.search_paths.iter())
            .map(|base| base.join(reference))
            .find(|candidate| candidate.is_dir())
    }

    pub fn is_available(&self, location: &str) -> bool {
        self.resolve(location).is_some()
    }
}
