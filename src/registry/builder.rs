//! Dependency graph construction from a unit source.

use super::{UnitLocator, UnitSource};
use crate::core::graph::DependencyGraph;
use crate::core::unit::{validate_unit_name, UnitDescriptor, UnitManifest, MANIFEST_FILE};
use crate::error::{Error, Result};
use crate::{shlog, shlog_warn};

/// Read every unit's manifest and return descriptors in declaration order.
///
/// A missing or unparsable manifest makes that unit dependency-free with a
/// warning. Invalid unit names are dropped with a warning.
///
/// # Errors
/// Propagates `RegistryUnavailable` from the source.
pub fn read_descriptors(
    source: &dyn UnitSource,
    locator: &UnitLocator,
) -> Result<Vec<UnitDescriptor>> {
    let entries = source.discover()?;
    let mut descriptors = Vec::with_capacity(entries.len());

    for entry in entries {
        if let Err(e) = validate_unit_name(&entry.name) {
            shlog_warn!("Skipping registry entry at {}: {}", entry.location, e);
            continue;
        }

        let manifest = match locator.resolve(&entry.location) {
            Some(dir) => match UnitManifest::read(&dir) {
                Ok(manifest) => Some(manifest),
                Err(e) => {
                    let err = Error::ManifestUnreadable {
                        unit: entry.name.clone(),
                        reason: format!("{}: {}", dir.join(MANIFEST_FILE).display(), e),
                    };
                    shlog_warn!("{}; treating as dependency-free", err);
                    None
                }
            },
            None => {
                let err = Error::ManifestUnreadable {
                    unit: entry.name.clone(),
                    reason: format!("location {} not found", entry.location),
                };
                shlog_warn!("{}; treating as dependency-free", err);
                None
            }
        };

        descriptors.push(UnitDescriptor::from_entry(&entry, manifest.as_ref()));
    }

    Ok(descriptors)
}

/// Build the dependency graph for everything the source declares.
pub fn build_graph(
    source: &dyn UnitSource,
    locator: &UnitLocator,
    include_optional: bool,
) -> Result<DependencyGraph> {
    let descriptors = read_descriptors(source, locator)?;
    let graph = DependencyGraph::from_descriptors(descriptors, include_optional);
    shlog!(
        "Built dependency graph from {}: {} units, {} edges, {} phantom",
        source.kind(),
        graph.unit_count(),
        graph.dependency_count(),
        graph.phantom_edges().len()
    );
    Ok(graph)
}
