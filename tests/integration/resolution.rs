//! Dependency resolution tests.
//!
//! These tests verify ordering guarantees of the resolver over graphs built
//! from descriptors and from registries on disk.

use stagehand::core::{DependencyGraph, Resolver, UnitDescriptor};
use stagehand::registry::build_graph;

use crate::fixtures::{diamond_project, names, TestProject};

fn graph(units: Vec<UnitDescriptor>) -> DependencyGraph {
    DependencyGraph::from_descriptors(units, false)
}

fn resolver() -> Resolver {
    Resolver::new("Logging")
}

/// Test: Dependencies Precede Dependents
/// Given a layered graph declared in reverse dependency order
/// When resolved
/// Then every unit appears after all of its dependencies, exactly once
#[test]
fn test_every_unit_after_its_dependencies() {
    let units = vec![
        UnitDescriptor::new("Portal", &["Api", "Assets"]),
        UnitDescriptor::new("Api", &["Store", "Auth"]),
        UnitDescriptor::new("Assets", &["Store"]),
        UnitDescriptor::new("Auth", &["Store", "Logging"]),
        UnitDescriptor::new("Store", &["Logging"]),
        UnitDescriptor::new("Logging", &[]),
    ];
    let g = graph(units.clone());
    let order = resolver().resolve(&g, None);

    assert_eq!(order.len(), units.len());
    assert!(!order.has_cycles());
    for unit in &units {
        let at = order.position(&unit.name).unwrap();
        for dep in &unit.dependencies {
            assert!(
                order.position(dep).unwrap() < at,
                "{} must load before {}",
                dep,
                unit.name
            );
        }
    }
    assert_eq!(order.depth_of("Portal"), Some(4));
}

/// Test: Logging Leads
/// Given a logging unit declared last and carrying its own dependency
/// When resolved
/// Then it is first in the order and at depth 0
#[test]
fn test_logging_unit_always_first() {
    let g = graph(vec![
        UnitDescriptor::new("Metrics", &[]),
        UnitDescriptor::new("Vault", &["Metrics"]),
        UnitDescriptor::new("Logging", &["Metrics"]),
    ]);
    let order = resolver().resolve(&g, None);

    assert_eq!(order.load_order[0], "Logging");
    assert_eq!(order.depth_of("Logging"), Some(0));
    assert!(order.position("Metrics").unwrap() < order.position("Vault").unwrap());
}

/// Test: Logging Match Ignores Case
/// Given a unit called "logging" and a resolver configured for "Logging"
/// When resolved
/// Then the lowercase unit still leads
#[test]
fn test_logging_unit_matched_case_insensitively() {
    let g = graph(vec![
        UnitDescriptor::new("Cache", &[]),
        UnitDescriptor::new("logging", &[]),
    ]);
    let order = resolver().resolve(&g, None);
    assert_eq!(order.load_order, names(&["logging", "Cache"]));
}

/// Test: Cycles Are Tolerated
/// Given A and B depending on each other next to an acyclic unit
/// When resolved
/// Then both cycle members are listed once, after everything else, and
/// reported as circular without failing resolution
#[test]
fn test_cycle_members_appended_and_reported() {
    let g = graph(vec![
        UnitDescriptor::new("Logging", &[]),
        UnitDescriptor::new("B", &["A"]),
        UnitDescriptor::new("A", &["B"]),
        UnitDescriptor::new("Ok", &["Logging"]),
    ]);
    let order = resolver().resolve(&g, None);

    assert_eq!(order.load_order, names(&["Logging", "Ok", "A", "B"]));
    assert!(order.has_cycles());
    assert!(order.circular.contains("A"));
    assert!(order.circular.contains("B"));
    assert!(!order.circular.contains("Ok"));

    let err = order.ensure_acyclic().unwrap_err();
    assert!(err.to_string().contains("A, B"));
}

/// Test: Phantom Dependencies
/// Given D depending on a unit Z that nobody declares
/// When the graph is built and resolved
/// Then the edge is dropped, recorded, and D resolves at depth 0
#[test]
fn test_phantom_dependency_dropped() {
    let g = graph(vec![
        UnitDescriptor::new("Logging", &[]),
        UnitDescriptor::new("D", &["Z"]),
    ]);
    assert_eq!(g.phantom_edges().len(), 1);
    assert_eq!(g.phantom_edges()[0].unit, "D");
    assert_eq!(g.phantom_edges()[0].missing, "Z");
    assert!(!g.contains("Z"));

    let order = resolver().resolve(&g, None);
    assert_eq!(order.depth_of("D"), Some(0));
    assert_eq!(order.groups(), vec![names(&["Logging", "D"])]);
}

/// Test: Depth Groups
/// Given Logging, A and B on Logging, C on A and B
/// When resolved
/// Then depths are 0, 1, 1, 2 and the groups are [Logging], [A, B], [C]
#[test]
fn test_depth_groups_for_diamond() {
    let g = graph(vec![
        UnitDescriptor::new("Logging", &[]).required(),
        UnitDescriptor::new("A", &["Logging"]),
        UnitDescriptor::new("B", &["Logging"]),
        UnitDescriptor::new("C", &["A", "B"]),
    ]);
    let order = resolver().resolve(&g, None);

    assert_eq!(order.load_order, names(&["Logging", "A", "B", "C"]));
    assert_eq!(order.depth_of("Logging"), Some(0));
    assert_eq!(order.depth_of("A"), Some(1));
    assert_eq!(order.depth_of("B"), Some(1));
    assert_eq!(order.depth_of("C"), Some(2));
    assert_eq!(
        order.groups(),
        vec![names(&["Logging"]), names(&["A", "B"]), names(&["C"])]
    );
}

/// Test: Subset Closure
/// Given a request for a single deep unit
/// When resolved with a subset
/// Then only that unit and its transitive dependencies are included
#[test]
fn test_subset_includes_dependency_closure_only() {
    let g = graph(vec![
        UnitDescriptor::new("Logging", &[]),
        UnitDescriptor::new("Store", &["Logging"]),
        UnitDescriptor::new("Api", &["Store"]),
        UnitDescriptor::new("Docs", &[]),
        UnitDescriptor::new("Portal", &["Api"]),
    ]);
    let order = resolver().resolve(&g, Some(&names(&["Api"])));

    assert_eq!(order.load_order, names(&["Logging", "Store", "Api"]));
    assert!(!order.contains("Docs"));
    assert!(!order.contains("Portal"));
}

/// Test: Unknown Subset Names
/// Given a subset naming a unit that is not in the graph
/// When resolved
/// Then the unknown name is ignored and known names still resolve
#[test]
fn test_subset_unknown_names_ignored() {
    let g = graph(vec![
        UnitDescriptor::new("Logging", &[]),
        UnitDescriptor::new("Store", &["Logging"]),
    ]);
    let order = resolver().resolve(&g, Some(&names(&["Nope", "Store"])));
    assert_eq!(order.load_order, names(&["Logging", "Store"]));
}

/// Test: Declaration Order Tie-Break
/// Given independent units declared in a non-alphabetical order
/// When resolved repeatedly
/// Then the order follows declaration and never changes
#[test]
fn test_ties_follow_declaration_order_deterministically() {
    let build = || {
        graph(vec![
            UnitDescriptor::new("Zeta", &[]),
            UnitDescriptor::new("Alpha", &[]),
            UnitDescriptor::new("Mid", &[]),
        ])
    };
    let first = resolver().resolve(&build(), None);
    assert_eq!(first.load_order, names(&["Zeta", "Alpha", "Mid"]));
    for _ in 0..5 {
        assert_eq!(resolver().resolve(&build(), None), first);
    }
}

/// Test: Optional Dependencies
/// Given a unit with an optional dependency declared after it
/// When built with and without optional edges
/// Then the dependency orders first only when optional edges are included
#[test]
fn test_optional_dependencies_only_order_when_included() {
    let units = vec![
        UnitDescriptor::new("Logging", &[]),
        UnitDescriptor::new("Api", &[]).with_optional(&["Cache", "Ghost"]),
        UnitDescriptor::new("Cache", &[]),
    ];

    let plain = DependencyGraph::from_descriptors(units.clone(), false);
    let order = resolver().resolve(&plain, None);
    assert_eq!(order.load_order, names(&["Logging", "Api", "Cache"]));

    let with_optional = DependencyGraph::from_descriptors(units, true);
    let order = resolver().resolve(&with_optional, None);
    assert_eq!(order.load_order, names(&["Logging", "Cache", "Api"]));
    // A missing optional target is not a phantom edge.
    assert!(with_optional.phantom_edges().is_empty());
}

/// Test: Graph From Registry
/// Given a registry on disk where one unit's directory is missing
/// When the graph is built
/// Then manifests supply the edges and the missing unit has no dependencies
#[test]
fn test_graph_from_registry_on_disk() {
    let project = diamond_project().phantom_entry("Ghost", false);
    let g = build_graph(&project.registry(), &project.locator(), false).unwrap();

    assert_eq!(g.unit_count(), 5);
    assert_eq!(g.dependencies_of("C"), vec!["A", "B"]);
    assert!(g.dependencies_of("Ghost").is_empty());

    let order = resolver().resolve(&g, None);
    assert_eq!(order.load_order, names(&["Logging", "Ghost", "A", "B", "C"]));
}

/// Test: Unreachable Registry
/// Given a registry whose root does not exist
/// When the graph is built
/// Then building fails with an error that selects fallback mode
#[test]
fn test_unreachable_registry_fails_graph_build() {
    let project = TestProject::new().required_unit("Logging", &[]);
    let err = build_graph(&project.unreachable_registry(), &project.locator(), false).unwrap_err();
    assert!(err.triggers_fallback(), "unexpected error: {}", err);
}
