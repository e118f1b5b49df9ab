//! Grouped parallel loading tests.
//!
//! These tests verify that the loader respects depth groups, bounds
//! concurrency and keeps one unit's failure from affecting its peers.

use std::sync::Arc;
use std::time::Duration;

use stagehand::core::{DependencyGraph, Resolver, UnitDescriptor};
use stagehand::orchestration::{
    ActivationCache, Activator, GroupedLoader, LoadOptions, LoadPlan, LoadStatus,
    OrchestrationMode, Severity,
};

use crate::fixtures::{idle_throttle, unit_names, Event, FakeActivator};

fn plan(units: Vec<UnitDescriptor>) -> LoadPlan {
    let graph = DependencyGraph::from_descriptors(units, false);
    let order = Resolver::new("Logging").resolve(&graph, None);
    LoadPlan::from_resolved(&order, &graph)
}

fn loader(activator: &Arc<FakeActivator>, cores: usize) -> GroupedLoader {
    GroupedLoader::new(
        Arc::clone(activator) as Arc<dyn Activator>,
        Arc::new(ActivationCache::new()),
        idle_throttle(cores),
    )
}

fn position(events: &[Event], event: Event) -> usize {
    events
        .iter()
        .position(|e| *e == event)
        .unwrap_or_else(|| panic!("missing event {:?}", event))
}

fn started(name: &str) -> Event {
    Event::Started(name.to_string())
}

fn finished(name: &str) -> Event {
    Event::Finished(name.to_string())
}

/// Test: Concurrency Bound
/// Given five independent units that each take a while
/// When loaded with a concurrency override of 2
/// Then never more than two activate at once and all five succeed
#[tokio::test]
async fn test_override_bounds_concurrency_over_group() {
    let activator = Arc::new(FakeActivator::new().with_delay(Duration::from_millis(30)));
    let units: Vec<UnitDescriptor> = ["U1", "U2", "U3", "U4", "U5"]
        .iter()
        .map(|n| UnitDescriptor::new(n, &[]))
        .collect();
    let plan = plan(units);
    assert_eq!(plan.groups.len(), 1);

    let options = LoadOptions {
        concurrency_override: Some(2),
        ..Default::default()
    };
    let report = loader(&activator, 8)
        .load(&plan, OrchestrationMode::DependencyAware, &options)
        .await;

    assert_eq!(activator.peak(), 2, "at most two workers may run");
    assert_eq!(report.imported_count, 5);
    assert!(!report.sequential);
}

/// Test: Recommended Bound
/// Given an idle single-core host and no override
/// When a wide group is loaded
/// Then the mixed-workload recommendation of 2 workers bounds the group
#[tokio::test]
async fn test_throttle_recommendation_bounds_concurrency() {
    let activator = Arc::new(FakeActivator::new().with_delay(Duration::from_millis(20)));
    let units: Vec<UnitDescriptor> = (0..6)
        .map(|i| UnitDescriptor::new(&format!("W{}", i), &[]))
        .collect();

    let report = loader(&activator, 1)
        .load(&plan(units), OrchestrationMode::DependencyAware, &LoadOptions::default())
        .await;

    assert_eq!(report.imported_count, 6);
    assert!(activator.peak() <= 2, "peak was {}", activator.peak());
}

/// Test: Group Boundaries
/// Given Logging, A and B on Logging, C on A and B, with A slow
/// When loaded
/// Then nothing in a group starts before the previous group has finished
#[tokio::test]
async fn test_groups_are_strictly_sequential() {
    let activator = Arc::new(FakeActivator::new().slow("A", Duration::from_millis(40)));
    let plan = plan(vec![
        UnitDescriptor::new("Logging", &[]).required(),
        UnitDescriptor::new("A", &["Logging"]),
        UnitDescriptor::new("B", &["Logging"]),
        UnitDescriptor::new("C", &["A", "B"]),
    ]);
    let groups: Vec<Vec<&str>> = plan.groups.iter().map(|g| unit_names(g)).collect();
    assert_eq!(groups, vec![vec!["Logging"], vec!["A", "B"], vec!["C"]]);

    let report = loader(&activator, 4)
        .load(&plan, OrchestrationMode::DependencyAware, &LoadOptions::default())
        .await;
    assert_eq!(report.imported_count, 4);

    let events = activator.events();
    let logging_done = position(&events, finished("Logging"));
    assert!(position(&events, started("A")) > logging_done);
    assert!(position(&events, started("B")) > logging_done);

    let c_start = position(&events, started("C"));
    assert!(c_start > position(&events, finished("A")));
    assert!(c_start > position(&events, finished("B")));

    // B finishes while slow A is still running.
    assert!(position(&events, finished("B")) < position(&events, finished("A")));
    assert_eq!(report.load_order, vec!["Logging", "A", "B", "C"]);
}

/// Test: Partial Failure Containment
/// Given three depth-1 units where B fails
/// When loaded
/// Then A and C still activate and only B is reported failed
#[tokio::test]
async fn test_failure_does_not_stop_peers() {
    let activator = Arc::new(FakeActivator::new().failing("B"));
    let plan = plan(vec![
        UnitDescriptor::new("Logging", &[]).required(),
        UnitDescriptor::new("A", &["Logging"]),
        UnitDescriptor::new("B", &["Logging"]),
        UnitDescriptor::new("C", &["Logging"]),
    ]);
    let loader = loader(&activator, 4);
    let report = loader
        .load(&plan, OrchestrationMode::DependencyAware, &LoadOptions::default())
        .await;

    assert_eq!(report.imported_count, 3);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.skipped_count, 0);

    let b = report.result("B").unwrap();
    assert_eq!(b.status, LoadStatus::Failed);
    assert!(!b.success);
    assert_eq!(b.severity, Severity::Warning);
    assert!(b.error_detail.as_deref().unwrap().contains("simulated failure"));

    assert!(report.result("C").unwrap().success);
    assert!(loader.cache().is_active("C"));
    assert!(!loader.cache().is_active("B"));
    assert!(report.critical_failures().is_empty());
}

/// Test: Critical Failures
/// Given a required unit that fails
/// When loaded
/// Then its result is critical and later groups still run
#[tokio::test]
async fn test_required_failure_is_critical() {
    let activator = Arc::new(FakeActivator::new().failing("Logging"));
    let plan = plan(vec![
        UnitDescriptor::new("Logging", &[]).required(),
        UnitDescriptor::new("A", &["Logging"]),
    ]);
    let report = loader(&activator, 4)
        .load(&plan, OrchestrationMode::DependencyAware, &LoadOptions::default())
        .await;

    let critical = report.critical_failures();
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].name, "Logging");
    assert_eq!(critical[0].severity, Severity::Critical);
    assert!(report.result("A").unwrap().success);
}

/// Test: Skipped Units
/// Given one unit whose location is missing and one with nothing to activate
/// When loaded
/// Then both are skipped, neither is activated, and neither is cached
#[tokio::test]
async fn test_missing_and_empty_units_are_skipped() {
    let activator = Arc::new(FakeActivator::new().missing("Gone").empty("Hollow"));
    let plan = plan(vec![
        UnitDescriptor::new("Logging", &[]),
        UnitDescriptor::new("Gone", &[]),
        UnitDescriptor::new("Hollow", &[]),
    ]);
    let loader = loader(&activator, 4);
    let report = loader
        .load(&plan, OrchestrationMode::DependencyAware, &LoadOptions::default())
        .await;

    assert_eq!(report.result("Gone").unwrap().status, LoadStatus::PathNotFound);
    assert_eq!(report.result("Hollow").unwrap().status, LoadStatus::NoEntriesFound);
    assert_eq!(report.skipped_count, 2);
    assert_eq!(activator.calls("Gone"), 0);
    assert_eq!(activator.calls("Hollow"), 0);
    assert_eq!(loader.cache().len(), 1);
}

/// Test: Idempotence
/// Given a plan that has already been loaded
/// When loaded again without force
/// Then every unit is already loaded and nothing activates twice
#[tokio::test]
async fn test_second_load_is_idempotent() {
    let activator = Arc::new(FakeActivator::new());
    let plan = plan(vec![
        UnitDescriptor::new("Logging", &[]),
        UnitDescriptor::new("A", &["Logging"]),
        UnitDescriptor::new("B", &["Logging"]),
    ]);
    let loader = loader(&activator, 4);
    let options = LoadOptions::default();

    loader.load(&plan, OrchestrationMode::DependencyAware, &options).await;
    let second = loader.load(&plan, OrchestrationMode::DependencyAware, &options).await;

    assert_eq!(second.imported_count, 0);
    assert!(second
        .details
        .iter()
        .all(|r| r.status == LoadStatus::AlreadyLoaded && r.success));
    assert_eq!(activator.total_calls(), 3);
}

/// Test: Per-Unit Timeout
/// Given a unit slower than the configured timeout
/// When loaded
/// Then it fails with a timeout and the next group still runs
#[tokio::test]
async fn test_slow_unit_times_out() {
    let activator = Arc::new(FakeActivator::new().slow("Sluggish", Duration::from_millis(500)));
    let plan = plan(vec![
        UnitDescriptor::new("Sluggish", &[]),
        UnitDescriptor::new("After", &["Sluggish"]),
    ]);
    let options = LoadOptions {
        unit_timeout: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let loader = loader(&activator, 4);
    let report = loader
        .load(&plan, OrchestrationMode::DependencyAware, &options)
        .await;

    let slow = report.result("Sluggish").unwrap();
    assert_eq!(slow.status, LoadStatus::Failed);
    assert!(slow.error_detail.as_deref().unwrap().contains("timed out"));
    assert!(!loader.cache().is_claimed("Sluggish"));
    assert!(report.result("After").unwrap().success);
}

/// Test: Sequential Plans
/// Given a sequential plan of independent units
/// When loaded
/// Then units activate one at a time in plan order
#[tokio::test]
async fn test_sequential_plan_runs_one_at_a_time() {
    let activator = Arc::new(FakeActivator::new().with_delay(Duration::from_millis(5)));
    let plan = LoadPlan::sequential(vec![
        UnitDescriptor::new("Logging", &[]),
        UnitDescriptor::new("Vault", &[]),
        UnitDescriptor::new("Lab", &[]),
    ]);
    let report = loader(&activator, 8)
        .load(&plan, OrchestrationMode::DegradedFallback, &LoadOptions::default())
        .await;

    assert!(report.sequential);
    assert_eq!(report.mode, OrchestrationMode::DegradedFallback);
    assert_eq!(activator.peak(), 1);
    assert_eq!(activator.started(), vec!["Logging", "Vault", "Lab"]);
}
