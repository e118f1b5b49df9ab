//! Orchestrator lifecycle tests.
//!
//! These tests drive the orchestrator against fake activators and verify
//! mode selection, health checks and the shared activation cache.

use std::sync::Arc;
use std::time::Duration;

use stagehand::orchestration::{LoadStatus, OrchestrationMode};
use stagehand::{ActivationCache, Orchestrator, OrchestratorState};

use crate::fixtures::{diamond_project, idle_throttle, FakeActivator, TestProject};

/// Test: Dependency-Aware Initialization
/// Given the diamond project
/// When initialized
/// Then every unit is active, the run is dependency-aware and healthy
#[tokio::test]
async fn test_initialize_loads_diamond() {
    let project = diamond_project();
    let activator = Arc::new(FakeActivator::new());
    let mut orch = project.orchestrator(activator.clone());

    assert!(orch.initialize(false, false).await);
    assert_eq!(orch.state(), OrchestratorState::Loaded);

    let report = orch.last_report().unwrap();
    assert_eq!(report.mode, OrchestrationMode::DependencyAware);
    assert_eq!(report.load_order, vec!["Logging", "A", "B", "C"]);
    assert_eq!(report.imported_count, 4);
    assert_eq!(orch.cache().len(), 4);
    assert!(orch.last_health().unwrap().healthy);
    assert_eq!(activator.started()[0], "Logging");
}

/// Test: Fallback On Unreachable Registry
/// Given a registry whose root cannot be reached
/// When loaded
/// Then the run degrades to required units only, one at a time, in
/// declaration order
#[tokio::test]
async fn test_unreachable_registry_degrades_to_fallback() {
    let project = TestProject::new()
        .required_unit("Logging", &[])
        .unit("Docs", &[])
        .required_unit("Vault", &["Logging"])
        .unit("Lab", &["Vault"]);
    let activator = Arc::new(FakeActivator::new().with_delay(Duration::from_millis(5)));
    let mut orch = Orchestrator::new(
        Arc::new(project.unreachable_registry()),
        project.locator(),
        activator.clone(),
    )
    .with_throttle(idle_throttle(4));

    let report = orch.load_all(false, false, None).await.unwrap();

    assert_eq!(report.mode, OrchestrationMode::DegradedFallback);
    assert!(report.sequential);
    assert_eq!(report.load_order, vec!["Logging", "Vault"]);
    assert_eq!(activator.started(), vec!["Logging", "Vault"]);
    assert_eq!(activator.peak(), 1);
    assert!(!orch.cache().is_active("Docs"));
    assert!(!orch.cache().is_active("Lab"));

    let states: Vec<_> = orch.state_history().iter().map(|h| h.state).collect();
    assert_eq!(
        states,
        vec![
            OrchestratorState::Uninitialized,
            OrchestratorState::Resolving,
            OrchestratorState::DegradedFallback,
            OrchestratorState::Loaded,
        ]
    );
}

/// Test: Cycles Do Not Degrade
/// Given two units that depend on each other
/// When initialized
/// Then the run stays dependency-aware and both units still activate
#[tokio::test]
async fn test_cycle_keeps_dependency_aware_mode() {
    let project = TestProject::new()
        .required_unit("Logging", &[])
        .unit("A", &["B"])
        .unit("B", &["A"]);
    let mut orch = project.orchestrator(Arc::new(FakeActivator::new()));

    let report = orch.load_all(false, false, None).await.unwrap();
    assert_eq!(report.mode, OrchestrationMode::DependencyAware);
    assert_eq!(report.load_order, vec!["Logging", "A", "B"]);
    assert_eq!(report.imported_count, 3);
}

/// Test: Forced Reload
/// Given a fully loaded project
/// When loaded again with force
/// Then every unit activates again and its cache record is replaced
#[tokio::test]
async fn test_forced_reload_replaces_records() {
    let project = diamond_project();
    let activator = Arc::new(FakeActivator::new());
    let mut orch = project.orchestrator(activator.clone());

    orch.load_all(false, false, None).await.unwrap();
    let before = orch.cache().get("A").unwrap();
    assert_eq!(before.entry_count, 1);

    let report = orch.load_all(false, true, None).await.unwrap();
    assert_eq!(report.imported_count, 4);

    let after = orch.cache().get("A").unwrap();
    assert_eq!(after.entry_count, 2);
    assert!(after.activated_at >= before.activated_at);
    assert_eq!(activator.calls("A"), 2);
    assert_eq!(orch.cache().len(), 4);
}

/// Test: Idempotent Re-Run
/// Given a fully loaded project
/// When loaded again without force
/// Then nothing is activated and every result is already loaded
#[tokio::test]
async fn test_rerun_without_force_is_idempotent() {
    let project = diamond_project();
    let activator = Arc::new(FakeActivator::new());
    let mut orch = project.orchestrator(activator.clone());

    orch.load_all(false, false, None).await.unwrap();
    let report = orch.load_all(false, false, None).await.unwrap();

    assert_eq!(report.imported_count, 0);
    assert!(report
        .details
        .iter()
        .all(|r| r.status == LoadStatus::AlreadyLoaded));
    assert_eq!(activator.total_calls(), 4);
}

/// Test: Interrupted Run
/// Given a load that the caller abandons with a timeout while a unit is running
/// When loaded and initialized again
/// Then the orchestrator resolves again and both runs complete
#[tokio::test]
async fn test_run_recovers_after_caller_timeout() {
    let project = diamond_project();
    let activator = Arc::new(FakeActivator::new().slow("A", Duration::from_millis(200)));
    let mut orch = project.orchestrator(activator.clone());

    let interrupted =
        tokio::time::timeout(Duration::from_millis(50), orch.load_all(false, false, None)).await;
    assert!(interrupted.is_err());
    assert_eq!(orch.state(), OrchestratorState::Resolving);

    // Aborted workers release their claims once the runtime drops them.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!orch.cache().is_claimed("A"));

    let report = orch.load_all(false, false, None).await.unwrap();
    assert_eq!(orch.state(), OrchestratorState::Loaded);
    assert_eq!(report.result("Logging").unwrap().status, LoadStatus::AlreadyLoaded);
    assert_eq!(report.result("A").unwrap().status, LoadStatus::Imported);
    assert_eq!(activator.calls("A"), 2);

    assert!(orch.initialize(false, false).await);
    assert_eq!(orch.state(), OrchestratorState::Loaded);
}

/// Test: Healthy Re-Run
/// Given a fully loaded project
/// When initialized again without force
/// Then nothing is imported but the run is healthy because every unit is
/// still active
#[tokio::test]
async fn test_initialize_rerun_is_healthy() {
    let project = diamond_project();
    let mut orch = project.orchestrator(Arc::new(FakeActivator::new()));

    assert!(orch.initialize(false, false).await);
    assert!(orch.initialize(false, false).await);

    assert_eq!(orch.last_report().unwrap().imported_count, 0);
    let health = orch.last_health().unwrap();
    assert!(health.healthy);
    assert_eq!(health.active_count, 4);
}

/// Test: Shared Cache
/// Given two orchestrators sharing one activation cache
/// When both load the same project at the same time
/// Then every unit is activated exactly once across both
#[tokio::test]
async fn test_shared_cache_activates_each_unit_once() {
    let project = diamond_project();
    let cache = Arc::new(ActivationCache::new());
    let first = Arc::new(FakeActivator::new().with_delay(Duration::from_millis(10)));
    let second = Arc::new(FakeActivator::new().with_delay(Duration::from_millis(10)));
    let mut orch_a = project.orchestrator(first.clone()).with_cache(Arc::clone(&cache));
    let mut orch_b = project.orchestrator(second.clone()).with_cache(Arc::clone(&cache));

    let (a, b) = tokio::join!(
        orch_a.load_all(false, false, None),
        orch_b.load_all(false, false, None)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    for name in ["Logging", "A", "B", "C"] {
        assert_eq!(
            first.calls(name) + second.calls(name),
            1,
            "{} activated more than once",
            name
        );
    }
    assert_eq!(a.imported_count + b.imported_count, 4);
    assert!(a
        .details
        .iter()
        .chain(b.details.iter())
        .all(|r| r.status != LoadStatus::Failed));
    assert_eq!(cache.len(), 4);
}

/// Test: Required Only
/// Given a required unit that depends on an optional-to-load unit
/// When initialized with required_only
/// Then the required units and their dependencies load, nothing else
#[tokio::test]
async fn test_required_only_loads_required_closure() {
    let project = TestProject::new()
        .required_unit("Logging", &[])
        .unit("Store", &["Logging"])
        .required_unit("Vault", &["Store"])
        .unit("Lab", &["Vault"]);
    let mut orch = project.orchestrator(Arc::new(FakeActivator::new()));

    assert!(orch.initialize(true, false).await);
    let report = orch.last_report().unwrap();
    assert_eq!(report.load_order, vec!["Logging", "Store", "Vault"]);
    assert!(!orch.cache().is_active("Lab"));
}

/// Test: Unhealthy Initialization
/// Given a required unit whose activation fails
/// When initialized
/// Then initialization reports failure and names the missing unit
#[tokio::test]
async fn test_initialize_false_when_required_unit_fails() {
    let project = diamond_project();
    let mut orch = project.orchestrator(Arc::new(FakeActivator::new().failing("Logging")));

    assert!(!orch.initialize(false, false).await);
    let health = orch.last_health().unwrap();
    assert!(!health.healthy);
    assert_eq!(health.missing_required, vec!["Logging"]);
    // Everything else still came up.
    assert_eq!(health.active_count, 3);
}

/// Test: Nothing Active
/// Given a project where every unit's location is missing
/// When initialized
/// Then initialization reports failure
#[tokio::test]
async fn test_initialize_false_when_nothing_active() {
    let project = TestProject::new().unit("A", &[]).unit("B", &[]);
    let activator = FakeActivator::new().missing("A").missing("B");
    let mut orch = project.orchestrator(Arc::new(activator));

    assert!(!orch.initialize(false, false).await);
    assert_eq!(orch.last_health().unwrap().active_count, 0);
}

/// Test: Concurrency Override
/// Given a wide group and an override of one worker
/// When loaded
/// Then activations never overlap
#[tokio::test]
async fn test_concurrency_override_passes_through() {
    let project = TestProject::new()
        .required_unit("Logging", &[])
        .unit("A", &["Logging"])
        .unit("B", &["Logging"])
        .unit("C", &["Logging"]);
    let activator = Arc::new(FakeActivator::new().with_delay(Duration::from_millis(10)));
    let mut orch = project.orchestrator(activator.clone());

    let report = orch.load_all(false, false, Some(1)).await.unwrap();
    assert_eq!(report.imported_count, 4);
    assert_eq!(activator.peak(), 1);
}

/// Test: Status
/// Given a project with an unregistered-on-disk unit after a required-only run
/// When status is queried
/// Then every known unit is listed with availability and activation state
#[tokio::test]
async fn test_status_reports_every_known_unit() {
    let project = diamond_project().phantom_entry("Ghost", false);
    let mut orch = project.orchestrator(Arc::new(FakeActivator::new()));
    orch.initialize(true, false).await;

    let status = orch.get_status();
    let names: Vec<&str> = status.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Logging", "A", "B", "C", "Ghost"]);

    let logging = &status[0];
    assert!(logging.required && logging.available && logging.active);
    assert!(logging.last_activated_at.is_some());

    let c = status.iter().find(|s| s.name == "C").unwrap();
    assert!(c.available);
    assert!(!c.active);

    let ghost = status.iter().find(|s| s.name == "Ghost").unwrap();
    assert!(!ghost.available);
    assert!(!ghost.active);
}
