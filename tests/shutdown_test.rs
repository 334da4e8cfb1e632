//! Tests for graceful shutdown coordination.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use unit_core::shutdown::{ShutdownCoordinator, ShutdownResult, ShutdownState};
use unit_core::units::{
    HookError, LifecycleError, LifecycleState, PassiveUnitFactory, RawManifest, StaticSource, Unit, UnitContext,
    UnitDescriptor,
};
use unit_core::version::Version;
use unit_core::{Runtime, RuntimeConfig};

#[test]
fn test_initial_state_is_running() {
    let coordinator = ShutdownCoordinator::new();
    assert_eq!(coordinator.state(), ShutdownState::Running);
    assert!(coordinator.is_accepting());
}

#[test]
fn test_guards_track_in_flight() {
    let coordinator = ShutdownCoordinator::new();
    let g1 = coordinator.track();
    let g2 = coordinator.admit("load").unwrap();
    assert!(g1.is_some());
    assert_eq!(coordinator.in_flight_count(), 2);

    drop(g1);
    assert_eq!(coordinator.in_flight_count(), 1);
    drop(g2);
    assert_eq!(coordinator.in_flight_count(), 0);
}

#[test]
fn test_admit_refused_once_begun() {
    let coordinator = ShutdownCoordinator::new();
    assert!(coordinator.begin());
    assert!(!coordinator.begin());
    assert_eq!(coordinator.state(), ShutdownState::Draining);
    assert!(coordinator.track().is_none());
    assert_eq!(coordinator.admit("hot_swap").unwrap_err(), LifecycleError::ShuttingDown);
}

#[tokio::test]
async fn test_initiate_waits_for_guard() {
    let coordinator = Arc::new(ShutdownCoordinator::new());
    let guard = coordinator.track();

    let handle = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.initiate(Duration::from_secs(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(coordinator.state(), ShutdownState::Draining);

    drop(guard);
    assert_eq!(handle.await.unwrap(), ShutdownResult::Complete);
    assert_eq!(coordinator.state(), ShutdownState::Stopped);
}

#[tokio::test]
async fn test_initiate_times_out() {
    let coordinator = ShutdownCoordinator::new();
    let _guard = coordinator.track();
    let result = coordinator.initiate(Duration::from_millis(30)).await;
    assert_eq!(result, ShutdownResult::Timeout { remaining: 1 });
    assert_eq!(coordinator.state(), ShutdownState::Stopped);
}

/// Init takes a while, so a load is still running when shutdown begins.
struct Slow;

#[async_trait]
impl Unit for Slow {
    async fn init(&self, _ctx: &mut UnitContext) -> Result<(), HookError> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(())
    }
}

fn manifests() -> StaticSource {
    StaticSource::new()
        .with(RawManifest::json(
            "a.json",
            r#"{"identifier": "a", "display_name": "A", "version": "1.0.0", "versions": ["1.1.0"]}"#,
        ))
        .with(RawManifest::json(
            "b.json",
            r#"{"identifier": "b", "display_name": "B", "version": "1.0.0", "dependencies": ["a"]}"#,
        ))
}

#[tokio::test]
async fn test_runtime_shutdown_unloads_dependents_first() {
    let runtime = Runtime::with_source(RuntimeConfig::default(), Arc::new(manifests()));
    runtime.set_default_factory(Arc::new(PassiveUnitFactory));
    runtime.discover().unwrap();
    runtime.load_all().await.unwrap();
    runtime.suspend("b").await.unwrap();

    let report = runtime.shutdown(Duration::from_secs(1)).await;
    assert!(report.drained);
    assert_eq!(report.abandoned, 0);
    assert_eq!(report.unloaded, vec!["b", "a"]);
    assert!(report.failed.is_empty());
    assert_eq!(runtime.registry().state("a"), Some(LifecycleState::Unloaded));
    assert!(!runtime.health().accepting_operations);

    let err = runtime.hot_swap("a", &Version::new(1, 1, 0)).await.unwrap_err();
    assert_eq!(err.to_string(), LifecycleError::ShuttingDown.to_string());
    assert_eq!(runtime.load("a").await.unwrap_err(), LifecycleError::ShuttingDown);
}

#[tokio::test]
async fn test_runtime_shutdown_waits_for_running_load() {
    let runtime = Arc::new(Runtime::with_source(RuntimeConfig::default(), Arc::new(manifests())));
    runtime.set_default_factory(Arc::new(
        |_d: &UnitDescriptor, _v: &Version| -> Result<Arc<dyn Unit>, String> { Ok(Arc::new(Slow)) },
    ));
    runtime.discover().unwrap();

    let load = {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move { runtime.load("a").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let report = runtime.shutdown(Duration::from_secs(2)).await;
    load.await.unwrap().unwrap();
    assert!(report.drained);
    assert_eq!(report.unloaded, vec!["a"]);
}
