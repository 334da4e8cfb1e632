//! Tests for unit lifecycle through the registry: load, unload, suspend, resume.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use unit_core::messaging::{DeliveryError, HandlerError, MessageEnvelope, Payload};
use unit_core::units::{
    BusyReason, HookError, HookKind, LifecycleError, LifecycleState, RawManifest, RegistryConfig, StaticSource,
    Unit, UnitContext, UnitDescriptor, UnitFactory,
};
use unit_core::version::Version;
use unit_core::{Runtime, RuntimeConfig};

#[derive(Default)]
struct Switches {
    fail_init: AtomicBool,
    hang_init: AtomicBool,
    fail_cleanup: AtomicBool,
    hang_cleanup: AtomicBool,
    veto_unload: AtomicBool,
    cleanups: AtomicU32,
    suspends: AtomicU32,
    resumes: AtomicU32,
}

struct Probe {
    switches: Arc<Switches>,
}

#[async_trait]
impl Unit for Probe {
    async fn init(&self, ctx: &mut UnitContext) -> Result<(), HookError> {
        if self.switches.hang_init.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        if self.switches.fail_init.load(Ordering::SeqCst) {
            return Err(HookError::new("boom"));
        }
        let greeting = ctx.config("greeting").cloned().unwrap_or(json!("hi"));
        ctx.data.set_state("greeting", greeting);
        Ok(())
    }

    async fn cleanup(&self, _ctx: &mut UnitContext) -> Result<(), HookError> {
        self.switches.cleanups.fetch_add(1, Ordering::SeqCst);
        if self.switches.hang_cleanup.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        if self.switches.fail_cleanup.load(Ordering::SeqCst) {
            return Err(HookError::new("still flushing"));
        }
        Ok(())
    }

    async fn suspend(&self, ctx: &mut UnitContext) -> Result<(), HookError> {
        self.switches.suspends.fetch_add(1, Ordering::SeqCst);
        ctx.data.set_state("paused", json!(true));
        Ok(())
    }

    async fn resume(&self, ctx: &mut UnitContext) -> Result<(), HookError> {
        self.switches.resumes.fetch_add(1, Ordering::SeqCst);
        ctx.data.set_state("paused", json!(false));
        Ok(())
    }

    fn can_unload(&self) -> bool {
        !self.switches.veto_unload.load(Ordering::SeqCst)
    }

    async fn handle_message(
        &self,
        _envelope: &MessageEnvelope,
        ctx: &UnitContext,
    ) -> Result<Option<Payload>, HandlerError> {
        let mut reply = Payload::new();
        reply.insert("greeting".into(), ctx.data.get_state("greeting").cloned().unwrap_or(json!(null)));
        Ok(Some(reply))
    }
}

fn probe_factory(switches: Arc<Switches>) -> Arc<dyn UnitFactory> {
    Arc::new(
        move |_d: &UnitDescriptor, _v: &Version| -> Result<Arc<dyn Unit>, String> {
            Ok(Arc::new(Probe {
                switches: Arc::clone(&switches),
            }))
        },
    )
}

fn runtime(switches: Arc<Switches>) -> Runtime {
    let source = StaticSource::new()
        .with(RawManifest::json(
            "a.json",
            r#"{"identifier": "a", "display_name": "A", "version": "1.0.0", "config": {"greeting": "hello"}}"#,
        ))
        .with(RawManifest::toml(
            "b.toml",
            "identifier = \"b\"\ndisplay_name = \"B\"\nversion = \"1.0.0\"\ndependencies = [\"a\"]\n",
        ));
    let config = RuntimeConfig {
        registry: RegistryConfig {
            hook_timeout: Duration::from_millis(100),
            ..RegistryConfig::default()
        },
        ..RuntimeConfig::default()
    };
    let runtime = Runtime::with_source(config, Arc::new(source));
    runtime.set_default_factory(probe_factory(switches));
    runtime.discover().unwrap();
    runtime
}

#[tokio::test]
async fn test_discovered_units_start_unloaded() {
    let runtime = runtime(Arc::default());
    assert_eq!(runtime.registry().state("a"), Some(LifecycleState::Discovered));
    assert!(!runtime.is_loaded("a"));
    assert!(runtime.get("a").is_none());
}

#[tokio::test]
async fn test_load_initializes_with_manifest_config() {
    let runtime = runtime(Arc::default());
    runtime.load("a").await.unwrap();

    let instance = runtime.get("a").unwrap();
    assert_eq!(instance.state, LifecycleState::Active);
    assert_eq!(instance.version, Version::new(1, 0, 0));
    assert_eq!(instance.data.get_state("greeting"), Some(&json!("hello")));
    assert_eq!(instance.metrics.loads, 1);
    assert!(runtime.is_loaded("a"));

    let reply = runtime
        .send(MessageEnvelope::new("test", "a", "greet"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply["greeting"], json!("hello"));
    assert_eq!(runtime.get("a").unwrap().metrics.messages_handled, 1);
}

#[tokio::test]
async fn test_load_requires_active_dependencies() {
    let runtime = runtime(Arc::default());
    let err = runtime.load("b").await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::DependencyNotActive { ref dependency, state: Some(LifecycleState::Discovered), .. }
            if dependency == "a"
    ));
    assert_eq!(runtime.registry().state("b"), Some(LifecycleState::Discovered));
}

#[tokio::test]
async fn test_load_unknown_unit() {
    let runtime = runtime(Arc::default());
    assert_eq!(
        runtime.load("ghost").await.unwrap_err(),
        LifecycleError::NotFound("ghost".into())
    );
}

#[tokio::test]
async fn test_load_twice_is_invalid() {
    let runtime = runtime(Arc::default());
    runtime.load("a").await.unwrap();
    assert!(matches!(
        runtime.load("a").await.unwrap_err(),
        LifecycleError::InvalidTransition {
            from: LifecycleState::Active,
            ..
        }
    ));
}

#[tokio::test]
async fn test_failed_init_marks_unit_failed_and_can_retry() {
    let switches = Arc::new(Switches::default());
    switches.fail_init.store(true, Ordering::SeqCst);
    let runtime = runtime(Arc::clone(&switches));

    let err = runtime.load("a").await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::HookFailed { hook: HookKind::Init, ref reason, .. } if reason == "boom"
    ));
    assert_eq!(runtime.registry().state("a"), Some(LifecycleState::Failed));
    let status = runtime.registry().status("a").unwrap();
    assert!(status.last_error.unwrap().contains("boom"));
    assert!(!runtime.bus().is_bound("a"));

    switches.fail_init.store(false, Ordering::SeqCst);
    runtime.load("a").await.unwrap();
    assert_eq!(runtime.registry().state("a"), Some(LifecycleState::Active));
}

#[tokio::test]
async fn test_init_timeout() {
    let switches = Arc::new(Switches::default());
    switches.hang_init.store(true, Ordering::SeqCst);
    let runtime = runtime(switches);

    let err = runtime.load("a").await.unwrap_err();
    assert_eq!(
        err,
        LifecycleError::Timeout {
            unit: "a".into(),
            hook: HookKind::Init,
            timeout_ms: 100
        }
    );
    assert_eq!(runtime.registry().state("a"), Some(LifecycleState::Failed));
}

#[tokio::test]
async fn test_load_all_skips_dependents_of_failures() {
    let switches = Arc::new(Switches::default());
    switches.fail_init.store(true, Ordering::SeqCst);
    let runtime = runtime(switches);

    let report = runtime.load_all().await.unwrap();
    assert!(!report.is_success());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "a");
    assert_eq!(report.skipped, vec![("b".to_string(), "a".to_string())]);
    assert_eq!(runtime.registry().state("b"), Some(LifecycleState::Discovered));
}

#[tokio::test]
async fn test_unload_refused_while_dependents_live() {
    let runtime = runtime(Arc::default());
    runtime.load_all().await.unwrap();

    let err = runtime.unload("a").await.unwrap_err();
    assert_eq!(
        err,
        LifecycleError::Busy {
            unit: "a".into(),
            reason: BusyReason::Dependents(vec!["b".into()])
        }
    );
    assert_eq!(runtime.registry().state("a"), Some(LifecycleState::Active));

    runtime.unload("b").await.unwrap();
    runtime.unload("a").await.unwrap();
    assert_eq!(runtime.registry().state("a"), Some(LifecycleState::Unloaded));
    assert!(!runtime.bus().is_bound("a"));
}

#[tokio::test]
async fn test_unload_veto() {
    let switches = Arc::new(Switches::default());
    switches.veto_unload.store(true, Ordering::SeqCst);
    let runtime = runtime(switches);
    runtime.load("a").await.unwrap();

    let err = runtime.unload("a").await.unwrap_err();
    assert!(matches!(err, LifecycleError::Busy { reason: BusyReason::Vetoed, .. }));
    assert_eq!(runtime.registry().state("a"), Some(LifecycleState::Active));
}

#[tokio::test]
async fn test_failed_cleanup_keeps_unit_active() {
    let switches = Arc::new(Switches::default());
    switches.fail_cleanup.store(true, Ordering::SeqCst);
    let runtime = runtime(Arc::clone(&switches));
    runtime.load("a").await.unwrap();

    let err = runtime.unload("a").await.unwrap_err();
    assert!(matches!(err, LifecycleError::HookFailed { hook: HookKind::Cleanup, .. }));
    assert_eq!(runtime.registry().state("a"), Some(LifecycleState::Active));
    assert!(runtime.bus().is_bound("a"));
    assert_eq!(switches.cleanups.load(Ordering::SeqCst), 1);

    switches.fail_cleanup.store(false, Ordering::SeqCst);
    runtime.unload("a").await.unwrap();
}

#[tokio::test]
async fn test_abandoned_load_returns_to_previous_state() {
    let switches = Arc::new(Switches::default());
    let runtime = runtime(Arc::clone(&switches));
    runtime.load("a").await.unwrap();

    switches.hang_init.store(true, Ordering::SeqCst);
    let outcome = tokio::time::timeout(Duration::from_millis(30), runtime.load("b")).await;
    assert!(outcome.is_err());
    assert_eq!(runtime.registry().state("b"), Some(LifecycleState::Discovered));
    assert!(runtime.get("b").is_none());

    // Nothing live depends on `a` any more.
    assert!(runtime.registry().live_dependents("a").is_empty());

    switches.hang_init.store(false, Ordering::SeqCst);
    runtime.load("b").await.unwrap();
    assert_eq!(runtime.registry().state("b"), Some(LifecycleState::Active));
}

#[tokio::test]
async fn test_abandoned_unload_keeps_unit_active() {
    let switches = Arc::new(Switches::default());
    switches.hang_cleanup.store(true, Ordering::SeqCst);
    let runtime = runtime(Arc::clone(&switches));
    runtime.load("a").await.unwrap();
    let instance = runtime.get("a").unwrap().instance_id;

    let outcome = tokio::time::timeout(Duration::from_millis(30), runtime.unload("a")).await;
    assert!(outcome.is_err());
    assert_eq!(runtime.registry().state("a"), Some(LifecycleState::Active));
    assert_eq!(runtime.get("a").unwrap().instance_id, instance);
    assert!(runtime.bus().is_bound("a"));

    let reply = runtime
        .send(MessageEnvelope::new("test", "a", "greet"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply["greeting"], json!("hello"));

    switches.hang_cleanup.store(false, Ordering::SeqCst);
    runtime.unload("a").await.unwrap();
    assert_eq!(runtime.registry().state("a"), Some(LifecycleState::Unloaded));
}

#[tokio::test]
async fn test_unloaded_unit_can_load_again() {
    let runtime = runtime(Arc::default());
    runtime.load("a").await.unwrap();
    let first = runtime.get("a").unwrap().instance_id;
    runtime.unload("a").await.unwrap();
    runtime.load("a").await.unwrap();

    let instance = runtime.get("a").unwrap();
    assert_ne!(instance.instance_id, first);
    assert_eq!(instance.metrics.loads, 2);
    assert_eq!(instance.metrics.unloads, 1);
    // Creation is recorded once per unit.
    assert_eq!(runtime.history("a").len(), 1);
}

#[tokio::test]
async fn test_suspend_and_resume() {
    let switches = Arc::new(Switches::default());
    let runtime = runtime(Arc::clone(&switches));
    runtime.load("a").await.unwrap();

    runtime.suspend("a").await.unwrap();
    assert_eq!(runtime.registry().state("a"), Some(LifecycleState::Suspended));
    assert!(runtime.is_loaded("a"));
    assert!(runtime.all_active().is_empty());
    assert_eq!(runtime.get("a").unwrap().data.get_state("paused"), Some(&json!(true)));

    let err = runtime.send(MessageEnvelope::new("test", "a", "greet")).await.unwrap_err();
    assert!(matches!(err, DeliveryError::Unavailable { .. }));

    runtime.resume("a").await.unwrap();
    assert_eq!(runtime.registry().state("a"), Some(LifecycleState::Active));
    assert_eq!(runtime.get("a").unwrap().data.get_state("paused"), Some(&json!(false)));
    assert_eq!(switches.suspends.load(Ordering::SeqCst), 1);
    assert_eq!(switches.resumes.load(Ordering::SeqCst), 1);

    assert!(matches!(
        runtime.resume("a").await.unwrap_err(),
        LifecycleError::InvalidTransition { .. }
    ));
}

#[tokio::test]
async fn test_lifecycle_events_are_broadcast() {
    let runtime = runtime(Arc::default());
    let mut events = runtime.registry().subscribe();
    runtime.load("a").await.unwrap();

    let loading = events.recv().await.unwrap();
    assert_eq!((loading.from, loading.to), (LifecycleState::Discovered, LifecycleState::Loading));
    let active = events.recv().await.unwrap();
    assert_eq!(active.unit, "a");
    assert_eq!(active.to, LifecycleState::Active);
    assert_eq!(active.version, Some(Version::new(1, 0, 0)));
}

#[tokio::test]
async fn test_missing_factory() {
    let source = StaticSource::new().with(RawManifest::json(
        "a.json",
        r#"{"identifier": "a", "display_name": "A", "version": "1.0.0"}"#,
    ));
    let runtime = Runtime::with_source(RuntimeConfig::default(), Arc::new(source));
    runtime.discover().unwrap();
    let err = runtime.load("a").await.unwrap_err();
    assert!(matches!(err, LifecycleError::NoFactory { .. }));
    assert_eq!(runtime.registry().state("a"), Some(LifecycleState::Failed));
}
