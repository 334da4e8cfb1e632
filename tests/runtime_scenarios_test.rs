//! End-to-end scenarios: discover, load, swap, roll back.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use unit_core::snapshot::InstanceData;
use unit_core::telemetry::{LOADS_TOTAL, SWAPS_TOTAL, SWAP_FAILURES_TOTAL};
use unit_core::units::{
    HookError, HotSwapError, LifecycleState, RawManifest, StaticSource, Unit, UnitContext, UnitDescriptor,
};
use unit_core::version::{ChangeType, MigrationPath, MigrationPolicy, Version, VersionError};
use unit_core::{Runtime, RuntimeConfig};

fn v(s: &str) -> Version {
    Version::parse(s).unwrap()
}

/// Needs a `schema` state entry to be valid.
struct Ledger;

#[async_trait]
impl Unit for Ledger {
    async fn init(&self, ctx: &mut UnitContext) -> Result<(), HookError> {
        if ctx.data.get_state("schema").is_none() {
            ctx.data.set_state("schema", json!(1));
        }
        Ok(())
    }

    fn validate(&self, data: &InstanceData, _version: &Version) -> Result<(), String> {
        match data.get_state("schema") {
            Some(_) => Ok(()),
            None => Err("schema missing".into()),
        }
    }
}

fn runtime_with(config: RuntimeConfig) -> Runtime {
    let source = StaticSource::new()
        .with(RawManifest::json(
            "a.json",
            r#"{"identifier": "A", "display_name": "Alpha", "version": "1.0.0", "versions": ["1.2.0"]}"#,
        ))
        .with(RawManifest::toml(
            "b.toml",
            r#"
identifier = "B"
display_name = "Beta"
version = "1.0.0"
versions = ["2.0.0"]
dependencies = ["A"]
"#,
        ));
    let runtime = Runtime::with_source(config, Arc::new(source));
    runtime.set_default_factory(Arc::new(
        |_d: &UnitDescriptor, _v: &Version| -> Result<Arc<dyn Unit>, String> { Ok(Arc::new(Ledger)) },
    ));
    runtime
}

async fn loaded() -> Runtime {
    let runtime = runtime_with(RuntimeConfig::default());
    runtime.discover().unwrap();
    let report = runtime.load_all().await.unwrap();
    assert!(report.is_success());
    runtime
}

#[tokio::test]
async fn test_dependencies_load_first_and_all_become_active() {
    let runtime = runtime_with(RuntimeConfig::default());
    let descriptors = runtime.discover().unwrap();
    assert_eq!(descriptors.len(), 2);
    assert_eq!(runtime.plan().order, vec!["A", "B"]);

    let report = runtime.load_all().await.unwrap();
    assert_eq!(report.loaded, vec!["A", "B"]);

    let mut active = runtime.all_active();
    active.sort();
    assert_eq!(active, vec!["A", "B"]);
    assert_eq!(runtime.registry().metrics().counter(LOADS_TOTAL), 2);

    let again = runtime.load_all().await.unwrap();
    assert!(again.loaded.is_empty());
    assert_eq!(again.already_active.len(), 2);
}

#[tokio::test]
async fn test_breaking_swap_with_failed_validation_keeps_old_version() {
    let runtime = loaded().await;

    let err = runtime.hot_swap("B", &v("2.0.0")).await.unwrap_err();
    match err {
        HotSwapError::Version(VersionError::MigrationFailed { ref unit, ref reason, .. }) => {
            assert_eq!(unit, "B");
            assert_eq!(reason, "schema missing");
        }
        other => panic!("unexpected: {:?}", other),
    }

    let b = runtime.get("B").unwrap();
    assert_eq!(b.version, v("1.0.0"));
    assert_eq!(b.state, LifecycleState::Active);
    assert_eq!(b.data.get_state("schema"), Some(&json!(1)));
    assert_eq!(runtime.registry().metrics().counter(SWAP_FAILURES_TOTAL), 1);
}

#[tokio::test]
async fn test_breaking_swap_with_strategy_succeeds() {
    let runtime = loaded().await;
    runtime.versions().register_unit_strategy(
        "B",
        v("1.0.0"),
        v("2.0.0"),
        Arc::new(|data: &mut InstanceData, _from: &Version, _to: &Version| -> Result<(), String> {
            let old = data.get_state("schema").cloned().unwrap_or(json!(0));
            data.set_state("schema", json!(old.as_i64().unwrap_or(0) + 1));
            Ok(())
        }),
    );

    let report = runtime.hot_swap("B", &v("2.0.0")).await.unwrap();
    assert_eq!(report.path, MigrationPath::Strategy);
    assert_eq!(report.change, ChangeType::Upgrade);
    assert_eq!(runtime.get("B").unwrap().data.get_state("schema"), Some(&json!(2)));
    assert_eq!(runtime.registry().metrics().counter(SWAPS_TOTAL), 1);
}

#[tokio::test]
async fn test_breaking_swap_refused_without_generic_path() {
    let runtime = runtime_with(RuntimeConfig {
        migration: MigrationPolicy {
            generic_breaking: false,
            ..MigrationPolicy::default()
        },
        ..RuntimeConfig::default()
    });
    runtime.discover().unwrap();
    runtime.load_all().await.unwrap();

    let err = runtime.hot_swap("B", &v("2.0.0")).await.unwrap_err();
    assert!(matches!(err, HotSwapError::Version(VersionError::NoMigrationPath { .. })));
    assert_eq!(runtime.get("B").unwrap().state, LifecycleState::Active);
}

#[tokio::test]
async fn test_rollback_to_recorded_version() {
    let runtime = loaded().await;
    runtime.hot_swap("A", &v("1.2.0")).await.unwrap();
    assert_eq!(runtime.versions().current_version("A"), Some(v("1.2.0")));

    let report = runtime.rollback("A", &v("1.0.0")).await.unwrap();
    assert_eq!(report.from, v("1.2.0"));
    assert_eq!(report.to, v("1.0.0"));

    let history = runtime.history("A");
    let changes: Vec<ChangeType> = history.iter().map(|e| e.change).collect();
    assert_eq!(changes, vec![ChangeType::Creation, ChangeType::Upgrade, ChangeType::Rollback]);
    assert_eq!(runtime.get("A").unwrap().version, v("1.0.0"));
    assert_eq!(runtime.versions().current_version("A"), Some(v("1.0.0")));
    assert!(history[2].metadata.contains_key("previous_instance"));

    // B kept running on top of A throughout.
    assert_eq!(runtime.get("B").unwrap().state, LifecycleState::Active);
}

#[tokio::test]
async fn test_rediscovery_keeps_live_units() {
    let runtime = loaded().await;
    let before = runtime.get("A").unwrap().instance_id;
    runtime.discover().unwrap();
    assert_eq!(runtime.get("A").unwrap().instance_id, before);
    assert_eq!(runtime.all_active().len(), 2);
}
