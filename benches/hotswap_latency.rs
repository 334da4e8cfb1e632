//! Hot-swap latency benchmarks.
//!
//! Measures a full drain/suspend/migrate/commit cycle on passive units,
//! alternating between two versions so every iteration is a real swap.

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime as TokioRuntime;

use unit_core::units::{PassiveUnitFactory, RawManifest, StaticSource};
use unit_core::version::Version;
use unit_core::{Runtime, RuntimeConfig};

fn loaded_runtime(rt: &TokioRuntime, dependents: usize) -> Runtime {
    let mut source = StaticSource::new().with(RawManifest::json(
        "core.json",
        r#"{"identifier": "core", "display_name": "Core", "version": "1.0.0", "versions": ["1.0.1"]}"#,
    ));
    for i in 0..dependents {
        source.push(RawManifest::json(
            format!("dep{}.json", i),
            format!(
                r#"{{"identifier": "dep{}", "display_name": "Dep {}", "version": "1.0.0", "dependencies": ["core"]}}"#,
                i, i
            ),
        ));
    }

    let runtime = Runtime::with_source(RuntimeConfig::default(), Arc::new(source));
    runtime.set_default_factory(Arc::new(PassiveUnitFactory));
    rt.block_on(async {
        runtime.discover().expect("bench manifests are valid");
        runtime.load_all().await.expect("runtime accepts loads");
    });
    runtime
}

fn bench_swap(c: &mut Criterion) {
    let rt = TokioRuntime::new().expect("tokio runtime");
    let versions = [Version::new(1, 0, 1), Version::new(1, 0, 0)];
    let mut group = c.benchmark_group("hot_swap");
    group.measurement_time(Duration::from_secs(5));

    for dependents in [0usize, 8, 32] {
        let runtime = loaded_runtime(&rt, dependents);
        let mut next = 0;
        group.bench_function(format!("dependents_{}", dependents), |b| {
            b.iter(|| {
                let target = &versions[next % 2];
                next += 1;
                rt.block_on(async {
                    if next % 2 == 1 {
                        runtime.hot_swap("core", target).await
                    } else {
                        runtime.rollback("core", target).await
                    }
                })
                .expect("swap succeeds")
            })
        });
    }

    group.finish();
}

fn bench_reload(c: &mut Criterion) {
    let rt = TokioRuntime::new().expect("tokio runtime");
    let runtime = loaded_runtime(&rt, 0);
    c.bench_function("reload", |b| {
        b.iter(|| rt.block_on(runtime.reload("core")).expect("reload succeeds"))
    });
}

criterion_group!(benches, bench_swap, bench_reload);
criterion_main!(benches);
