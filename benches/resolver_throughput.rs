//! Dependency resolution benchmarks.
//!
//! Measures load-order computation over layered graphs of increasing size.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use unit_core::units::{DependencyResolver, UnitDescriptor};
use unit_core::version::Version;

/// `layers` layers of `width` units; each unit depends on two units of the layer below.
fn layered_graph(layers: usize, width: usize) -> Vec<UnitDescriptor> {
    let mut units = Vec::with_capacity(layers * width);
    for layer in 0..layers {
        for i in 0..width {
            let mut unit = UnitDescriptor::new(
                format!("l{:03}-u{:03}", layer, i),
                format!("Layer {} unit {}", layer, i),
                Version::new(1, 0, 0),
            );
            if layer > 0 {
                unit = unit
                    .with_dependency(format!("l{:03}-u{:03}", layer - 1, i))
                    .with_dependency(format!("l{:03}-u{:03}", layer - 1, (i + 1) % width));
            }
            units.push(unit);
        }
    }
    units
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    for (layers, width) in [(4, 8), (10, 20), (20, 50)] {
        let units = layered_graph(layers, width);
        group.throughput(Throughput::Elements(units.len() as u64));
        group.bench_with_input(BenchmarkId::new("layered", units.len()), &units, |b, units| {
            b.iter(|| DependencyResolver::resolve(black_box(units)))
        });
    }

    group.finish();
}

fn bench_plan_with_rejections(c: &mut Criterion) {
    let mut units = layered_graph(10, 20);
    // One missing dependency at the bottom blocks a cone of dependents.
    units[0] = units[0].clone().with_dependency("absent");

    c.bench_function("plan/blocked_cone", |b| {
        b.iter(|| DependencyResolver::plan(black_box(&units)))
    });
}

criterion_group!(benches, bench_resolve, bench_plan_with_rejections);
criterion_main!(benches);
