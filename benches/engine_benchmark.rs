//! Engine benchmarks
//!
//! Per-tick costs of the hot path: one physics step, one mapping
//! recompute, and one publish to a handful of inline subscribers.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pendulum_weather::events::{EventBus, EventKind};
use pendulum_weather::mapping::{MappingConfig, MappingEngine};
use pendulum_weather::physics::{EngineOptions, PhysicsEngine};
use pendulum_weather::types::*;

const DEMO_MAPPING: &str = include_str!("../demos/mapping.json");

/// Benchmark one step for each integrator
fn bench_physics_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("Physics Step");

    for integrator in [IntegratorKind::Euler, IntegratorKind::RK4] {
        let options = EngineOptions {
            integrator,
            ..EngineOptions::default()
        };
        let mut engine = PhysicsEngine::initialize(
            PendulumParameters::default(),
            PendulumState::horizontal(),
            options,
        )
        .unwrap();

        group.bench_with_input(
            BenchmarkId::new("integrator", integrator.as_str()),
            &integrator,
            |b, _| {
                b.iter(|| engine.step(black_box(0.001)).unwrap());
            },
        );
    }

    group.finish();
}

/// Benchmark evaluating the demo mapping
fn bench_mapping_recompute(c: &mut Criterion) {
    let config = MappingConfig::from_json_str(DEMO_MAPPING).unwrap();
    let engine = MappingEngine::new(&config).unwrap();
    let state = PendulumState::new(0.8, -1.1, 2.5, -4.0);
    let weather = WeatherSnapshot::new(17.0, 65.0, 3.0, 1003, "Partly cloudy");

    c.bench_function("mapping_recompute", |b| {
        b.iter(|| engine.recompute(black_box(&state), black_box(&weather)));
    });
}

/// Benchmark publish fan-out to inline subscribers
fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("Bus Publish");

    for subscribers in [1usize, 4, 16] {
        let bus = EventBus::new();
        let _subs: Vec<_> = (0..subscribers)
            .map(|_| {
                bus.subscribe(EventKind::PendulumStepped, |event| {
                    black_box(event.seq);
                    Ok(())
                })
                .unwrap()
            })
            .collect();

        group.bench_with_input(
            BenchmarkId::new("subscribers", subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| bus.publish(black_box(PendulumState::horizontal())).unwrap());
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_physics_step, bench_mapping_recompute, bench_publish);
criterion_main!(benches);
