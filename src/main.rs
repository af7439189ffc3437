use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pendulum_weather::prelude::*;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEMO_MAPPING: &str = include_str!("../demos/mapping.json");

/// Headless demo: runs the pipeline for a few seconds and logs parameters.
///
/// Usage: `pendulum-weather [settings.json] [mapping.json] [seconds]`
fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let settings = match args.first() {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading settings from {}", path))?;
            serde_json::from_str::<SimulationSettings>(&text)
                .with_context(|| format!("parsing settings from {}", path))?
        }
        None => SimulationSettings {
            initial_angle_jitter: 0.1,
            seed: 7,
            pendulum_count: 4,
            mass_range: 0.1,
            length_range: 0.05,
            ..SimulationSettings::default()
        },
    };

    let mapping = match args.get(1) {
        Some(path) => MappingConfig::from_path(path)
            .with_context(|| format!("loading mapping from {}", path))?,
        None => MappingConfig::from_json_str(DEMO_MAPPING)?,
    };

    let seconds: f64 = match args.get(2) {
        Some(s) => s.parse().context("duration must be a number of seconds")?,
        None => 5.0,
    };
    let half = Duration::try_from_secs_f64(seconds / 2.0).with_context(|| {
        format!("duration must be a non-negative number of seconds, got {}", seconds)
    })?;

    let weather = StaticWeather::cycle(vec![
        WeatherSnapshot::new(14.0, 72.0, 5.5, 1003, "Partly cloudy"),
        WeatherSnapshot::new(9.5, 88.0, 8.0, 1063, "Patchy rain possible"),
    ]);

    let mut sim = Simulation::start(settings, &mapping, weather)?;

    let received = Arc::new(AtomicU64::new(0));
    let counter = received.clone();
    let _printer = sim.subscribe_queued(EventKind::ParametersChanged, move |event| {
        let n = counter.fetch_add(1, Ordering::Relaxed);
        if n % 60 == 0 {
            if let Some(params) = event.parameters() {
                let line: Vec<String> = params
                    .iter()
                    .map(|(name, value)| format!("{}={:.3}", name, value))
                    .collect();
                info!(revision = params.revision, "{}", line.join(" "));
            }
        }
        Ok(())
    })?;
    let _resets = sim.bus().subscribe(EventKind::SimulationReset, |event| {
        if let Some(notice) = event.reset() {
            info!(tick = notice.tick, reason = ?notice.reason, "pendulum reset");
        }
        Ok(())
    })?;

    std::thread::sleep(half);
    info!("switching to moon gravity");
    sim.set_gravity(MOON_GRAVITY)?;
    std::thread::sleep(half);

    sim.stop();
    info!(
        parameter_sets = received.load(Ordering::Relaxed),
        failures = sim.bus().failure_count(),
        "demo finished"
    );
    Ok(())
}
