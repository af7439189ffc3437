//! Integration tests for the mapping layer

use std::sync::Arc;

use pendulum_weather::events::{EventBus, EventKind};
use pendulum_weather::mapping::{ConfigViolation, MappingConfig, MappingEngine, MappingError};
use pendulum_weather::types::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DEMO_MAPPING: &str = include_str!("../demos/mapping.json");

fn wild_value(rng: &mut StdRng) -> f64 {
    match rng.gen_range(0..8) {
        0 => f64::NAN,
        1 => f64::INFINITY,
        2 => f64::NEG_INFINITY,
        3 => f64::MAX,
        4 => -f64::MAX,
        5 => 0.0,
        _ => rng.gen_range(-1e4..1e4),
    }
}

#[test]
fn test_demo_config_is_valid() {
    let config = MappingConfig::from_json_str(DEMO_MAPPING).unwrap();
    let engine = MappingEngine::new(&config).unwrap();
    let targets: Vec<String> = engine.mapping().targets().map(str::to_string).collect();
    assert_eq!(targets, vec!["pitch", "velocity", "pan", "brightness", "mode"]);
}

#[test]
fn test_outputs_stay_in_range_for_arbitrary_inputs() {
    let config = MappingConfig::from_json_str(DEMO_MAPPING).unwrap();
    let engine = MappingEngine::new(&config).unwrap();
    let bounds: Vec<(String, f64, f64)> = config
        .rules
        .iter()
        .map(|r| (r.target.clone(), r.min, r.max))
        .collect();

    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..5000 {
        let state = PendulumState {
            theta1: wild_value(&mut rng),
            theta2: wild_value(&mut rng),
            omega1: wild_value(&mut rng),
            omega2: wild_value(&mut rng),
            pendulum: 0,
            tick: 0,
            time: wild_value(&mut rng),
            energy: wild_value(&mut rng),
            bobs: BobPositions {
                x1: wild_value(&mut rng),
                y1: wild_value(&mut rng),
                x2: wild_value(&mut rng),
                y2: wild_value(&mut rng),
            },
        };
        let weather = WeatherSnapshot::new(
            wild_value(&mut rng),
            wild_value(&mut rng),
            wild_value(&mut rng),
            rng.gen(),
            "",
        );

        let set = engine.evaluate(&state, &weather);
        assert_eq!(set.len(), bounds.len());
        for (target, min, max) in &bounds {
            let value = set.get(target).expect("every target is populated");
            assert!(
                value.is_finite() && *min <= value && value <= *max,
                "{} = {} outside [{}, {}]",
                target,
                value,
                min,
                max
            );
        }
    }
}

#[test]
fn test_invalid_reload_leaves_previous_config_active() {
    let config = MappingConfig::from_json_str(DEMO_MAPPING).unwrap();
    let engine = MappingEngine::new(&config).unwrap();
    let state = PendulumState::new(0.7, -0.2, 1.5, 3.0);
    let weather = WeatherSnapshot::new(12.0, 80.0, 2.0, 1063, "Patchy rain possible");
    let before = engine.evaluate(&state, &weather);

    // Valid first rule, broken last rule: nothing from this config is applied
    let mut broken = config.clone();
    broken.rules[0].target = "cutoff".to_string();
    broken.rules[4].source = "weather.pressure".to_string();

    match engine.load_config(&broken) {
        Err(MappingError::InvalidMappingConfig {
            rule,
            target,
            violation,
        }) => {
            assert_eq!(rule, 4);
            assert_eq!(target, "mode");
            assert_eq!(
                violation,
                ConfigViolation::UnknownSource("weather.pressure".to_string())
            );
        }
        other => panic!("expected rejection, got {:?}", other),
    }

    assert_eq!(engine.revision(), 1);
    assert_eq!(engine.evaluate(&state, &weather), before);
}

#[test]
fn test_parameters_published_after_both_inputs() {
    let bus = EventBus::new();
    let config = MappingConfig::from_json_str(DEMO_MAPPING).unwrap();
    let engine = Arc::new(MappingEngine::new(&config).unwrap());
    let _attached = engine.attach(&bus).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    let _sink = bus
        .subscribe(EventKind::ParametersChanged, move |event| {
            tx.send(event.parameters().cloned()).ok();
            Ok(())
        })
        .unwrap();

    bus.publish(WeatherSnapshot::new(35.0, 10.0, 0.0, 1114, "Blowing snow"))
        .unwrap();
    assert!(rx.try_recv().is_err());

    bus.publish(PendulumState::horizontal()).unwrap();
    let set = rx.try_recv().unwrap().unwrap();
    assert_eq!(set.len(), 5);
    assert_eq!(set.get("mode"), Some(3.0));
    assert_eq!(set.revision, 1);

    engine.load_config(&config).unwrap();
    bus.publish(PendulumState::horizontal()).unwrap();
    assert_eq!(rx.try_recv().unwrap().unwrap().revision, 2);
}

#[test]
fn test_rules_can_follow_individual_ensemble_members() {
    let json = r#"{
        "rules": [
            { "source": "pendulum.theta1", "target": "lead", "type": "linear",
              "parameters": { "domain": [-1, 1] }, "min": 0, "max": 1 },
            { "source": "pendulum.2.theta1", "target": "third", "type": "linear",
              "parameters": { "domain": [-1, 1] }, "min": 0, "max": 1 }
        ]
    }"#;
    let config = MappingConfig::from_json_str(json).unwrap();
    let engine = MappingEngine::new(&config).unwrap();
    let weather = WeatherSnapshot::fallback();
    let members: Vec<PendulumState> = [1.0, -1.0, 0.0]
        .into_iter()
        .enumerate()
        .map(|(i, theta1)| PendulumState {
            pendulum: i,
            ..PendulumState::new(theta1, 0.0, 0.0, 0.0)
        })
        .collect();

    let set = engine.evaluate_ensemble(&members, &weather);
    assert_eq!(set.get("lead"), Some(1.0));
    assert_eq!(set.get("third"), Some(0.5));

    // A lone state is member 0; the third member is then unknown
    let set = engine.evaluate(&members[0], &weather);
    assert_eq!(set.get("third"), Some(0.0));

    let mut bad = config.clone();
    bad.rules[1].source = "pendulum.x.theta1".to_string();
    assert!(matches!(
        engine.load_config(&bad),
        Err(MappingError::InvalidMappingConfig { rule: 1, .. })
    ));
}
