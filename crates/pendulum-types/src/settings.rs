//! Simulation settings types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ParameterError, PendulumParameters, PendulumState};

/// Accepted clock rates (Hz)
pub const TICK_RATE_RANGE_HZ: (f64, f64) = (0.01, 10_000.0);

/// Accepted weather poll intervals (s), one millisecond to one week
pub const POLL_INTERVAL_RANGE_SECS: (f64, f64) = (0.001, 604_800.0);

/// Largest ensemble the runtime will drive
pub const MAX_PENDULUMS: usize = 256;

/// Largest relative spread of masses and lengths around the base parameters
pub const MAX_VARIATION_RANGE: f64 = 0.9;

/// Fixed-step integrators available to the physics engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegratorKind {
    /// Forward Euler (1st order)
    Euler,
    /// Classical RK4 (4th order)
    RK4,
}

impl Default for IntegratorKind {
    fn default() -> Self {
        IntegratorKind::RK4
    }
}

impl IntegratorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegratorKind::Euler => "Euler",
            IntegratorKind::RK4 => "RK4",
        }
    }
}

/// Optional coupling of air temperature into the pendulum dynamics.
///
/// When enabled, temperature is mapped linearly (and clamped) onto a factor
/// that scales both angular accelerations: cold air slows the pendulum down,
/// hot air speeds it up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherCoupling {
    pub enabled: bool,
    /// Temperature mapped to `min_factor` (°C)
    pub min_temperature: f64,
    /// Temperature mapped to `max_factor` (°C)
    pub max_temperature: f64,
    pub min_factor: f64,
    pub max_factor: f64,
}

impl Default for WeatherCoupling {
    fn default() -> Self {
        Self {
            enabled: false,
            min_temperature: 0.0,
            max_temperature: 35.0,
            min_factor: 0.25,
            max_factor: 2.0,
        }
    }
}

impl WeatherCoupling {
    /// Acceleration factor for the given temperature; 1.0 when disabled.
    pub fn factor(&self, temperature: f64) -> f64 {
        if !self.enabled || !temperature.is_finite() {
            return 1.0;
        }
        if temperature <= self.min_temperature {
            return self.min_factor;
        }
        if temperature >= self.max_temperature {
            return self.max_factor;
        }
        let u = (temperature - self.min_temperature)
            / (self.max_temperature - self.min_temperature);
        self.min_factor + u * (self.max_factor - self.min_factor)
    }
}

/// Settings rejected by [`SimulationSettings::validate`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    #[error("{field} must be strictly positive and finite, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("{field} must lie in [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid pendulum parameters: {0}")]
    Parameters(#[from] ParameterError),

    #[error("initial state contains non-finite values")]
    NonFiniteState,

    #[error("weather coupling requires min_temperature < max_temperature and positive factors")]
    Coupling,
}

/// Simulation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Clock rate (Hz)
    pub tick_rate_hz: f64,

    /// Integration time step (s)
    pub dt: f64,

    /// Integration method
    pub integrator: IntegratorKind,

    /// Physical parameters at start-up
    pub parameters: PendulumParameters,

    /// Initial condition
    pub initial_state: PendulumState,

    /// Uniform angle jitter (rad) added to both initial angles
    pub initial_angle_jitter: f64,

    /// Seed for the jitter and parameter-variation generators
    pub seed: u64,

    /// Number of independent double pendulums
    pub pendulum_count: usize,

    /// Relative spread of each bob mass: factors drawn from `[1 - r, 1 + r]`
    pub mass_range: f64,

    /// Relative spread of each rod length: factors drawn from `[1 - r, 1 + r]`
    pub length_range: f64,

    /// Multiple of the reference energy scale treated as a blow-up
    pub energy_bound: f64,

    /// Optional clamp on both angular velocities (rad/s)
    pub max_angular_velocity: Option<f64>,

    /// Temperature coupling into the dynamics
    pub weather_coupling: WeatherCoupling,

    /// Seconds between weather polls
    pub weather_poll_interval_secs: f64,

    /// Default mailbox size for queued subscribers
    pub subscriber_queue_capacity: usize,

    /// Publish a mild default snapshot if the first weather poll fails
    pub fallback_weather: bool,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60.0,
            dt: 1.0 / 60.0,
            integrator: IntegratorKind::RK4,
            parameters: PendulumParameters::default(),
            initial_state: PendulumState::horizontal(),
            initial_angle_jitter: 0.0,
            seed: 0,
            pendulum_count: 1,
            mass_range: 0.0,
            length_range: 0.0,
            energy_bound: 50.0,
            max_angular_velocity: None,
            weather_coupling: WeatherCoupling::default(),
            weather_poll_interval_secs: 300.0,
            subscriber_queue_capacity: 64,
            fallback_weather: true,
        }
    }
}

impl SimulationSettings {
    /// Wall-clock period of one tick
    pub fn tick_period(&self) -> Result<Duration, SettingsError> {
        in_range("tick_rate_hz", self.tick_rate_hz, TICK_RATE_RANGE_HZ)?;
        period("tick_rate_hz", self.tick_rate_hz, 1.0 / self.tick_rate_hz)
    }

    /// Wall-clock period between weather polls
    pub fn weather_poll_interval(&self) -> Result<Duration, SettingsError> {
        let secs = self.weather_poll_interval_secs;
        in_range("weather_poll_interval_secs", secs, POLL_INTERVAL_RANGE_SECS)?;
        period("weather_poll_interval_secs", secs, secs)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.tick_period()?;
        self.weather_poll_interval()?;

        let positive = [
            ("dt", self.dt),
            ("energy_bound", self.energy_bound),
            ("subscriber_queue_capacity", self.subscriber_queue_capacity as f64),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(SettingsError::NotPositive { field, value });
            }
        }
        if let Some(limit) = self.max_angular_velocity {
            if !(limit.is_finite() && limit > 0.0) {
                return Err(SettingsError::NotPositive {
                    field: "max_angular_velocity",
                    value: limit,
                });
            }
        }
        if !(self.initial_angle_jitter.is_finite() && self.initial_angle_jitter >= 0.0) {
            return Err(SettingsError::NotPositive {
                field: "initial_angle_jitter",
                value: self.initial_angle_jitter,
            });
        }

        in_range(
            "pendulum_count",
            self.pendulum_count as f64,
            (1.0, MAX_PENDULUMS as f64),
        )?;
        in_range("mass_range", self.mass_range, (0.0, MAX_VARIATION_RANGE))?;
        in_range("length_range", self.length_range, (0.0, MAX_VARIATION_RANGE))?;

        self.parameters.validate()?;

        if !self.initial_state.coordinates().iter().all(|v| v.is_finite()) {
            return Err(SettingsError::NonFiniteState);
        }

        let c = &self.weather_coupling;
        if !(c.min_temperature < c.max_temperature && c.min_factor > 0.0 && c.max_factor > 0.0) {
            return Err(SettingsError::Coupling);
        }

        Ok(())
    }
}

fn in_range(
    field: &'static str,
    value: f64,
    (min, max): (f64, f64),
) -> Result<(), SettingsError> {
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(SettingsError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn period(field: &'static str, value: f64, secs: f64) -> Result<Duration, SettingsError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(period) if !period.is_zero() => Ok(period),
        _ => Err(SettingsError::NotPositive { field, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults_validate() {
        let settings = SimulationSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.integrator, IntegratorKind::RK4);
        assert_eq!(
            settings.tick_period(),
            Ok(Duration::from_secs_f64(1.0 / 60.0))
        );
        assert_eq!(settings.pendulum_count, 1);
    }

    #[test]
    fn test_rejects_zero_tick_rate() {
        let settings = SimulationSettings {
            tick_rate_hz: 0.0,
            ..SimulationSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::OutOfRange { field: "tick_rate_hz", .. })
        ));
    }

    #[test]
    fn test_rejects_periods_that_cannot_be_scheduled() {
        for tick_rate_hz in [1e-20, 1e300, f64::NAN, f64::INFINITY] {
            let settings = SimulationSettings {
                tick_rate_hz,
                ..SimulationSettings::default()
            };
            assert!(settings.tick_period().is_err(), "{}", tick_rate_hz);
            assert!(matches!(
                settings.validate(),
                Err(SettingsError::OutOfRange { field: "tick_rate_hz", .. })
            ));
        }

        let settings = SimulationSettings {
            weather_poll_interval_secs: 1e20,
            ..SimulationSettings::default()
        };
        assert!(settings.weather_poll_interval().is_err());
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::OutOfRange {
                field: "weather_poll_interval_secs",
                ..
            })
        ));

        let fastest = SimulationSettings {
            tick_rate_hz: TICK_RATE_RANGE_HZ.1,
            weather_poll_interval_secs: POLL_INTERVAL_RANGE_SECS.1,
            ..SimulationSettings::default()
        };
        assert!(fastest.validate().is_ok());
        assert!(!fastest.tick_period().unwrap().is_zero());
    }

    #[test]
    fn test_ensemble_bounds() {
        let none = SimulationSettings {
            pendulum_count: 0,
            ..SimulationSettings::default()
        };
        assert!(matches!(
            none.validate(),
            Err(SettingsError::OutOfRange { field: "pendulum_count", .. })
        ));

        let wide = SimulationSettings {
            mass_range: 1.0,
            ..SimulationSettings::default()
        };
        assert!(matches!(
            wide.validate(),
            Err(SettingsError::OutOfRange { field: "mass_range", .. })
        ));

        let ensemble = SimulationSettings {
            pendulum_count: 20,
            mass_range: 0.2,
            length_range: 0.1,
            ..SimulationSettings::default()
        };
        assert!(ensemble.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let settings = SimulationSettings {
            parameters: PendulumParameters::new(1.0, -1.0, 1.0, 1.0),
            ..SimulationSettings::default()
        };
        assert!(matches!(settings.validate(), Err(SettingsError::Parameters(_))));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "tick_rate_hz": 120.0, "integrator": "Euler" }"#;
        let settings: SimulationSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.tick_rate_hz, 120.0);
        assert_eq!(settings.integrator, IntegratorKind::Euler);
        assert_eq!(settings.subscriber_queue_capacity, 64);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_coupling_factor() {
        let disabled = WeatherCoupling::default();
        assert_eq!(disabled.factor(30.0), 1.0);

        let coupling = WeatherCoupling {
            enabled: true,
            ..WeatherCoupling::default()
        };
        assert_eq!(coupling.factor(-10.0), 0.25);
        assert_eq!(coupling.factor(40.0), 2.0);
        assert_relative_eq!(coupling.factor(17.5), 1.125, epsilon = 1e-12);
        assert_eq!(coupling.factor(f64::NAN), 1.0);
    }
}
