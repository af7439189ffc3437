//! Weather snapshots supplied by an external source.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Condition code reported for clear skies
pub const CONDITION_CLEAR: u32 = 1000;

/// Immutable record of environmental conditions at one moment.
///
/// A snapshot is never merged field by field; the next one supersedes it
/// wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    /// Air temperature (°C)
    pub temperature: f64,
    /// Relative humidity (%)
    pub humidity: f64,
    /// Wind speed (m/s)
    pub wind_speed: f64,
    /// Provider condition code
    pub condition_code: u32,
    /// Human readable condition, e.g. "Partly cloudy"
    #[serde(default)]
    pub condition: String,
    /// When the provider captured the record
    pub captured_at: SystemTime,
}

impl WeatherSnapshot {
    /// Snapshot captured now.
    pub fn new(
        temperature: f64,
        humidity: f64,
        wind_speed: f64,
        condition_code: u32,
        condition: impl Into<String>,
    ) -> Self {
        Self {
            temperature,
            humidity,
            wind_speed,
            condition_code,
            condition: condition.into(),
            captured_at: SystemTime::now(),
        }
    }

    /// Mild, clear default used while no provider data has arrived.
    pub fn fallback() -> Self {
        Self::new(20.0, 50.0, 0.0, CONDITION_CLEAR, "Clear")
    }

    /// Returns a copy stamped with the given capture time.
    pub fn captured(mut self, at: SystemTime) -> Self {
        self.captured_at = at;
        self
    }
}
