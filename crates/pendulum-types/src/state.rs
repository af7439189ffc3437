//! Double pendulum parameters and state snapshots.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::STANDARD_GRAVITY;

/// Rejected pendulum parameter field
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("{field} must be strictly positive and finite, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("{field} must be non-negative and finite, got {value}")]
    Negative { field: &'static str, value: f64 },
}

/// Physical parameters of a double pendulum.
///
/// Two point masses on rigid, massless rods. The value is replaced as a whole
/// unit; the engine never sees a half-updated parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PendulumParameters {
    /// Upper rod length (m)
    pub length1: f64,
    /// Lower rod length (m)
    pub length2: f64,
    /// Upper bob mass (kg)
    pub mass1: f64,
    /// Lower bob mass (kg)
    pub mass2: f64,
    /// Gravitational acceleration (m/s²)
    pub gravity: f64,
    /// Linear damping on the upper joint (1/s)
    #[serde(default)]
    pub damping1: f64,
    /// Linear damping on the lower joint (1/s)
    #[serde(default)]
    pub damping2: f64,
}

impl Default for PendulumParameters {
    fn default() -> Self {
        Self {
            length1: 1.0,
            length2: 1.0,
            mass1: 1.0,
            mass2: 1.0,
            gravity: STANDARD_GRAVITY,
            damping1: 0.0,
            damping2: 0.0,
        }
    }
}

impl PendulumParameters {
    /// Undamped pendulum with the given rods and masses under standard gravity.
    pub fn new(length1: f64, length2: f64, mass1: f64, mass2: f64) -> Self {
        Self {
            length1,
            length2,
            mass1,
            mass2,
            ..Self::default()
        }
    }

    /// Returns a copy with the given gravitational acceleration.
    pub fn with_gravity(mut self, gravity: f64) -> Self {
        self.gravity = gravity;
        self
    }

    /// Returns a copy with the given joint damping coefficients.
    pub fn with_damping(mut self, damping1: f64, damping2: f64) -> Self {
        self.damping1 = damping1;
        self.damping2 = damping2;
        self
    }

    /// Check every field against its physical constraint.
    pub fn validate(&self) -> Result<(), ParameterError> {
        let positive = [
            ("length1", self.length1),
            ("length2", self.length2),
            ("mass1", self.mass1),
            ("mass2", self.mass2),
            ("gravity", self.gravity),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ParameterError::NotPositive { field, value });
            }
        }

        for (field, value) in [("damping1", self.damping1), ("damping2", self.damping2)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ParameterError::Negative { field, value });
            }
        }

        Ok(())
    }
}

/// Cartesian bob positions with the pivot at the origin and y pointing up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BobPositions {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// Snapshot of the pendulum at one simulation tick.
///
/// Angles are measured from the downward vertical and are never wrapped, so
/// the winding count survives. `energy` and `bobs` are derived quantities
/// filled in by the engine when it publishes the snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PendulumState {
    /// Upper rod angle (rad)
    pub theta1: f64,
    /// Lower rod angle (rad)
    pub theta2: f64,
    /// Upper rod angular velocity (rad/s)
    pub omega1: f64,
    /// Lower rod angular velocity (rad/s)
    pub omega2: f64,
    /// Position of this pendulum in the ensemble
    #[serde(default)]
    pub pendulum: usize,
    /// Number of completed integration steps
    #[serde(default)]
    pub tick: u64,
    /// Elapsed simulation time (s)
    #[serde(default)]
    pub time: f64,
    /// Total mechanical energy (J)
    #[serde(default)]
    pub energy: f64,
    /// Bob positions (m)
    #[serde(default)]
    pub bobs: BobPositions,
}

impl PendulumState {
    /// State at tick zero with the given angles and angular velocities.
    pub fn new(theta1: f64, theta2: f64, omega1: f64, omega2: f64) -> Self {
        Self {
            theta1,
            theta2,
            omega1,
            omega2,
            ..Self::default()
        }
    }

    /// Both rods hanging straight down, motionless.
    pub fn at_rest() -> Self {
        Self::default()
    }

    /// Both rods horizontal, motionless.
    pub fn horizontal() -> Self {
        let half_pi = std::f64::consts::FRAC_PI_2;
        Self::new(half_pi, half_pi, 0.0, 0.0)
    }

    /// The integrated coordinates as `[θ1, θ2, ω1, ω2]`.
    pub fn coordinates(&self) -> [f64; 4] {
        [self.theta1, self.theta2, self.omega1, self.omega2]
    }

    /// True when every integrated and derived value is finite.
    pub fn is_finite(&self) -> bool {
        self.coordinates().iter().all(|v| v.is_finite())
            && self.time.is_finite()
            && self.energy.is_finite()
    }
}
