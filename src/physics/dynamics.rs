//! Double pendulum equations of motion
//!
//! Two point masses on rigid, massless rods swinging in a vertical plane.
//! Angles are measured from the downward vertical; the state vector is
//! `[θ1, θ2, ω1, ω2]`.
//!
//! With `δ = θ1 - θ2` and `D = 2m1 + m2 - m2·cos(2δ)`:
//!
//! ```text
//! α1 = (-g(2m1+m2)·sinθ1 - m2·g·sin(θ1-2θ2)
//!       - 2·sinδ·m2·(ω2²L2 + ω1²L1·cosδ)) / (L1·D)
//! α2 = (2·sinδ·(ω1²L1(m1+m2) + g(m1+m2)·cosθ1 + ω2²L2m2·cosδ)) / (L2·D)
//! ```
//!
//! Joint damping subtracts `c·ω` from each angular acceleration.

use nalgebra::DVector;
use pendulum_types::{BobPositions, PendulumParameters, PendulumState};

use crate::utils::constants::SINGULARITY_EPS;

/// Right-hand side of the pendulum ODE for one parameter set
#[derive(Debug, Clone, Copy)]
pub struct Dynamics {
    params: PendulumParameters,
    acceleration_scale: f64,
}

impl Dynamics {
    pub fn new(params: PendulumParameters) -> Self {
        Self {
            params,
            acceleration_scale: 1.0,
        }
    }

    /// Scale the conservative accelerations (weather coupling).
    pub fn with_acceleration_scale(mut self, scale: f64) -> Self {
        self.acceleration_scale = scale;
        self
    }

    /// Shared mass-matrix denominator `2m1 + m2 - m2·cos(2(θ1-θ2))`.
    pub fn denominator(&self, theta1: f64, theta2: f64) -> f64 {
        let p = &self.params;
        2.0 * p.mass1 + p.mass2 - p.mass2 * (2.0 * (theta1 - theta2)).cos()
    }

    /// Angular accelerations `(α1, α2)`, or `None` when the mass matrix is
    /// too close to singular to divide by.
    ///
    /// Non-finite inputs are not singular: they yield non-finite
    /// accelerations.
    pub fn accelerations(
        &self,
        theta1: f64,
        theta2: f64,
        omega1: f64,
        omega2: f64,
    ) -> Option<(f64, f64)> {
        let PendulumParameters {
            length1: l1,
            length2: l2,
            mass1: m1,
            mass2: m2,
            gravity: g,
            damping1,
            damping2,
        } = self.params;

        let den = self.denominator(theta1, theta2);
        if den.is_finite() && den.abs() < SINGULARITY_EPS {
            return None;
        }

        let delta = theta1 - theta2;
        let (sin_d, cos_d) = delta.sin_cos();
        let common_mass = 2.0 * m1 + m2;

        let num1 = -g * common_mass * theta1.sin()
            - m2 * g * (theta1 - 2.0 * theta2).sin()
            - 2.0 * sin_d * m2 * (omega2 * omega2 * l2 + omega1 * omega1 * l1 * cos_d);
        let num2 = 2.0
            * sin_d
            * (omega1 * omega1 * l1 * (m1 + m2)
                + g * (m1 + m2) * theta1.cos()
                + omega2 * omega2 * l2 * m2 * cos_d);

        let alpha1 = self.acceleration_scale * num1 / (l1 * den) - damping1 * omega1;
        let alpha2 = self.acceleration_scale * num2 / (l2 * den) - damping2 * omega2;
        Some((alpha1, alpha2))
    }

    /// Time derivative of `[θ1, θ2, ω1, ω2]`.
    pub fn derivative(&self, x: &DVector<f64>) -> Option<DVector<f64>> {
        let (alpha1, alpha2) = self.accelerations(x[0], x[1], x[2], x[3])?;
        Some(DVector::from_vec(vec![x[2], x[3], alpha1, alpha2]))
    }
}

/// Bob positions for a state, pivot at the origin, y up.
pub fn bob_positions(params: &PendulumParameters, state: &PendulumState) -> BobPositions {
    let x1 = params.length1 * state.theta1.sin();
    let y1 = -params.length1 * state.theta1.cos();
    BobPositions {
        x1,
        y1,
        x2: x1 + params.length2 * state.theta2.sin(),
        y2: y1 - params.length2 * state.theta2.cos(),
    }
}

/// Kinetic energy (J)
pub fn kinetic_energy(params: &PendulumParameters, state: &PendulumState) -> f64 {
    let PendulumParameters {
        length1: l1,
        length2: l2,
        mass1: m1,
        mass2: m2,
        ..
    } = *params;
    let (w1, w2) = (state.omega1, state.omega2);
    0.5 * m1 * l1 * l1 * w1 * w1
        + 0.5
            * m2
            * (l1 * l1 * w1 * w1
                + l2 * l2 * w2 * w2
                + 2.0 * l1 * l2 * w1 * w2 * (state.theta1 - state.theta2).cos())
}

/// Gravitational potential energy relative to the pivot height (J)
pub fn potential_energy(params: &PendulumParameters, state: &PendulumState) -> f64 {
    let bobs = bob_positions(params, state);
    params.gravity * (params.mass1 * bobs.y1 + params.mass2 * bobs.y2)
}

/// Total mechanical energy (J)
pub fn energy(params: &PendulumParameters, state: &PendulumState) -> f64 {
    kinetic_energy(params, state) + potential_energy(params, state)
}

/// Energy needed to lift both bobs from hanging to the pivot height.
///
/// Used as the natural scale for drift and blow-up checks, since the
/// total energy itself can legitimately be zero.
pub fn energy_scale(params: &PendulumParameters) -> f64 {
    let g = params.gravity;
    (params.mass1 + params.mass2) * g * params.length1 + params.mass2 * g * params.length2
}

/// Fill in the derived fields of a state.
pub fn with_derived(params: &PendulumParameters, mut state: PendulumState) -> PendulumState {
    state.energy = energy(params, &state);
    state.bobs = bob_positions(params, &state);
    state
}
