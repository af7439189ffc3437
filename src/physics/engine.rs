//! Fixed-step double pendulum engine
//!
//! Owns the authoritative [`PendulumState`] and the only code path that
//! mutates it ([`PhysicsEngine::step`]). Every step is checked for blow-up
//! and rolled back when it fails, so consumers only ever see finite states.

use nalgebra::DVector;
use pendulum_types::{
    DivergenceReason, IntegratorKind, ParameterError, PendulumParameters, PendulumState,
    ResetNotice, RestoreTarget, SettingsError, SimulationSettings, WeatherCoupling,
    WeatherSnapshot,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::dynamics::{energy_scale, with_derived, Dynamics};
use crate::events::{BusError, EventBus, EventPayload};
use crate::solvers::{ExplicitSolver, Solver, SolverError, SolverKind};
use crate::utils::constants::DIVERGENCE_FALLBACK_AFTER;

/// Physics-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhysicsError {
    #[error("invalid pendulum parameters: {0}")]
    InvalidParameters(#[from] ParameterError),

    #[error("invalid engine settings: {0}")]
    InvalidSettings(#[from] SettingsError),

    #[error("initial state contains non-finite values")]
    InvalidState,

    #[error("timestep must be positive and finite, got {0}")]
    InvalidTimestep(f64),

    #[error("integrator failure: {0}")]
    Solver(#[from] SolverError),
}

/// Health of the integration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCondition {
    Running,
    /// A step failed and is being rolled back
    Diverged,
}

/// Engine knobs taken from [`SimulationSettings`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    pub integrator: IntegratorKind,
    /// Multiple of the reference energy scale treated as a blow-up
    pub energy_bound: f64,
    pub max_angular_velocity: Option<f64>,
    pub coupling: WeatherCoupling,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&SimulationSettings::default())
    }
}

impl From<&SimulationSettings> for EngineOptions {
    fn from(settings: &SimulationSettings) -> Self {
        Self {
            integrator: settings.integrator,
            energy_bound: settings.energy_bound,
            max_angular_velocity: settings.max_angular_velocity,
            coupling: settings.weather_coupling,
        }
    }
}

/// Double pendulum integrator with a divergence guard
pub struct PhysicsEngine {
    /// Position in the ensemble, stamped on every published state
    index: usize,
    params: PendulumParameters,
    options: EngineOptions,
    solver: SolverKind,
    state: PendulumState,
    default_state: PendulumState,
    condition: EngineCondition,
    /// Energy of the initial condition, part of the blow-up reference
    initial_energy: f64,
    energy_reference: f64,
    acceleration_scale: f64,
    /// Velocity factor applied at the start of the next step (1.0 = none)
    pending_rescale: f64,
    consecutive_divergences: u32,
    reset_count: u64,
    bus: Option<EventBus>,
}

impl PhysicsEngine {
    /// Create an engine from explicit parameters, initial state and options.
    pub fn initialize(
        params: PendulumParameters,
        initial_state: PendulumState,
        options: EngineOptions,
    ) -> Result<Self, PhysicsError> {
        params.validate()?;
        if !(initial_state.coordinates().iter().all(|v| v.is_finite())
            && initial_state.time.is_finite())
        {
            return Err(PhysicsError::InvalidState);
        }
        if !(options.energy_bound.is_finite() && options.energy_bound > 0.0) {
            return Err(SettingsError::NotPositive {
                field: "energy_bound",
                value: options.energy_bound,
            }
            .into());
        }

        let state = with_derived(&params, initial_state);
        let solver = SolverKind::new(
            options.integrator,
            DVector::from_row_slice(&state.coordinates()),
        );

        let mut engine = Self {
            index: state.pendulum,
            params,
            options,
            solver,
            state,
            default_state: with_derived(
                &params,
                PendulumState {
                    pendulum: state.pendulum,
                    ..PendulumState::at_rest()
                },
            ),
            condition: EngineCondition::Running,
            initial_energy: state.energy,
            energy_reference: 0.0,
            acceleration_scale: 1.0,
            pending_rescale: 1.0,
            consecutive_divergences: 0,
            reset_count: 0,
            bus: None,
        };
        engine.refresh_reference();
        Ok(engine)
    }

    /// Create an engine from validated settings, applying the seeded
    /// initial-angle jitter.
    pub fn from_settings(settings: &SimulationSettings) -> Result<Self, PhysicsError> {
        settings.validate()?;
        let initial = jittered_state(
            settings.initial_state,
            settings.initial_angle_jitter,
            settings.seed,
        );
        Self::initialize(settings.parameters, initial, EngineOptions::from(settings))
    }

    /// Publish every step on this bus.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Place this engine at `index` in an ensemble.
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self.state.pendulum = index;
        self.default_state.pendulum = index;
        self
    }

    /// State restored to when rolling back to the last good state fails twice.
    pub fn with_default_state(mut self, state: PendulumState) -> Result<Self, PhysicsError> {
        if !state.coordinates().iter().all(|v| v.is_finite()) {
            return Err(PhysicsError::InvalidState);
        }
        self.default_state = with_derived(
            &self.params,
            PendulumState {
                pendulum: self.index,
                ..state
            },
        );
        Ok(self)
    }

    /// Advance the simulation by `dt` seconds.
    ///
    /// Never returns a non-finite state: a failed step is rolled back and
    /// reported with a `SimulationReset` event instead.
    pub fn step(&mut self, dt: f64) -> Result<PendulumState, PhysicsError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(PhysicsError::InvalidTimestep(dt));
        }

        let previous = self.state;
        let mut start = previous;
        if self.pending_rescale != 1.0 {
            start.omega1 *= self.pending_rescale;
            start.omega2 *= self.pending_rescale;
            self.pending_rescale = 1.0;
        }

        let dynamics =
            Dynamics::new(self.params).with_acceleration_scale(self.acceleration_scale);
        let mut singular = false;
        self.solver
            .set_state(DVector::from_row_slice(&start.coordinates()));
        self.solver.advance(
            |x, _t| match dynamics.derivative(x) {
                Some(dx) => dx,
                None => {
                    singular = true;
                    DVector::from_element(x.len(), f64::NAN)
                }
            },
            dt,
        )?;

        let x = self.solver.state();
        let mut next = PendulumState {
            theta1: x[0],
            theta2: x[1],
            omega1: x[2],
            omega2: x[3],
            pendulum: self.index,
            tick: previous.tick + 1,
            time: previous.time + dt,
            ..PendulumState::default()
        };
        if let Some(limit) = self.options.max_angular_velocity {
            next.omega1 = next.omega1.clamp(-limit, limit);
            next.omega2 = next.omega2.clamp(-limit, limit);
        }
        let next = with_derived(&self.params, next);

        let verdict = if singular {
            Some(DivergenceReason::SingularMassMatrix)
        } else if !next.is_finite() {
            Some(DivergenceReason::NonFinite)
        } else if next.energy.abs() > self.options.energy_bound * self.energy_reference {
            Some(DivergenceReason::EnergyBound)
        } else {
            None
        };

        match verdict {
            None => {
                self.state = next;
                self.consecutive_divergences = 0;
                self.publish(next);
                Ok(next)
            }
            Some(reason) => Ok(self.recover(reason, previous, next.tick, next.time)),
        }
    }

    fn recover(
        &mut self,
        reason: DivergenceReason,
        previous: PendulumState,
        tick: u64,
        time: f64,
    ) -> PendulumState {
        self.condition = EngineCondition::Diverged;
        self.consecutive_divergences += 1;

        let restored = if self.consecutive_divergences >= DIVERGENCE_FALLBACK_AFTER
            || !previous.is_finite()
        {
            RestoreTarget::Default
        } else {
            RestoreTarget::LastGood
        };
        let base = match restored {
            RestoreTarget::LastGood => previous,
            RestoreTarget::Default => self.default_state,
        };

        let state = with_derived(
            &self.params,
            PendulumState {
                pendulum: self.index,
                tick,
                time,
                ..base
            },
        );
        self.state = state;
        self.pending_rescale = 1.0;
        self.reset_count += 1;
        warn!(
            tick,
            ?reason,
            ?restored,
            resets = self.reset_count,
            "pendulum diverged, state restored"
        );

        self.publish(ResetNotice {
            tick,
            reason,
            restored,
            state,
        });
        self.publish(state);
        self.condition = EngineCondition::Running;
        state
    }

    fn publish(&self, payload: impl Into<EventPayload>) {
        let Some(bus) = &self.bus else {
            return;
        };
        match bus.publish(payload) {
            Ok(_) => {}
            Err(BusError::Closed) => debug!("bus closed, step not published"),
            Err(err) => warn!(error = %err, "failed to publish physics event"),
        }
    }

    /// Replace the parameters as a whole. Rejected values leave the current
    /// parameters in place.
    pub fn set_parameters(&mut self, params: PendulumParameters) -> Result<(), PhysicsError> {
        params.validate()?;
        self.params = params;
        self.state = with_derived(&params, self.state);
        self.default_state = with_derived(&params, self.default_state);
        self.refresh_reference();
        info!(?params, "pendulum parameters replaced");
        Ok(())
    }

    /// Change gravity, rescaling the angular velocities by `sqrt(g_new/g_old)`
    /// at the start of the next step so the motion keeps its character.
    pub fn set_gravity(&mut self, gravity: f64) -> Result<(), PhysicsError> {
        let old = self.params.gravity;
        let params = self.params.with_gravity(gravity);
        params.validate()?;
        self.set_parameters(params)?;
        self.pending_rescale *= (gravity / old).sqrt();
        Ok(())
    }

    /// Feed a weather snapshot into the optional temperature coupling.
    /// Returns the acceleration factor now in effect.
    pub fn apply_weather(&mut self, snapshot: &WeatherSnapshot) -> f64 {
        let factor = self.options.coupling.factor(snapshot.temperature);
        if factor != self.acceleration_scale {
            debug!(
                temperature = snapshot.temperature,
                factor, "weather coupling factor changed"
            );
            self.pending_rescale *= factor / self.acceleration_scale;
            self.acceleration_scale = factor;
        }
        factor
    }

    fn refresh_reference(&mut self) {
        let e0 = if self.initial_energy.is_finite() {
            self.initial_energy.abs()
        } else {
            0.0
        };
        self.energy_reference = energy_scale(&self.params) + e0;
    }

    /// Copy of the current state
    pub fn state(&self) -> PendulumState {
        self.state
    }

    pub fn parameters(&self) -> PendulumParameters {
        self.params
    }

    pub fn condition(&self) -> EngineCondition {
        self.condition
    }

    /// Number of divergence recoveries so far
    pub fn reset_count(&self) -> u64 {
        self.reset_count
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn integrator(&self) -> IntegratorKind {
        self.solver.kind()
    }

    pub fn acceleration_scale(&self) -> f64 {
        self.acceleration_scale
    }
}

/// Perturb both initial angles by a reproducible uniform offset in
/// `[-jitter, jitter]`.
pub fn jittered_state(base: PendulumState, jitter: f64, seed: u64) -> PendulumState {
    if !(jitter > 0.0) {
        return base;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    PendulumState {
        theta1: base.theta1 + rng.gen_range(-jitter..=jitter),
        theta2: base.theta2 + rng.gen_range(-jitter..=jitter),
        ..base
    }
}
