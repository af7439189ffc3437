//! Ensemble of independent double pendulums
//!
//! Members share the base parameters, with each bob's mass and each rod's
//! length scaled by its own factor from `[1 - range, 1 + range]`. Member `i`
//! starts from the configured initial state, jittered with seed `seed + i`.
//! The per-member draws are kept, so changing a range rescales the ensemble
//! instead of reshuffling it, and shrinking then growing it brings back the
//! same members.

use pendulum_types::{
    PendulumParameters, PendulumState, SettingsError, SimulationSettings, WeatherSnapshot,
    MAX_PENDULUMS, MAX_VARIATION_RANGE,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use super::engine::{jittered_state, EngineOptions, PhysicsEngine, PhysicsError};
use crate::events::EventBus;

/// Separates the variation stream from the jitter stream of the same member
const VARIATION_STREAM: u64 = 0x9E37_79B9_7F4A_7C15;

/// Unit draws in `[-1, 1]` for one member, scaled by the current ranges
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Variation {
    pub mass: [f64; 2],
    pub length: [f64; 2],
}

impl Variation {
    fn draw(seed: u64, index: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(member_seed(seed, index) ^ VARIATION_STREAM);
        let mut unit = || rng.gen_range(-1.0..=1.0);
        Self {
            mass: [unit(), unit()],
            length: [unit(), unit()],
        }
    }

    /// Member parameters for the given base and ranges
    pub fn apply(
        &self,
        base: &PendulumParameters,
        mass_range: f64,
        length_range: f64,
    ) -> PendulumParameters {
        PendulumParameters {
            length1: base.length1 * (1.0 + length_range * self.length[0]),
            length2: base.length2 * (1.0 + length_range * self.length[1]),
            mass1: base.mass1 * (1.0 + mass_range * self.mass[0]),
            mass2: base.mass2 * (1.0 + mass_range * self.mass[1]),
            ..*base
        }
    }
}

fn member_seed(seed: u64, index: usize) -> u64 {
    seed.wrapping_add(index as u64)
}

struct Member {
    engine: PhysicsEngine,
    variation: Variation,
}

/// A set of double pendulums stepped together.
///
/// Each member publishes its own `PendulumStepped` (and `SimulationReset`)
/// events, tagged with its index.
pub struct PendulumEnsemble {
    settings: SimulationSettings,
    base: PendulumParameters,
    mass_range: f64,
    length_range: f64,
    members: Vec<Member>,
    weather: Option<WeatherSnapshot>,
    bus: Option<EventBus>,
}

impl PendulumEnsemble {
    /// Build `pendulum_count` members from validated settings.
    pub fn from_settings(settings: &SimulationSettings) -> Result<Self, PhysicsError> {
        settings.validate()?;
        let mut ensemble = Self {
            settings: settings.clone(),
            base: settings.parameters,
            mass_range: settings.mass_range,
            length_range: settings.length_range,
            members: Vec::with_capacity(settings.pendulum_count),
            weather: None,
            bus: None,
        };
        for index in 0..settings.pendulum_count {
            let member = ensemble.member(index)?;
            ensemble.members.push(member);
        }
        Ok(ensemble)
    }

    /// Publish every member's steps on this bus.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.members = std::mem::take(&mut self.members)
            .into_iter()
            .map(|member| Member {
                engine: member.engine.with_bus(bus.clone()),
                ..member
            })
            .collect();
        self.bus = Some(bus);
        self
    }

    fn member(&self, index: usize) -> Result<Member, PhysicsError> {
        let variation = Variation::draw(self.settings.seed, index);
        let params = variation.apply(&self.base, self.mass_range, self.length_range);
        let initial = jittered_state(
            PendulumState {
                pendulum: index,
                ..self.settings.initial_state
            },
            self.settings.initial_angle_jitter,
            member_seed(self.settings.seed, index),
        );

        let mut engine =
            PhysicsEngine::initialize(params, initial, EngineOptions::from(&self.settings))?
                .with_index(index);
        if let Some(bus) = &self.bus {
            engine = engine.with_bus(bus.clone());
        }
        if let Some(weather) = &self.weather {
            engine.apply_weather(weather);
        }
        Ok(Member { engine, variation })
    }

    /// Advance every member by `dt`, in index order.
    pub fn step(&mut self, dt: f64) -> Result<Vec<PendulumState>, PhysicsError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(PhysicsError::InvalidTimestep(dt));
        }
        self.members
            .iter_mut()
            .map(|member| member.engine.step(dt))
            .collect()
    }

    /// Grow or shrink the ensemble. New members start from the configured
    /// initial state under the current parameters and weather.
    pub fn set_count(&mut self, count: usize) -> Result<(), PhysicsError> {
        if !(1..=MAX_PENDULUMS).contains(&count) {
            return Err(SettingsError::OutOfRange {
                field: "pendulum_count",
                value: count as f64,
                min: 1.0,
                max: MAX_PENDULUMS as f64,
            }
            .into());
        }

        let mut added = Vec::new();
        for index in self.members.len()..count {
            added.push(self.member(index)?);
        }
        self.members.truncate(count);
        self.members.extend(added);
        info!(count, "pendulum count changed");
        Ok(())
    }

    /// Replace the base parameters; every member keeps its own variation.
    pub fn set_parameters(&mut self, params: PendulumParameters) -> Result<(), PhysicsError> {
        params.validate()?;
        self.base = params;
        self.reapply()
    }

    /// Change gravity for every member, rescaling angular velocities.
    pub fn set_gravity(&mut self, gravity: f64) -> Result<(), PhysicsError> {
        self.base.with_gravity(gravity).validate()?;
        for member in &mut self.members {
            member.engine.set_gravity(gravity)?;
        }
        self.base.gravity = gravity;
        Ok(())
    }

    pub fn set_mass_range(&mut self, range: f64) -> Result<(), PhysicsError> {
        check_range("mass_range", range)?;
        self.mass_range = range;
        self.reapply()
    }

    pub fn set_length_range(&mut self, range: f64) -> Result<(), PhysicsError> {
        check_range("length_range", range)?;
        self.length_range = range;
        self.reapply()
    }

    fn reapply(&mut self) -> Result<(), PhysicsError> {
        for member in &mut self.members {
            let params = member
                .variation
                .apply(&self.base, self.mass_range, self.length_range);
            member.engine.set_parameters(params)?;
        }
        Ok(())
    }

    /// Feed a weather snapshot to every member. Returns the acceleration
    /// factor now in effect.
    pub fn apply_weather(&mut self, snapshot: &WeatherSnapshot) -> f64 {
        let mut factor = 1.0;
        for member in &mut self.members {
            factor = member.engine.apply_weather(snapshot);
        }
        self.weather = Some(snapshot.clone());
        factor
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Current state of every member, in index order
    pub fn states(&self) -> Vec<PendulumState> {
        self.members.iter().map(|m| m.engine.state()).collect()
    }

    pub fn engine(&self, index: usize) -> Option<&PhysicsEngine> {
        self.members.get(index).map(|m| &m.engine)
    }

    /// Base parameters before per-member variation
    pub fn parameters(&self) -> PendulumParameters {
        self.base
    }

    pub fn mass_range(&self) -> f64 {
        self.mass_range
    }

    pub fn length_range(&self) -> f64 {
        self.length_range
    }

    /// Divergence recoveries summed over all members
    pub fn reset_count(&self) -> u64 {
        self.members.iter().map(|m| m.engine.reset_count()).sum()
    }
}

fn check_range(field: &'static str, range: f64) -> Result<(), PhysicsError> {
    if (0.0..=MAX_VARIATION_RANGE).contains(&range) {
        Ok(())
    } else {
        Err(SettingsError::OutOfRange {
            field,
            value: range,
            min: 0.0,
            max: MAX_VARIATION_RANGE,
        }
        .into())
    }
}
