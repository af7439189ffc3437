//! Double pendulum physics
//!
//! - [`dynamics`]: equations of motion, energy and bob positions
//! - [`PhysicsEngine`]: fixed-step integration with a divergence guard
//! - [`PendulumEnsemble`]: many independently varied engines stepped together

pub mod dynamics;
mod engine;
mod ensemble;

pub use dynamics::{bob_positions, energy, Dynamics};
pub use engine::*;
pub use ensemble::{PendulumEnsemble, Variation};
