//! Shared types for the pendulum-weather engine.
//!
//! This crate defines the plain data model exchanged between the simulation,
//! the mapping layer and every downstream consumer:
//! - Pendulum parameters and state snapshots
//! - Weather snapshots
//! - Parameter sets produced by the mapping layer
//! - Reset notices emitted when the simulation self-heals
//! - Simulation settings and configuration

mod params;
mod reset;
mod settings;
mod state;
mod weather;

pub use params::*;
pub use reset::*;
pub use settings::*;
pub use state::*;
pub use weather::*;

/// Standard gravitational acceleration (m/s²)
pub const STANDARD_GRAVITY: f64 = 9.81;

/// Lunar surface gravity (m/s²)
pub const MOON_GRAVITY: f64 = 1.62;
