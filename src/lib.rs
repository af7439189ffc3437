//! pendulum-weather - Weather-driven double pendulum control-signal engine
//!
//! Combines live weather with the chaotic motion of a simulated double
//! pendulum and turns both into bounded control parameters for sound and
//! visual renderers.
//!
//! # Architecture
//!
//! - [`physics`]: fixed-step double pendulum integration with a divergence guard
//! - [`mapping`]: declarative, validated rules from inputs to parameters
//! - [`events`]: typed publish/subscribe bus with scoped subscriptions
//! - [`weather`]: weather sources, the last-value-wins slot and the poller
//! - [`simulation`]: the real-time runtime tying them together
//!
//! # Example
//!
//! ```rust,ignore
//! use pendulum_weather::prelude::*;
//!
//! let config = MappingConfig::from_path("mapping.json")?;
//! let weather = StaticWeather::new(WeatherSnapshot::fallback());
//! let sim = Simulation::start(SimulationSettings::default(), &config, weather)?;
//!
//! let _sub = sim.subscribe_queued(EventKind::ParametersChanged, |event| {
//!     if let Some(params) = event.parameters() {
//!         println!("{:?}", params.get("pitch"));
//!     }
//!     Ok(())
//! })?;
//! ```

pub mod events;
pub mod mapping;
pub mod physics;
pub mod simulation;
pub mod solvers;
pub mod utils;
pub mod weather;

pub use pendulum_types as types;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::events::{BusError, Event, EventBus, EventKind, EventPayload, Subscription};
    pub use crate::mapping::{MappingConfig, MappingEngine, MappingError};
    pub use crate::physics::{EngineOptions, PhysicsEngine, PhysicsError};
    pub use crate::simulation::{Simulation, SimulationError};
    pub use crate::weather::{StaticWeather, WeatherError, WeatherSource};
    pub use pendulum_types::*;
}
