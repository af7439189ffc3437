//! Typed event distribution
//!
//! The bus carries immutable snapshots from producers (physics, weather,
//! mapping) to any number of consumers (sonifiers, visualizers, loggers).

mod bus;
mod event;
mod mailbox;

pub use bus::*;
pub use event::*;
