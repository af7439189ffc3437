//! Declarative mapping from simulation and weather state to control parameters
//!
//! - [`MappingConfig`]: raw serde form of the rule set
//! - [`CompiledMapping`]: the validated form, evaluated per tick
//! - [`MappingEngine`]: holds the active config and follows the event bus

mod config;
mod engine;
mod source;
mod transform;

pub use config::*;
pub use engine::*;
pub use source::{Source, SourceField};
pub use transform::{Bucket, CurveShape, Transform};
