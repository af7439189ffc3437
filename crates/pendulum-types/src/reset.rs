//! Notices describing a self-healing simulation reset.

use serde::{Deserialize, Serialize};

use crate::PendulumState;

/// Why a step was thrown away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivergenceReason {
    /// The integrated state contained NaN or infinity
    NonFinite,
    /// Total energy left the configured sanity bound
    EnergyBound,
    /// The mass matrix was too close to singular to invert
    SingularMassMatrix,
}

/// Which state the engine fell back to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestoreTarget {
    /// The state before the failed step
    LastGood,
    /// The engine's configured default state
    Default,
}

/// Payload of a `SimulationReset` event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResetNotice {
    /// Tick at which the divergence was detected
    pub tick: u64,
    pub reason: DivergenceReason,
    pub restored: RestoreTarget,
    /// State the engine continues from
    pub state: PendulumState,
}
