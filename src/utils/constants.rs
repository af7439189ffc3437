//! Simulation constants and defaults

/// Smallest admissible mass-matrix denominator before a step is treated as singular
pub const SINGULARITY_EPS: f64 = 1e-9;

/// Small tolerance for numerical comparisons
pub const TOLERANCE: f64 = 1e-12;

/// Consecutive divergences after which the engine falls back to its default state
pub const DIVERGENCE_FALLBACK_AFTER: u32 = 2;
