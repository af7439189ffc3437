//! Base solver traits and types

use nalgebra::DVector;
use thiserror::Error;

/// Solver-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("No buffered state; call buffer() before step()")]
    EmptyHistory,

    #[error("Timestep must be positive and finite, got {0}")]
    InvalidTimestep(f64),
}

/// Core solver trait for numerical integration
pub trait Solver: Send + Sync {
    /// Get current state vector
    fn state(&self) -> &DVector<f64>;

    /// Set state vector, discarding any partially applied step
    fn set_state(&mut self, state: DVector<f64>);

    /// Buffer the current state as the base of the next step
    fn buffer(&mut self, dt: f64);

    /// Number of stages
    fn stages(&self) -> usize;
}

/// Explicit solver trait
pub trait ExplicitSolver: Solver {
    /// Perform one stage with the given right-hand side function
    fn step<F>(&mut self, f: F, dt: f64) -> Result<(), SolverError>
    where
        F: FnMut(&DVector<f64>, f64) -> DVector<f64>;

    /// Buffer the current state and run every stage of one full step.
    fn advance<F>(&mut self, mut f: F, dt: f64) -> Result<(), SolverError>
    where
        F: FnMut(&DVector<f64>, f64) -> DVector<f64>,
    {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SolverError::InvalidTimestep(dt));
        }
        self.buffer(dt);
        for _ in 0..self.stages() {
            self.step(&mut f, dt)?;
        }
        Ok(())
    }
}
