//! Forward Euler method for numerical integration

use nalgebra::DVector;

use super::{ExplicitSolver, Solver, SolverError};

/// Explicit forward Euler method
///
/// First-order, single-stage explicit integration method.
///
/// # Mathematical Form
/// ```text
/// x_{n+1} = x_n + h * f(x_n, t_n)
/// ```
///
/// # Note
/// Cheapest per step and the least accurate. On the double pendulum it pumps
/// energy into the system steadily, so long runs lean on the divergence guard.
/// Kept for cheap previews; prefer RK4.
#[derive(Debug, Clone)]
pub struct Euler {
    state: DVector<f64>,
    base: Option<DVector<f64>>,
}

impl Euler {
    /// Create a new Euler solver with the given initial state
    pub fn new(initial: DVector<f64>) -> Self {
        Self {
            state: initial,
            base: None,
        }
    }
}

impl Solver for Euler {
    fn state(&self) -> &DVector<f64> {
        &self.state
    }

    fn set_state(&mut self, state: DVector<f64>) {
        self.state = state;
        self.base = None;
    }

    fn buffer(&mut self, _dt: f64) {
        self.base = Some(self.state.clone());
    }

    fn stages(&self) -> usize {
        1
    }
}

impl ExplicitSolver for Euler {
    fn step<F>(&mut self, mut f: F, dt: f64) -> Result<(), SolverError>
    where
        F: FnMut(&DVector<f64>, f64) -> DVector<f64>,
    {
        let x0 = self.base.as_ref().ok_or(SolverError::EmptyHistory)?;

        self.state = x0 + dt * f(x0, 0.0);

        Ok(())
    }
}
