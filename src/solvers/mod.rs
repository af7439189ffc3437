//! Numerical integration solvers
//!
//! Fixed-step explicit methods used by the physics engine:
//! - Classic Runge-Kutta (RK4), the default
//! - Forward Euler
//!
//! [`SolverKind`] wraps both behind one type so the engine can pick the
//! method from settings at run time.

mod base;
mod euler;
mod rk4;

pub use base::*;
pub use euler::Euler;
pub use rk4::RK4;

use nalgebra::DVector;
use pendulum_types::IntegratorKind;

/// Macro to reduce boilerplate for solver method delegation
macro_rules! dispatch_method {
    ($self:ident, $method:ident, $($args:expr),*) => {
        match $self {
            SolverKind::Euler(s) => s.$method($($args),*),
            SolverKind::RK4(s) => s.$method($($args),*),
        }
    };
}

/// Enum wrapper over the available explicit solvers
#[derive(Debug, Clone)]
pub enum SolverKind {
    Euler(Euler),
    RK4(RK4),
}

impl SolverKind {
    /// Build the solver selected in settings around an initial state
    pub fn new(kind: IntegratorKind, initial: DVector<f64>) -> Self {
        match kind {
            IntegratorKind::Euler => SolverKind::Euler(Euler::new(initial)),
            IntegratorKind::RK4 => SolverKind::RK4(RK4::new(initial)),
        }
    }

    pub fn kind(&self) -> IntegratorKind {
        match self {
            SolverKind::Euler(_) => IntegratorKind::Euler,
            SolverKind::RK4(_) => IntegratorKind::RK4,
        }
    }
}

impl Solver for SolverKind {
    fn state(&self) -> &DVector<f64> {
        dispatch_method!(self, state,)
    }

    fn set_state(&mut self, state: DVector<f64>) {
        dispatch_method!(self, set_state, state)
    }

    fn buffer(&mut self, dt: f64) {
        dispatch_method!(self, buffer, dt)
    }

    fn stages(&self) -> usize {
        dispatch_method!(self, stages,)
    }
}

impl ExplicitSolver for SolverKind {
    fn step<F>(&mut self, f: F, dt: f64) -> Result<(), SolverError>
    where
        F: FnMut(&DVector<f64>, f64) -> DVector<f64>,
    {
        dispatch_method!(self, step, f, dt)
    }
}
