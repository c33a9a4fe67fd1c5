//! Numerical integration strategies for the model-exchange driver.
//!
//! The driver owns event detection and the FMU call sequence; a [`Solver`] only advances the
//! continuous states by one accepted step.

use crate::Error;

mod euler;

pub use euler::Euler;

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("Invalid step size {0}")]
    InvalidStepSize(f64),

    #[error("Invalid integration span [{start}, {end}]")]
    InvalidSpan { start: f64, end: f64 },

    #[error("Non-finite state value at t = {0}")]
    NonFinite(f64),

    #[error("Solver returned t = {reached} outside of ({start}, {end}]")]
    OutOfSpan { start: f64, end: f64, reached: f64 },
}

/// Right-hand side of the ODE: fills `dx` with the state derivatives at `(t, x)`.
///
/// Evaluations must happen at non-decreasing times, since each one sets the FMU time.
pub type Derivatives<'f> = dyn FnMut(f64, &[f64], &mut [f64]) -> Result<(), Error> + 'f;

pub trait Solver {
    /// Perform a single accepted step from `t0` towards `t1`, updating `x` in place.
    ///
    /// # Returns
    /// The time reached, in `(t0, t1]`.
    fn integrate(
        &mut self,
        x: &mut [f64],
        t0: f64,
        t1: f64,
        derivatives: &mut Derivatives<'_>,
    ) -> Result<f64, Error>;

    /// Called after an event changed the states discontinuously at `time`.
    fn reset(&mut self, _time: f64) {}
}

/// Validate the time a solver reached against its span `(t0, t1]`.
pub(crate) fn check_reached(t0: f64, t1: f64, reached: f64) -> Result<f64, SolverError> {
    if reached > t0 && reached <= t1 {
        Ok(reached)
    } else {
        Err(SolverError::OutOfSpan {
            start: t0,
            end: t1,
            reached,
        })
    }
}

/// Validate an integration span, shared by the solver implementations.
pub(crate) fn check_span(t0: f64, t1: f64) -> Result<(), SolverError> {
    if t0.is_finite() && t1.is_finite() && t1 > t0 {
        Ok(())
    } else {
        Err(SolverError::InvalidSpan { start: t0, end: t1 })
    }
}
