use crate::Error;

use super::{check_span, Derivatives, Solver, SolverError};

/// Explicit forward Euler.
///
/// Without a maximum step size every call covers the whole requested span.
#[derive(Debug, Default, Clone)]
pub struct Euler {
    max_step: Option<f64>,
    /// Derivatives of continuous states
    dx: Vec<f64>,
}

impl Euler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit each step to `max_step`.
    pub fn with_max_step(max_step: f64) -> Result<Self, SolverError> {
        if max_step.is_nan() || max_step <= 0.0 {
            return Err(SolverError::InvalidStepSize(max_step));
        }
        Ok(Self {
            max_step: Some(max_step),
            dx: Vec::new(),
        })
    }
}

impl Solver for Euler {
    fn integrate(
        &mut self,
        x: &mut [f64],
        t0: f64,
        t1: f64,
        derivatives: &mut Derivatives<'_>,
    ) -> Result<f64, Error> {
        check_span(t0, t1)?;

        let (h, time) = match self.max_step {
            Some(max_step) if t1 - t0 > max_step => (max_step, t0 + max_step),
            _ => (t1 - t0, t1),
        };

        self.dx.resize(x.len(), 0.0);
        derivatives(t0, x, &mut self.dx)?;

        for (x, dx) in x.iter_mut().zip(&self.dx) {
            *x += dx * h;
        }

        if x.iter().any(|x| !x.is_finite()) {
            return Err(SolverError::NonFinite(time).into());
        }
        Ok(time)
    }
}
