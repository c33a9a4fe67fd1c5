//! Simulation parameters and driver options.

use crate::{Error, InterfaceType, ModelDescriptor};

/// Explicit overrides, each falling back to the model's `DefaultExperiment`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimOptions {
    pub start_time: Option<f64>,
    pub stop_time: Option<f64>,
    pub step_size: Option<f64>,
    pub tolerance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimParams {
    pub start_time: f64,
    pub stop_time: f64,
    /// Communication step size (co-simulation) or output interval (model exchange).
    pub step_size: f64,
    pub tolerance: Option<f64>,
}

impl SimParams {
    pub fn new_from_options(md: &ModelDescriptor, options: &SimOptions) -> Result<Self, Error> {
        let de = md.default_experiment.as_ref();

        let start_time = options
            .start_time
            .or(de.and_then(|de| de.start_time))
            .unwrap_or(0.0);

        let stop_time = options
            .stop_time
            .or(de.and_then(|de| de.stop_time))
            .unwrap_or(1.0);

        let step_size = options
            .step_size
            .or(de.and_then(|de| de.step_size))
            .unwrap_or((stop_time - start_time) / 500.0);

        let tolerance = options.tolerance.or(de.and_then(|de| de.tolerance));

        Self::new(start_time, stop_time, step_size, tolerance)
    }

    pub fn new(
        start_time: f64,
        stop_time: f64,
        step_size: f64,
        tolerance: Option<f64>,
    ) -> Result<Self, Error> {
        if stop_time < start_time {
            return Err(Error::Argument(format!(
                "`stop_time` ({stop_time}) is before `start_time` ({start_time})"
            )));
        }
        if step_size.is_nan() || step_size <= 0.0 {
            return Err(Error::Argument(format!(
                "`step_size` must be positive, got {step_size}"
            )));
        }
        Ok(Self {
            start_time,
            stop_time,
            step_size,
            tolerance,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoSimulationOptions {
    /// The driver may restore an earlier FMU state, so `fmi2DoStep` is called with
    /// `noSetFMUStatePriorToCurrentPoint = false`.
    pub rollback_supported: bool,
    /// Maximum number of times a discarded step is retried with half the step size. Only used
    /// when the FMU handles variable communication step sizes.
    pub max_step_retries: u32,
}

impl CoSimulationOptions {
    pub fn for_model(md: &ModelDescriptor) -> Self {
        Self {
            rollback_supported: md
                .capabilities(InterfaceType::CoSimulation)
                .is_some_and(|caps| caps.can_get_and_set_fmu_state),
            ..Default::default()
        }
    }
}

impl Default for CoSimulationOptions {
    fn default() -> Self {
        Self {
            rollback_supported: false,
            max_step_retries: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelExchangeOptions {
    /// Passed to `fmi2CompletedIntegratorStep`.
    pub no_set_fmu_state_prior: bool,
    /// Upper bound on event iterations at one time instant.
    pub max_event_iterations: usize,
}

impl Default for ModelExchangeOptions {
    fn default() -> Self {
        Self {
            no_set_fmu_state_prior: true,
            max_event_iterations: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;
    use crate::model_description::{CoSimulation, DefaultExperiment};

    #[test]
    fn test_resolution_order() {
        let md = ModelDescriptor::new("m", "{}", vec![])
            .unwrap()
            .with_default_experiment(DefaultExperiment {
                stop_time: Some(2.0),
                tolerance: Some(1e-6),
                ..Default::default()
            });

        let params = SimParams::new_from_options(&md, &SimOptions::default()).unwrap();
        assert_eq!(params.start_time, 0.0);
        assert_eq!(params.stop_time, 2.0);
        assert_approx_eq!(params.step_size, 2.0 / 500.0);
        assert_eq!(params.tolerance, Some(1e-6));

        let options = SimOptions {
            stop_time: Some(1.0),
            step_size: Some(0.1),
            ..Default::default()
        };
        let params = SimParams::new_from_options(&md, &options).unwrap();
        assert_eq!(params.stop_time, 1.0);
        assert_eq!(params.step_size, 0.1);
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(
            SimParams::new(1.0, 0.0, 0.1, None),
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            SimParams::new(0.0, 1.0, 0.0, None),
            Err(Error::Argument(_))
        ));
    }

    #[test]
    fn test_rollback_default() {
        let mut cs = CoSimulation::new("m");
        cs.capabilities.can_get_and_set_fmu_state = true;
        let md = ModelDescriptor::new("m", "{}", vec![])
            .unwrap()
            .with_co_simulation(cs);
        assert!(CoSimulationOptions::for_model(&md).rollback_supported);
    }
}
