use itertools::izip;

use crate::{
    lifecycle::Phase,
    native::NativeApi,
    params::{ModelExchangeOptions, SimParams},
    ComponentME, Error, EventFlags, InterfaceType, Status,
};

use super::{
    require,
    solver::{self, Solver},
    Advance, Driver,
};

/// Whether any event indicator changed sign: `prev <= 0 < cur` or `prev > 0 >= cur`.
pub fn sign_changed(prez: &[f64], z: &[f64]) -> bool {
    izip!(prez, z).any(|(&prev, &cur)| (prev <= 0.0 && cur > 0.0) || (prev > 0.0 && cur <= 0.0))
}

/// Outcome of an event iteration.
#[derive(Debug, Default, Clone, Copy)]
struct EventOutcome {
    values_changed: bool,
    terminate: bool,
}

/// Integrates a Model Exchange instance with a [`Solver`], handling time, state and step events.
pub struct ModelExchangeDriver<'a, L: NativeApi, S> {
    component: ComponentME<'a, L>,
    solver: S,
    options: ModelExchangeOptions,
    completed_integrator_step_needed: bool,
    /// Continuous states
    x: Vec<f64>,
    /// Event indicators
    z: Vec<f64>,
    /// Event indicators at the previous accepted step
    prez: Vec<f64>,
    next_event_time: Option<f64>,
}

impl<'a, L: NativeApi, S> std::fmt::Debug for ModelExchangeDriver<'a, L, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelExchangeDriver")
            .field("component", &self.component)
            .field("options", &self.options)
            .field("x", &self.x)
            .field("z", &self.z)
            .field("next_event_time", &self.next_event_time)
            .finish_non_exhaustive()
    }
}

impl<'a, L: NativeApi, S: Solver> ModelExchangeDriver<'a, L, S> {
    pub fn new(component: ComponentME<'a, L>, solver: S, options: ModelExchangeOptions) -> Self {
        let completed_integrator_step_needed = !component
            .model_description()
            .model_exchange
            .as_ref()
            .is_some_and(|me| me.completed_integrator_step_not_needed);
        let nx = component.number_of_continuous_states();
        let nz = component.number_of_event_indicators();
        Self {
            component,
            solver,
            options,
            completed_integrator_step_needed,
            x: vec![0.0; nx],
            z: vec![0.0; nz],
            prez: vec![0.0; nz],
            next_event_time: None,
        }
    }

    pub fn component(&self) -> &ComponentME<'a, L> {
        &self.component
    }

    pub fn component_mut(&mut self) -> &mut ComponentME<'a, L> {
        &mut self.component
    }

    pub fn into_component(self) -> ComponentME<'a, L> {
        self.component
    }

    /// Continuous states after the last accepted step
    pub fn states(&self) -> &[f64] {
        &self.x
    }

    pub fn next_event_time(&self) -> Option<f64> {
        self.next_event_time
    }

    /// Iterate `fmi2NewDiscreteStates` until the discrete states settle. Must be in Event Mode.
    fn event_iteration(&mut self) -> Result<EventOutcome, Error> {
        let mut outcome = EventOutcome::default();
        let mut flags = EventFlags::default();

        for _ in 0..self.options.max_event_iterations {
            require(self.component.new_discrete_states(&mut flags)?)?;
            outcome.values_changed |= flags.values_of_continuous_states_changed;
            outcome.terminate |= flags.terminate_simulation;

            if outcome.terminate || !flags.discrete_states_need_update {
                self.next_event_time = flags.next_event_time;
                return Ok(outcome);
            }
        }

        Err(Error::EventIterationLimit {
            time: self.component.time(),
            iterations: self.options.max_event_iterations,
        })
    }

    /// Re-read states and indicators after an event iteration and leave Event Mode.
    fn resume(&mut self, outcome: EventOutcome) -> Result<(), Error> {
        require(self.component.enter_continuous_time_mode()?)?;
        if outcome.values_changed {
            require(self.component.get_continuous_states(&mut self.x)?)?;
        }
        if !self.z.is_empty() {
            require(self.component.get_event_indicators(&mut self.prez)?)?;
        }
        self.solver.reset(self.component.time());
        Ok(())
    }

    fn handle_events(&mut self) -> Result<EventOutcome, Error> {
        require(self.component.enter_event_mode()?)?;
        let outcome = self.event_iteration()?;
        if !outcome.terminate {
            self.resume(outcome)?;
        }
        Ok(outcome)
    }

    /// One accepted integrator step towards `target`, clipped to the next time event. Returns the
    /// status of the step and whether an event is due.
    fn integrator_step(&mut self, target: f64) -> Result<(Status, bool, bool), Error> {
        let t0 = self.component.time();
        let t1 = match self.next_event_time {
            Some(te) if te > t0 && te < target => te,
            _ => target,
        };

        let component = &mut self.component;
        let time = self.solver.integrate(&mut self.x, t0, t1, &mut |t, x, dx| {
            require(component.set_time(t)?)?;
            require(component.set_continuous_states(x)?)?;
            require(component.get_derivatives(dx)?)?;
            Ok(())
        })?;
        let time = solver::check_reached(t0, t1, time)?;

        let mut status = require(self.component.set_time(time)?)?;
        status = status.worst(require(self.component.set_continuous_states(&self.x)?)?);

        let mut step_event = false;
        let mut terminate = false;
        if self.completed_integrator_step_needed {
            status = status.worst(require(self.component.completed_integrator_step(
                self.options.no_set_fmu_state_prior,
                &mut step_event,
                &mut terminate,
            )?)?);
        }
        if terminate {
            return Ok((status, false, true));
        }

        let mut state_event = false;
        if !self.z.is_empty() {
            status = status.worst(require(self.component.get_event_indicators(&mut self.z)?)?);
            state_event = sign_changed(&self.prez, &self.z);
            self.prez.copy_from_slice(&self.z);
        }

        let time_event = self.next_event_time.is_some_and(|te| time >= te);
        let event = time_event || state_event || step_event;
        if event {
            log::trace!(
                "Event encountered at t = {time}. [Time: {time_event}, State: {state_event}, Step: {step_event}]"
            );
        }
        Ok((status, event, false))
    }
}

impl<'a, L: NativeApi, S: Solver> Driver for ModelExchangeDriver<'a, L, S> {
    fn interface_type(&self) -> InterfaceType {
        InterfaceType::ModelExchange
    }

    fn time(&self) -> f64 {
        self.component.time()
    }

    fn initialize(&mut self, params: &SimParams) -> Result<Status, Error> {
        log::trace!(
            "Initializing ME simulation of `{}`: {params:?}",
            self.component.name()
        );
        let status = super::initialize(&mut self.component, params)?;

        let outcome = self.event_iteration()?;
        if outcome.terminate {
            log::info!("`{}` requested termination during initialization", self.component.name());
            return Ok(status);
        }
        self.resume(EventOutcome {
            values_changed: true,
            ..outcome
        })?;
        Ok(status)
    }

    fn advance(&mut self, target: f64) -> Result<Advance, Error> {
        let mut status = Status::OK;
        let mut events = 0;

        if self.component.phase() != Phase::ContinuousTimeMode {
            // The FMU requested termination during initialization.
            return Ok(Advance {
                status,
                events,
                terminate: true,
            });
        }

        while self.component.time() < target {
            let (step_status, event, terminate) = self.integrator_step(target)?;
            status = status.worst(step_status);

            if terminate {
                return Ok(Advance {
                    status,
                    events,
                    terminate: true,
                });
            }

            if event {
                events += 1;
                if self.handle_events()?.terminate {
                    return Ok(Advance {
                        status,
                        events,
                        terminate: true,
                    });
                }
            }
        }

        Ok(Advance {
            status,
            events,
            terminate: false,
        })
    }

    fn terminate(&mut self) -> Result<Status, Error> {
        self.component.terminate()
    }

    fn free(&mut self) -> Result<(), Error> {
        self.component.free()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_changed() {
        assert!(sign_changed(&[0.0], &[1.0]));
        assert!(sign_changed(&[1.0], &[0.0]));
        assert!(sign_changed(&[1.0, 1.0], &[1.0, -1.0]));
        assert!(!sign_changed(&[-1.0], &[0.0]));
        assert!(!sign_changed(&[1.0], &[2.0]));
        assert!(!sign_changed(&[], &[]));
    }

    #[test]
    fn test_check_reached() {
        assert_eq!(solver::check_reached(0.0, 0.5, 0.5).unwrap(), 0.5);
        assert!(solver::check_reached(0.0, 0.5, 0.0).is_err());
        assert!(solver::check_reached(0.0, 0.5, 0.6).is_err());
        assert!(solver::check_reached(0.0, 0.5, f64::NAN).is_err());
    }
}
