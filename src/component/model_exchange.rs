use fmi_sys::fmi2 as binding;

use crate::{
    lifecycle::Operation, native::NativeApi, variable::accessor::check_lengths, Error,
    EventFlags, Status,
};

use super::ComponentME;

impl<'a, L: NativeApi> ComponentME<'a, L> {
    pub fn number_of_continuous_states(&self) -> usize {
        self.fmu.model_description().number_of_continuous_states
    }

    pub fn number_of_event_indicators(&self) -> usize {
        self.fmu.model_description().number_of_event_indicators
    }

    /// The model enters Event Mode from the Continuous-Time Mode and discrete-time equations may
    /// become active (and relations are not "frozen").
    pub fn enter_event_mode(&mut self) -> Result<Status, Error> {
        self.call(Operation::EnterEventMode, |lib, c| unsafe {
            lib.enter_event_mode(c)
        })
    }

    /// Evaluate the discrete-time equations of the current super-dense time instant.
    ///
    /// `event_flags` is updated from the returned event info when the call succeeds. As long as
    /// `discrete_states_need_update` is set, this must be called again before leaving Event Mode.
    pub fn new_discrete_states(&mut self, event_flags: &mut EventFlags) -> Result<Status, Error> {
        let mut event_info = binding::fmi2EventInfo::default();
        let status = self.call(Operation::NewDiscreteStates, |lib, c| unsafe {
            lib.new_discrete_states(c, &mut event_info)
        })?;
        if status.is_success() {
            event_flags.update_from_fmi2_event_info(&event_info);
        }
        Ok(status)
    }

    /// The model enters Continuous-Time Mode and all discrete-time equations become inactive.
    pub fn enter_continuous_time_mode(&mut self) -> Result<Status, Error> {
        self.call(Operation::EnterContinuousTimeMode, |lib, c| unsafe {
            lib.enter_continuous_time_mode(c)
        })
    }

    /// Called after every completed step of the integrator.
    ///
    /// Sets `enter_event_mode` when a step event occurred, and `terminate_simulation` when the FMU
    /// requests the end of the simulation.
    pub fn completed_integrator_step(
        &mut self,
        no_set_fmu_state_prior: bool,
        enter_event_mode: &mut bool,
        terminate_simulation: &mut bool,
    ) -> Result<Status, Error> {
        let mut enter = binding::fmi2False;
        let mut terminate = binding::fmi2False;
        let status = self.call(Operation::CompletedIntegratorStep, |lib, c| unsafe {
            lib.completed_integrator_step(c, no_set_fmu_state_prior, &mut enter, &mut terminate)
        })?;
        *enter_event_mode = enter != binding::fmi2False;
        *terminate_simulation = terminate != binding::fmi2False;
        Ok(status)
    }

    /// Set a new time instant. Time must not move backwards.
    pub fn set_time(&mut self, time: f64) -> Result<Status, Error> {
        if time.is_nan() || time < self.state.time() {
            return Err(Error::Argument(format!(
                "Time {time} precedes the current time {}",
                self.state.time()
            )));
        }
        let status = self.call(Operation::SetTime, |lib, c| unsafe { lib.set_time(c, time) })?;
        if status.is_success() {
            self.state.set_time(time);
        }
        Ok(status)
    }

    fn check_states(&self, len: usize) -> Result<(), Error> {
        if len == self.number_of_continuous_states() {
            Ok(())
        } else {
            Err(Error::Argument(format!(
                "Expected {} continuous states, got {len}",
                self.number_of_continuous_states()
            )))
        }
    }

    /// Set new continuous state values.
    pub fn set_continuous_states(&mut self, x: &[f64]) -> Result<Status, Error> {
        self.check_states(x.len())?;
        self.call(Operation::SetContinuousStates, |lib, c| unsafe {
            lib.set_continuous_states(c, x)
        })
    }

    /// Return the current continuous states.
    pub fn get_continuous_states(&mut self, x: &mut [f64]) -> Result<Status, Error> {
        self.check_states(x.len())?;
        self.call(Operation::GetContinuousStates, |lib, c| unsafe {
            lib.get_continuous_states(c, x)
        })
    }

    /// Compute state derivatives at the current time instant and for the current states.
    pub fn get_derivatives(&mut self, dx: &mut [f64]) -> Result<Status, Error> {
        self.check_states(dx.len())?;
        self.call(Operation::GetDerivatives, |lib, c| unsafe {
            lib.get_derivatives(c, dx)
        })
    }

    /// Return the nominal values of the continuous states.
    pub fn get_nominals_of_continuous_states(
        &mut self,
        x_nominal: &mut [f64],
    ) -> Result<Status, Error> {
        self.check_states(x_nominal.len())?;
        self.call(Operation::GetNominalsOfContinuousStates, |lib, c| unsafe {
            lib.get_nominals_of_continuous_states(c, x_nominal)
        })
    }

    /// Compute event indicators at the current time instant and for the current states.
    pub fn get_event_indicators(&mut self, z: &mut [f64]) -> Result<Status, Error> {
        check_lengths(self.number_of_event_indicators(), z.len())?;
        self.call(Operation::GetEventIndicators, |lib, c| unsafe {
            lib.get_event_indicators(c, z)
        })
    }
}
