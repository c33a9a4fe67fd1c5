use crate::{
    lifecycle::StepOutcome, native::NativeApi, params::CoSimulationOptions, params::SimParams,
    ComponentCS, Error, InterfaceType, Status,
};

use super::{require, Advance, Driver};

/// Advances a Co-Simulation instance by communication steps.
#[derive(Debug)]
pub struct CoSimulationDriver<'a, L: NativeApi> {
    component: ComponentCS<'a, L>,
    options: CoSimulationOptions,
    /// `fmi2DoStep` only accepts the step size it was prepared for.
    variable_step_size: bool,
}

impl<'a, L: NativeApi> CoSimulationDriver<'a, L> {
    pub fn new(component: ComponentCS<'a, L>, options: CoSimulationOptions) -> Self {
        let variable_step_size = component
            .model_description()
            .co_simulation
            .as_ref()
            .is_some_and(|cs| cs.can_handle_variable_communication_step_size);
        Self {
            component,
            options,
            variable_step_size,
        }
    }

    pub fn component(&self) -> &ComponentCS<'a, L> {
        &self.component
    }

    pub fn component_mut(&mut self) -> &mut ComponentCS<'a, L> {
        &mut self.component
    }

    pub fn into_component(self) -> ComponentCS<'a, L> {
        self.component
    }

    /// Perform one communication step of `step_size`.
    ///
    /// Returns `true` if the step completed and the simulation time advanced, and `false` if the
    /// FMU discarded it (time unchanged, retry with a smaller step or cancel) or runs it
    /// asynchronously (see [`Self::poll`]). `Error` and `Fatal` fail with [`Error::Status`].
    pub fn step(&mut self, step_size: f64) -> Result<bool, Error> {
        let status = self
            .component
            .do_step(step_size, !self.options.rollback_supported)?;
        match status {
            Status::OK | Status::Warning => Ok(true),
            Status::Discard | Status::Pending => Ok(false),
            other => Err(Error::Status(other)),
        }
    }

    /// Poll an asynchronous step.
    ///
    /// Returns `None` while the step is still running, `Some(true)` once it completed and
    /// `Some(false)` if the FMU discarded it.
    pub fn poll(&mut self) -> Result<Option<bool>, Error> {
        let result = self.component.do_step_status()?;
        require(result.status)?;
        match result.value().copied() {
            Some(Status::Pending) => Ok(None),
            Some(Status::OK | Status::Warning) => Ok(Some(true)),
            Some(Status::Discard) => Ok(Some(false)),
            Some(other) => Err(Error::Status(other)),
            None => Err(Error::Status(result.status)),
        }
    }

    /// Cancel a pending or discarded step.
    pub fn cancel_step(&mut self) -> Result<Status, Error> {
        require(self.component.cancel_step()?)
    }

    /// Whether the FMU asked to stop after a discarded step.
    fn terminate_requested(&mut self) -> Result<bool, Error> {
        let terminated = self.component.terminated()?;
        Ok(terminated.value().copied().unwrap_or(false))
    }
}

impl<'a, L: NativeApi> Driver for CoSimulationDriver<'a, L> {
    fn interface_type(&self) -> InterfaceType {
        InterfaceType::CoSimulation
    }

    fn time(&self) -> f64 {
        self.component.time()
    }

    fn initialize(&mut self, params: &SimParams) -> Result<Status, Error> {
        log::trace!(
            "Initializing CS simulation of `{}`: {params:?}",
            self.component.name()
        );
        super::initialize(&mut self.component, params)
    }

    fn advance(&mut self, target: f64) -> Result<Advance, Error> {
        let mut step_size = target - self.component.time();
        let mut retries = 0;
        let mut status = Status::OK;

        while target - self.component.time() > step_size * 1e-9 {
            let h = step_size.min(target - self.component.time());

            let mut completed = self.step(h)?;
            if matches!(
                self.component.state().last_step(),
                Some(StepOutcome::Pending { .. })
            ) {
                completed = loop {
                    match self.poll()? {
                        Some(completed) => break completed,
                        None => std::thread::yield_now(),
                    }
                };
            }

            if completed {
                status = status.worst(self.component.last_status());
                continue;
            }

            if self.terminate_requested()? {
                log::info!(
                    "`{}` requested termination after a discarded step at t = {}",
                    self.component.name(),
                    self.component.time()
                );
                return Ok(Advance {
                    status: Status::Discard,
                    events: 0,
                    terminate: true,
                });
            }

            if !self.variable_step_size || retries >= self.options.max_step_retries {
                return Err(Error::Status(Status::Discard));
            }
            retries += 1;
            step_size = h / 2.0;
            log::debug!(
                "Step of {h} discarded at t = {}, retrying with {step_size}",
                self.component.time()
            );
        }

        Ok(Advance {
            status,
            events: 0,
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
