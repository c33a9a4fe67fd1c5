use std::ffi::CStr;

use fmi_sys::fmi2 as binding;

use crate::{
    lifecycle::Operation,
    native::NativeApi,
    variable::{accessor::check_lengths, ValueReference},
    Error, ReadResult, Status,
};

use super::ComponentCS;

impl<'a, L: NativeApi> ComponentCS<'a, L> {
    fn co_simulation(&self) -> Option<&'a crate::model_description::CoSimulation> {
        self.fmu.model_description().co_simulation.as_ref()
    }

    /// Advance the FMU from the current communication point by `step_size`.
    ///
    /// On `OK` or `Warning` the simulation time advances by exactly `step_size`. On `Discard` the
    /// time is unchanged and the step may be retried with a smaller size, or canceled. On
    /// `Pending` the step runs asynchronously; poll [`Self::do_step_status`] until it completes.
    ///
    /// `no_set_fmu_state_prior` tells the FMU that no earlier FMU state will be restored.
    pub fn do_step(
        &mut self,
        step_size: f64,
        no_set_fmu_state_prior: bool,
    ) -> Result<Status, Error> {
        if step_size.is_nan() || step_size <= 0.0 {
            return Err(Error::Argument(format!(
                "`step_size` must be positive, got {step_size}"
            )));
        }

        let current_communication_point = self.state.time();
        let status = self.issue(Operation::DoStep, |lib, c| unsafe {
            lib.do_step(
                c,
                current_communication_point,
                step_size,
                no_set_fmu_state_prior,
            )
        })?;
        self.state.record_step(step_size, status);
        Ok(status)
    }

    /// Stop a pending or discarded step. Only `terminate`, `reset` and `free` are legal afterwards.
    pub fn cancel_step(&mut self) -> Result<Status, Error> {
        self.call(Operation::CancelStep, |lib, c| unsafe { lib.cancel_step(c) })
    }

    /// Query `fmi2DoStepStatus`. A completed asynchronous step advances the simulation time.
    pub fn do_step_status(&mut self) -> Result<ReadResult<Status>, Error> {
        let mut value = binding::fmi2Status_fmi2OK;
        let status = self.call(Operation::GetStatus, |lib, c| unsafe {
            lib.get_status(c, binding::fmi2StatusKind_fmi2DoStepStatus, &mut value)
        })?;
        let result = ReadResult::new(status, Status::from_raw(value));
        if let Some(&step_status) = result.value() {
            self.state.resolve_pending(step_status);
        }
        Ok(result)
    }

    /// Description of the step in progress, as reported by `fmi2PendingStatus`.
    pub fn pending_status(&mut self) -> Result<ReadResult<String>, Error> {
        let mut value: binding::fmi2String = std::ptr::null();
        let status = self.call(Operation::GetStatus, |lib, c| unsafe {
            lib.get_string_status(c, binding::fmi2StatusKind_fmi2PendingStatus, &mut value)
        })?;
        if !status.is_success() {
            return Ok(ReadResult::failed(status));
        }
        let description = if value.is_null() {
            String::new()
        } else {
            unsafe { CStr::from_ptr(value) }.to_str()?.to_owned()
        };
        Ok(ReadResult::new(status, description))
    }

    /// Time of the last successfully completed communication step.
    pub fn last_successful_time(&mut self) -> Result<ReadResult<f64>, Error> {
        let mut value = 0.0;
        let status = self.call(Operation::GetStatus, |lib, c| unsafe {
            lib.get_real_status(c, binding::fmi2StatusKind_fmi2LastSuccessfulTime, &mut value)
        })?;
        Ok(ReadResult::new(status, value))
    }

    /// Whether the FMU wants to terminate the simulation, as reported by `fmi2Terminated`.
    pub fn terminated(&mut self) -> Result<ReadResult<bool>, Error> {
        let mut value = binding::fmi2False;
        let status = self.call(Operation::GetStatus, |lib, c| unsafe {
            lib.get_boolean_status(c, binding::fmi2StatusKind_fmi2Terminated, &mut value)
        })?;
        Ok(ReadResult::new(status, value != binding::fmi2False))
    }

    /// Set the `orders`-th time derivatives of real inputs, used by FMUs that interpolate inputs.
    pub fn set_real_input_derivatives(
        &mut self,
        vrs: &[ValueReference],
        orders: &[i32],
        values: &[f64],
    ) -> Result<Status, Error> {
        if !self.co_simulation().is_some_and(|cs| cs.can_interpolate_inputs) {
            return Err(Error::Unsupported {
                capability: "canInterpolateInputs",
            });
        }
        check_lengths(vrs.len(), orders.len())?;
        check_lengths(vrs.len(), values.len())?;

        self.call(Operation::SetRealInputDerivatives, |lib, c| unsafe {
            lib.set_real_input_derivatives(c, vrs, orders, values)
        })
    }

    /// Read the `orders`-th time derivatives of real outputs at the current communication point.
    pub fn get_real_output_derivatives(
        &mut self,
        vrs: &[ValueReference],
        orders: &[i32],
        values: &mut [f64],
    ) -> Result<Status, Error> {
        let max_order = self
            .co_simulation()
            .map_or(0, |cs| cs.max_output_derivative_order);
        if max_order == 0 {
            return Err(Error::Unsupported {
                capability: "maxOutputDerivativeOrder",
            });
        }
        check_lengths(vrs.len(), orders.len())?;
        check_lengths(vrs.len(), values.len())?;
        if let Some(order) = orders
            .iter()
            .find(|&&order| order < 1 || order as u32 > max_order)
        {
            return Err(Error::Argument(format!(
                "Derivative order {order} outside 1..={max_order}"
            )));
        }

        self.call(Operation::GetRealOutputDerivatives, |lib, c| unsafe {
            lib.get_real_output_derivatives(c, vrs, orders, values)
        })
    }
}

#[cfg(all(test, feature = "stub"))]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;
    use crate::{
        lifecycle::{Phase, StepOutcome},
        model_description::{CoSimulation, ModelDescriptor},
        native::stub::{StubLibrary, StubModel},
        Fmu, VariableAccessor,
    };

    fn fmu(cs: CoSimulation, model: StubModel) -> Fmu<StubLibrary> {
        let md = ModelDescriptor::new("m", "{guid}", vec![])
            .unwrap()
            .with_co_simulation(cs);
        Fmu::new(md, StubLibrary::new(model), "m.so", "/tmp").unwrap()
    }

    #[test_log::test]
    fn test_pending_step() {
        let fmu = fmu(CoSimulation::new("m"), StubModel::new());
        fmu.library().respond_on("fmi2DoStep", 1, Status::Pending);

        let mut inst = fmu.instantiate_cs("inst", false, false).unwrap();
        inst.simple_setup(0.0, 1.0).unwrap();

        assert_eq!(inst.do_step(0.5, true).unwrap(), Status::Pending);
        assert_eq!(inst.time(), 0.0);
        assert!(matches!(
            inst.do_step(0.5, true),
            Err(Error::IllegalStateTransition { .. })
        ));
        assert_eq!(fmu.library().calls("fmi2DoStep"), 1);

        let pending = inst.pending_status().unwrap();
        assert_eq!(pending.value().map(String::as_str), Some("step in progress"));

        let status = inst.do_step_status().unwrap();
        assert_eq!(status.value(), Some(&Status::OK));
        assert_eq!(inst.time(), 0.5);
        assert_eq!(inst.state().last_step(), Some(StepOutcome::Completed));

        let last = inst.last_successful_time().unwrap();
        assert_approx_eq!(*last.value().unwrap(), 0.5);
        assert_eq!(inst.terminated().unwrap().value(), Some(&false));
    }

    #[test]
    fn test_cancel_after_discard() {
        let fmu = fmu(CoSimulation::new("m"), StubModel::new());
        fmu.library().respond_on("fmi2DoStep", 1, Status::Discard);

        let mut inst = fmu.instantiate_cs("inst", false, false).unwrap();
        inst.simple_setup(0.0, 1.0).unwrap();
        assert!(inst.cancel_step().is_err());

        assert_eq!(inst.do_step(0.5, true).unwrap(), Status::Discard);
        assert_eq!(inst.cancel_step().unwrap(), Status::OK);
        assert_eq!(inst.phase(), Phase::StepCanceled);
        assert_eq!(inst.terminate().unwrap(), Status::OK);
    }

    #[test]
    fn test_output_derivatives() {
        let mut cs = CoSimulation::new("m");
        cs.max_output_derivative_order = 1;
        let model = StubModel::new()
            .with_states([2.0], |_, x, dx| dx[0] = -x[0])
            .with_state_references(&[0]);
        let fmu = fmu(cs, model);

        let mut inst = fmu.instantiate_cs("inst", false, false).unwrap();
        inst.simple_setup(0.0, 1.0).unwrap();

        let mut values = [0.0];
        inst.get_real_output_derivatives(&[0], &[1], &mut values)
            .unwrap();
        assert_approx_eq!(values[0], -2.0);
        assert_eq!(inst.read_real(0).unwrap().value(), Some(&2.0));

        assert!(matches!(
            inst.get_real_output_derivatives(&[0], &[2], &mut values),
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            inst.set_real_input_derivatives(&[0], &[1], &[1.0]),
            Err(Error::Unsupported { .. })
        ));
    }
}
