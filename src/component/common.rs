//! Operations shared by Model Exchange and Co-Simulation instances.

use std::ffi::{CStr, CString};

use fmi_sys::fmi2 as binding;

use crate::{
    lifecycle::{Operation, Phase, SimulationState},
    native::{NativeApi, RawState},
    variable::{accessor::check_lengths, ValueReference},
    Error, InstanceTag, InterfaceType, ModelDescriptor, ReadResult, Status, VariableAccessor,
};

use super::{Component, FmuState};

impl<'a, L: NativeApi, Tag: InstanceTag> Component<'a, L, Tag> {
    /// The instance name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interface_type(&self) -> InterfaceType {
        Tag::TYPE
    }

    pub fn model_description(&self) -> &'a ModelDescriptor {
        self.fmu.model_description()
    }

    /// Host-side lifecycle bookkeeping
    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Current simulation time
    pub fn time(&self) -> f64 {
        self.state.time()
    }

    pub fn step_count(&self) -> u64 {
        self.state.step_count()
    }

    /// Status of the last native call
    pub fn last_status(&self) -> Status {
        self.state.last_status()
    }

    pub fn is_freed(&self) -> bool {
        self.component.is_none()
    }

    /// The FMI-standard version string
    pub fn version(&self) -> &'a str {
        self.fmu.library().version()
    }

    pub fn types_platform(&self) -> &'a str {
        self.fmu.library().types_platform()
    }

    /// Enable or disable debug logging. An empty `categories` slice addresses all categories.
    pub fn set_debug_logging(
        &mut self,
        logging_on: bool,
        categories: &[&str],
    ) -> Result<Status, Error> {
        let categories = categories
            .iter()
            .map(|c| CString::new(*c))
            .collect::<Result<Vec<_>, _>>()?;
        let category_refs: Vec<&CStr> = categories.iter().map(CString::as_c_str).collect();

        self.call(Operation::SetDebugLogging, |lib, c| unsafe {
            lib.set_debug_logging(c, logging_on, &category_refs)
        })
    }

    /// Informs the FMU to setup the experiment. Must be called after instantiation and before
    /// [`Self::enter_initialization_mode`].
    ///
    /// If `stop_time` is `Some(..)`, the FMU has to return `Error` when the environment tries to
    /// compute past it.
    pub fn setup_experiment(
        &mut self,
        tolerance: Option<f64>,
        start_time: f64,
        stop_time: Option<f64>,
    ) -> Result<Status, Error> {
        if let Some(stop_time) = stop_time.filter(|&stop_time| stop_time < start_time) {
            return Err(Error::Argument(format!(
                "`stop_time` ({stop_time}) is before `start_time` ({start_time})"
            )));
        }

        let status = self.call(Operation::SetupExperiment, |lib, c| unsafe {
            lib.setup_experiment(c, tolerance, start_time, stop_time)
        })?;
        if status.is_success() {
            self.state.set_experiment(start_time, stop_time);
        }
        Ok(status)
    }

    /// Informs the FMU to enter Initialization Mode.
    ///
    /// Variables with `initial = "exact"` or `"approx"` can be set before this call.
    pub fn enter_initialization_mode(&mut self) -> Result<Status, Error> {
        self.call(Operation::EnterInitializationMode, |lib, c| unsafe {
            lib.enter_initialization_mode(c)
        })
    }

    /// Informs the FMU to exit Initialization Mode.
    ///
    /// A Co-Simulation instance enters Step Mode, a Model Exchange instance enters Event Mode.
    pub fn exit_initialization_mode(&mut self) -> Result<Status, Error> {
        self.call(Operation::ExitInitializationMode, |lib, c| unsafe {
            lib.exit_initialization_mode(c)
        })
    }

    /// Setup the experiment and run through initialization.
    ///
    /// Stops at the first status that is neither `OK` nor `Warning`, and returns the worst status
    /// observed.
    pub fn simple_setup(&mut self, start_time: f64, stop_time: f64) -> Result<Status, Error> {
        let mut worst = Status::OK;
        for operation in [
            Operation::SetupExperiment,
            Operation::EnterInitializationMode,
            Operation::ExitInitializationMode,
        ] {
            let status = match operation {
                Operation::SetupExperiment => {
                    self.setup_experiment(None, start_time, Some(stop_time))?
                }
                Operation::EnterInitializationMode => self.enter_initialization_mode()?,
                _ => self.exit_initialization_mode()?,
            };
            worst = worst.worst(status);
            if !status.is_success() {
                log::debug!("{}: simple_setup stopped at {operation}", self.name);
                break;
            }
        }
        Ok(worst)
    }

    /// Informs the FMU that the simulation run is terminated.
    ///
    /// Final values of all variables can still be read afterwards.
    pub fn terminate(&mut self) -> Result<Status, Error> {
        self.call(Operation::Terminate, |lib, c| unsafe { lib.terminate(c) })
    }

    /// Resets the FMU after a simulation run, as if it had just been instantiated.
    pub fn reset(&mut self) -> Result<Status, Error> {
        self.call(Operation::Reset, |lib, c| unsafe { lib.reset(c) })
    }

    /// Release the native instance. A second call fails with [`Error::AlreadyFreed`] and makes no
    /// native call.
    pub fn free(&mut self) -> Result<(), Error> {
        if self.release() {
            Ok(())
        } else {
            Err(Error::AlreadyFreed(self.name.clone()))
        }
    }

    /// Compute the directional derivatives `dv_unknown = J * dv_known` of the unknowns with
    /// respect to the knowns.
    pub fn get_directional_derivative(
        &mut self,
        unknown_vrs: &[ValueReference],
        known_vrs: &[ValueReference],
        dv_known: &[f64],
        dv_unknown: &mut [f64],
    ) -> Result<Status, Error> {
        if !self
            .capabilities()
            .is_some_and(|caps| caps.provides_directional_derivative)
        {
            return Err(Error::Unsupported {
                capability: "providesDirectionalDerivative",
            });
        }
        check_lengths(known_vrs.len(), dv_known.len())?;
        check_lengths(unknown_vrs.len(), dv_unknown.len())?;

        self.call(Operation::GetDirectionalDerivative, |lib, c| unsafe {
            lib.get_directional_derivative(c, unknown_vrs, known_vrs, dv_known, dv_unknown)
        })
    }

    fn capabilities(&self) -> Option<&'a crate::model_description::Capabilities> {
        self.fmu.model_description().capabilities(Tag::TYPE)
    }

    fn require_fmu_state(&self) -> Result<(), Error> {
        if self
            .capabilities()
            .is_some_and(|caps| caps.can_get_and_set_fmu_state)
        {
            Ok(())
        } else {
            Err(Error::Unsupported {
                capability: "canGetAndSetFMUstate",
            })
        }
    }

    fn require_serialize(&self) -> Result<(), Error> {
        self.require_fmu_state()?;
        if self
            .capabilities()
            .is_some_and(|caps| caps.can_serialize_fmu_state)
        {
            Ok(())
        } else {
            Err(Error::Unsupported {
                capability: "canSerializeFMUstate",
            })
        }
    }

    fn store_state(&mut self, raw: binding::fmi2FMUstate) -> Option<FmuState> {
        let raw = RawState::new(raw)?;
        self.saved_states.push(Some(raw));
        Some(FmuState(self.saved_states.len() - 1))
    }

    /// Save a copy of the complete FMU state. The state is owned by the instance and freed with it
    /// unless released earlier with [`Self::free_fmu_state`].
    pub fn get_fmu_state(&mut self) -> Result<ReadResult<FmuState>, Error> {
        self.require_fmu_state()?;
        let mut raw: binding::fmi2FMUstate = std::ptr::null_mut();
        let status = self.call(Operation::GetFmuState, |lib, c| unsafe {
            lib.get_fmu_state(c, &mut raw)
        })?;
        match status.is_success().then(|| self.store_state(raw)).flatten() {
            Some(state) => Ok(ReadResult::new(status, state)),
            None => Ok(ReadResult::failed(status)),
        }
    }

    /// Overwrite a previously saved FMU state with the current one.
    pub fn update_fmu_state(&mut self, state: FmuState) -> Result<Status, Error> {
        self.require_fmu_state()?;
        let mut raw = self.saved_state(state)?.as_ptr();
        self.call(Operation::GetFmuState, |lib, c| unsafe {
            lib.get_fmu_state(c, &mut raw)
        })
    }

    /// Restore the FMU to a previously saved state.
    pub fn set_fmu_state(&mut self, state: FmuState) -> Result<Status, Error> {
        self.require_fmu_state()?;
        let raw = self.saved_state(state)?;
        self.call(Operation::SetFmuState, |lib, c| unsafe {
            lib.set_fmu_state(c, raw)
        })
    }

    /// Release a saved FMU state. The handle is invalid afterwards.
    pub fn free_fmu_state(&mut self, state: FmuState) -> Result<Status, Error> {
        self.require_fmu_state()?;
        let mut raw = self.saved_state(state)?.as_ptr();
        let status = self.call(Operation::FreeFmuState, |lib, c| unsafe {
            lib.free_fmu_state(c, &mut raw)
        })?;
        if status.is_success() {
            self.saved_states[state.0] = None;
        }
        Ok(status)
    }

    /// Copy a saved FMU state into an opaque byte buffer.
    pub fn serialize_fmu_state(&mut self, state: FmuState) -> Result<ReadResult<Vec<u8>>, Error> {
        self.require_serialize()?;
        let raw = self.saved_state(state)?;

        let mut size = 0;
        let status = self.call(Operation::SerializeFmuState, |lib, c| unsafe {
            lib.serialized_fmu_state_size(c, raw, &mut size)
        })?;
        if !status.is_success() {
            return Ok(ReadResult::failed(status));
        }

        let mut buffer = vec![0u8; size];
        let serialized = self.call(Operation::SerializeFmuState, |lib, c| unsafe {
            lib.serialize_fmu_state(c, raw, &mut buffer)
        })?;
        Ok(ReadResult::new(status.worst(serialized), buffer))
    }

    /// Restore an FMU state from a buffer produced by [`Self::serialize_fmu_state`]. The buffer
    /// is passed through uninterpreted.
    pub fn deserialize_fmu_state(&mut self, bytes: &[u8]) -> Result<ReadResult<FmuState>, Error> {
        self.require_serialize()?;
        let mut raw: binding::fmi2FMUstate = std::ptr::null_mut();
        let status = self.call(Operation::DeserializeFmuState, |lib, c| unsafe {
            lib.deserialize_fmu_state(c, bytes, &mut raw)
        })?;
        match status.is_success().then(|| self.store_state(raw)).flatten() {
            Some(state) => Ok(ReadResult::new(status, state)),
            None => Ok(ReadResult::failed(status)),
        }
    }
}

impl<'a, L: NativeApi, Tag: InstanceTag> VariableAccessor for Component<'a, L, Tag> {
    fn get_real(&mut self, vrs: &[ValueReference], values: &mut [f64]) -> Result<Status, Error> {
        check_lengths(vrs.len(), values.len())?;
        self.call(Operation::GetValues, |lib, c| unsafe {
            lib.get_real(c, vrs, values)
        })
    }

    fn get_integer(
        &mut self,
        vrs: &[ValueReference],
        values: &mut [i32],
    ) -> Result<Status, Error> {
        check_lengths(vrs.len(), values.len())?;
        self.call(Operation::GetValues, |lib, c| unsafe {
            lib.get_integer(c, vrs, values)
        })
    }

    fn get_boolean(
        &mut self,
        vrs: &[ValueReference],
        values: &mut [bool],
    ) -> Result<Status, Error> {
        check_lengths(vrs.len(), values.len())?;
        let mut raw = vec![binding::fmi2False; values.len()];
        let status = self.call(Operation::GetValues, |lib, c| unsafe {
            lib.get_boolean(c, vrs, &mut raw)
        })?;
        for (value, raw) in values.iter_mut().zip(raw) {
            *value = raw != binding::fmi2False;
        }
        Ok(status)
    }

    fn get_string(
        &mut self,
        vrs: &[ValueReference],
        values: &mut [String],
    ) -> Result<Status, Error> {
        check_lengths(vrs.len(), values.len())?;
        let mut raw: Vec<binding::fmi2String> = vec![std::ptr::null(); values.len()];
        let status = self.call(Operation::GetValues, |lib, c| unsafe {
            lib.get_string(c, vrs, &mut raw)
        })?;
        if status.is_success() {
            for (value, ptr) in values.iter_mut().zip(raw) {
                // The FMU owns the strings until the next call, so copy them out now.
                *value = if ptr.is_null() {
                    String::new()
                } else {
                    unsafe { CStr::from_ptr(ptr) }.to_str()?.to_owned()
                };
            }
        }
        Ok(status)
    }

    fn set_real(&mut self, vrs: &[ValueReference], values: &[f64]) -> Result<Status, Error> {
        check_lengths(vrs.len(), values.len())?;
        self.call(Operation::SetValues, |lib, c| unsafe {
            lib.set_real(c, vrs, values)
        })
    }

    fn set_integer(&mut self, vrs: &[ValueReference], values: &[i32]) -> Result<Status, Error> {
        check_lengths(vrs.len(), values.len())?;
        self.call(Operation::SetValues, |lib, c| unsafe {
            lib.set_integer(c, vrs, values)
        })
    }

    fn set_boolean(&mut self, vrs: &[ValueReference], values: &[bool]) -> Result<Status, Error> {
        check_lengths(vrs.len(), values.len())?;
        let raw: Vec<binding::fmi2Boolean> = values
            .iter()
            .map(|&b| b as binding::fmi2Boolean)
            .collect();
        self.call(Operation::SetValues, |lib, c| unsafe {
            lib.set_boolean(c, vrs, &raw)
        })
    }

    fn set_string(&mut self, vrs: &[ValueReference], values: &[&str]) -> Result<Status, Error> {
        check_lengths(vrs.len(), values.len())?;
        let owned = values
            .iter()
            .map(|s| CString::new(*s))
            .collect::<Result<Vec<_>, _>>()?;
        let ptrs: Vec<binding::fmi2String> = owned.iter().map(|s| s.as_ptr()).collect();
        self.call(Operation::SetValues, |lib, c| unsafe {
            lib.set_string(c, vrs, &ptrs)
        })
    }
}
