use std::{
    ffi::CStr,
    path::Path,
};

use fmi_sys::fmi2::{self as binding, Fmi2Binding, MissingSymbol};

use crate::{InterfaceType, LoadError};

use super::{NativeApi, RawComponent, RawState};

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct CallbackFunctions {
    pub logger: binding::fmi2CallbackLogger,
    pub allocate_memory: binding::fmi2CallbackAllocateMemory,
    pub free_memory: binding::fmi2CallbackFreeMemory,
    pub step_finished: binding::fmi2StepFinished,
    pub component_environment: binding::fmi2ComponentEnvironment,
}

impl Default for CallbackFunctions {
    fn default() -> Self {
        CallbackFunctions {
            logger: Some(binding::logger::callback_logger_handler as _),
            allocate_memory: Some(libc::calloc),
            free_memory: Some(libc::free),
            step_finished: None,
            component_environment: std::ptr::null_mut::<std::os::raw::c_void>(),
        }
    }
}

/// A loaded FMI 2.0 shared library.
pub struct Fmi2Library {
    binding: Fmi2Binding,
    version: String,
    types_platform: String,
    /// Passed by pointer to every `fmi2Instantiate`, so it must outlive all instances.
    callbacks: Box<CallbackFunctions>,
}

// The callback table is never mutated after construction and only holds function pointers and a
// null environment.
unsafe impl Send for Fmi2Library {}
unsafe impl Sync for Fmi2Library {}

impl std::fmt::Debug for Fmi2Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fmi2Library")
            .field("version", &self.version)
            .field("types_platform", &self.types_platform)
            .finish_non_exhaustive()
    }
}

/// Copy a static string returned by the library.
unsafe fn static_str(ptr: *const std::os::raw::c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

/// A missing function is reported as `fmi2Error`, so the lifecycle escalates as it would for a
/// failing call.
fn or_error(result: Result<binding::fmi2Status, MissingSymbol>) -> binding::fmi2Status {
    result.unwrap_or_else(|missing| {
        log::error!("{missing}");
        binding::fmi2Status_fmi2Error
    })
}

impl Fmi2Library {
    /// Load the shared library at `path` and read its version and types platform.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        log::debug!(
            "Loading {} ({} v{})",
            path.display(),
            crate::built_info::PKG_NAME,
            crate::built_info::PKG_VERSION
        );

        let binding = unsafe { Fmi2Binding::new(path) }?;
        let version = unsafe { static_str(binding.fmi2GetVersion()?) };
        let types_platform = unsafe { static_str(binding.fmi2GetTypesPlatform()?) };
        log::trace!("Loaded FMI {version} library with types platform {types_platform}");

        Ok(Self {
            binding,
            version,
            types_platform,
            callbacks: Box::<CallbackFunctions>::default(),
        })
    }
}

impl NativeApi for Fmi2Library {
    fn version(&self) -> &str {
        &self.version
    }

    fn types_platform(&self) -> &str {
        &self.types_platform
    }

    unsafe fn instantiate(
        &self,
        instance_name: &CStr,
        interface: InterfaceType,
        guid: &CStr,
        resource_location: &CStr,
        visible: bool,
        logging_on: bool,
    ) -> Option<RawComponent> {
        let fmu_type = match interface {
            InterfaceType::ModelExchange => binding::fmi2Type_fmi2ModelExchange,
            InterfaceType::CoSimulation => binding::fmi2Type_fmi2CoSimulation,
        };
        let callback_functions = &*self.callbacks as *const CallbackFunctions;
        let component = self
            .binding
            .fmi2Instantiate(
                instance_name.as_ptr(),
                fmu_type,
                guid.as_ptr(),
                resource_location.as_ptr(),
                callback_functions as _,
                visible as binding::fmi2Boolean,
                logging_on as binding::fmi2Boolean,
            )
            .map_err(|missing| log::error!("{missing}"))
            .ok()?;
        RawComponent::new(component)
    }

    unsafe fn free_instance(&self, c: RawComponent) {
        if let Err(missing) = self.binding.fmi2FreeInstance(c.as_ptr()) {
            log::error!("{missing}");
        }
    }

    unsafe fn set_debug_logging(
        &self,
        c: RawComponent,
        logging_on: bool,
        categories: &[&CStr],
    ) -> binding::fmi2Status {
        let category_ptrs: Vec<_> = categories.iter().map(|c| c.as_ptr()).collect();
        or_error(self.binding.fmi2SetDebugLogging(
            c.as_ptr(),
            logging_on as binding::fmi2Boolean,
            category_ptrs.len(),
            category_ptrs.as_ptr(),
        ))
    }

    unsafe fn setup_experiment(
        &self,
        c: RawComponent,
        tolerance: Option<f64>,
        start_time: f64,
        stop_time: Option<f64>,
    ) -> binding::fmi2Status {
        or_error(self.binding.fmi2SetupExperiment(
            c.as_ptr(),
            tolerance.is_some() as binding::fmi2Boolean,
            tolerance.unwrap_or(0.0),
            start_time,
            stop_time.is_some() as binding::fmi2Boolean,
            stop_time.unwrap_or(0.0),
        ))
    }

    unsafe fn enter_initialization_mode(&self, c: RawComponent) -> binding::fmi2Status {
        or_error(self.binding.fmi2EnterInitializationMode(c.as_ptr()))
    }

    unsafe fn exit_initialization_mode(&self, c: RawComponent) -> binding::fmi2Status {
        or_error(self.binding.fmi2ExitInitializationMode(c.as_ptr()))
    }

    unsafe fn terminate(&self, c: RawComponent) -> binding::fmi2Status {
        or_error(self.binding.fmi2Terminate(c.as_ptr()))
    }

    unsafe fn reset(&self, c: RawComponent) -> binding::fmi2Status {
        or_error(self.binding.fmi2Reset(c.as_ptr()))
    }

    unsafe fn get_real(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &mut [binding::fmi2Real],
    ) -> binding::fmi2Status {
        or_error(
            self.binding
                .fmi2GetReal(c.as_ptr(), vrs.as_ptr(), vrs.len(), values.as_mut_ptr()),
        )
    }

    unsafe fn get_integer(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &mut [binding::fmi2Integer],
    ) -> binding::fmi2Status {
        or_error(
            self.binding
                .fmi2GetInteger(c.as_ptr(), vrs.as_ptr(), vrs.len(), values.as_mut_ptr()),
        )
    }

    unsafe fn get_boolean(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &mut [binding::fmi2Boolean],
    ) -> binding::fmi2Status {
        or_error(
            self.binding
                .fmi2GetBoolean(c.as_ptr(), vrs.as_ptr(), vrs.len(), values.as_mut_ptr()),
        )
    }

    unsafe fn get_string(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &mut [binding::fmi2String],
    ) -> binding::fmi2Status {
        or_error(
            self.binding
                .fmi2GetString(c.as_ptr(), vrs.as_ptr(), vrs.len(), values.as_mut_ptr()),
        )
    }

    unsafe fn set_real(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &[binding::fmi2Real],
    ) -> binding::fmi2Status {
        or_error(
            self.binding
                .fmi2SetReal(c.as_ptr(), vrs.as_ptr(), vrs.len(), values.as_ptr()),
        )
    }

    unsafe fn set_integer(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &[binding::fmi2Integer],
    ) -> binding::fmi2Status {
        or_error(
            self.binding
                .fmi2SetInteger(c.as_ptr(), vrs.as_ptr(), vrs.len(), values.as_ptr()),
        )
    }

    unsafe fn set_boolean(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &[binding::fmi2Boolean],
    ) -> binding::fmi2Status {
        or_error(
            self.binding
                .fmi2SetBoolean(c.as_ptr(), vrs.as_ptr(), vrs.len(), values.as_ptr()),
        )
    }

    unsafe fn set_string(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &[binding::fmi2String],
    ) -> binding::fmi2Status {
        or_error(
            self.binding
                .fmi2SetString(c.as_ptr(), vrs.as_ptr(), vrs.len(), values.as_ptr()),
        )
    }

    unsafe fn get_fmu_state(
        &self,
        c: RawComponent,
        state: &mut binding::fmi2FMUstate,
    ) -> binding::fmi2Status {
        or_error(self.binding.fmi2GetFMUstate(c.as_ptr(), state))
    }

    unsafe fn set_fmu_state(&self, c: RawComponent, state: RawState) -> binding::fmi2Status {
        or_error(self.binding.fmi2SetFMUstate(c.as_ptr(), state.as_ptr()))
    }

    unsafe fn free_fmu_state(
        &self,
        c: RawComponent,
        state: &mut binding::fmi2FMUstate,
    ) -> binding::fmi2Status {
        or_error(self.binding.fmi2FreeFMUstate(c.as_ptr(), state))
    }

    unsafe fn serialized_fmu_state_size(
        &self,
        c: RawComponent,
        state: RawState,
        size: &mut usize,
    ) -> binding::fmi2Status {
        or_error(
            self.binding
                .fmi2SerializedFMUstateSize(c.as_ptr(), state.as_ptr(), size),
        )
    }

    unsafe fn serialize_fmu_state(
        &self,
        c: RawComponent,
        state: RawState,
        buffer: &mut [u8],
    ) -> binding::fmi2Status {
        or_error(self.binding.fmi2SerializeFMUstate(
            c.as_ptr(),
            state.as_ptr(),
            buffer.as_mut_ptr() as _,
            buffer.len(),
        ))
    }

    unsafe fn deserialize_fmu_state(
        &self,
        c: RawComponent,
        buffer: &[u8],
        state: &mut binding::fmi2FMUstate,
    ) -> binding::fmi2Status {
        or_error(self.binding.fmi2DeSerializeFMUstate(
            c.as_ptr(),
            buffer.as_ptr() as _,
            buffer.len(),
            state,
        ))
    }

    unsafe fn get_directional_derivative(
        &self,
        c: RawComponent,
        unknown_vrs: &[binding::fmi2ValueReference],
        known_vrs: &[binding::fmi2ValueReference],
        dv_known: &[binding::fmi2Real],
        dv_unknown: &mut [binding::fmi2Real],
    ) -> binding::fmi2Status {
        or_error(self.binding.fmi2GetDirectionalDerivative(
            c.as_ptr(),
            unknown_vrs.as_ptr(),
            unknown_vrs.len(),
            known_vrs.as_ptr(),
            known_vrs.len(),
            dv_known.as_ptr(),
            dv_unknown.as_mut_ptr(),
        ))
    }

    unsafe fn set_real_input_derivatives(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        orders: &[binding::fmi2Integer],
        values: &[binding::fmi2Real],
    ) -> binding::fmi2Status {
        or_error(self.binding.fmi2SetRealInputDerivatives(
            c.as_ptr(),
            vrs.as_ptr(),
            vrs.len(),
            orders.as_ptr(),
            values.as_ptr(),
        ))
    }

    unsafe fn get_real_output_derivatives(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        orders: &[binding::fmi2Integer],
        values: &mut [binding::fmi2Real],
    ) -> binding::fmi2Status {
        or_error(self.binding.fmi2GetRealOutputDerivatives(
            c.as_ptr(),
            vrs.as_ptr(),
            vrs.len(),
            orders.as_ptr(),
            values.as_mut_ptr(),
        ))
    }

    unsafe fn do_step(
        &self,
        c: RawComponent,
        current_communication_point: f64,
        communication_step_size: f64,
        no_set_fmu_state_prior: bool,
    ) -> binding::fmi2Status {
        or_error(self.binding.fmi2DoStep(
            c.as_ptr(),
            current_communication_point,
            communication_step_size,
            no_set_fmu_state_prior as binding::fmi2Boolean,
        ))
    }

    unsafe fn cancel_step(&self, c: RawComponent) -> binding::fmi2Status {
        or_error(self.binding.fmi2CancelStep(c.as_ptr()))
    }

    unsafe fn get_status(
        &self,
        c: RawComponent,
        kind: binding::fmi2StatusKind,
        value: &mut binding::fmi2Status,
    ) -> binding::fmi2Status {
        or_error(self.binding.fmi2GetStatus(c.as_ptr(), kind, value))
    }

    unsafe fn get_real_status(
        &self,
        c: RawComponent,
        kind: binding::fmi2StatusKind,
        value: &mut binding::fmi2Real,
    ) -> binding::fmi2Status {
        or_error(self.binding.fmi2GetRealStatus(c.as_ptr(), kind, value))
    }

    unsafe fn get_integer_status(
        &self,
        c: RawComponent,
        kind: binding::fmi2StatusKind,
        value: &mut binding::fmi2Integer,
    ) -> binding::fmi2Status {
        or_error(self.binding.fmi2GetIntegerStatus(c.as_ptr(), kind, value))
    }

    unsafe fn get_boolean_status(
        &self,
        c: RawComponent,
        kind: binding::fmi2StatusKind,
        value: &mut binding::fmi2Boolean,
    ) -> binding::fmi2Status {
        or_error(self.binding.fmi2GetBooleanStatus(c.as_ptr(), kind, value))
    }

    unsafe fn get_string_status(
        &self,
        c: RawComponent,
        kind: binding::fmi2StatusKind,
        value: &mut binding::fmi2String,
    ) -> binding::fmi2Status {
        or_error(self.binding.fmi2GetStringStatus(c.as_ptr(), kind, value))
    }

    unsafe fn enter_event_mode(&self, c: RawComponent) -> binding::fmi2Status {
        or_error(self.binding.fmi2EnterEventMode(c.as_ptr()))
    }

    unsafe fn new_discrete_states(
        &self,
        c: RawComponent,
        event_info: &mut binding::fmi2EventInfo,
    ) -> binding::fmi2Status {
        or_error(self.binding.fmi2NewDiscreteStates(c.as_ptr(), event_info))
    }

    unsafe fn enter_continuous_time_mode(&self, c: RawComponent) -> binding::fmi2Status {
        or_error(self.binding.fmi2EnterContinuousTimeMode(c.as_ptr()))
    }

    unsafe fn completed_integrator_step(
        &self,
        c: RawComponent,
        no_set_fmu_state_prior: bool,
        enter_event_mode: &mut binding::fmi2Boolean,
        terminate_simulation: &mut binding::fmi2Boolean,
    ) -> binding::fmi2Status {
        or_error(self.binding.fmi2CompletedIntegratorStep(
            c.as_ptr(),
            no_set_fmu_state_prior as binding::fmi2Boolean,
            enter_event_mode,
            terminate_simulation,
        ))
    }

    unsafe fn set_time(&self, c: RawComponent, time: f64) -> binding::fmi2Status {
        or_error(self.binding.fmi2SetTime(c.as_ptr(), time))
    }

    unsafe fn set_continuous_states(&self, c: RawComponent, x: &[f64]) -> binding::fmi2Status {
        or_error(
            self.binding
                .fmi2SetContinuousStates(c.as_ptr(), x.as_ptr(), x.len()),
        )
    }

    unsafe fn get_derivatives(&self, c: RawComponent, dx: &mut [f64]) -> binding::fmi2Status {
        or_error(
            self.binding
                .fmi2GetDerivatives(c.as_ptr(), dx.as_mut_ptr(), dx.len()),
        )
    }

    unsafe fn get_event_indicators(&self, c: RawComponent, z: &mut [f64]) -> binding::fmi2Status {
        or_error(
            self.binding
                .fmi2GetEventIndicators(c.as_ptr(), z.as_mut_ptr(), z.len()),
        )
    }

    unsafe fn get_continuous_states(&self, c: RawComponent, x: &mut [f64]) -> binding::fmi2Status {
        or_error(
            self.binding
                .fmi2GetContinuousStates(c.as_ptr(), x.as_mut_ptr(), x.len()),
        )
    }

    unsafe fn get_nominals_of_continuous_states(
        &self,
        c: RawComponent,
        x_nominal: &mut [f64],
    ) -> binding::fmi2Status {
        or_error(self.binding.fmi2GetNominalsOfContinuousStates(
            c.as_ptr(),
            x_nominal.as_mut_ptr(),
            x_nominal.len(),
        ))
    }
}
