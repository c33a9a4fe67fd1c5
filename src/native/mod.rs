//! The foreign call surface.
//!
//! [`NativeApi`] mirrors the FMI 2.0 C functions with Rust slices in place of pointer/length
//! pairs. [`Fmi2Library`] implements it over a dynamically loaded shared library, and
//! [`stub::StubLibrary`] implements it in-process.

use std::{ffi::CStr, os::raw::c_void, ptr::NonNull};

use fmi_sys::fmi2 as binding;

use crate::InterfaceType;

#[cfg(feature = "fmi2")]
mod library;
mod registry;
#[cfg(feature = "stub")]
pub mod stub;

#[cfg(feature = "fmi2")]
pub use library::{CallbackFunctions, Fmi2Library};
pub use registry::{InstanceLease, LibraryRegistry};

/// Non-null `fmi2Component` returned by `fmi2Instantiate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawComponent(NonNull<c_void>);

// A component is used by one owner at a time; FMI 2.0 instances may move between threads.
unsafe impl Send for RawComponent {}

impl RawComponent {
    pub fn new(ptr: binding::fmi2Component) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> binding::fmi2Component {
        self.0.as_ptr()
    }
}

/// Non-null `fmi2FMUstate` owned by a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawState(NonNull<c_void>);

unsafe impl Send for RawState {}

impl RawState {
    pub fn new(ptr: binding::fmi2FMUstate) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> binding::fmi2FMUstate {
        self.0.as_ptr()
    }
}

/// The FMI 2.0 functions, called on components produced by [`NativeApi::instantiate`].
///
/// Every function returns the raw `fmi2Status`; normalization happens in
/// [`crate::Status::from_raw`]. Implementations never validate ordering: that is the job of the
/// lifecycle state machine.
///
/// # Safety
/// Callers must pass a component obtained from `instantiate` on the same implementation that has
/// not been freed, and buffers whose lengths agree with each other.
#[allow(clippy::too_many_arguments, clippy::missing_safety_doc)]
pub trait NativeApi: Send + Sync {
    /// Value of `fmi2GetVersion()`.
    fn version(&self) -> &str;
    /// Value of `fmi2GetTypesPlatform()`.
    fn types_platform(&self) -> &str;

    unsafe fn instantiate(
        &self,
        instance_name: &CStr,
        interface: InterfaceType,
        guid: &CStr,
        resource_location: &CStr,
        visible: bool,
        logging_on: bool,
    ) -> Option<RawComponent>;
    unsafe fn free_instance(&self, c: RawComponent);

    unsafe fn set_debug_logging(
        &self,
        c: RawComponent,
        logging_on: bool,
        categories: &[&CStr],
    ) -> binding::fmi2Status;
    unsafe fn setup_experiment(
        &self,
        c: RawComponent,
        tolerance: Option<f64>,
        start_time: f64,
        stop_time: Option<f64>,
    ) -> binding::fmi2Status;
    unsafe fn enter_initialization_mode(&self, c: RawComponent) -> binding::fmi2Status;
    unsafe fn exit_initialization_mode(&self, c: RawComponent) -> binding::fmi2Status;
    unsafe fn terminate(&self, c: RawComponent) -> binding::fmi2Status;
    unsafe fn reset(&self, c: RawComponent) -> binding::fmi2Status;

    unsafe fn get_real(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &mut [binding::fmi2Real],
    ) -> binding::fmi2Status;
    unsafe fn get_integer(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &mut [binding::fmi2Integer],
    ) -> binding::fmi2Status;
    unsafe fn get_boolean(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &mut [binding::fmi2Boolean],
    ) -> binding::fmi2Status;
    /// The returned strings are owned by the FMU and only valid until the next call.
    unsafe fn get_string(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &mut [binding::fmi2String],
    ) -> binding::fmi2Status;
    unsafe fn set_real(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &[binding::fmi2Real],
    ) -> binding::fmi2Status;
    unsafe fn set_integer(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &[binding::fmi2Integer],
    ) -> binding::fmi2Status;
    unsafe fn set_boolean(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &[binding::fmi2Boolean],
    ) -> binding::fmi2Status;
    unsafe fn set_string(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &[binding::fmi2String],
    ) -> binding::fmi2Status;

    unsafe fn get_fmu_state(
        &self,
        c: RawComponent,
        state: &mut binding::fmi2FMUstate,
    ) -> binding::fmi2Status;
    unsafe fn set_fmu_state(&self, c: RawComponent, state: RawState) -> binding::fmi2Status;
    unsafe fn free_fmu_state(
        &self,
        c: RawComponent,
        state: &mut binding::fmi2FMUstate,
    ) -> binding::fmi2Status;
    unsafe fn serialized_fmu_state_size(
        &self,
        c: RawComponent,
        state: RawState,
        size: &mut usize,
    ) -> binding::fmi2Status;
    unsafe fn serialize_fmu_state(
        &self,
        c: RawComponent,
        state: RawState,
        buffer: &mut [u8],
    ) -> binding::fmi2Status;
    unsafe fn deserialize_fmu_state(
        &self,
        c: RawComponent,
        buffer: &[u8],
        state: &mut binding::fmi2FMUstate,
    ) -> binding::fmi2Status;
    unsafe fn get_directional_derivative(
        &self,
        c: RawComponent,
        unknown_vrs: &[binding::fmi2ValueReference],
        known_vrs: &[binding::fmi2ValueReference],
        dv_known: &[binding::fmi2Real],
        dv_unknown: &mut [binding::fmi2Real],
    ) -> binding::fmi2Status;

    // Co-Simulation
    unsafe fn set_real_input_derivatives(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        orders: &[binding::fmi2Integer],
        values: &[binding::fmi2Real],
    ) -> binding::fmi2Status;
    unsafe fn get_real_output_derivatives(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        orders: &[binding::fmi2Integer],
        values: &mut [binding::fmi2Real],
    ) -> binding::fmi2Status;
    unsafe fn do_step(
        &self,
        c: RawComponent,
        current_communication_point: f64,
        communication_step_size: f64,
        no_set_fmu_state_prior: bool,
    ) -> binding::fmi2Status;
    unsafe fn cancel_step(&self, c: RawComponent) -> binding::fmi2Status;
    unsafe fn get_status(
        &self,
        c: RawComponent,
        kind: binding::fmi2StatusKind,
        value: &mut binding::fmi2Status,
    ) -> binding::fmi2Status;
    unsafe fn get_real_status(
        &self,
        c: RawComponent,
        kind: binding::fmi2StatusKind,
        value: &mut binding::fmi2Real,
    ) -> binding::fmi2Status;
    unsafe fn get_integer_status(
        &self,
        c: RawComponent,
        kind: binding::fmi2StatusKind,
        value: &mut binding::fmi2Integer,
    ) -> binding::fmi2Status;
    unsafe fn get_boolean_status(
        &self,
        c: RawComponent,
        kind: binding::fmi2StatusKind,
        value: &mut binding::fmi2Boolean,
    ) -> binding::fmi2Status;
    unsafe fn get_string_status(
        &self,
        c: RawComponent,
        kind: binding::fmi2StatusKind,
        value: &mut binding::fmi2String,
    ) -> binding::fmi2Status;

    // Model Exchange
    unsafe fn enter_event_mode(&self, c: RawComponent) -> binding::fmi2Status;
    unsafe fn new_discrete_states(
        &self,
        c: RawComponent,
        event_info: &mut binding::fmi2EventInfo,
    ) -> binding::fmi2Status;
    unsafe fn enter_continuous_time_mode(&self, c: RawComponent) -> binding::fmi2Status;
    unsafe fn completed_integrator_step(
        &self,
        c: RawComponent,
        no_set_fmu_state_prior: bool,
        enter_event_mode: &mut binding::fmi2Boolean,
        terminate_simulation: &mut binding::fmi2Boolean,
    ) -> binding::fmi2Status;
    unsafe fn set_time(&self, c: RawComponent, time: f64) -> binding::fmi2Status;
    unsafe fn set_continuous_states(&self, c: RawComponent, x: &[f64]) -> binding::fmi2Status;
    unsafe fn get_derivatives(&self, c: RawComponent, dx: &mut [f64]) -> binding::fmi2Status;
    unsafe fn get_event_indicators(&self, c: RawComponent, z: &mut [f64]) -> binding::fmi2Status;
    unsafe fn get_continuous_states(&self, c: RawComponent, x: &mut [f64]) -> binding::fmi2Status;
    unsafe fn get_nominals_of_continuous_states(
        &self,
        c: RawComponent,
        x_nominal: &mut [f64],
    ) -> binding::fmi2Status;
}
