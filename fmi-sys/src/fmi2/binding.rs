use std::os::raw::c_char;

use super::*;

/// A function of the FMI 2.0 API that the loaded library does not export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingSymbol(pub &'static str);

impl std::fmt::Display for MissingSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "`{}` is not exported by the loaded library", self.0)
    }
}

impl std::error::Error for MissingSymbol {}

/// Generates the `Fmi2Binding` call table. Every symbol is resolved once at load time; symbols the
/// library does not export are reported as [`MissingSymbol`] when called, since Model Exchange-only
/// and Co-Simulation-only libraries legitimately omit the other interface.
macro_rules! fmi2_functions {
    ($($name:ident($($arg:ident: $ty:ty),*) -> $ret:ty;)*) => {
        pub struct Fmi2Binding {
            __library: libloading::Library,
            $($name: Option<unsafe extern "C" fn($($ty),*) -> $ret>,)*
        }

        impl Fmi2Binding {
            /// Load the shared library at `path` and resolve the FMI 2.0 functions.
            ///
            /// # Safety
            /// Loading a library runs its initialisation routines, which may do anything.
            pub unsafe fn new<P: AsRef<std::ffi::OsStr>>(path: P) -> Result<Self, libloading::Error> {
                let library = libloading::Library::new(path)?;
                Ok(Self::from_library(library))
            }

            /// Resolve the FMI 2.0 functions from an already loaded library.
            ///
            /// # Safety
            /// The exported symbols must have the signatures declared by the FMI 2.0 headers.
            pub unsafe fn from_library<L: Into<libloading::Library>>(library: L) -> Self {
                let __library = library.into();
                $(
                    let $name = __library
                        .get::<unsafe extern "C" fn($($ty),*) -> $ret>(
                            concat!(stringify!($name), "\0").as_bytes(),
                        )
                        .map(|sym| *sym)
                        .ok();
                )*
                Self { __library, $($name,)* }
            }

            $(
                /// # Safety
                /// Pointer arguments must satisfy the contract of the FMI 2.0 function of the same
                /// name.
                #[inline]
                pub unsafe fn $name(&self, $($arg: $ty),*) -> Result<$ret, MissingSymbol> {
                    match self.$name {
                        Some(f) => Ok(f($($arg),*)),
                        None => Err(MissingSymbol(stringify!($name))),
                    }
                }
            )*
        }

        impl std::fmt::Debug for Fmi2Binding {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct("Fmi2Binding")
                    .field("library", &self.__library)
                    .finish_non_exhaustive()
            }
        }
    };
}

fmi2_functions! {
    fmi2GetTypesPlatform() -> *const c_char;
    fmi2GetVersion() -> *const c_char;
    fmi2SetDebugLogging(
        c: fmi2Component,
        loggingOn: fmi2Boolean,
        nCategories: usize,
        categories: *const fmi2String
    ) -> fmi2Status;
    fmi2Instantiate(
        instanceName: fmi2String,
        fmuType: fmi2Type,
        fmuGUID: fmi2String,
        fmuResourceLocation: fmi2String,
        functions: *const fmi2CallbackFunctions,
        visible: fmi2Boolean,
        loggingOn: fmi2Boolean
    ) -> fmi2Component;
    fmi2FreeInstance(c: fmi2Component) -> ();
    fmi2SetupExperiment(
        c: fmi2Component,
        toleranceDefined: fmi2Boolean,
        tolerance: fmi2Real,
        startTime: fmi2Real,
        stopTimeDefined: fmi2Boolean,
        stopTime: fmi2Real
    ) -> fmi2Status;
    fmi2EnterInitializationMode(c: fmi2Component) -> fmi2Status;
    fmi2ExitInitializationMode(c: fmi2Component) -> fmi2Status;
    fmi2Terminate(c: fmi2Component) -> fmi2Status;
    fmi2Reset(c: fmi2Component) -> fmi2Status;
    fmi2GetReal(
        c: fmi2Component,
        vr: *const fmi2ValueReference,
        nvr: usize,
        value: *mut fmi2Real
    ) -> fmi2Status;
    fmi2GetInteger(
        c: fmi2Component,
        vr: *const fmi2ValueReference,
        nvr: usize,
        value: *mut fmi2Integer
    ) -> fmi2Status;
    fmi2GetBoolean(
        c: fmi2Component,
        vr: *const fmi2ValueReference,
        nvr: usize,
        value: *mut fmi2Boolean
    ) -> fmi2Status;
    fmi2GetString(
        c: fmi2Component,
        vr: *const fmi2ValueReference,
        nvr: usize,
        value: *mut fmi2String
    ) -> fmi2Status;
    fmi2SetReal(
        c: fmi2Component,
        vr: *const fmi2ValueReference,
        nvr: usize,
        value: *const fmi2Real
    ) -> fmi2Status;
    fmi2SetInteger(
        c: fmi2Component,
        vr: *const fmi2ValueReference,
        nvr: usize,
        value: *const fmi2Integer
    ) -> fmi2Status;
    fmi2SetBoolean(
        c: fmi2Component,
        vr: *const fmi2ValueReference,
        nvr: usize,
        value: *const fmi2Boolean
    ) -> fmi2Status;
    fmi2SetString(
        c: fmi2Component,
        vr: *const fmi2ValueReference,
        nvr: usize,
        value: *const fmi2String
    ) -> fmi2Status;
    fmi2GetFMUstate(c: fmi2Component, FMUstate: *mut fmi2FMUstate) -> fmi2Status;
    fmi2SetFMUstate(c: fmi2Component, FMUstate: fmi2FMUstate) -> fmi2Status;
    fmi2FreeFMUstate(c: fmi2Component, FMUstate: *mut fmi2FMUstate) -> fmi2Status;
    fmi2SerializedFMUstateSize(
        c: fmi2Component,
        FMUstate: fmi2FMUstate,
        size: *mut usize
    ) -> fmi2Status;
    fmi2SerializeFMUstate(
        c: fmi2Component,
        FMUstate: fmi2FMUstate,
        serializedState: *mut fmi2Byte,
        size: usize
    ) -> fmi2Status;
    fmi2DeSerializeFMUstate(
        c: fmi2Component,
        serializedState: *const fmi2Byte,
        size: usize,
        FMUstate: *mut fmi2FMUstate
    ) -> fmi2Status;
    fmi2GetDirectionalDerivative(
        c: fmi2Component,
        vUnknown_ref: *const fmi2ValueReference,
        nUnknown: usize,
        vKnown_ref: *const fmi2ValueReference,
        nKnown: usize,
        dvKnown: *const fmi2Real,
        dvUnknown: *mut fmi2Real
    ) -> fmi2Status;
    fmi2EnterEventMode(c: fmi2Component) -> fmi2Status;
    fmi2NewDiscreteStates(c: fmi2Component, fmi2eventInfo: *mut fmi2EventInfo) -> fmi2Status;
    fmi2EnterContinuousTimeMode(c: fmi2Component) -> fmi2Status;
    fmi2CompletedIntegratorStep(
        c: fmi2Component,
        noSetFMUStatePriorToCurrentPoint: fmi2Boolean,
        enterEventMode: *mut fmi2Boolean,
        terminateSimulation: *mut fmi2Boolean
    ) -> fmi2Status;
    fmi2SetTime(c: fmi2Component, time: fmi2Real) -> fmi2Status;
    fmi2SetContinuousStates(c: fmi2Component, x: *const fmi2Real, nx: usize) -> fmi2Status;
    fmi2GetDerivatives(c: fmi2Component, derivatives: *mut fmi2Real, nx: usize) -> fmi2Status;
    fmi2GetEventIndicators(
        c: fmi2Component,
        eventIndicators: *mut fmi2Real,
        ni: usize
    ) -> fmi2Status;
    fmi2GetContinuousStates(c: fmi2Component, x: *mut fmi2Real, nx: usize) -> fmi2Status;
    fmi2GetNominalsOfContinuousStates(
        c: fmi2Component,
        x_nominal: *mut fmi2Real,
        nx: usize
    ) -> fmi2Status;
    fmi2SetRealInputDerivatives(
        c: fmi2Component,
        vr: *const fmi2ValueReference,
        nvr: usize,
        order: *const fmi2Integer,
        value: *const fmi2Real
    ) -> fmi2Status;
    fmi2GetRealOutputDerivatives(
        c: fmi2Component,
        vr: *const fmi2ValueReference,
        nvr: usize,
        order: *const fmi2Integer,
        value: *mut fmi2Real
    ) -> fmi2Status;
    fmi2DoStep(
        c: fmi2Component,
        currentCommunicationPoint: fmi2Real,
        communicationStepSize: fmi2Real,
        noSetFMUStatePriorToCurrentPoint: fmi2Boolean
    ) -> fmi2Status;
    fmi2CancelStep(c: fmi2Component) -> fmi2Status;
    fmi2GetStatus(c: fmi2Component, s: fmi2StatusKind, value: *mut fmi2Status) -> fmi2Status;
    fmi2GetRealStatus(c: fmi2Component, s: fmi2StatusKind, value: *mut fmi2Real) -> fmi2Status;
    fmi2GetIntegerStatus(
        c: fmi2Component,
        s: fmi2StatusKind,
        value: *mut fmi2Integer
    ) -> fmi2Status;
    fmi2GetBooleanStatus(
        c: fmi2Component,
        s: fmi2StatusKind,
        value: *mut fmi2Boolean
    ) -> fmi2Status;
    fmi2GetStringStatus(
        c: fmi2Component,
        s: fmi2StatusKind,
        value: *mut fmi2String
    ) -> fmi2Status;
}
