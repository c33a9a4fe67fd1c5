//! The FMI 2.0 lifecycle state machine.
//!
//! ```text
//! Instantiated -> (setup experiment) -> ConfigurationMode -> (enter initialization)
//!   -> InitializationMode -> (exit initialization)
//!   -> StepMode [CS] | EventMode <-> ContinuousTimeMode [ME]
//!   -> (terminate) -> Terminated -> (free) -> Freed
//! ```
//!
//! Every native call is checked against the current [`Phase`] before it is issued, so an illegal
//! ordering fails locally with [`Error::IllegalStateTransition`] and never reaches the FMU.

use crate::{Error, InterfaceType, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Instantiated,
    ConfigurationMode,
    InitializationMode,
    StepMode,
    /// `fmi2CancelStep` was called on a pending or discarded step.
    StepCanceled,
    EventMode,
    ContinuousTimeMode,
    Terminated,
    /// A native call returned `Error`. Only diagnostics, state restore, reset, terminate and free
    /// are accepted.
    Error,
    /// A native call returned `Fatal`. No native call is accepted.
    Fatal,
    Freed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Terminated | Phase::Freed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SetDebugLogging,
    SetupExperiment,
    EnterInitializationMode,
    ExitInitializationMode,
    Terminate,
    Reset,
    FreeInstance,
    GetValues,
    SetValues,
    GetDirectionalDerivative,
    GetFmuState,
    SetFmuState,
    FreeFmuState,
    SerializeFmuState,
    DeserializeFmuState,
    DoStep,
    CancelStep,
    GetStatus,
    SetRealInputDerivatives,
    GetRealOutputDerivatives,
    EnterEventMode,
    NewDiscreteStates,
    EnterContinuousTimeMode,
    CompletedIntegratorStep,
    SetTime,
    SetContinuousStates,
    GetContinuousStates,
    GetNominalsOfContinuousStates,
    GetDerivatives,
    GetEventIndicators,
}

impl Operation {
    /// Name of the native function this operation maps to.
    pub fn function_name(self) -> &'static str {
        match self {
            Operation::SetDebugLogging => "fmi2SetDebugLogging",
            Operation::SetupExperiment => "fmi2SetupExperiment",
            Operation::EnterInitializationMode => "fmi2EnterInitializationMode",
            Operation::ExitInitializationMode => "fmi2ExitInitializationMode",
            Operation::Terminate => "fmi2Terminate",
            Operation::Reset => "fmi2Reset",
            Operation::FreeInstance => "fmi2FreeInstance",
            Operation::GetValues => "fmi2GetXXX",
            Operation::SetValues => "fmi2SetXXX",
            Operation::GetDirectionalDerivative => "fmi2GetDirectionalDerivative",
            Operation::GetFmuState => "fmi2GetFMUstate",
            Operation::SetFmuState => "fmi2SetFMUstate",
            Operation::FreeFmuState => "fmi2FreeFMUstate",
            Operation::SerializeFmuState => "fmi2SerializeFMUstate",
            Operation::DeserializeFmuState => "fmi2DeSerializeFMUstate",
            Operation::DoStep => "fmi2DoStep",
            Operation::CancelStep => "fmi2CancelStep",
            Operation::GetStatus => "fmi2GetXXXStatus",
            Operation::SetRealInputDerivatives => "fmi2SetRealInputDerivatives",
            Operation::GetRealOutputDerivatives => "fmi2GetRealOutputDerivatives",
            Operation::EnterEventMode => "fmi2EnterEventMode",
            Operation::NewDiscreteStates => "fmi2NewDiscreteStates",
            Operation::EnterContinuousTimeMode => "fmi2EnterContinuousTimeMode",
            Operation::CompletedIntegratorStep => "fmi2CompletedIntegratorStep",
            Operation::SetTime => "fmi2SetTime",
            Operation::SetContinuousStates => "fmi2SetContinuousStates",
            Operation::GetContinuousStates => "fmi2GetContinuousStates",
            Operation::GetNominalsOfContinuousStates => "fmi2GetNominalsOfContinuousStates",
            Operation::GetDerivatives => "fmi2GetDerivatives",
            Operation::GetEventIndicators => "fmi2GetEventIndicators",
        }
    }

    /// Whether the operation may be issued in `phase` by an instance of type `interface`.
    pub fn is_allowed(self, phase: Phase, interface: InterfaceType) -> bool {
        use InterfaceType::{CoSimulation as Cs, ModelExchange as Me};
        use Phase::*;

        match (self, interface) {
            (Operation::SetDebugLogging, _)
            | (Operation::Reset, _)
            | (Operation::GetFmuState, _)
            | (Operation::SetFmuState, _)
            | (Operation::FreeFmuState, _)
            | (Operation::SerializeFmuState, _)
            | (Operation::DeserializeFmuState, _) => !matches!(phase, Fatal | Freed),
            (Operation::FreeInstance, _) => phase != Freed,

            (Operation::SetupExperiment, _) => matches!(phase, Instantiated | ConfigurationMode),
            (Operation::EnterInitializationMode, _) => phase == ConfigurationMode,
            (Operation::ExitInitializationMode, _) => phase == InitializationMode,
            (Operation::Terminate, Cs) => matches!(phase, StepMode | StepCanceled | Error),
            (Operation::Terminate, Me) => {
                matches!(phase, EventMode | ContinuousTimeMode | Error)
            }

            (Operation::GetValues, _) => matches!(
                phase,
                InitializationMode
                    | StepMode
                    | StepCanceled
                    | EventMode
                    | ContinuousTimeMode
                    | Terminated
                    | Error
            ),
            (Operation::SetValues, _) => matches!(
                phase,
                Instantiated
                    | ConfigurationMode
                    | InitializationMode
                    | StepMode
                    | EventMode
                    | ContinuousTimeMode
            ),
            (Operation::GetDirectionalDerivative, _) => matches!(
                phase,
                InitializationMode | StepMode | EventMode | ContinuousTimeMode | Terminated | Error
            ),

            (Operation::DoStep, Cs) => phase == StepMode,
            (Operation::CancelStep, Cs) => phase == StepMode,
            (Operation::GetStatus, Cs) => matches!(phase, StepMode | StepCanceled | Terminated),
            (Operation::SetRealInputDerivatives, Cs) => {
                matches!(phase, InitializationMode | StepMode)
            }
            (Operation::GetRealOutputDerivatives, Cs) => {
                matches!(phase, StepMode | StepCanceled | Terminated | Error)
            }

            (Operation::EnterEventMode, Me) => matches!(phase, EventMode | ContinuousTimeMode),
            (Operation::NewDiscreteStates, Me) => phase == EventMode,
            (Operation::EnterContinuousTimeMode, Me) => phase == EventMode,
            (Operation::CompletedIntegratorStep, Me) => phase == ContinuousTimeMode,
            (Operation::SetTime, Me) => matches!(phase, EventMode | ContinuousTimeMode),
            (Operation::SetContinuousStates, Me) => phase == ContinuousTimeMode,
            (Operation::GetContinuousStates, Me)
            | (Operation::GetNominalsOfContinuousStates, Me)
            | (Operation::GetDerivatives, Me)
            | (Operation::GetEventIndicators, Me) => matches!(
                phase,
                InitializationMode | EventMode | ContinuousTimeMode | Terminated | Error
            ),

            // Co-simulation operations on a model-exchange instance and vice versa.
            _ => false,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.function_name())
    }
}

/// Outcome of the last `fmi2DoStep`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    Completed,
    /// The step runs asynchronously; time advances by `step_size` once it completes.
    Pending { step_size: f64 },
    Discarded,
    Canceled,
}

/// Host-side bookkeeping of one instance: phase, time and step count.
#[derive(Debug, Clone)]
pub struct SimulationState {
    interface: InterfaceType,
    phase: Phase,
    time: f64,
    start_time: f64,
    stop_time: Option<f64>,
    step_count: u64,
    last_status: Status,
    last_step: Option<StepOutcome>,
}

impl SimulationState {
    pub fn new(interface: InterfaceType) -> Self {
        Self {
            interface,
            phase: Phase::Instantiated,
            time: 0.0,
            start_time: 0.0,
            stop_time: None,
            step_count: 0,
            last_status: Status::OK,
            last_step: None,
        }
    }

    pub fn interface(&self) -> InterfaceType {
        self.interface
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn stop_time(&self) -> Option<f64> {
        self.stop_time
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn last_status(&self) -> Status {
        self.last_status
    }

    pub fn last_step(&self) -> Option<StepOutcome> {
        self.last_step
    }

    /// Validate `operation` against the current phase. `name` is the instance name used in errors.
    pub fn check(&self, operation: Operation, name: &str) -> Result<(), Error> {
        match self.phase {
            Phase::Freed => return Err(Error::UseAfterFree(name.to_owned())),
            Phase::Fatal if operation != Operation::FreeInstance => {
                return Err(Error::FatalInstance(name.to_owned()))
            }
            _ => {}
        }

        let allowed = operation.is_allowed(self.phase, self.interface)
            && match operation {
                Operation::DoStep => !matches!(self.last_step, Some(StepOutcome::Pending { .. })),
                Operation::CancelStep => matches!(
                    self.last_step,
                    Some(StepOutcome::Pending { .. } | StepOutcome::Discarded)
                ),
                _ => true,
            };

        if allowed {
            Ok(())
        } else {
            Err(Error::IllegalStateTransition {
                operation,
                phase: self.phase,
            })
        }
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            log::debug!("{:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Record the status of a native call issued for `operation` and apply the transition it
    /// implies. `Error` and `Fatal` escalate regardless of the operation.
    pub fn record(&mut self, operation: Operation, status: Status) {
        self.last_status = status;

        match status {
            Status::Fatal => self.enter(Phase::Fatal),
            Status::Error | Status::Unknown(_) => self.enter(Phase::Error),
            Status::Discard if operation == Operation::DoStep => {
                self.last_step = Some(StepOutcome::Discarded)
            }
            Status::OK | Status::Warning => match operation {
                Operation::SetupExperiment => self.enter(Phase::ConfigurationMode),
                Operation::EnterInitializationMode => self.enter(Phase::InitializationMode),
                Operation::ExitInitializationMode => match self.interface {
                    InterfaceType::CoSimulation => self.enter(Phase::StepMode),
                    InterfaceType::ModelExchange => self.enter(Phase::EventMode),
                },
                Operation::EnterEventMode => self.enter(Phase::EventMode),
                Operation::EnterContinuousTimeMode => self.enter(Phase::ContinuousTimeMode),
                Operation::CompletedIntegratorStep => self.step_count += 1,
                Operation::CancelStep => {
                    self.last_step = Some(StepOutcome::Canceled);
                    self.enter(Phase::StepCanceled);
                }
                Operation::Terminate => self.enter(Phase::Terminated),
                Operation::Reset => self.reset(),
                _ => {}
            },
            _ => {}
        }
    }

    /// Experiment bounds recorded after a successful `fmi2SetupExperiment`.
    pub(crate) fn set_experiment(&mut self, start_time: f64, stop_time: Option<f64>) {
        self.start_time = start_time;
        self.stop_time = stop_time;
        self.time = start_time;
    }

    /// Record the status of `fmi2DoStep` with `step_size`. Time only advances on success.
    pub(crate) fn record_step(&mut self, step_size: f64, status: Status) {
        self.record(Operation::DoStep, status);
        match status {
            Status::OK | Status::Warning => self.complete_step(step_size),
            Status::Pending => self.last_step = Some(StepOutcome::Pending { step_size }),
            _ => {}
        }
    }

    /// Resolve a pending step with the `fmi2DoStepStatus` reported by the FMU.
    pub(crate) fn resolve_pending(&mut self, do_step_status: Status) {
        let Some(StepOutcome::Pending { step_size }) = self.last_step else {
            return;
        };
        match do_step_status {
            Status::OK | Status::Warning => self.complete_step(step_size),
            Status::Pending => {}
            Status::Discard => self.last_step = Some(StepOutcome::Discarded),
            other => self.record(Operation::DoStep, other),
        }
    }

    fn complete_step(&mut self, step_size: f64) {
        self.time += step_size;
        self.step_count += 1;
        self.last_step = Some(StepOutcome::Completed);
    }

    /// Model-exchange time assignment. Callers reject regressions before the native call.
    pub(crate) fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    pub(crate) fn mark_freed(&mut self) {
        self.enter(Phase::Freed);
    }

    fn reset(&mut self) {
        self.enter(Phase::Instantiated);
        self.time = 0.0;
        self.start_time = 0.0;
        self.stop_time = None;
        self.step_count = 0;
        self.last_step = None;
    }
}
