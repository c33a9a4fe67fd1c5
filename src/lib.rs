//! The `fmi-host` crate is a host-side runtime for FMUs (Functional Mockup Units) that follow the
//! FMI 2.0 Standard. See <http://www.fmi-standard.org/>
//!
//! It binds the native call table of an FMU shared library, drives each instance through the FMI
//! lifecycle state machine, and exchanges typed variable values with it. Two execution drivers
//! sit on top: a co-simulation driver that advances by macro-steps and a model-exchange driver
//! that delegates integration to a pluggable [`driver::solver::Solver`].
//!
//! Parsing `modelDescription.xml` and unpacking FMU archives are left to the caller, which hands
//! over a [`ModelDescriptor`], the path to the shared library and the resources directory.
//!
//! ## Examples
//!
//! ```rust
//! use fmi_host::{
//!     native::stub::{StubLibrary, StubModel},
//!     variable::{Causality, RealAttributes, TypedAttributes, VariableDescriptor},
//!     model_description::{CoSimulation, ModelDescriptor},
//!     Fmu, VariableAccessor,
//! };
//!
//! let h = VariableDescriptor::new(
//!     "h",
//!     0,
//!     TypedAttributes::Real(RealAttributes { start: Some(1.0), ..Default::default() }),
//! )
//! .with_causality(Causality::Output);
//!
//! let md = ModelDescriptor::new("ball", "{guid}", vec![h])
//!     .unwrap()
//!     .with_co_simulation(CoSimulation::new("ball"));
//! let library = StubLibrary::new(StubModel::new().with_real(0, 1.0));
//! let fmu = Fmu::new(md, library, "ball.so", "resources").unwrap();
//!
//! let mut inst = fmu.instantiate_cs("inst1", false, false).unwrap();
//! inst.simple_setup(0.0, 1.0).unwrap();
//! let h = fmu.model_description().model_variables.by_name("h").unwrap();
//! assert_eq!(h.as_real_variable().unwrap().read(&mut inst).unwrap().value(), Some(&1.0));
//! ```
//!
//! ## Feature flags
#![doc = document_features::document_features!()]
#![deny(clippy::all)]

pub mod component;
pub mod driver;
mod event_flags;
mod fmu;
pub mod lifecycle;
pub mod model_description;
pub mod native;
pub mod params;
mod status;
pub mod variable;

pub use component::{Component, ComponentCS, ComponentME, FmuState};
pub use event_flags::EventFlags;
pub use fmu::Fmu;
pub use model_description::ModelDescriptor;
pub use status::{ReadResult, Status};
pub use variable::{accessor::VariableAccessor, ModelVariables, VariableDescriptor, VariableType};

use lifecycle::{Operation, Phase};

pub mod built_info {
    // The file has been placed there by the build script.
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Errors raised while loading a native library.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    LibLoading {
        #[from]
        source: libloading::Error,
    },

    #[error(transparent)]
    MissingSymbol(#[from] fmi_sys::fmi2::MissingSymbol),

    #[error("FMI version of loaded API ({found}) doesn't match expected ({expected})")]
    FmiVersionMismatch { found: String, expected: String },

    #[error("TypesPlatform of loaded API ({0}) doesn't match expected (default)")]
    TypesPlatformMismatch(String),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Error loading FMU library: {0}")]
    Load(#[from] LoadError),

    #[error("Error instantiating `{0}`")]
    Instantiation(String),

    #[error("Library {} can only be instantiated once per process", .0.display())]
    SingleInstanceViolation(std::path::PathBuf),

    #[error("`{operation}` is not allowed in phase {phase:?}")]
    IllegalStateTransition { operation: Operation, phase: Phase },

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Unknown variable: {0}")]
    NotFound(String),

    #[error("Variable is not {requested}, but {actual}")]
    TypeMismatch {
        requested: VariableType,
        actual: VariableType,
    },

    #[error("Instance `{0}` has been freed")]
    UseAfterFree(String),

    #[error("Instance `{0}` was already freed")]
    AlreadyFreed(String),

    #[error("Instance `{0}` returned Fatal; no further native calls are allowed")]
    FatalInstance(String),

    #[error("Capability {capability} not supported by this FMU")]
    Unsupported { capability: &'static str },

    #[error("FMU returned status {0}")]
    Status(Status),

    #[error(transparent)]
    Solver(#[from] driver::solver::SolverError),

    #[error("Simulation aborted at t = {time} with status {status}")]
    SimulationAborted { time: f64, status: Status },

    #[error("Event iteration at t = {time} did not converge after {iterations} iterations")]
    EventIterationLimit { time: f64, iterations: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Nul(#[from] std::ffi::NulError),

    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceType {
    ModelExchange,
    CoSimulation,
}

impl InterfaceType {
    pub fn name(self) -> &'static str {
        match self {
            InterfaceType::ModelExchange => "ModelExchange",
            InterfaceType::CoSimulation => "CoSimulation",
        }
    }
}

impl std::fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub trait InstanceTag {
    const TYPE: InterfaceType;
}

/// Tag for Model Exchange
#[derive(Debug)]
pub struct ME;

impl InstanceTag for ME {
    const TYPE: InterfaceType = InterfaceType::ModelExchange;
}

/// Tag for Co-Simulation
#[derive(Debug)]
pub struct CS;

impl InstanceTag for CS {
    const TYPE: InterfaceType = InterfaceType::CoSimulation;
}
