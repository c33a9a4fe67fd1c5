//! FMI 2.0 instances and their lifecycle-checked operations.
//!
//! A [`Component`] exclusively owns one native `fmi2Component`. Every operation is validated
//! against the instance's [`SimulationState`] before the native call is issued, and the returned
//! status is recorded afterwards. The instance is released exactly once, either through
//! [`Component::free`] or on drop.

use std::{ffi::CString, marker::PhantomData};

use fmi_sys::fmi2 as binding;

use crate::{
    lifecycle::{Operation, Phase, SimulationState},
    native::{InstanceLease, NativeApi, RawComponent, RawState},
    Error, Fmu, InstanceTag, Status, CS, ME,
};

mod co_simulation;
mod common;
mod model_exchange;

pub struct Component<'a, L: NativeApi, Tag> {
    /// Instance name, also the log target of messages from the FMU
    name: String,
    fmu: &'a Fmu<L>,
    /// `None` once the instance has been freed
    component: Option<RawComponent>,
    state: SimulationState,
    /// Slots indexed by [`FmuState`]; `None` once freed
    saved_states: Vec<Option<RawState>>,
    /// Registration with the library registry, released with the instance
    #[allow(dead_code)]
    lease: Option<InstanceLease>,
    _tag: PhantomData<Tag>,
}

/// A Co-Simulation instance
pub type ComponentCS<'a, L> = Component<'a, L, CS>;
/// A Model Exchange instance
pub type ComponentME<'a, L> = Component<'a, L, ME>;

/// Handle to an FMU state saved by [`Component::get_fmu_state`] or
/// [`Component::deserialize_fmu_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FmuState(usize);

impl<'a, L: NativeApi, Tag> std::fmt::Debug for Component<'a, L, Tag> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("component", &self.component)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<'a, L: NativeApi, Tag: InstanceTag> Component<'a, L, Tag> {
    pub(crate) fn new(
        fmu: &'a Fmu<L>,
        instance_name: &str,
        visible: bool,
        logging_on: bool,
    ) -> Result<Self, Error> {
        let md = fmu.model_description();
        let capabilities = md.capabilities(Tag::TYPE).ok_or(Error::Unsupported {
            capability: Tag::TYPE.name(),
        })?;

        let lease = fmu.registry().acquire(
            fmu.library_path(),
            capabilities.can_be_instantiated_only_once_per_process,
        )?;

        let name = CString::new(instance_name)?;
        let guid = CString::new(md.guid.as_str())?;
        let resource_location = CString::new(fmu.resource_url())?;

        let component = unsafe {
            fmu.library().instantiate(
                &name,
                Tag::TYPE,
                &guid,
                &resource_location,
                visible,
                logging_on,
            )
        }
        .ok_or_else(|| Error::Instantiation(instance_name.to_owned()))?;

        log::trace!(
            "Created {} component {component:?} `{instance_name}`",
            Tag::TYPE
        );

        Ok(Self {
            name: instance_name.to_owned(),
            fmu,
            component: Some(component),
            state: SimulationState::new(Tag::TYPE),
            saved_states: Vec::new(),
            lease: Some(lease),
            _tag: PhantomData,
        })
    }

    /// Validate `operation` against the lifecycle and return the live native handle.
    fn checked(&self, operation: Operation) -> Result<RawComponent, Error> {
        self.state.check(operation, &self.name)?;
        self.component
            .ok_or_else(|| Error::UseAfterFree(self.name.clone()))
    }

    /// Issue `operation` through `f` without recording its status.
    fn issue(
        &self,
        operation: Operation,
        f: impl FnOnce(&L, RawComponent) -> binding::fmi2Status,
    ) -> Result<Status, Error> {
        let component = self.checked(operation)?;
        log::trace!("{}: {operation}", self.name);
        let status = Status::from_raw(f(self.fmu.library(), component));
        self.log_status(operation, status);
        Ok(status)
    }

    /// Issue `operation` through `f` and apply the transition implied by its status.
    fn call(
        &mut self,
        operation: Operation,
        f: impl FnOnce(&L, RawComponent) -> binding::fmi2Status,
    ) -> Result<Status, Error> {
        let status = self.issue(operation, f)?;
        self.state.record(operation, status);
        Ok(status)
    }

    fn log_status(&self, operation: Operation, status: Status) {
        match status {
            Status::OK | Status::Pending => {}
            Status::Warning | Status::Discard => {
                log::warn!("{}: {operation} returned {status}", self.name)
            }
            Status::Error | Status::Fatal | Status::Unknown(_) => {
                log::error!("{}: {operation} returned {status}", self.name)
            }
        }
    }

    fn saved_state(&self, state: FmuState) -> Result<RawState, Error> {
        self.saved_states
            .get(state.0)
            .copied()
            .flatten()
            .ok_or_else(|| Error::Argument(format!("{state:?} is not a live FMU state")))
    }
}

impl<'a, L: NativeApi, Tag> Component<'a, L, Tag> {
    /// Free saved FMU states and the native instance. Returns `false` if it was already released.
    ///
    /// No native call is made after a `Fatal` status; only host-side bookkeeping is cleared.
    fn release(&mut self) -> bool {
        let Some(component) = self.component.take() else {
            return false;
        };

        if self.state.phase() == Phase::Fatal {
            log::warn!("{}: abandoning component after Fatal", self.name);
            self.saved_states.clear();
        } else {
            let library = self.fmu.library();
            for mut state in self.saved_states.drain(..).flatten().map(RawState::as_ptr) {
                unsafe { library.free_fmu_state(component, &mut state) };
            }
            log::trace!("Freeing component {component:?}");
            unsafe { library.free_instance(component) };
        }

        self.state.mark_freed();
        self.lease = None;
        true
    }
}

impl<'a, L: NativeApi, Tag> Drop for Component<'a, L, Tag> {
    fn drop(&mut self) {
        self.release();
    }
}
