//! An in-process [`NativeApi`] implementation for tests and harnesses.
//!
//! [`StubLibrary`] keeps every variable in host memory and echoes written values back. It counts
//! the calls made to each `fmi2` function, can be scripted to answer the Nth call of a function
//! with an arbitrary status, and hosts simple continuous-state dynamics with event indicators for
//! model-exchange scenarios.
//!
//! ```rust
//! use fmi_host::{native::stub::{StubLibrary, StubModel}, Status};
//!
//! let library = StubLibrary::new(StubModel::new().with_real(0, 1.0));
//! library.respond_on("fmi2DoStep", 2, Status::Discard);
//! assert_eq!(library.calls("fmi2DoStep"), 0);
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    ffi::{CStr, CString},
    os::raw::c_void,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use fmi_sys::fmi2 as binding;

use crate::{variable::ValueReference, InterfaceType, Status};

use super::{NativeApi, RawComponent, RawState};

/// Right-hand side `f(t, x, out)` used for derivatives and event indicators.
pub type Dynamics = Arc<dyn Fn(f64, &[f64], &mut [f64]) + Send + Sync>;
/// Reset map applied by `fmi2NewDiscreteStates`. Returns whether `x` was changed.
pub type EventHandler = Arc<dyn Fn(f64, &mut [f64]) -> bool + Send + Sync>;

/// Initial values and behavior of every instance created by a [`StubLibrary`].
#[derive(Clone)]
pub struct StubModel {
    reals: BTreeMap<ValueReference, f64>,
    integers: BTreeMap<ValueReference, i32>,
    booleans: BTreeMap<ValueReference, bool>,
    strings: BTreeMap<ValueReference, String>,
    states: Vec<f64>,
    state_references: Vec<ValueReference>,
    dynamics: Option<Dynamics>,
    event_indicators: usize,
    indicators: Option<Dynamics>,
    on_event: Option<EventHandler>,
    time_events: Vec<f64>,
    version: String,
    types_platform: String,
}

impl Default for StubModel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StubModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubModel")
            .field("reals", &self.reals)
            .field("integers", &self.integers)
            .field("booleans", &self.booleans)
            .field("strings", &self.strings)
            .field("states", &self.states)
            .field("event_indicators", &self.event_indicators)
            .field("time_events", &self.time_events)
            .finish_non_exhaustive()
    }
}

impl StubModel {
    pub fn new() -> Self {
        Self {
            reals: BTreeMap::new(),
            integers: BTreeMap::new(),
            booleans: BTreeMap::new(),
            strings: BTreeMap::new(),
            states: Vec::new(),
            state_references: Vec::new(),
            dynamics: None,
            event_indicators: 0,
            indicators: None,
            on_event: None,
            time_events: Vec::new(),
            version: binding::fmi2Version.to_owned(),
            types_platform: binding::fmi2TypesPlatform.to_owned(),
        }
    }

    pub fn with_real(mut self, vr: ValueReference, value: f64) -> Self {
        self.reals.insert(vr, value);
        self
    }

    /// Also backs enumeration variables, which share the integer functions.
    pub fn with_integer(mut self, vr: ValueReference, value: i32) -> Self {
        self.integers.insert(vr, value);
        self
    }

    pub fn with_boolean(mut self, vr: ValueReference, value: bool) -> Self {
        self.booleans.insert(vr, value);
        self
    }

    pub fn with_string(mut self, vr: ValueReference, value: impl Into<String>) -> Self {
        self.strings.insert(vr, value.into());
        self
    }

    /// Continuous states `x0` with `der(x) = dynamics(t, x)`.
    pub fn with_states(
        mut self,
        x0: impl Into<Vec<f64>>,
        dynamics: impl Fn(f64, &[f64], &mut [f64]) + Send + Sync + 'static,
    ) -> Self {
        self.states = x0.into();
        self.dynamics = Some(Arc::new(dynamics));
        self
    }

    /// Real value references mirroring the continuous states, in state order.
    pub fn with_state_references(mut self, vrs: &[ValueReference]) -> Self {
        self.state_references = vrs.to_vec();
        self
    }

    /// `n` event indicators computed by `indicators`, and the reset map applied on every
    /// `fmi2NewDiscreteStates`.
    pub fn with_event_indicators(
        mut self,
        n: usize,
        indicators: impl Fn(f64, &[f64], &mut [f64]) + Send + Sync + 'static,
        on_event: impl Fn(f64, &mut [f64]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.event_indicators = n;
        self.indicators = Some(Arc::new(indicators));
        self.on_event = Some(Arc::new(on_event));
        self
    }

    /// A time event reported through `nextEventTime`.
    pub fn with_time_event(mut self, time: f64) -> Self {
        self.time_events.push(time);
        self.time_events.sort_by(f64::total_cmp);
        self
    }

    /// Value returned by `fmi2GetVersion`.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Value returned by `fmi2GetTypesPlatform`.
    pub fn with_types_platform(mut self, types_platform: impl Into<String>) -> Self {
        self.types_platform = types_platform.into();
        self
    }

    fn derivatives(&self, time: f64, x: &[f64], dx: &mut [f64]) {
        match &self.dynamics {
            Some(f) => f(time, x, dx),
            None => dx.fill(0.0),
        }
    }

    fn indicators(&self, time: f64, x: &[f64], z: &mut [f64]) {
        match &self.indicators {
            Some(f) => f(time, x, z),
            None => z.fill(0.0),
        }
    }

    fn next_time_event(&self, time: f64) -> Option<f64> {
        self.time_events.iter().copied().find(|&t| t > time)
    }
}

/// A snapshot taken by `fmi2GetFMUstate`. String variables are not captured.
#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    owner: usize,
    time: f64,
    x: Vec<f64>,
    reals: BTreeMap<ValueReference, f64>,
    integers: BTreeMap<ValueReference, i32>,
    booleans: BTreeMap<ValueReference, bool>,
}

impl Snapshot {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(self.time.to_le_bytes());
        out.extend((self.x.len() as u32).to_le_bytes());
        for v in &self.x {
            out.extend(v.to_le_bytes());
        }
        out.extend((self.reals.len() as u32).to_le_bytes());
        for (vr, v) in &self.reals {
            out.extend(vr.to_le_bytes());
            out.extend(v.to_le_bytes());
        }
        out.extend((self.integers.len() as u32).to_le_bytes());
        for (vr, v) in &self.integers {
            out.extend(vr.to_le_bytes());
            out.extend(v.to_le_bytes());
        }
        out.extend((self.booleans.len() as u32).to_le_bytes());
        for (vr, v) in &self.booleans {
            out.extend(vr.to_le_bytes());
            out.push(*v as u8);
        }
        out
    }

    fn decode(owner: usize, bytes: &[u8]) -> Option<Self> {
        let mut r = Reader(bytes);
        let time = r.f64()?;
        let x = (0..r.u32()?).map(|_| r.f64()).collect::<Option<_>>()?;
        let reals = (0..r.u32()?)
            .map(|_| Some((r.u32()?, r.f64()?)))
            .collect::<Option<_>>()?;
        let integers = (0..r.u32()?)
            .map(|_| Some((r.u32()?, r.i32()?)))
            .collect::<Option<_>>()?;
        let booleans = (0..r.u32()?)
            .map(|_| Some((r.u32()?, r.u8()? != 0)))
            .collect::<Option<_>>()?;
        r.0.is_empty().then_some(Self {
            owner,
            time,
            x,
            reals,
            integers,
            booleans,
        })
    }
}

struct Reader<'a>(&'a [u8]);

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let (head, rest) = self.0.split_first_chunk::<N>()?;
        self.0 = rest;
        Some(*head)
    }

    fn f64(&mut self) -> Option<f64> {
        self.take().map(f64::from_le_bytes)
    }

    fn u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> Option<i32> {
        self.take().map(i32::from_le_bytes)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take().map(u8::from_le_bytes)
    }
}

#[derive(Debug)]
struct StubInstance {
    name: String,
    time: f64,
    x: Vec<f64>,
    reals: BTreeMap<ValueReference, f64>,
    integers: BTreeMap<ValueReference, i32>,
    booleans: BTreeMap<ValueReference, bool>,
    strings: BTreeMap<ValueReference, CString>,
    input_derivatives: BTreeMap<(ValueReference, i32), f64>,
    /// `(current_communication_point, step_size)` of an asynchronous step.
    pending_step: Option<(f64, f64)>,
    pending_description: CString,
    last_successful_time: f64,
}

impl StubInstance {
    fn new(name: String, model: &StubModel) -> Self {
        let mut inst = Self {
            name,
            time: 0.0,
            x: Vec::new(),
            reals: BTreeMap::new(),
            integers: BTreeMap::new(),
            booleans: BTreeMap::new(),
            strings: BTreeMap::new(),
            input_derivatives: BTreeMap::new(),
            pending_step: None,
            pending_description: CString::default(),
            last_successful_time: 0.0,
        };
        inst.load(model);
        inst
    }

    fn load(&mut self, model: &StubModel) {
        self.time = 0.0;
        self.x = model.states.clone();
        self.reals = model.reals.clone();
        self.integers = model.integers.clone();
        self.booleans = model.booleans.clone();
        self.strings = model
            .strings
            .iter()
            .filter_map(|(vr, s)| Some((*vr, CString::new(s.as_str()).ok()?)))
            .collect();
        self.input_derivatives.clear();
        self.pending_step = None;
        self.last_successful_time = 0.0;
    }

    fn snapshot(&self, owner: usize) -> Snapshot {
        Snapshot {
            owner,
            time: self.time,
            x: self.x.clone(),
            reals: self.reals.clone(),
            integers: self.integers.clone(),
            booleans: self.booleans.clone(),
        }
    }

    fn restore(&mut self, snapshot: &Snapshot) {
        self.time = snapshot.time;
        self.x.clone_from(&snapshot.x);
        self.reals.clone_from(&snapshot.reals);
        self.integers.clone_from(&snapshot.integers);
        self.booleans.clone_from(&snapshot.booleans);
    }

    fn get_real(&self, model: &StubModel, vr: ValueReference) -> Option<f64> {
        match model.state_references.iter().position(|&s| s == vr) {
            Some(i) => self.x.get(i).copied(),
            None => self.reals.get(&vr).copied(),
        }
    }

    fn set_real(&mut self, model: &StubModel, vr: ValueReference, value: f64) -> bool {
        let slot = match model.state_references.iter().position(|&s| s == vr) {
            Some(i) => self.x.get_mut(i),
            None => self.reals.get_mut(&vr),
        };
        slot.map(|slot| *slot = value).is_some()
    }

    /// Explicit Euler from `t` over `h`, applying the reset map at indicator sign changes.
    fn integrate(&mut self, model: &StubModel, t: f64, h: f64) {
        const MAX_SUBSTEP: f64 = 1e-3;
        let n = (h / MAX_SUBSTEP).ceil().max(1.0) as usize;
        let dt = h / n as f64;

        let mut dx = vec![0.0; self.x.len()];
        let mut z = vec![0.0; model.event_indicators];
        let mut prez = z.clone();
        model.indicators(t, &self.x, &mut prez);

        for i in 0..n {
            let time = t + i as f64 * dt;
            model.derivatives(time, &self.x, &mut dx);
            for (x, dx) in self.x.iter_mut().zip(&dx) {
                *x += dt * dx;
            }
            model.indicators(time + dt, &self.x, &mut z);
            if prez.iter().zip(&z).any(|(p, c)| (*p <= 0.0) != (*c <= 0.0)) {
                if let Some(on_event) = &model.on_event {
                    on_event(time + dt, &mut self.x);
                }
                model.indicators(time + dt, &self.x, &mut z);
            }
            std::mem::swap(&mut prez, &mut z);
        }
        self.time = t + h;
        self.last_successful_time = self.time;
    }
}

#[derive(Debug, Default)]
struct StubState {
    instances: HashMap<usize, StubInstance>,
    snapshots: HashMap<usize, Snapshot>,
    next_id: usize,
    calls: HashMap<&'static str, usize>,
    scripted: HashMap<&'static str, BTreeMap<usize, Status>>,
}

impl StubState {
    /// Count a call of `function` and return the status scripted for it, if any.
    fn enter(&mut self, function: &'static str) -> Option<Status> {
        let count = self.calls.entry(function).or_default();
        *count += 1;
        let nth = *count;
        self.scripted
            .get_mut(function)
            .and_then(|scripted| scripted.remove(&nth))
    }

    fn next_handle(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }
}

fn handle(ptr: *mut c_void) -> usize {
    ptr as usize
}

fn pointer(handle: usize) -> *mut c_void {
    handle as *mut c_void
}

fn status(success: bool) -> Status {
    if success {
        Status::OK
    } else {
        Status::Error
    }
}

/// In-process FMU library. Component and FMU-state handles are plain integers cast to pointers and
/// never dereferenced.
#[derive(Debug)]
pub struct StubLibrary {
    model: StubModel,
    state: Mutex<StubState>,
}

impl StubLibrary {
    pub fn new(model: StubModel) -> Self {
        Self {
            model,
            state: Mutex::new(StubState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of calls made to the `fmi2` function `function`, e.g. `"fmi2DoStep"`.
    pub fn calls(&self, function: &str) -> usize {
        self.lock().calls.get(function).copied().unwrap_or(0)
    }

    /// Number of calls made to any function.
    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Answer the `nth` call (1-based, counted over the library's lifetime) of `function` with
    /// `status` instead of performing it. A scripted `fmi2Instantiate` yields no component, and a
    /// scripted `Pending` on `fmi2DoStep` starts an asynchronous step resolved by
    /// `fmi2GetStatus(fmi2DoStepStatus)`.
    pub fn respond_on(&self, function: &'static str, nth: usize, status: Status) {
        self.lock()
            .scripted
            .entry(function)
            .or_default()
            .insert(nth, status);
    }

    /// Answer the next call of `function` with `status`.
    pub fn respond_next(&self, function: &'static str, status: Status) {
        let next = self.calls(function) + 1;
        self.respond_on(function, next, status);
    }

    /// Number of instances that have not been freed.
    pub fn live_instances(&self) -> usize {
        self.lock().instances.len()
    }

    /// Current time of the live instance named `name`.
    pub fn instance_time(&self, name: &str) -> Option<f64> {
        self.lock()
            .instances
            .values()
            .find(|inst| inst.name == name)
            .map(|inst| inst.time)
    }

    fn call(
        &self,
        function: &'static str,
        c: RawComponent,
        f: impl FnOnce(&StubModel, &mut StubInstance) -> Status,
    ) -> binding::fmi2Status {
        self.call_with_snapshots(function, c, |model, inst, _| f(model, inst))
    }

    fn call_with_snapshots(
        &self,
        function: &'static str,
        c: RawComponent,
        f: impl FnOnce(&StubModel, &mut StubInstance, &mut StubState) -> Status,
    ) -> binding::fmi2Status {
        let mut state = self.lock();
        if let Some(status) = state.enter(function) {
            return status.to_raw();
        }
        let id = handle(c.as_ptr());
        let Some(mut inst) = state.instances.remove(&id) else {
            log::error!("{function}: unknown component {id}");
            return binding::fmi2Status_fmi2Error;
        };
        let status = f(&self.model, &mut inst, &mut *state);
        state.instances.insert(id, inst);
        status.to_raw()
    }
}

impl NativeApi for StubLibrary {
    fn version(&self) -> &str {
        &self.model.version
    }

    fn types_platform(&self) -> &str {
        &self.model.types_platform
    }

    unsafe fn instantiate(
        &self,
        instance_name: &CStr,
        interface: InterfaceType,
        _guid: &CStr,
        _resource_location: &CStr,
        _visible: bool,
        logging_on: bool,
    ) -> Option<RawComponent> {
        let mut state = self.lock();
        if state.enter("fmi2Instantiate").is_some() {
            return None;
        }
        let name = instance_name.to_string_lossy().into_owned();
        let id = state.next_handle();
        log::trace!("Stub instance {name} ({interface}, logging {logging_on}) -> {id}");
        state
            .instances
            .insert(id, StubInstance::new(name, &self.model));
        RawComponent::new(pointer(id))
    }

    unsafe fn free_instance(&self, c: RawComponent) {
        let mut state = self.lock();
        state.enter("fmi2FreeInstance");
        let id = handle(c.as_ptr());
        if state.instances.remove(&id).is_none() {
            log::error!("fmi2FreeInstance: unknown component {id}");
        }
        state.snapshots.retain(|_, snapshot| snapshot.owner != id);
    }

    unsafe fn set_debug_logging(
        &self,
        c: RawComponent,
        logging_on: bool,
        categories: &[&CStr],
    ) -> binding::fmi2Status {
        self.call("fmi2SetDebugLogging", c, |_, inst| {
            log::debug!(
                "{}: debug logging {logging_on} for {categories:?}",
                inst.name
            );
            Status::OK
        })
    }

    unsafe fn setup_experiment(
        &self,
        c: RawComponent,
        _tolerance: Option<f64>,
        start_time: f64,
        _stop_time: Option<f64>,
    ) -> binding::fmi2Status {
        self.call("fmi2SetupExperiment", c, |_, inst| {
            inst.time = start_time;
            inst.last_successful_time = start_time;
            Status::OK
        })
    }

    unsafe fn enter_initialization_mode(&self, c: RawComponent) -> binding::fmi2Status {
        self.call("fmi2EnterInitializationMode", c, |_, _| Status::OK)
    }

    unsafe fn exit_initialization_mode(&self, c: RawComponent) -> binding::fmi2Status {
        self.call("fmi2ExitInitializationMode", c, |_, _| Status::OK)
    }

    unsafe fn terminate(&self, c: RawComponent) -> binding::fmi2Status {
        self.call("fmi2Terminate", c, |_, _| Status::OK)
    }

    unsafe fn reset(&self, c: RawComponent) -> binding::fmi2Status {
        self.call("fmi2Reset", c, |model, inst| {
            inst.load(model);
            Status::OK
        })
    }

    unsafe fn get_real(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &mut [binding::fmi2Real],
    ) -> binding::fmi2Status {
        self.call("fmi2GetReal", c, |model, inst| {
            let read: Option<Vec<_>> = vrs.iter().map(|&vr| inst.get_real(model, vr)).collect();
            status(read.map(|read| values.copy_from_slice(&read)).is_some())
        })
    }

    unsafe fn get_integer(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &mut [binding::fmi2Integer],
    ) -> binding::fmi2Status {
        self.call("fmi2GetInteger", c, |_, inst| {
            let read: Option<Vec<_>> = vrs.iter().map(|vr| inst.integers.get(vr).copied()).collect();
            status(read.map(|read| values.copy_from_slice(&read)).is_some())
        })
    }

    unsafe fn get_boolean(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &mut [binding::fmi2Boolean],
    ) -> binding::fmi2Status {
        self.call("fmi2GetBoolean", c, |_, inst| {
            let read: Option<Vec<_>> = vrs
                .iter()
                .map(|vr| inst.booleans.get(vr).map(|&b| b as binding::fmi2Boolean))
                .collect();
            status(read.map(|read| values.copy_from_slice(&read)).is_some())
        })
    }

    unsafe fn get_string(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &mut [binding::fmi2String],
    ) -> binding::fmi2Status {
        self.call("fmi2GetString", c, |_, inst| {
            let read: Option<Vec<_>> = vrs
                .iter()
                .map(|vr| inst.strings.get(vr).map(|s| s.as_ptr()))
                .collect();
            status(read.map(|read| values.copy_from_slice(&read)).is_some())
        })
    }

    unsafe fn set_real(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &[binding::fmi2Real],
    ) -> binding::fmi2Status {
        self.call("fmi2SetReal", c, |model, inst| {
            if vrs.iter().any(|&vr| inst.get_real(model, vr).is_none()) {
                return Status::Error;
            }
            for (&vr, &value) in vrs.iter().zip(values) {
                inst.set_real(model, vr, value);
            }
            Status::OK
        })
    }

    unsafe fn set_integer(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &[binding::fmi2Integer],
    ) -> binding::fmi2Status {
        self.call("fmi2SetInteger", c, |_, inst| {
            if vrs.iter().any(|vr| !inst.integers.contains_key(vr)) {
                return Status::Error;
            }
            inst.integers.extend(vrs.iter().copied().zip(values.iter().copied()));
            Status::OK
        })
    }

    unsafe fn set_boolean(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &[binding::fmi2Boolean],
    ) -> binding::fmi2Status {
        self.call("fmi2SetBoolean", c, |_, inst| {
            if vrs.iter().any(|vr| !inst.booleans.contains_key(vr)) {
                return Status::Error;
            }
            inst.booleans
                .extend(vrs.iter().copied().zip(values.iter().map(|&b| b != 0)));
            Status::OK
        })
    }

    unsafe fn set_string(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        values: &[binding::fmi2String],
    ) -> binding::fmi2Status {
        self.call("fmi2SetString", c, |_, inst| {
            if vrs.iter().any(|vr| !inst.strings.contains_key(vr))
                || values.iter().any(|ptr| ptr.is_null())
            {
                return Status::Error;
            }
            for (&vr, &ptr) in vrs.iter().zip(values) {
                inst.strings.insert(vr, CStr::from_ptr(ptr).to_owned());
            }
            Status::OK
        })
    }

    unsafe fn get_fmu_state(
        &self,
        c: RawComponent,
        state: &mut binding::fmi2FMUstate,
    ) -> binding::fmi2Status {
        let id = handle(c.as_ptr());
        self.call_with_snapshots("fmi2GetFMUstate", c, |_, inst, stub| {
            let snapshot = inst.snapshot(id);
            let existing = handle(*state);
            if stub.snapshots.contains_key(&existing) {
                stub.snapshots.insert(existing, snapshot);
            } else {
                let new = stub.next_handle();
                stub.snapshots.insert(new, snapshot);
                *state = pointer(new);
            }
            Status::OK
        })
    }

    unsafe fn set_fmu_state(&self, c: RawComponent, state: RawState) -> binding::fmi2Status {
        self.call_with_snapshots("fmi2SetFMUstate", c, |_, inst, stub| {
            match stub.snapshots.get(&handle(state.as_ptr())) {
                Some(snapshot) => {
                    inst.restore(snapshot);
                    Status::OK
                }
                None => Status::Error,
            }
        })
    }

    unsafe fn free_fmu_state(
        &self,
        c: RawComponent,
        state: &mut binding::fmi2FMUstate,
    ) -> binding::fmi2Status {
        self.call_with_snapshots("fmi2FreeFMUstate", c, |_, _, stub| {
            let freed = stub.snapshots.remove(&handle(*state)).is_some();
            *state = std::ptr::null_mut();
            status(freed)
        })
    }

    unsafe fn serialized_fmu_state_size(
        &self,
        c: RawComponent,
        state: RawState,
        size: &mut usize,
    ) -> binding::fmi2Status {
        self.call_with_snapshots("fmi2SerializedFMUstateSize", c, |_, _, stub| {
            match stub.snapshots.get(&handle(state.as_ptr())) {
                Some(snapshot) => {
                    *size = snapshot.encode().len();
                    Status::OK
                }
                None => Status::Error,
            }
        })
    }

    unsafe fn serialize_fmu_state(
        &self,
        c: RawComponent,
        state: RawState,
        buffer: &mut [u8],
    ) -> binding::fmi2Status {
        self.call_with_snapshots("fmi2SerializeFMUstate", c, |_, _, stub| {
            match stub.snapshots.get(&handle(state.as_ptr())) {
                Some(snapshot) => {
                    let bytes = snapshot.encode();
                    if bytes.len() != buffer.len() {
                        return Status::Error;
                    }
                    buffer.copy_from_slice(&bytes);
                    Status::OK
                }
                None => Status::Error,
            }
        })
    }

    unsafe fn deserialize_fmu_state(
        &self,
        c: RawComponent,
        buffer: &[u8],
        state: &mut binding::fmi2FMUstate,
    ) -> binding::fmi2Status {
        let id = handle(c.as_ptr());
        self.call_with_snapshots("fmi2DeSerializeFMUstate", c, |_, _, stub| {
            match Snapshot::decode(id, buffer) {
                Some(snapshot) => {
                    let new = stub.next_handle();
                    stub.snapshots.insert(new, snapshot);
                    *state = pointer(new);
                    Status::OK
                }
                None => Status::Error,
            }
        })
    }

    /// Every unknown depends only on itself with unit sensitivity.
    unsafe fn get_directional_derivative(
        &self,
        c: RawComponent,
        unknown_vrs: &[binding::fmi2ValueReference],
        known_vrs: &[binding::fmi2ValueReference],
        dv_known: &[binding::fmi2Real],
        dv_unknown: &mut [binding::fmi2Real],
    ) -> binding::fmi2Status {
        self.call("fmi2GetDirectionalDerivative", c, |_, _| {
            for (unknown, dv) in unknown_vrs.iter().zip(dv_unknown.iter_mut()) {
                *dv = known_vrs
                    .iter()
                    .zip(dv_known)
                    .filter(|(known, _)| *known == unknown)
                    .map(|(_, dv)| dv)
                    .sum();
            }
            Status::OK
        })
    }

    unsafe fn set_real_input_derivatives(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        orders: &[binding::fmi2Integer],
        values: &[binding::fmi2Real],
    ) -> binding::fmi2Status {
        self.call("fmi2SetRealInputDerivatives", c, |_, inst| {
            for ((&vr, &order), &value) in vrs.iter().zip(orders).zip(values) {
                inst.input_derivatives.insert((vr, order), value);
            }
            Status::OK
        })
    }

    unsafe fn get_real_output_derivatives(
        &self,
        c: RawComponent,
        vrs: &[binding::fmi2ValueReference],
        orders: &[binding::fmi2Integer],
        values: &mut [binding::fmi2Real],
    ) -> binding::fmi2Status {
        self.call("fmi2GetRealOutputDerivatives", c, |model, inst| {
            let mut dx = vec![0.0; inst.x.len()];
            model.derivatives(inst.time, &inst.x, &mut dx);
            for ((&vr, &order), value) in vrs.iter().zip(orders).zip(values.iter_mut()) {
                let state = model.state_references.iter().position(|&s| s == vr);
                *value = match (state, order) {
                    (Some(i), 1) => dx[i],
                    _ => inst
                        .input_derivatives
                        .get(&(vr, order))
                        .copied()
                        .unwrap_or(0.0),
                };
            }
            Status::OK
        })
    }

    unsafe fn do_step(
        &self,
        c: RawComponent,
        current_communication_point: f64,
        communication_step_size: f64,
        _no_set_fmu_state_prior: bool,
    ) -> binding::fmi2Status {
        let mut state = self.lock();
        let scripted = state.enter("fmi2DoStep");
        let id = handle(c.as_ptr());
        let Some(inst) = state.instances.get_mut(&id) else {
            log::error!("fmi2DoStep: unknown component {id}");
            return binding::fmi2Status_fmi2Error;
        };
        match scripted {
            Some(Status::Pending) => {
                inst.pending_step = Some((current_communication_point, communication_step_size));
                inst.pending_description = c"step in progress".to_owned();
                Status::Pending.to_raw()
            }
            Some(status) => status.to_raw(),
            None => {
                inst.integrate(
                    &self.model,
                    current_communication_point,
                    communication_step_size,
                );
                binding::fmi2Status_fmi2OK
            }
        }
    }

    unsafe fn cancel_step(&self, c: RawComponent) -> binding::fmi2Status {
        self.call("fmi2CancelStep", c, |_, inst| {
            inst.pending_step = None;
            inst.pending_description = CString::default();
            Status::OK
        })
    }

    unsafe fn get_status(
        &self,
        c: RawComponent,
        kind: binding::fmi2StatusKind,
        value: &mut binding::fmi2Status,
    ) -> binding::fmi2Status {
        self.call("fmi2GetStatus", c, |model, inst| {
            if kind != binding::fmi2StatusKind_fmi2DoStepStatus {
                return Status::Discard;
            }
            if let Some((t, h)) = inst.pending_step.take() {
                inst.integrate(model, t, h);
                inst.pending_description = CString::default();
            }
            *value = binding::fmi2Status_fmi2OK;
            Status::OK
        })
    }

    unsafe fn get_real_status(
        &self,
        c: RawComponent,
        kind: binding::fmi2StatusKind,
        value: &mut binding::fmi2Real,
    ) -> binding::fmi2Status {
        self.call("fmi2GetRealStatus", c, |_, inst| {
            if kind != binding::fmi2StatusKind_fmi2LastSuccessfulTime {
                return Status::Discard;
            }
            *value = inst.last_successful_time;
            Status::OK
        })
    }

    unsafe fn get_integer_status(
        &self,
        c: RawComponent,
        _kind: binding::fmi2StatusKind,
        _value: &mut binding::fmi2Integer,
    ) -> binding::fmi2Status {
        self.call("fmi2GetIntegerStatus", c, |_, _| Status::Discard)
    }

    unsafe fn get_boolean_status(
        &self,
        c: RawComponent,
        kind: binding::fmi2StatusKind,
        value: &mut binding::fmi2Boolean,
    ) -> binding::fmi2Status {
        self.call("fmi2GetBooleanStatus", c, |_, _| {
            if kind != binding::fmi2StatusKind_fmi2Terminated {
                return Status::Discard;
            }
            *value = binding::fmi2False;
            Status::OK
        })
    }

    unsafe fn get_string_status(
        &self,
        c: RawComponent,
        kind: binding::fmi2StatusKind,
        value: &mut binding::fmi2String,
    ) -> binding::fmi2Status {
        self.call("fmi2GetStringStatus", c, |_, inst| {
            if kind != binding::fmi2StatusKind_fmi2PendingStatus {
                return Status::Discard;
            }
            *value = inst.pending_description.as_ptr();
            Status::OK
        })
    }

    unsafe fn enter_event_mode(&self, c: RawComponent) -> binding::fmi2Status {
        self.call("fmi2EnterEventMode", c, |_, _| Status::OK)
    }

    unsafe fn new_discrete_states(
        &self,
        c: RawComponent,
        event_info: &mut binding::fmi2EventInfo,
    ) -> binding::fmi2Status {
        self.call("fmi2NewDiscreteStates", c, |model, inst| {
            let changed = model
                .on_event
                .as_ref()
                .is_some_and(|on_event| on_event(inst.time, &mut inst.x));
            let next = model.next_time_event(inst.time);
            *event_info = binding::fmi2EventInfo {
                newDiscreteStatesNeeded: binding::fmi2False,
                terminateSimulation: binding::fmi2False,
                nominalsOfContinuousStatesChanged: binding::fmi2False,
                valuesOfContinuousStatesChanged: changed as binding::fmi2Boolean,
                nextEventTimeDefined: next.is_some() as binding::fmi2Boolean,
                nextEventTime: next.unwrap_or(0.0),
            };
            Status::OK
        })
    }

    unsafe fn enter_continuous_time_mode(&self, c: RawComponent) -> binding::fmi2Status {
        self.call("fmi2EnterContinuousTimeMode", c, |_, _| Status::OK)
    }

    unsafe fn completed_integrator_step(
        &self,
        c: RawComponent,
        _no_set_fmu_state_prior: bool,
        enter_event_mode: &mut binding::fmi2Boolean,
        terminate_simulation: &mut binding::fmi2Boolean,
    ) -> binding::fmi2Status {
        self.call("fmi2CompletedIntegratorStep", c, |_, _| {
            *enter_event_mode = binding::fmi2False;
            *terminate_simulation = binding::fmi2False;
            Status::OK
        })
    }

    unsafe fn set_time(&self, c: RawComponent, time: f64) -> binding::fmi2Status {
        self.call("fmi2SetTime", c, |_, inst| {
            inst.time = time;
            Status::OK
        })
    }

    unsafe fn set_continuous_states(&self, c: RawComponent, x: &[f64]) -> binding::fmi2Status {
        self.call("fmi2SetContinuousStates", c, |_, inst| {
            if x.len() != inst.x.len() {
                return Status::Error;
            }
            inst.x.copy_from_slice(x);
            Status::OK
        })
    }

    unsafe fn get_derivatives(&self, c: RawComponent, dx: &mut [f64]) -> binding::fmi2Status {
        self.call("fmi2GetDerivatives", c, |model, inst| {
            if dx.len() != inst.x.len() {
                return Status::Error;
            }
            model.derivatives(inst.time, &inst.x, dx);
            Status::OK
        })
    }

    unsafe fn get_event_indicators(&self, c: RawComponent, z: &mut [f64]) -> binding::fmi2Status {
        self.call("fmi2GetEventIndicators", c, |model, inst| {
            if z.len() != model.event_indicators {
                return Status::Error;
            }
            model.indicators(inst.time, &inst.x, z);
            Status::OK
        })
    }

    unsafe fn get_continuous_states(&self, c: RawComponent, x: &mut [f64]) -> binding::fmi2Status {
        self.call("fmi2GetContinuousStates", c, |_, inst| {
            if x.len() != inst.x.len() {
                return Status::Error;
            }
            x.copy_from_slice(&inst.x);
            Status::OK
        })
    }

    unsafe fn get_nominals_of_continuous_states(
        &self,
        c: RawComponent,
        x_nominal: &mut [f64],
    ) -> binding::fmi2Status {
        self.call("fmi2GetNominalsOfContinuousStates", c, |_, inst| {
            if x_nominal.len() != inst.x.len() {
                return Status::Error;
            }
            x_nominal.fill(1.0);
            Status::OK
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instantiate(library: &StubLibrary) -> RawComponent {
        unsafe {
            library.instantiate(
                c"inst",
                InterfaceType::CoSimulation,
                c"{guid}",
                c"file:///tmp/",
                false,
                false,
            )
        }
        .unwrap()
    }

    #[test]
    fn test_echo_and_counts() {
        let library = StubLibrary::new(StubModel::new().with_real(0, 1.0).with_integer(1, 3));
        let c = instantiate(&library);

        let mut values = [0.0];
        let status = unsafe { library.get_real(c, &[0], &mut values) };
        assert_eq!(status, binding::fmi2Status_fmi2OK);
        assert_eq!(values, [1.0]);

        unsafe { library.set_real(c, &[0], &[2.5]) };
        unsafe { library.get_real(c, &[0], &mut values) };
        assert_eq!(values, [2.5]);

        let status = unsafe { library.get_real(c, &[42], &mut values) };
        assert_eq!(status, binding::fmi2Status_fmi2Error);

        assert_eq!(library.calls("fmi2GetReal"), 3);
        assert_eq!(library.calls("fmi2SetReal"), 1);
        assert_eq!(library.total_calls(), 5);

        unsafe { library.free_instance(c) };
        assert_eq!(library.live_instances(), 0);
    }

    #[test]
    fn test_scripted_status() {
        let library = StubLibrary::new(StubModel::new());
        let c = instantiate(&library);
        library.respond_on("fmi2DoStep", 2, Status::Discard);

        assert_eq!(
            unsafe { library.do_step(c, 0.0, 0.1, true) },
            binding::fmi2Status_fmi2OK
        );
        assert_eq!(
            unsafe { library.do_step(c, 0.1, 0.1, true) },
            binding::fmi2Status_fmi2Discard
        );
        assert_eq!(library.instance_time("inst"), Some(0.1));

        library.respond_next("fmi2Terminate", Status::Unknown(17));
        assert_eq!(unsafe { library.terminate(c) }, 17);
    }

    #[test]
    fn test_snapshot_encoding() {
        let snapshot = Snapshot {
            owner: 1,
            time: 0.5,
            x: vec![1.0, -2.0],
            reals: [(0, 3.0)].into(),
            integers: [(1, -4)].into(),
            booleans: [(2, true)].into(),
        };
        let bytes = snapshot.encode();
        assert_eq!(Snapshot::decode(1, &bytes), Some(snapshot));
        assert_eq!(Snapshot::decode(1, &bytes[..bytes.len() - 1]), None);
    }
}
