//! Co-simulation and model-exchange drivers run end to end against the stub library.

use assert_approx_eq::assert_approx_eq;
use fmi_host::{
    driver::{
        simulate,
        solver::{Euler, Solver, SolverError},
        CoSimulationDriver, Driver, ModelExchangeDriver,
    },
    lifecycle::Phase,
    model_description::{CoSimulation, DefaultExperiment, ModelDescriptor, ModelExchange},
    native::stub::{StubLibrary, StubModel},
    params::{CoSimulationOptions, ModelExchangeOptions, SimOptions, SimParams},
    variable::{RealAttributes, TypedAttributes, VariableDescriptor},
    Error, Fmu, Status, VariableAccessor,
};

fn real(name: &str, vr: u32) -> VariableDescriptor {
    VariableDescriptor::new(name, vr, TypedAttributes::Real(RealAttributes::default()))
}

fn cs_fmu(cs: CoSimulation) -> Fmu<StubLibrary> {
    let md = ModelDescriptor::new("ball", "{guid}", vec![real("h", 0)])
        .unwrap()
        .with_co_simulation(cs)
        .with_default_experiment(DefaultExperiment {
            stop_time: Some(1.0),
            step_size: Some(0.1),
            ..Default::default()
        });
    Fmu::new(
        md,
        StubLibrary::new(StubModel::new().with_real(0, 1.0)),
        "ball.so",
        "/tmp",
    )
    .unwrap()
}

/// Bouncing ball with `h` and `v` as continuous states and `h` as event indicator.
fn bouncing_ball() -> Fmu<StubLibrary> {
    let md = ModelDescriptor::new("BouncingBall", "{guid}", vec![real("h", 0), real("v", 1)])
        .unwrap()
        .with_model_exchange(ModelExchange::new("bouncing_ball"))
        .with_continuous_states(2)
        .with_event_indicators(1);
    let model = StubModel::new()
        .with_states([1.0, 0.0], |_, x, dx| {
            dx[0] = x[1];
            dx[1] = -9.81;
        })
        .with_state_references(&[0, 1])
        .with_event_indicators(
            1,
            |_, x, z| z[0] = x[0],
            |_, x| {
                if x[0] <= 0.0 && x[1] < 0.0 {
                    x[0] = 0.0;
                    x[1] = -0.7 * x[1];
                    true
                } else {
                    false
                }
            },
        );
    Fmu::new(md, StubLibrary::new(model), "bouncing_ball.so", "/tmp").unwrap()
}

#[test_log::test]
fn test_cs_simulate() {
    let fmu = cs_fmu(CoSimulation::new("ball"));
    let params =
        SimParams::new_from_options(fmu.model_description(), &SimOptions::default()).unwrap();
    assert_eq!(params.step_size, 0.1);

    let inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    let mut driver = CoSimulationDriver::new(inst, CoSimulationOptions::default());
    let stats = simulate(&mut driver, &params).unwrap();

    assert_eq!(stats.num_steps, 10);
    assert_approx_eq!(stats.end_time, 1.0);
    assert_eq!(stats.last_status, Status::OK);
    assert_eq!(fmu.library().calls("fmi2DoStep"), 10);

    let mut inst = driver.into_component();
    assert_eq!(inst.phase(), Phase::Terminated);
    assert_eq!(inst.read_real(0).unwrap().value(), Some(&1.0));
}

#[test_log::test]
fn test_cs_partial_last_step() {
    let fmu = cs_fmu(CoSimulation::new("ball"));
    let params = SimParams::new(0.0, 1.05, 0.1, None).unwrap();

    let inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    let mut driver = CoSimulationDriver::new(inst, CoSimulationOptions::default());
    let stats = simulate(&mut driver, &params).unwrap();
    assert_eq!(stats.num_steps, 11);
    assert_approx_eq!(stats.end_time, 1.05);
}

#[test_log::test]
fn test_cs_discard_retry() {
    let cs = CoSimulation {
        can_handle_variable_communication_step_size: true,
        ..CoSimulation::new("ball")
    };
    let fmu = cs_fmu(cs);
    fmu.library().respond_on("fmi2DoStep", 3, Status::Discard);

    let params = SimParams::new(0.0, 0.5, 0.1, None).unwrap();
    let inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    let mut driver = CoSimulationDriver::new(inst, CoSimulationOptions::default());
    let stats = simulate(&mut driver, &params).unwrap();

    assert_eq!(stats.num_steps, 5);
    assert_approx_eq!(stats.end_time, 0.5);
    // One discarded step, retried as two halves
    assert_eq!(fmu.library().calls("fmi2DoStep"), 7);
}

#[test_log::test]
fn test_cs_discard_without_variable_steps() {
    let fmu = cs_fmu(CoSimulation::new("ball"));
    fmu.library().respond_on("fmi2DoStep", 2, Status::Discard);

    let params = SimParams::new(0.0, 0.5, 0.1, None).unwrap();
    let inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    let mut driver = CoSimulationDriver::new(inst, CoSimulationOptions::default());

    match simulate(&mut driver, &params) {
        Err(Error::SimulationAborted { time, status }) => {
            assert_approx_eq!(time, 0.1);
            assert_eq!(status, Status::Discard);
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert!(driver.component().is_freed());
    assert_eq!(fmu.library().live_instances(), 0);
}

#[test_log::test]
fn test_cs_pending_steps() {
    let fmu = cs_fmu(CoSimulation::new("ball"));
    fmu.library().respond_on("fmi2DoStep", 1, Status::Pending);

    let params = SimParams::new(0.0, 0.3, 0.1, None).unwrap();
    let inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    let mut driver = CoSimulationDriver::new(inst, CoSimulationOptions::default());
    let stats = simulate(&mut driver, &params).unwrap();

    assert_eq!(stats.num_steps, 3);
    assert_approx_eq!(stats.end_time, 0.3);
    assert_eq!(fmu.library().calls("fmi2GetStatus"), 1);
}

#[test_log::test]
fn test_cs_cancel_pending_step() {
    let fmu = cs_fmu(CoSimulation::new("ball"));
    fmu.library().respond_on("fmi2DoStep", 1, Status::Pending);

    let params = SimParams::new(0.0, 1.0, 0.1, None).unwrap();
    let inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    let mut driver = CoSimulationDriver::new(inst, CoSimulationOptions::default());
    driver.initialize(&params).unwrap();

    assert!(!driver.step(0.1).unwrap());
    assert_eq!(driver.cancel_step().unwrap(), Status::OK);
    assert_eq!(driver.component().phase(), Phase::StepCanceled);
    assert_eq!(driver.time(), 0.0);
    assert!(matches!(
        driver.step(0.1),
        Err(Error::IllegalStateTransition { .. })
    ));
    assert_eq!(fmu.library().calls("fmi2CancelStep"), 1);
    assert_eq!(fmu.library().calls("fmi2DoStep"), 1);
    assert_eq!(driver.terminate().unwrap(), Status::OK);
}

#[test_log::test]
fn test_cs_cancel_without_step() {
    let fmu = cs_fmu(CoSimulation::new("ball"));
    let params = SimParams::new(0.0, 1.0, 0.1, None).unwrap();
    let inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    let mut driver = CoSimulationDriver::new(inst, CoSimulationOptions::default());
    driver.initialize(&params).unwrap();

    assert!(matches!(
        driver.cancel_step(),
        Err(Error::IllegalStateTransition {
            operation: fmi_host::lifecycle::Operation::CancelStep,
            phase: Phase::StepMode
        })
    ));
    assert_eq!(fmu.library().calls("fmi2CancelStep"), 0);
}

#[test_log::test]
fn test_cs_fatal_aborts() {
    let fmu = cs_fmu(CoSimulation::new("ball"));
    fmu.library().respond_on("fmi2DoStep", 4, Status::Fatal);

    let params = SimParams::new(0.0, 1.0, 0.1, None).unwrap();
    let inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    let mut driver = CoSimulationDriver::new(inst, CoSimulationOptions::default());

    match simulate(&mut driver, &params) {
        Err(Error::SimulationAborted { time, status }) => {
            assert_approx_eq!(time, 0.3);
            assert_eq!(status, Status::Fatal);
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(fmu.library().calls("fmi2DoStep"), 4);
    assert_eq!(fmu.library().calls("fmi2Terminate"), 0);
    assert_eq!(fmu.library().calls("fmi2FreeInstance"), 0);
}

#[test_log::test]
fn test_cs_initialization_failure() {
    let fmu = cs_fmu(CoSimulation::new("ball"));
    fmu.library()
        .respond_on("fmi2ExitInitializationMode", 1, Status::Error);

    let params = SimParams::new(0.0, 1.0, 0.1, None).unwrap();
    let inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    let mut driver = CoSimulationDriver::new(inst, CoSimulationOptions::default());

    assert!(matches!(
        simulate(&mut driver, &params),
        Err(Error::SimulationAborted {
            status: Status::Error,
            ..
        })
    ));
    assert_eq!(fmu.library().calls("fmi2DoStep"), 0);
    assert_eq!(fmu.library().calls("fmi2FreeInstance"), 1);
}

#[test_log::test]
fn test_me_bouncing_ball() {
    let fmu = bouncing_ball();
    let params = SimParams::new(0.0, 1.0, 0.01, None).unwrap();

    let inst = fmu.instantiate_me("inst1", false, false).unwrap();
    let solver = Euler::with_max_step(1e-3).unwrap();
    let mut driver = ModelExchangeDriver::new(inst, solver, ModelExchangeOptions::default());
    assert_eq!(driver.interface_type(), fmi_host::InterfaceType::ModelExchange);

    let stats = simulate(&mut driver, &params).unwrap();
    assert_eq!(stats.num_steps, 100);
    assert_approx_eq!(stats.end_time, 1.0);
    assert!(stats.num_events >= 1);

    // The ball hit the ground at t = sqrt(2/9.81) ~ 0.45 and bounced back up.
    let x = driver.states().to_vec();
    assert!(x[0] > -0.05);

    let mut inst = driver.into_component();
    assert_eq!(inst.phase(), Phase::Terminated);
    let h = inst.read_real(0).unwrap().into_value().unwrap();
    assert_approx_eq!(h, x[0]);
    assert!(fmu.library().calls("fmi2CompletedIntegratorStep") >= 1000);
}

#[test_log::test]
fn test_me_time_event() {
    let md = ModelDescriptor::new("ramp", "{guid}", vec![real("x", 0)])
        .unwrap()
        .with_model_exchange(ModelExchange {
            completed_integrator_step_not_needed: true,
            ..ModelExchange::new("ramp")
        })
        .with_continuous_states(1);
    let model = StubModel::new()
        .with_states([0.0], |_, _, dx| dx[0] = 1.0)
        .with_time_event(0.55);
    let fmu = Fmu::new(md, StubLibrary::new(model), "ramp.so", "/tmp").unwrap();

    let params = SimParams::new(0.0, 1.0, 0.1, None).unwrap();
    let inst = fmu.instantiate_me("inst1", false, false).unwrap();
    let mut driver = ModelExchangeDriver::new(inst, Euler::new(), ModelExchangeOptions::default());
    let stats = simulate(&mut driver, &params).unwrap();

    assert_eq!(stats.num_events, 1);
    assert_eq!(fmu.library().calls("fmi2EnterEventMode"), 1);
    assert_eq!(fmu.library().calls("fmi2CompletedIntegratorStep"), 0);
    assert_eq!(driver.next_event_time(), None);
    assert_approx_eq!(driver.states()[0], 1.0);
}

#[test_log::test]
fn test_me_event_iteration_limit() {
    let md = ModelDescriptor::new("chatter", "{guid}", vec![])
        .unwrap()
        .with_model_exchange(ModelExchange::new("chatter"));
    let fmu = Fmu::new(md, StubLibrary::new(StubModel::new()), "chatter.so", "/tmp").unwrap();
    let params = SimParams::new(0.0, 1.0, 0.1, None).unwrap();

    let inst = fmu.instantiate_me("inst1", false, false).unwrap();
    let options = ModelExchangeOptions {
        max_event_iterations: 0,
        ..Default::default()
    };
    let mut driver = ModelExchangeDriver::new(inst, Euler::new(), options);
    assert!(matches!(
        simulate(&mut driver, &params),
        Err(Error::EventIterationLimit { iterations: 0, .. })
    ));
    assert_eq!(fmu.library().calls("fmi2FreeInstance"), 1);
}

/// A solver that never integrates.
struct Frozen;

impl Solver for Frozen {
    fn integrate(
        &mut self,
        _x: &mut [f64],
        _t0: f64,
        t1: f64,
        _derivatives: &mut fmi_host::driver::solver::Derivatives<'_>,
    ) -> Result<f64, Error> {
        Ok(t1)
    }
}

#[test_log::test]
fn test_me_custom_solver() {
    let fmu = bouncing_ball();
    let params = SimParams::new(0.0, 0.1, 0.05, None).unwrap();
    let inst = fmu.instantiate_me("inst1", false, false).unwrap();
    let mut driver = ModelExchangeDriver::new(inst, Frozen, ModelExchangeOptions::default());
    let stats = simulate(&mut driver, &params).unwrap();

    assert_eq!(stats.num_steps, 2);
    assert_eq!(stats.num_events, 0);
    assert_eq!(driver.states(), [1.0, 0.0]);
    assert_eq!(fmu.library().calls("fmi2GetDerivatives"), 0);
}

/// Never advances time.
struct Stalled;

impl Solver for Stalled {
    fn integrate(
        &mut self,
        _x: &mut [f64],
        t0: f64,
        _t1: f64,
        _derivatives: &mut fmi_host::driver::solver::Derivatives<'_>,
    ) -> Result<f64, Error> {
        Ok(t0)
    }
}

#[test_log::test]
fn test_me_solver_without_progress() {
    let fmu = bouncing_ball();
    let params = SimParams::new(0.0, 1.0, 0.5, None).unwrap();
    let inst = fmu.instantiate_me("inst1", false, false).unwrap();
    let mut driver = ModelExchangeDriver::new(inst, Stalled, ModelExchangeOptions::default());

    assert!(matches!(
        simulate(&mut driver, &params),
        Err(Error::Solver(SolverError::OutOfSpan { reached, .. })) if reached == 0.0
    ));
    assert_eq!(fmu.library().calls("fmi2CompletedIntegratorStep"), 0);
    assert_eq!(fmu.library().calls("fmi2FreeInstance"), 1);
    assert_eq!(fmu.library().live_instances(), 0);
}
