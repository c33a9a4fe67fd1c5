//! Lifecycle ordering, status handling and instance ownership against the stub library.

use assert_approx_eq::assert_approx_eq;
use fmi_host::{
    lifecycle::{Operation, Phase},
    model_description::{CoSimulation, ModelDescriptor, ModelExchange},
    native::{
        stub::{StubLibrary, StubModel},
        LibraryRegistry,
    },
    variable::{RealAttributes, TypedAttributes, VariableDescriptor},
    Error, EventFlags, Fmu, Status,
};

fn real(name: &str, vr: u32, start: f64) -> VariableDescriptor {
    VariableDescriptor::new(
        name,
        vr,
        TypedAttributes::Real(RealAttributes {
            start: Some(start),
            ..Default::default()
        }),
    )
}

fn cs_fmu(cs: CoSimulation, model: StubModel) -> Fmu<StubLibrary> {
    let md = ModelDescriptor::new("ball", "{guid}", vec![real("h", 0, 1.0)])
        .unwrap()
        .with_co_simulation(cs);
    Fmu::new(md, StubLibrary::new(model), "ball.so", "/tmp")
        .unwrap()
        .with_registry(LibraryRegistry::new())
}

#[test_log::test]
fn test_step_before_initialization() {
    let fmu = cs_fmu(CoSimulation::new("ball"), StubModel::new());
    let mut inst = fmu.instantiate_cs("inst1", false, false).unwrap();

    assert!(matches!(
        inst.do_step(0.1, true),
        Err(Error::IllegalStateTransition {
            operation: Operation::DoStep,
            phase: Phase::Instantiated
        })
    ));
    assert!(matches!(
        inst.exit_initialization_mode(),
        Err(Error::IllegalStateTransition { .. })
    ));
    assert_eq!(fmu.library().calls("fmi2DoStep"), 0);
    assert_eq!(fmu.library().calls("fmi2ExitInitializationMode"), 0);
    assert_eq!(inst.phase(), Phase::Instantiated);
}

#[test_log::test]
fn test_legal_cs_sequence() {
    let fmu = cs_fmu(CoSimulation::new("ball"), StubModel::new().with_real(0, 1.0));
    let mut inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    assert_eq!(inst.version(), "2.0");
    assert_eq!(inst.types_platform(), "default");

    assert_eq!(inst.simple_setup(0.0, 1.0).unwrap(), Status::OK);
    assert_eq!(inst.phase(), Phase::StepMode);

    for _ in 0..10 {
        assert_eq!(inst.do_step(0.1, true).unwrap(), Status::OK);
    }
    assert_approx_eq!(inst.time(), 1.0);
    assert_eq!(inst.step_count(), 10);
    assert_approx_eq!(fmu.library().instance_time("inst1").unwrap(), 1.0);

    let h = fmu.model_description().model_variables.by_name("h").unwrap();
    let value = h.as_real_variable().unwrap().read(&mut inst).unwrap();
    assert_eq!(value.status, Status::OK);
    assert_eq!(value.value(), Some(&1.0));

    assert_eq!(inst.terminate().unwrap(), Status::OK);
    assert_eq!(inst.phase(), Phase::Terminated);
    assert!(inst.do_step(0.1, true).is_err());

    // Values stay readable after terminate
    assert!(h.read(&mut inst).unwrap().is_success());

    assert_eq!(inst.reset().unwrap(), Status::OK);
    assert_eq!(inst.phase(), Phase::Instantiated);
    assert_eq!(inst.time(), 0.0);
}

#[test_log::test]
fn test_setup_experiment_bounds() {
    let fmu = cs_fmu(CoSimulation::new("ball"), StubModel::new());
    let mut inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    assert!(matches!(
        inst.setup_experiment(None, 1.0, Some(0.5)),
        Err(Error::Argument(_))
    ));
    assert_eq!(fmu.library().calls("fmi2SetupExperiment"), 0);

    assert_eq!(inst.setup_experiment(Some(1e-6), 0.5, None).unwrap(), Status::OK);
    assert_eq!(inst.time(), 0.5);
    assert_eq!(inst.state().start_time(), 0.5);
    assert_eq!(inst.state().stop_time(), None);
}

#[test_log::test]
fn test_double_free() {
    let fmu = cs_fmu(CoSimulation::new("ball"), StubModel::new());
    let mut inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    inst.free().unwrap();
    assert!(inst.is_freed());

    assert!(matches!(inst.free(), Err(Error::AlreadyFreed(name)) if name == "inst1"));
    assert!(matches!(
        inst.simple_setup(0.0, 1.0),
        Err(Error::UseAfterFree(_))
    ));
    drop(inst);

    assert_eq!(fmu.library().calls("fmi2FreeInstance"), 1);
    assert_eq!(fmu.library().live_instances(), 0);
}

#[test_log::test]
fn test_discard_keeps_time() {
    let fmu = cs_fmu(CoSimulation::new("ball"), StubModel::new());
    fmu.library().respond_on("fmi2DoStep", 3, Status::Discard);

    let mut inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    inst.simple_setup(0.0, 1.0).unwrap();
    inst.do_step(0.1, true).unwrap();
    inst.do_step(0.1, true).unwrap();
    let before = inst.time();

    assert_eq!(inst.do_step(0.1, true).unwrap(), Status::Discard);
    assert_eq!(inst.time(), before);
    assert_eq!(inst.phase(), Phase::StepMode);

    // A smaller retry succeeds
    assert_eq!(inst.do_step(0.05, true).unwrap(), Status::OK);
    assert_approx_eq!(inst.time(), 0.25);
}

#[test_log::test]
fn test_invalid_step_size() {
    let fmu = cs_fmu(CoSimulation::new("ball"), StubModel::new());
    let mut inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    inst.simple_setup(0.0, 1.0).unwrap();
    assert!(matches!(inst.do_step(0.0, true), Err(Error::Argument(_))));
    assert!(matches!(inst.do_step(f64::NAN, true), Err(Error::Argument(_))));
    assert_eq!(fmu.library().calls("fmi2DoStep"), 0);
}

#[test_log::test]
fn test_error_status_escalates() {
    let fmu = cs_fmu(CoSimulation::new("ball"), StubModel::new());
    fmu.library().respond_on("fmi2DoStep", 1, Status::Error);

    let mut inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    inst.simple_setup(0.0, 1.0).unwrap();
    assert_eq!(inst.do_step(0.1, true).unwrap(), Status::Error);
    assert_eq!(inst.phase(), Phase::Error);
    assert_eq!(inst.time(), 0.0);
    assert!(inst.do_step(0.1, true).is_err());

    // Terminate and free remain legal
    assert_eq!(inst.terminate().unwrap(), Status::OK);
    inst.free().unwrap();
}

#[test_log::test]
fn test_fatal_blocks_native_calls() {
    let fmu = cs_fmu(CoSimulation::new("ball"), StubModel::new());
    fmu.library().respond_on("fmi2DoStep", 1, Status::Fatal);

    let mut inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    inst.simple_setup(0.0, 1.0).unwrap();
    assert_eq!(inst.do_step(0.1, true).unwrap(), Status::Fatal);
    assert_eq!(inst.phase(), Phase::Fatal);

    let calls = fmu.library().total_calls();
    assert!(matches!(inst.terminate(), Err(Error::FatalInstance(_))));
    inst.free().unwrap();
    drop(inst);
    assert_eq!(fmu.library().total_calls(), calls);
}

#[test_log::test]
fn test_unknown_status() {
    let fmu = cs_fmu(CoSimulation::new("ball"), StubModel::new());
    fmu.library()
        .respond_on("fmi2EnterInitializationMode", 1, Status::Unknown(42));

    let mut inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    assert_eq!(inst.simple_setup(0.0, 1.0).unwrap(), Status::Unknown(42));
    assert_eq!(inst.phase(), Phase::Error);
    assert_eq!(fmu.library().calls("fmi2ExitInitializationMode"), 0);
}

#[test_log::test]
fn test_single_instance() {
    let cs = CoSimulation {
        capabilities: fmi_host::model_description::Capabilities {
            model_identifier: "ball".to_owned(),
            can_be_instantiated_only_once_per_process: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let fmu = cs_fmu(cs, StubModel::new());

    let first = fmu.instantiate_cs("inst1", false, false).unwrap();
    assert!(matches!(
        fmu.instantiate_cs("inst2", false, false),
        Err(Error::SingleInstanceViolation(_))
    ));
    assert_eq!(fmu.library().calls("fmi2Instantiate"), 1);

    drop(first);
    assert!(fmu.instantiate_cs("inst3", false, false).is_ok());
}

#[test_log::test]
fn test_single_instance_across_path_spellings() {
    let cs = CoSimulation {
        capabilities: fmi_host::model_description::Capabilities {
            model_identifier: "ball".to_owned(),
            can_be_instantiated_only_once_per_process: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let first = cs_fmu(cs.clone(), StubModel::new());
    let md = ModelDescriptor::new("ball", "{guid}", vec![real("h", 0, 1.0)])
        .unwrap()
        .with_co_simulation(cs);
    let second = Fmu::new(md, StubLibrary::new(StubModel::new()), "./ball.so", "/tmp")
        .unwrap()
        .with_registry(first.registry().clone());

    let _inst = first.instantiate_cs("inst1", false, false).unwrap();
    assert!(matches!(
        second.instantiate_cs("inst2", false, false),
        Err(Error::SingleInstanceViolation(_))
    ));
    assert_eq!(second.library().calls("fmi2Instantiate"), 0);
    assert_eq!(first.registry().instance_count(second.library_path()), 1);
}

#[test_log::test]
fn test_instantiation_failure() {
    let fmu = cs_fmu(CoSimulation::new("ball"), StubModel::new());
    fmu.library()
        .respond_on("fmi2Instantiate", 1, Status::Error);
    assert!(matches!(
        fmu.instantiate_cs("inst1", false, false),
        Err(Error::Instantiation(name)) if name == "inst1"
    ));
    assert_eq!(fmu.registry().instance_count(fmu.library_path()), 0);
}

#[test_log::test]
fn test_version_mismatch() {
    let md = ModelDescriptor::new("ball", "{guid}", vec![])
        .unwrap()
        .with_co_simulation(CoSimulation::new("ball"));
    let library = StubLibrary::new(StubModel::new().with_version("3.0"));
    assert!(matches!(
        Fmu::new(md, library, "ball.so", "/tmp"),
        Err(Error::Load(fmi_host::LoadError::FmiVersionMismatch { .. }))
    ));
}

#[test_log::test]
fn test_fmu_state_roundtrip() {
    let cs = CoSimulation {
        capabilities: fmi_host::model_description::Capabilities {
            model_identifier: "ball".to_owned(),
            can_get_and_set_fmu_state: true,
            can_serialize_fmu_state: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let fmu = cs_fmu(cs, StubModel::new().with_real(0, 1.0));
    let mut inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    inst.simple_setup(0.0, 1.0).unwrap();

    let h = fmu.model_description().model_variables.by_name("h").unwrap();
    let h = h.as_real_variable().unwrap();

    let saved = inst.get_fmu_state().unwrap().into_value().unwrap();
    h.write(&mut inst, 5.0).unwrap();
    assert_eq!(inst.set_fmu_state(saved).unwrap(), Status::OK);
    assert_eq!(h.read(&mut inst).unwrap().value(), Some(&1.0));

    let bytes = inst.serialize_fmu_state(saved).unwrap().into_value().unwrap();
    assert!(!bytes.is_empty());
    h.write(&mut inst, 7.0).unwrap();
    let restored = inst.deserialize_fmu_state(&bytes).unwrap().into_value().unwrap();
    inst.set_fmu_state(restored).unwrap();
    assert_eq!(h.read(&mut inst).unwrap().value(), Some(&1.0));

    assert_eq!(inst.free_fmu_state(saved).unwrap(), Status::OK);
    assert!(inst.set_fmu_state(saved).is_err());
}

#[test_log::test]
fn test_fmu_state_unsupported() {
    let fmu = cs_fmu(CoSimulation::new("ball"), StubModel::new());
    let mut inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    assert!(matches!(
        inst.get_fmu_state(),
        Err(Error::Unsupported { .. })
    ));
    assert_eq!(fmu.library().calls("fmi2GetFMUstate"), 0);
}

#[test_log::test]
fn test_update_fmu_state() {
    let cs = CoSimulation {
        capabilities: fmi_host::model_description::Capabilities {
            model_identifier: "ball".to_owned(),
            can_get_and_set_fmu_state: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let fmu = cs_fmu(cs, StubModel::new().with_real(0, 1.0));
    let mut inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    inst.simple_setup(0.0, 1.0).unwrap();
    let h = fmu.model_description().model_variables.by_name("h").unwrap();
    let h = h.as_real_variable().unwrap();

    let saved = inst.get_fmu_state().unwrap().into_value().unwrap();
    h.write(&mut inst, 5.0).unwrap();
    assert_eq!(inst.update_fmu_state(saved).unwrap(), Status::OK);
    assert_eq!(fmu.library().calls("fmi2GetFMUstate"), 2);

    h.write(&mut inst, 9.0).unwrap();
    inst.set_fmu_state(saved).unwrap();
    assert_eq!(h.read(&mut inst).unwrap().value(), Some(&5.0));
}

#[test_log::test]
fn test_set_debug_logging() {
    let fmu = cs_fmu(CoSimulation::new("ball"), StubModel::new());
    let mut inst = fmu.instantiate_cs("inst1", false, true).unwrap();

    assert_eq!(inst.set_debug_logging(true, &["logAll"]).unwrap(), Status::OK);
    assert_eq!(inst.set_debug_logging(false, &[]).unwrap(), Status::OK);
    assert!(matches!(
        inst.set_debug_logging(true, &["log\0All"]),
        Err(Error::Nul(_))
    ));
    assert_eq!(fmu.library().calls("fmi2SetDebugLogging"), 2);

    inst.free().unwrap();
    assert!(inst.set_debug_logging(true, &[]).is_err());
    assert_eq!(fmu.library().calls("fmi2SetDebugLogging"), 2);
}

#[test_log::test]
fn test_directional_derivative() {
    let cs = CoSimulation {
        capabilities: fmi_host::model_description::Capabilities {
            model_identifier: "ball".to_owned(),
            provides_directional_derivative: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let fmu = cs_fmu(cs, StubModel::new());
    let mut inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    inst.simple_setup(0.0, 1.0).unwrap();

    let mut dv_unknown = [0.0; 2];
    let status = inst
        .get_directional_derivative(&[0, 1], &[1], &[2.0], &mut dv_unknown)
        .unwrap();
    assert_eq!(status, Status::OK);
    assert_eq!(dv_unknown, [0.0, 2.0]);

    assert!(matches!(
        inst.get_directional_derivative(&[0, 1], &[1], &[], &mut dv_unknown),
        Err(Error::Argument(_))
    ));
    assert!(matches!(
        inst.get_directional_derivative(&[0], &[1], &[2.0], &mut dv_unknown),
        Err(Error::Argument(_))
    ));
    assert_eq!(fmu.library().calls("fmi2GetDirectionalDerivative"), 1);
}

#[test_log::test]
fn test_directional_derivative_unsupported() {
    let fmu = cs_fmu(CoSimulation::new("ball"), StubModel::new());
    let mut inst = fmu.instantiate_cs("inst1", false, false).unwrap();
    inst.simple_setup(0.0, 1.0).unwrap();

    let mut dv_unknown = [0.0];
    assert!(matches!(
        inst.get_directional_derivative(&[0], &[0], &[1.0], &mut dv_unknown),
        Err(Error::Unsupported {
            capability: "providesDirectionalDerivative"
        })
    ));
    assert_eq!(fmu.library().calls("fmi2GetDirectionalDerivative"), 0);
}

#[test_log::test]
fn test_me_sequence() {
    let md = ModelDescriptor::new("decay", "{guid}", vec![])
        .unwrap()
        .with_model_exchange(ModelExchange::new("decay"))
        .with_continuous_states(1);
    let library = StubLibrary::new(StubModel::new().with_states([1.0], |_, x, dx| dx[0] = -x[0]));
    let fmu = Fmu::new(md, library, "decay.so", "/tmp").unwrap();

    let mut inst = fmu.instantiate_me("inst1", false, false).unwrap();
    assert!(matches!(
        inst.enter_continuous_time_mode(),
        Err(Error::IllegalStateTransition { .. })
    ));

    inst.simple_setup(0.0, 1.0).unwrap();
    assert_eq!(inst.phase(), Phase::EventMode);

    let mut flags = EventFlags::default();
    inst.new_discrete_states(&mut flags).unwrap();
    assert!(!flags.discrete_states_need_update);
    inst.enter_continuous_time_mode().unwrap();

    let mut dx = [0.0];
    inst.get_derivatives(&mut dx).unwrap();
    assert_eq!(dx, [-1.0]);

    inst.set_time(0.5).unwrap();
    assert!(matches!(inst.set_time(0.25), Err(Error::Argument(_))));
    assert_eq!(inst.time(), 0.5);

    let (mut enter, mut terminate) = (true, true);
    inst.completed_integrator_step(true, &mut enter, &mut terminate)
        .unwrap();
    assert!(!enter && !terminate);

    assert!(matches!(
        inst.set_continuous_states(&[1.0, 2.0]),
        Err(Error::Argument(_))
    ));
    assert_eq!(fmu.library().calls("fmi2SetContinuousStates"), 0);
}
