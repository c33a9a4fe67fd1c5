//! Execution drivers that run an instance from initialization to the stop time.
//!
//! [`CoSimulationDriver`] advances by communication steps and leaves integration to the FMU.
//! [`ModelExchangeDriver`] integrates the continuous states with a pluggable [`solver::Solver`]
//! and handles time, state and step events. Both are run by [`simulate`].

use crate::{
    component::Component, native::NativeApi, params::SimParams, Error, InstanceTag,
    InterfaceType, Status,
};

mod co_simulation;
mod model_exchange;
pub mod solver;

pub use co_simulation::CoSimulationDriver;
pub use model_exchange::ModelExchangeDriver;

#[derive(Debug, Clone, PartialEq)]
pub struct SimStats {
    /// End time of the simulation
    pub end_time: f64,
    /// Number of output steps taken
    pub num_steps: usize,
    /// Number of events handled
    pub num_events: usize,
    /// Status of the last completed step
    pub last_status: Status,
}

/// Result of advancing a driver to the next output point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Advance {
    pub status: Status,
    /// Number of events handled on the way
    pub events: usize,
    /// The FMU requested the end of the simulation.
    pub terminate: bool,
}

/// The operations [`simulate`] needs from a driver.
pub trait Driver {
    fn interface_type(&self) -> InterfaceType;

    /// Current simulation time
    fn time(&self) -> f64;

    /// Setup the experiment and run through initialization. Any status other than `OK` or
    /// `Warning` fails with [`Error::Status`].
    fn initialize(&mut self, params: &SimParams) -> Result<Status, Error>;

    /// Advance to `target`. Native `Error` and `Fatal` statuses fail with [`Error::Status`]
    /// without further native calls.
    fn advance(&mut self, target: f64) -> Result<Advance, Error>;

    fn terminate(&mut self) -> Result<Status, Error>;

    /// Release the native instance.
    fn free(&mut self) -> Result<(), Error>;
}

/// Pass `OK` and `Warning`, escalate everything else as [`Error::Status`].
pub(crate) fn require(status: Status) -> Result<Status, Error> {
    if status.is_success() {
        Ok(status)
    } else {
        Err(Error::Status(status))
    }
}

/// The initialization sequence shared by both drivers.
pub(crate) fn initialize<L: NativeApi, Tag: InstanceTag>(
    component: &mut Component<'_, L, Tag>,
    params: &SimParams,
) -> Result<Status, Error> {
    let setup = require(component.setup_experiment(
        params.tolerance,
        params.start_time,
        Some(params.stop_time),
    )?)?;
    let enter = require(component.enter_initialization_mode()?)?;
    let exit = require(component.exit_initialization_mode()?)?;
    Ok(Status::worst_of([setup, enter, exit]))
}

/// Run `driver` from `params.start_time` to `params.stop_time` with output points every
/// `params.step_size`, then terminate.
///
/// An `Error` or `Fatal` status aborts the loop immediately with [`Error::SimulationAborted`],
/// carrying the last valid simulation time, after a best-effort terminate and free. On success the
/// instance stays alive so final values can still be read.
pub fn simulate(driver: &mut impl Driver, params: &SimParams) -> Result<SimStats, Error> {
    log::debug!(
        "Simulating {} from {} to {} with step size {}",
        driver.interface_type(),
        params.start_time,
        params.stop_time,
        params.step_size
    );

    let mut stats = SimStats {
        end_time: params.start_time,
        num_steps: 0,
        num_events: 0,
        last_status: Status::OK,
    };

    match main_loop(driver, params, &mut stats) {
        Ok(()) => {
            stats.end_time = driver.time();
            log::debug!("Simulation finished: {stats:?}");
            Ok(stats)
        }
        Err(err) => {
            let time = driver.time();
            log::error!("Simulation aborted at t = {time}: {err}");
            if let Err(terminate_err) = driver.terminate() {
                log::warn!("Terminate after abort failed: {terminate_err}");
            }
            if let Err(free_err) = driver.free() {
                log::warn!("Free after abort failed: {free_err}");
            }
            match err {
                Error::Status(status) => Err(Error::SimulationAborted { time, status }),
                other => Err(other),
            }
        }
    }
}

fn main_loop(
    driver: &mut impl Driver,
    params: &SimParams,
    stats: &mut SimStats,
) -> Result<(), Error> {
    stats.last_status = driver.initialize(params)?;

    // Absorbs rounding in `start_time + n * step_size`.
    let stop_time = params.stop_time - params.step_size * 1e-9;

    loop {
        let time = params.start_time + stats.num_steps as f64 * params.step_size;
        if time >= stop_time {
            break;
        }

        let next_communication_point = (params.start_time
            + (stats.num_steps + 1) as f64 * params.step_size)
            .min(params.stop_time);

        let advance = driver.advance(next_communication_point)?;
        stats.num_steps += 1;
        stats.num_events += advance.events;
        stats.last_status = advance.status;

        if advance.terminate {
            log::info!("Termination requested by FMU at t = {}", driver.time());
            break;
        }
    }

    require(driver.terminate()?)?;
    Ok(())
}
