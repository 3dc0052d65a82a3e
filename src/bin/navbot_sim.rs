use anyhow::Result;
use clap::Parser;
use navbot::{
    configuration::{AppConfig, MissionStep, SimulationConfig},
    hardware::{Millis, Platform},
    logging,
    observer::JsonLinesObserver,
    pilot::Pilot,
    simulation::SimulatedRobot,
};
use std::{fs::File, io::BufWriter, path::PathBuf, time::Duration};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::*;

/// Simulated steps between yields to the runtime when not pacing
const YIELD_EVERY: u32 = 50;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Runs the configured mission against a simulated differential drive robot"
)]
struct Args {
    /// path to config
    #[arg(long)]
    config: Option<PathBuf>,

    /// write pilot events as JSON lines to this file
    #[arg(long)]
    graph: Option<PathBuf>,

    /// pace service calls at wall clock speed
    #[arg(long)]
    realtime: bool,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbosity: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_tracing(args.verbosity);

    let app_config = AppConfig::load_config(&args.config)?;
    let simulation = app_config.simulation.clone();
    if simulation.step == 0 {
        anyhow::bail!("simulation step must be positive");
    }

    let robot = SimulatedRobot::new(&app_config.robot.geometry, 0)
        .with_wheel_response(simulation.wheel_response);
    let mut pilot = Pilot::new(robot, &app_config.robot)?;

    if let Some(path) = &args.graph {
        info!("Writing pilot events to {:?}", path);
        let file = BufWriter::new(File::create(path)?);
        pilot.set_observer(Box::new(JsonLinesObserver::new(file)));
    }

    if simulation.mission.is_empty() {
        warn!("Mission is empty, nothing to do");
    }

    let mut ticker = interval(Duration::from_millis(simulation.step as u64));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    for (index, step) in simulation.mission.iter().enumerate() {
        info!("Step {}: {:?} from {}", index, step, pilot.pose());
        command(&mut pilot, *step);

        let finished = tokio::select! {
            finished = run_step(&mut pilot, &simulation, args.realtime, &mut ticker) => Some(finished),
            _ = tokio::signal::ctrl_c() => None,
        };
        match finished {
            Some(true) => info!("Step {} done at {}", index, pilot.pose()),
            Some(false) => warn!(
                "Step {} timed out after {} ms at {}",
                index,
                simulation.step_timeout,
                pilot.pose()
            ),
            None => {
                warn!("Interrupted, stopping");
                pilot.stop();
                break;
            }
        }
    }

    info!(
        "Mission finished at {}, rotated {:.1} degrees, {} encoder errors",
        pilot.pose(),
        pilot.platform().rotation(),
        pilot.encoder_errors()
    );
    // dropping the observer flushes the graph file
    drop(pilot.take_observer());
    Ok(())
}

fn command<P: Platform>(pilot: &mut Pilot<P>, step: MissionStep) {
    match step {
        MissionStep::MoveBy(distance) => pilot.move_by(distance),
        MissionStep::MoveTo(position) => pilot.move_to(position),
        MissionStep::TurnBy(degrees) => pilot.turn_by(degrees),
        MissionStep::TurnTo(heading) => pilot.turn_to(heading),
        MissionStep::SpinBy(degrees) => pilot.spin_by(degrees),
        MissionStep::Stop => pilot.stop(),
    }
}

/// Services the pilot until its command is done or the step times out.
async fn run_step(
    pilot: &mut Pilot<SimulatedRobot>,
    simulation: &SimulationConfig,
    realtime: bool,
    ticker: &mut Interval,
) -> bool {
    let mut elapsed: Millis = 0;
    let mut steps: u32 = 0;
    while elapsed < simulation.step_timeout {
        if realtime {
            ticker.tick().await;
        } else if steps % YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }
        pilot.platform_mut().advance(simulation.step);
        pilot.service();
        if pilot.is_done() {
            return true;
        }
        elapsed = elapsed.saturating_add(simulation.step);
        steps = steps.wrapping_add(1);
    }
    false
}
