//! Closed-loop simulation of one of the canonical scenes.
//!
//! Prints one JSON object per robot per cycle on stdout; logs go to stderr.

use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use navmpc_planner::scenarios::{AgentStatus, ScenarioKind, Simulation};
use navmpc_planner::MpcConfig;

/// Receding-horizon NMPC simulator
#[derive(Parser, Debug)]
#[command(name = "navmpc-sim", about = "Run a navmpc scenario in closed loop and print per-cycle telemetry.")]
struct Cli {
    /// Path to a TOML config file (overrides defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scenario: a|free-space, b|static-block, c|crossing, d|solver-timeout, multi-robot
    #[arg(short, long, default_value = "free-space")]
    scenario: ScenarioKind,

    /// Cycle limit (defaults to the scenario's budget)
    #[arg(long)]
    cycles: Option<usize>,

    /// Odometry position noise standard deviation [m]
    #[arg(long, default_value_t = 0.0)]
    noise: f64,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => MpcConfig::load(path)?,
        None => MpcConfig::default(),
    };
    config.validate()?;

    let mut scenario = cli.scenario.build(&config)?;
    scenario.sim.position_noise_std = cli.noise;
    let max_cycles = cli.cycles.unwrap_or(scenario.max_cycles);
    info!(scenario = %cli.scenario, max_cycles, "starting simulation");

    let mut sim = Simulation::new(scenario)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    while !sim.is_done() && sim.cycle() < max_cycles {
        for record in sim.step() {
            serde_json::to_writer(&mut out, &record)?;
            writeln!(out)?;
        }
    }
    out.flush()?;

    for (i, agent) in sim.agents().iter().enumerate() {
        let pose = agent.pose();
        info!(
            robot = i,
            status = ?agent.status(),
            x = pose.x,
            y = pose.y,
            cycles = sim.cycle(),
            "robot finished"
        );
    }
    if sim.agents().iter().any(|a| a.status() == AgentStatus::Aborted) {
        return Err("a controller aborted".into());
    }
    Ok(())
}
