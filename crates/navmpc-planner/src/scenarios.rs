//! Canonical Test Scenes
//!
//! Scenes used by the integration tests and the `navmpc-sim` binary:
//!
//! - **A** `free_space`: straight line, no obstacles
//! - **B** `static_block`: one static obstacle on the path
//! - **C** `crossing`: a moving obstacle on a collision course
//! - **D** `solver_timeout`: backend times out on every cycle
//! - `multi_robot`: two robots crossing paths, each avoiding the other
//!
//! [`Simulation`] closes the loop: simulated robots with odometry, a
//! reference sampled from each robot's path, and moving obstacles
//! advanced in simulation time.

use std::fmt;
use std::str::FromStr;

use navmpc_core::simulation::{MovingObstacle, SimConfig, SimulatedRobot};
use navmpc_core::{Control, ConvexPolygon, Pt2, State, Vec2};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{ConfigError, MpcConfig};
use crate::executor::{
    Actuator, CycleReport, ExecutorError, ExecutorState, HorizonExecutor, InputSender, InputUpdate,
};
use crate::obstacles::{DynamicObstacle, StaticObstacle};
use crate::problem::ProblemError;
use crate::reference::ReferencePath;
use crate::solver::{build_backend, ExitStatus, NmpcSolver, ScriptedSolver};

/// Scene selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    FreeSpace,
    StaticBlock,
    Crossing,
    SolverTimeout,
    MultiRobot,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 5] = [
        ScenarioKind::FreeSpace,
        ScenarioKind::StaticBlock,
        ScenarioKind::Crossing,
        ScenarioKind::SolverTimeout,
        ScenarioKind::MultiRobot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioKind::FreeSpace => "free-space",
            ScenarioKind::StaticBlock => "static-block",
            ScenarioKind::Crossing => "crossing",
            ScenarioKind::SolverTimeout => "solver-timeout",
            ScenarioKind::MultiRobot => "multi-robot",
        }
    }

    /// Build the scene around `config`
    pub fn build(self, config: &MpcConfig) -> Result<Scenario, ProblemError> {
        match self {
            ScenarioKind::FreeSpace => Scenario::free_space(config),
            ScenarioKind::StaticBlock => Scenario::static_block(config),
            ScenarioKind::Crossing => Scenario::crossing(config),
            ScenarioKind::SolverTimeout => Scenario::solver_timeout(config),
            ScenarioKind::MultiRobot => Scenario::multi_robot(config),
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.to_ascii_lowercase().replace('_', "-");
        match key.as_str() {
            "a" => Ok(ScenarioKind::FreeSpace),
            "b" => Ok(ScenarioKind::StaticBlock),
            "c" => Ok(ScenarioKind::Crossing),
            "d" => Ok(ScenarioKind::SolverTimeout),
            _ => ScenarioKind::ALL
                .into_iter()
                .find(|kind| kind.as_str() == key)
                .ok_or_else(|| format!("unknown scenario {s:?}")),
        }
    }
}

/// One robot in a scene
#[derive(Debug, Clone)]
pub struct RobotSetup {
    pub start: State,
    pub path: ReferencePath,
}

/// A complete scene
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: &'static str,
    pub config: MpcConfig,
    pub robots: Vec<RobotSetup>,
    pub static_obstacles: Vec<StaticObstacle>,
    /// Initial state of each moving obstacle
    pub moving_obstacles: Vec<MovingObstacle>,
    /// Backend replaced by one that always reports this status
    pub forced_status: Option<ExitStatus>,
    pub nominal_speed: f64,
    /// Distance to the last waypoint that counts as arrived [m]
    pub goal_tolerance: f64,
    /// Cycle budget for a full run
    pub max_cycles: usize,
    pub sim: SimConfig,
}

impl Scenario {
    fn single(name: &'static str, config: &MpcConfig, goal: Pt2) -> Result<Self, ProblemError> {
        let speed = 1.0;
        let path = ReferencePath::from_config(vec![Pt2::origin(), goal], speed, config)?;
        let length = path.total_length();
        Ok(Self {
            name,
            config: config.clone(),
            robots: vec![RobotSetup {
                start: State::default(),
                path,
            }],
            static_obstacles: Vec::new(),
            moving_obstacles: Vec::new(),
            forced_status: None,
            nominal_speed: speed,
            goal_tolerance: 0.3,
            max_cycles: cycle_budget(length, speed, config.horizon.ts),
            sim: SimConfig::default(),
        })
    }

    /// A: straight line along +x, nothing in the way
    pub fn free_space(config: &MpcConfig) -> Result<Self, ProblemError> {
        Self::single("free-space", config, Pt2::new(10.0, 0.0))
    }

    /// B: a block straddling the path, slightly off-centre so the way
    /// around is unambiguous
    pub fn static_block(config: &MpcConfig) -> Result<Self, ProblemError> {
        let mut scenario = Self::single("static-block", config, Pt2::new(12.0, 0.0))?;
        scenario.static_obstacles = vec![StaticObstacle::rectangle(
            Pt2::new(5.0, -0.4),
            Pt2::new(6.0, 0.6),
        )];
        Ok(scenario)
    }

    /// C: an obstacle moving across the path, arriving where the robot will be
    pub fn crossing(config: &MpcConfig) -> Result<Self, ProblemError> {
        let mut scenario = Self::single("crossing", config, Pt2::new(10.0, 0.0))?;
        scenario.moving_obstacles = vec![MovingObstacle::new(
            Pt2::new(5.0, -5.0),
            Vec2::new(0.0, 1.0),
            0.3,
        )];
        Ok(scenario)
    }

    /// D: A with a backend that never meets its deadline
    pub fn solver_timeout(config: &MpcConfig) -> Result<Self, ProblemError> {
        let mut scenario = Self::single("solver-timeout", config, Pt2::new(10.0, 0.0))?;
        scenario.forced_status = Some(ExitStatus::NotConvergedOutOfTime);
        scenario.max_cycles = config.failure.max_consecutive_failures + 2;
        Ok(scenario)
    }

    /// Two robots whose paths cross at (5, 0)
    pub fn multi_robot(config: &MpcConfig) -> Result<Self, ProblemError> {
        let mut scenario = Self::single("multi-robot", config, Pt2::new(10.0, 0.0))?;
        let start = State::new(5.0, -5.0, std::f64::consts::FRAC_PI_2);
        let path = ReferencePath::from_config(
            vec![start.position(), Pt2::new(5.0, 5.0)],
            scenario.nominal_speed,
            config,
        )?;
        scenario.robots.push(RobotSetup { start, path });
        Ok(scenario)
    }

    /// Backend for this scene
    pub fn backend(&self) -> Result<Box<dyn NmpcSolver>, ConfigError> {
        match self.forced_status {
            Some(status) => Ok(Box::new(ScriptedSolver::always(status))),
            None => build_backend(&self.config),
        }
    }

    /// Moving obstacles at simulation time `t`
    pub fn moving_at(&self, t: f64) -> Vec<MovingObstacle> {
        self.moving_obstacles
            .iter()
            .map(|m| MovingObstacle::new(m.position_at(t), m.velocity, m.radius))
            .collect()
    }
}

fn cycle_budget(length: f64, speed: f64, ts: f64) -> usize {
    // Twice the nominal travel time
    (2.0 * length / (speed * ts)).ceil() as usize
}

/// Actuator driving a [`SimulatedRobot`] for one sampling interval per command
pub struct SimActuator {
    robot: SimulatedRobot,
    ts: f64,
}

impl SimActuator {
    pub fn new(robot: SimulatedRobot, ts: f64) -> Self {
        Self { robot, ts }
    }

    pub fn robot(&self) -> &SimulatedRobot {
        &self.robot
    }

    pub fn robot_mut(&mut self) -> &mut SimulatedRobot {
        &mut self.robot
    }
}

impl Actuator for SimActuator {
    fn apply(&mut self, control: Control) {
        self.robot.apply(control, self.ts);
    }

    fn controller_unavailable(&mut self) {
        warn!(time = self.robot.time(), "controller unavailable; halting robot");
        self.robot.halt();
    }
}

/// One robot's line in the simulation log
#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
    pub robot: usize,
    /// Simulation time at the start of the cycle [s]
    pub time: f64,
    /// True pose after the cycle
    pub pose: State,
    /// Distance from the robot centre to the nearest obstacle boundary [m]
    pub clearance: f64,
    pub report: CycleReport,
}

/// Why a robot stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AgentStatus {
    Running,
    Arrived,
    Aborted,
}

pub struct SimulatedAgent {
    executor: HorizonExecutor<SimActuator>,
    sender: InputSender,
    path: ReferencePath,
    status: AgentStatus,
}

impl SimulatedAgent {
    pub fn executor(&self) -> &HorizonExecutor<SimActuator> {
        &self.executor
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    /// True pose
    pub fn pose(&self) -> State {
        self.executor.actuator().robot().state()
    }

    pub fn path(&self) -> &ReferencePath {
        &self.path
    }
}

/// Closed-loop run of a [`Scenario`]
pub struct Simulation {
    scenario: Scenario,
    agents: Vec<SimulatedAgent>,
    cycle: usize,
}

impl Simulation {
    pub fn new(scenario: Scenario) -> Result<Self, ExecutorError> {
        let ts = scenario.config.horizon.ts;
        let mut agents = Vec::with_capacity(scenario.robots.len());
        for (i, setup) in scenario.robots.iter().enumerate() {
            let mut sim = scenario.sim.clone();
            sim.seed = sim.seed.wrapping_add(i as u64);
            let actuator = SimActuator::new(SimulatedRobot::new(setup.start, sim), ts);
            let executor = HorizonExecutor::with_solver(&scenario.config, scenario.backend()?, actuator)?;
            agents.push(SimulatedAgent {
                sender: executor.input_sender(),
                executor,
                path: setup.path.clone(),
                status: AgentStatus::Running,
            });
        }
        info!(scenario = scenario.name, robots = agents.len(), "simulation ready");
        Ok(Self {
            scenario,
            agents,
            cycle: 0,
        })
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn agents(&self) -> &[SimulatedAgent] {
        &self.agents
    }

    pub fn cycle(&self) -> usize {
        self.cycle
    }

    /// Every robot has arrived or aborted
    pub fn is_done(&self) -> bool {
        self.agents.iter().all(|a| a.status != AgentStatus::Running)
    }

    /// One control cycle for every running robot
    pub fn step(&mut self) -> Vec<CycleRecord> {
        self.cycle += 1;
        let action_steps = self.scenario.config.horizon.action_steps;
        let robot_size = self.scenario.config.robot.vehicle_radius;

        // Everyone plans against the same snapshot of the others
        let snapshot: Vec<(State, Vec<State>)> = self
            .agents
            .iter()
            .map(|a| {
                let predicted = if a.status == AgentStatus::Aborted {
                    Vec::new()
                } else {
                    a.executor.last_prediction().iter().skip(1 + action_steps).copied().collect()
                };
                (a.pose(), predicted)
            })
            .collect();

        let mut records = Vec::new();
        for (i, agent) in self.agents.iter_mut().enumerate() {
            if agent.status != AgentStatus::Running {
                continue;
            }
            let time = agent.executor.actuator().robot().time();
            let odometry = agent.executor.actuator_mut().robot_mut().odometry();
            if agent.path.is_finished(&odometry.position(), self.scenario.goal_tolerance) {
                info!(robot = i, time, "goal reached");
                agent.status = AgentStatus::Arrived;
                continue;
            }

            let moving = self.scenario.moving_at(time);
            let mut dynamics: Vec<DynamicObstacle> = moving
                .iter()
                .map(|m| DynamicObstacle::new(m.position, m.velocity, m.radius))
                .collect();
            for (j, (pose, predicted)) in snapshot.iter().enumerate() {
                if j != i {
                    dynamics.push(DynamicObstacle::from_robot_prediction(*pose, predicted, robot_size));
                }
            }

            let update = InputUpdate {
                static_obstacles: Some(self.scenario.static_obstacles.clone()),
                dynamic_obstacles: Some(dynamics),
                reference: Some(agent.path.sample(&odometry.position())),
                odometry: Some(odometry),
            };
            if agent.sender.send(update).is_err() {
                warn!(robot = i, "executor input channel closed");
                continue;
            }

            match agent.executor.step() {
                Ok(report) => {
                    if agent.executor.state() == ExecutorState::Aborted {
                        agent.status = AgentStatus::Aborted;
                    }
                    let pose = agent.pose();
                    let others: Vec<Pt2> = snapshot
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != i)
                        .map(|(_, (s, _))| s.position())
                        .collect();
                    let clearance = clearance(
                        &pose.position(),
                        &self.scenario.static_obstacles,
                        &self.scenario.moving_at(agent.executor.actuator().robot().time()),
                        &others,
                        robot_size,
                    );
                    records.push(CycleRecord {
                        robot: i,
                        time,
                        pose,
                        clearance,
                        report,
                    });
                }
                Err(ExecutorError::Aborted) => agent.status = AgentStatus::Aborted,
                Err(err) => warn!(robot = i, error = %err, "cycle skipped"),
            }
        }
        records
    }

    /// Step until every robot stops or `max_cycles` is reached
    pub fn run(&mut self, max_cycles: usize) -> Vec<CycleRecord> {
        let mut records = Vec::new();
        while !self.is_done() && self.cycle < max_cycles {
            records.extend(self.step());
        }
        records
    }
}

/// Distance from `p` to the nearest obstacle boundary; negative inside
pub fn clearance(
    p: &Pt2,
    statics: &[StaticObstacle],
    moving: &[MovingObstacle],
    robots: &[Pt2],
    robot_radius: f64,
) -> f64 {
    let to_static = statics
        .iter()
        .filter_map(|s| ConvexPolygon::from_points(&s.vertices))
        .map(|poly| {
            if poly.contains(p) {
                let depth = poly.half_planes().iter().map(|h| h.depth(p)).fold(f64::INFINITY, f64::min);
                -depth
            } else {
                poly.distance(p)
            }
        });
    let to_moving = moving.iter().map(|m| (p - m.position).norm() - m.radius);
    let to_robots = robots.iter().map(|r| (p - r).norm() - robot_radius);
    to_static
        .chain(to_moving)
        .chain(to_robots)
        .fold(f64::INFINITY, f64::min)
}
