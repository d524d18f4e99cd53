//! Horizon Executor
//!
//! The receding-horizon loop. One call to [`HorizonExecutor::step`] is one
//! control cycle:
//!
//! ```text
//! Idle ──(odometry + reference)──▶ Planning ──Converged/Degraded──▶ Committing ─┐
//!                                     ▲  │                                       │
//!                                     │  └──bad exit / failure──▶ fallback ──────┤
//!                                     └──────────────────────────────────────────┘
//!                                        └──failure limit / input loss──▶ Aborted
//! ```
//!
//! Inputs posted through an [`InputSender`] are queued and applied, latest
//! value wins, at the start of the next planning phase; nothing changes
//! while a solve is in flight.

use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use navmpc_core::{Control, State, UnicycleModel};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, MpcConfig, RetryWarmStart};
use crate::cost::CostModel;
use crate::failure::{FailureDecision, FailurePolicy, FailureReason};
use crate::obstacles::{DynamicObstacle, EncodedObstacles, ObstacleEncoder, StaticObstacle};
use crate::problem::{ProblemBuilder, ProblemError, ReferenceTrajectory, WarmStart};
use crate::solver::{build_backend, AdapterFailure, ExitStatus, NmpcSolver, Solution, SolveOutcome, SolverAdapter};

/// Executor errors
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("controller aborted")]
    Aborted,
    #[error("not initialised: waiting for {0}")]
    NotInitialised(&'static str),
    #[error("executor is gone")]
    Disconnected,
}

/// Executor state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorState {
    /// Waiting for the first odometry and reference
    Idle,
    /// Building and solving the problem
    Planning,
    /// Applying the committed prefix
    Committing,
    /// Control authority released; terminal
    Aborted,
}

/// Low-level actuator interface
pub trait Actuator {
    /// Apply one control pair for one sampling interval
    fn apply(&mut self, control: Control);

    /// The controller has stopped producing commands
    fn controller_unavailable(&mut self);
}

/// Inputs for the next planning phase; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputUpdate {
    pub static_obstacles: Option<Vec<StaticObstacle>>,
    pub dynamic_obstacles: Option<Vec<DynamicObstacle>>,
    pub reference: Option<ReferenceTrajectory>,
    pub odometry: Option<State>,
}

/// Posts input updates to an executor from any thread
#[derive(Debug, Clone)]
pub struct InputSender {
    tx: Sender<InputUpdate>,
}

impl InputSender {
    pub fn send(&self, update: InputUpdate) -> Result<(), ExecutorError> {
        self.tx.send(update).map_err(|_| ExecutorError::Disconnected)
    }

    pub fn odometry(&self, state: State) -> Result<(), ExecutorError> {
        self.send(InputUpdate {
            odometry: Some(state),
            ..Default::default()
        })
    }

    pub fn obstacles(
        &self,
        statics: Vec<StaticObstacle>,
        dynamics: Vec<DynamicObstacle>,
    ) -> Result<(), ExecutorError> {
        self.send(InputUpdate {
            static_obstacles: Some(statics),
            dynamic_obstacles: Some(dynamics),
            ..Default::default()
        })
    }

    pub fn reference(&self, reference: ReferenceTrajectory) -> Result<(), ExecutorError> {
        self.send(InputUpdate {
            reference: Some(reference),
            ..Default::default()
        })
    }
}

/// Outcome of one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CycleStatus {
    Converged,
    /// Committed, but the solver did not converge
    Degraded(ExitStatus),
    /// Nothing committed; fallback applied
    Fallback(FailureReason),
    /// Nothing committed; controller unavailable
    Aborted(FailureReason),
}

impl CycleStatus {
    pub fn is_committed(&self) -> bool {
        matches!(self, CycleStatus::Converged | CycleStatus::Degraded(_))
    }
}

/// Telemetry for one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub status: CycleStatus,
    /// Controls sent to the actuator this cycle
    pub applied: Vec<Control>,
    /// State estimate after applying them
    pub state: State,
    /// Predicted states `s_0..=s_N` of the solution, when there was one
    pub predicted: Vec<State>,
    pub cost: Option<f64>,
    pub iterations: usize,
    pub solve_time_ms: f64,
    pub consecutive_failures: usize,
    pub static_obstacles: usize,
    pub dynamic_obstacles: usize,
}

/// Synchronous request for one control cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub state: State,
    #[serde(default)]
    pub static_obstacles: Vec<StaticObstacle>,
    #[serde(default)]
    pub dynamic_obstacles: Vec<DynamicObstacle>,
    pub reference: ReferenceTrajectory,
}

/// Response to a [`ControlRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    /// First control applied this cycle; `None` once aborted
    pub control: Option<Control>,
    pub status: CycleStatus,
    pub executor_state: ExecutorState,
}

/// Receding-horizon controller for one robot
pub struct HorizonExecutor<A: Actuator> {
    encoder: ObstacleEncoder,
    builder: ProblemBuilder,
    adapter: SolverAdapter,
    policy: FailurePolicy,
    cost: CostModel,
    model: UnicycleModel,
    warm_start: WarmStart,
    action_steps: usize,
    ts: f64,
    max_stale_cycles: usize,

    state: ExecutorState,
    robot: Option<State>,
    last_control: Control,
    reference: Option<ReferenceTrajectory>,
    statics: Vec<StaticObstacle>,
    dynamics: Vec<DynamicObstacle>,
    last_prediction: Vec<State>,
    // Cycles run since the input was last refreshed
    odometry_age: usize,
    reference_age: usize,
    fresh_odometry: bool,
    fresh_reference: bool,

    inbox: Receiver<InputUpdate>,
    inbox_tx: Sender<InputUpdate>,
    actuator: A,
    cycle: u64,
}

impl<A: Actuator> HorizonExecutor<A> {
    /// Executor with the backend named in the configuration
    pub fn new(config: &MpcConfig, actuator: A) -> Result<Self, ExecutorError> {
        config.validate()?;
        let backend = build_backend(config)?;
        Self::with_solver(config, backend, actuator)
    }

    /// Executor with an explicit backend
    pub fn with_solver(
        config: &MpcConfig,
        backend: Box<dyn NmpcSolver>,
        actuator: A,
    ) -> Result<Self, ExecutorError> {
        config.validate()?;
        let (inbox_tx, inbox) = channel::unbounded();
        let adapter = SolverAdapter::new(config, backend);
        info!(
            backend = adapter.backend_name(),
            build_id = %config.solver.build_id,
            n_hor = config.horizon.n_hor,
            ts = config.horizon.ts,
            deadline_ms = adapter.deadline().as_millis() as u64,
            "horizon executor ready"
        );

        Ok(Self {
            encoder: ObstacleEncoder::new(config),
            builder: ProblemBuilder::new(config),
            adapter,
            policy: FailurePolicy::new(config),
            cost: CostModel::new(config),
            model: UnicycleModel::new(config.horizon.ts),
            warm_start: WarmStart::new(),
            action_steps: config.horizon.action_steps,
            ts: config.horizon.ts,
            max_stale_cycles: config.failure.max_stale_cycles,
            state: ExecutorState::Idle,
            robot: None,
            last_control: Control::zero(),
            reference: None,
            statics: Vec::new(),
            dynamics: Vec::new(),
            last_prediction: Vec::new(),
            odometry_age: 0,
            reference_age: 0,
            fresh_odometry: false,
            fresh_reference: false,
            inbox,
            inbox_tx,
            actuator,
            cycle: 0,
        })
    }

    pub fn input_sender(&self) -> InputSender {
        InputSender {
            tx: self.inbox_tx.clone(),
        }
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// Current state estimate
    pub fn robot_state(&self) -> Option<State> {
        self.robot
    }

    pub fn last_control(&self) -> Control {
        self.last_control
    }

    /// Reference window as it will be used by the next cycle
    pub fn reference(&self) -> Option<&ReferenceTrajectory> {
        self.reference.as_ref()
    }

    /// States predicted by the last committed solution
    pub fn last_prediction(&self) -> &[State] {
        &self.last_prediction
    }

    pub fn consecutive_failures(&self) -> usize {
        self.policy.consecutive_failures()
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn actuator_mut(&mut self) -> &mut A {
        &mut self.actuator
    }

    /// Run one control cycle
    pub fn step(&mut self) -> Result<CycleReport, ExecutorError> {
        if self.state == ExecutorState::Aborted {
            return Err(ExecutorError::Aborted);
        }
        let started = Instant::now();
        self.drain_inbox();

        let Some(robot) = self.robot else {
            return Err(ExecutorError::NotInitialised("odometry"));
        };
        if self.reference.is_none() {
            return Err(ExecutorError::NotInitialised("reference"));
        }
        self.odometry_age = if std::mem::take(&mut self.fresh_odometry) { 0 } else { self.odometry_age + 1 };
        self.reference_age = if std::mem::take(&mut self.fresh_reference) { 0 } else { self.reference_age + 1 };

        self.state = ExecutorState::Planning;
        self.cycle += 1;
        let encoded = self.encoder.encode(&robot.position(), &self.statics, &self.dynamics);
        let mut report = match self.stale_input() {
            Some(reason) => self.fall_back(robot, reason),
            None => self.plan(robot, &encoded),
        };
        report.static_obstacles = encoded.active_static();
        report.dynamic_obstacles = encoded.active_dynamic();

        debug!(
            cycle = report.cycle,
            status = ?report.status,
            iterations = report.iterations,
            solve_time_ms = report.solve_time_ms,
            cost = report.cost,
            "cycle finished"
        );
        let elapsed = started.elapsed();
        if elapsed > Duration::from_secs_f64(self.ts) {
            warn!(
                cycle = report.cycle,
                elapsed_ms = millis(elapsed),
                ts = self.ts,
                "control cycle overran the sampling time"
            );
        }
        Ok(report)
    }

    /// Serve one request: post its inputs, run one cycle
    pub fn handle(&mut self, request: ControlRequest) -> Result<ControlResponse, ExecutorError> {
        self.apply_update(InputUpdate {
            static_obstacles: Some(request.static_obstacles),
            dynamic_obstacles: Some(request.dynamic_obstacles),
            reference: Some(request.reference),
            odometry: Some(request.state),
        });
        let report = self.step()?;
        Ok(ControlResponse {
            control: report.applied.first().copied(),
            status: report.status,
            executor_state: self.state,
        })
    }

    fn stale_input(&self) -> Option<FailureReason> {
        if self.odometry_age > self.max_stale_cycles {
            Some(FailureReason::StaleOdometry { cycles: self.odometry_age })
        } else if self.reference_age > self.max_stale_cycles {
            Some(FailureReason::StaleReference { cycles: self.reference_age })
        } else {
            None
        }
    }

    /// Build, solve and either commit or fall back
    fn plan(&mut self, robot: State, encoded: &EncodedObstacles) -> CycleReport {
        let built = match self.reference.as_ref() {
            Some(reference) => self
                .builder
                .build(&robot, &self.last_control, reference, encoded, &self.warm_start),
            None => Err(ProblemError::MissingReference),
        };
        let instance = match built {
            Ok(instance) => instance,
            Err(err) => return self.fall_back(robot, FailureReason::Problem(err.to_string())),
        };

        match self.adapter.solve(&instance) {
            SolveOutcome::Converged(solution) => self.commit(robot, &solution, &instance.parameters, None),
            SolveOutcome::Degraded(solution) => {
                warn!(status = %solution.exit_status, cycle = self.cycle, "degraded solve committed");
                let status = solution.exit_status;
                self.commit(robot, &solution, &instance.parameters, Some(status))
            }
            SolveOutcome::Rejected(solution) => {
                let mut report = self.fall_back(robot, FailureReason::BadExit(solution.exit_status));
                report.iterations = solution.iterations;
                report.solve_time_ms = millis(solution.solve_time);
                report
            }
            SolveOutcome::Failed(failure) => {
                let mut report = self.fall_back(robot, FailureReason::from(&failure));
                if let AdapterFailure::Timeout { waited } = failure {
                    report.solve_time_ms = millis(waited);
                }
                report
            }
        }
    }

    fn drain_inbox(&mut self) {
        while let Ok(update) = self.inbox.try_recv() {
            self.apply_update(update);
        }
    }

    fn apply_update(&mut self, update: InputUpdate) {
        if let Some(statics) = update.static_obstacles {
            self.statics = statics;
        }
        if let Some(dynamics) = update.dynamic_obstacles {
            self.dynamics = dynamics;
        }
        if let Some(reference) = update.reference {
            self.reference = Some(reference);
            self.fresh_reference = true;
        }
        if let Some(odometry) = update.odometry {
            self.robot = Some(odometry);
            self.fresh_odometry = true;
        }
    }

    fn commit(
        &mut self,
        robot: State,
        solution: &Solution,
        parameters: &[f64],
        degraded: Option<ExitStatus>,
    ) -> CycleReport {
        self.state = ExecutorState::Committing;
        self.policy.on_success();

        let controls = solution.controls();
        let applied: Vec<Control> = controls.iter().take(self.action_steps).copied().collect();
        let mut estimate = robot;
        for control in &applied {
            self.actuator.apply(*control);
            estimate = self.model.step(&estimate, control);
        }
        if let Some(last) = applied.last() {
            self.last_control = *last;
        }
        self.robot = Some(estimate);
        self.warm_start.record(&controls, self.action_steps);
        if let Some(reference) = self.reference.as_mut() {
            reference.advance(self.action_steps);
        }
        self.last_prediction = self.cost.rollout(parameters, &solution.u);

        self.state = ExecutorState::Planning;
        CycleReport {
            cycle: self.cycle,
            status: match degraded {
                Some(status) => CycleStatus::Degraded(status),
                None => CycleStatus::Converged,
            },
            applied,
            state: estimate,
            predicted: self.last_prediction.clone(),
            cost: Some(solution.cost),
            iterations: solution.iterations,
            solve_time_ms: millis(solution.solve_time),
            consecutive_failures: 0,
            static_obstacles: 0,
            dynamic_obstacles: 0,
        }
    }

    fn fall_back(&mut self, robot: State, reason: FailureReason) -> CycleReport {
        let decision = self.policy.on_failure(&self.last_control, &reason);
        let mut report = CycleReport {
            cycle: self.cycle,
            status: CycleStatus::Fallback(reason.clone()),
            applied: Vec::new(),
            state: robot,
            predicted: Vec::new(),
            cost: None,
            iterations: 0,
            solve_time_ms: 0.0,
            consecutive_failures: self.policy.consecutive_failures(),
            static_obstacles: 0,
            dynamic_obstacles: 0,
        };

        match decision {
            FailureDecision::Fallback { control, .. } => {
                self.actuator.apply(control);
                let estimate = self.model.step(&robot, &control);
                self.robot = Some(estimate);
                self.last_control = control;
                if self.policy.retry_warm_start() == RetryWarmStart::Fresh {
                    self.warm_start.clear();
                }
                self.state = ExecutorState::Planning;
                report.applied.push(control);
                report.state = estimate;
            }
            FailureDecision::Abort { .. } => {
                self.actuator.controller_unavailable();
                self.state = ExecutorState::Aborted;
                report.status = CycleStatus::Aborted(reason);
            }
        }
        report
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1e3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{ScriptedReply, ScriptedSolver};
    use navmpc_core::Pt2;

    #[derive(Debug, Default)]
    struct Recorder {
        applied: Vec<Control>,
        unavailable: bool,
    }

    impl Actuator for Recorder {
        fn apply(&mut self, control: Control) {
            self.applied.push(control);
        }

        fn controller_unavailable(&mut self) {
            self.unavailable = true;
        }
    }

    fn config() -> MpcConfig {
        let mut config = MpcConfig::default();
        config.horizon.n_hor = 4;
        config.horizon.action_steps = 2;
        config.obstacles.n_stcobs = 1;
        config.obstacles.n_dynobs = 1;
        config.solver.timeout_ms = 100;
        config
    }

    fn executor(script: Vec<ScriptedReply>, default: ScriptedReply) -> HorizonExecutor<Recorder> {
        let config = config();
        let backend = ScriptedSolver::new(script, default);
        HorizonExecutor::with_solver(&config, Box::new(backend), Recorder::default()).unwrap()
    }

    fn initialise(exec: &HorizonExecutor<Recorder>) {
        let sender = exec.input_sender();
        let start = State::default();
        sender.odometry(start).unwrap();
        sender
            .reference(ReferenceTrajectory::straight_line(&start, 1.0, 0.2, 4))
            .unwrap();
    }

    #[test]
    fn test_idle_until_inputs_arrive() {
        let mut exec = executor(vec![], ScriptedReply::Status(ExitStatus::Converged));
        assert_eq!(exec.state(), ExecutorState::Idle);
        assert!(matches!(exec.step(), Err(ExecutorError::NotInitialised("odometry"))));
        exec.input_sender().odometry(State::default()).unwrap();
        assert!(matches!(exec.step(), Err(ExecutorError::NotInitialised("reference"))));
        assert_eq!(exec.state(), ExecutorState::Idle);
    }

    #[test]
    fn test_commit_applies_action_steps_and_advances_reference() {
        let u = vec![0.5, 0.0, 0.6, 0.0, 0.7, 0.0, 0.8, 0.0];
        let mut exec = executor(vec![ScriptedReply::Controls(u)], ScriptedReply::Status(ExitStatus::Converged));
        initialise(&exec);

        let report = exec.step().unwrap();
        assert_eq!(report.status, CycleStatus::Converged);
        assert_eq!(report.applied, vec![Control::new(0.5, 0.0), Control::new(0.6, 0.0)]);
        assert_eq!(exec.actuator().applied.len(), 2);
        assert_eq!(report.predicted.len(), 5);
        assert!((report.state.x - 0.2 * (0.5 + 0.6)).abs() < 1e-12);
        assert_eq!(exec.last_control(), Control::new(0.6, 0.0));
        assert_eq!(exec.state(), ExecutorState::Planning);

        let reference = exec.reference().unwrap();
        assert!((reference.points[0].x - 0.6).abs() < 1e-12);
        assert!((reference.points[3].x - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_degraded_is_committed_and_flagged() {
        let mut exec = executor(
            vec![ScriptedReply::Status(ExitStatus::NotConvergedIterations)],
            ScriptedReply::Status(ExitStatus::Converged),
        );
        initialise(&exec);
        let report = exec.step().unwrap();
        assert_eq!(report.status, CycleStatus::Degraded(ExitStatus::NotConvergedIterations));
        assert!(report.status.is_committed());
        assert_eq!(report.applied.len(), 2);
    }

    #[test]
    fn test_bad_exit_is_never_committed() {
        let u = vec![1.5, 0.5, 1.5, 0.5, 1.5, 0.5, 1.5, 0.5];
        let mut exec = executor(
            vec![ScriptedReply::Controls(u)],
            ScriptedReply::Status(ExitStatus::NotConvergedCost),
        );
        initialise(&exec);
        exec.step().unwrap();
        let reference_before = exec.reference().cloned();
        let committed = exec.last_control();

        let report = exec.step().unwrap();
        assert_eq!(report.status, CycleStatus::Fallback(FailureReason::BadExit(ExitStatus::NotConvergedCost)));
        assert_eq!(report.applied.len(), 1);
        assert!(report.applied[0].v < committed.v);
        assert_eq!(exec.reference().cloned(), reference_before);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut exec = executor(
            vec![
                ScriptedReply::Status(ExitStatus::NotConvergedOutOfTime),
                ScriptedReply::Status(ExitStatus::NotConvergedOutOfTime),
                ScriptedReply::Status(ExitStatus::Converged),
                ScriptedReply::Status(ExitStatus::NotConvergedOutOfTime),
                ScriptedReply::Status(ExitStatus::NotConvergedOutOfTime),
            ],
            ScriptedReply::Status(ExitStatus::Converged),
        );
        initialise(&exec);
        for _ in 0..5 {
            exec.step().unwrap();
        }
        assert_eq!(exec.consecutive_failures(), 2);
        assert_eq!(exec.state(), ExecutorState::Planning);
    }

    #[test]
    fn test_abort_signals_actuator_and_is_terminal() {
        let mut exec = executor(vec![], ScriptedReply::Error("no solver".into()));
        initialise(&exec);
        assert!(matches!(exec.step().unwrap().status, CycleStatus::Fallback(_)));
        assert!(matches!(exec.step().unwrap().status, CycleStatus::Fallback(_)));
        let report = exec.step().unwrap();
        assert!(matches!(report.status, CycleStatus::Aborted(FailureReason::Backend(_))));
        assert!(report.applied.is_empty());
        assert!(exec.actuator().unavailable);
        assert_eq!(exec.state(), ExecutorState::Aborted);
        assert!(matches!(exec.step(), Err(ExecutorError::Aborted)));
    }

    #[test]
    fn test_latest_update_wins() {
        let mut exec = executor(vec![], ScriptedReply::Status(ExitStatus::Converged));
        let sender = exec.input_sender();
        sender.odometry(State::new(5.0, 0.0, 0.0)).unwrap();
        sender.odometry(State::new(1.0, 2.0, 0.0)).unwrap();
        sender
            .reference(ReferenceTrajectory::straight_line(&State::new(1.0, 2.0, 0.0), 1.0, 0.2, 4))
            .unwrap();
        let report = exec.step().unwrap();
        assert!((report.predicted[0].x - 1.0).abs() < 1e-12);
        assert!((report.predicted[0].y - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_handle_request() {
        let mut exec = executor(vec![], ScriptedReply::Status(ExitStatus::Converged));
        let start = State::default();
        let request = ControlRequest {
            state: start,
            static_obstacles: vec![],
            dynamic_obstacles: vec![],
            reference: ReferenceTrajectory::straight_line(&start, 1.0, 0.2, 4),
        };
        let response = exec.handle(request).unwrap();
        assert_eq!(response.status, CycleStatus::Converged);
        assert_eq!(response.executor_state, ExecutorState::Planning);
        // Cold start guess echoes the reference speed
        assert_eq!(response.control, Some(Control::new(1.0, 0.0)));
    }

    #[test]
    fn test_wrong_length_solution_is_never_committed() {
        let mut exec = executor(vec![ScriptedReply::Controls(vec![0.5, 0.0])], ScriptedReply::Controls(vec![]));
        initialise(&exec);

        for cycle in 1..=2 {
            let report = exec.step().unwrap();
            assert!(
                matches!(report.status, CycleStatus::Fallback(FailureReason::Backend(_))),
                "{:?}",
                report.status
            );
            assert_eq!(report.applied, vec![Control::zero()]);
            assert_eq!(report.consecutive_failures, cycle);
        }
        let report = exec.step().unwrap();
        assert!(matches!(report.status, CycleStatus::Aborted(FailureReason::Backend(_))));
        assert_eq!(exec.actuator().applied, vec![Control::zero(); 2]);
        assert!(exec.actuator().unavailable);
        assert_eq!(exec.state(), ExecutorState::Aborted);
    }

    #[test]
    fn test_stale_odometry_aborts() {
        let mut exec = executor(vec![], ScriptedReply::Status(ExitStatus::Converged));
        initialise(&exec);
        let limit = config().failure.max_stale_cycles;

        for _ in 0..=limit {
            assert_eq!(exec.step().unwrap().status, CycleStatus::Converged);
        }
        let report = exec.step().unwrap();
        assert_eq!(
            report.status,
            CycleStatus::Aborted(FailureReason::StaleOdometry { cycles: limit + 1 })
        );
        assert!(report.applied.is_empty());
        assert!(exec.actuator().unavailable);
        assert_eq!(exec.state(), ExecutorState::Aborted);
    }

    #[test]
    fn test_stale_reference_aborts() {
        let mut exec = executor(vec![], ScriptedReply::Status(ExitStatus::Converged));
        initialise(&exec);
        let sender = exec.input_sender();
        let limit = config().failure.max_stale_cycles;

        for _ in 0..=limit {
            assert_eq!(exec.step().unwrap().status, CycleStatus::Converged);
            sender.odometry(exec.robot_state().unwrap()).unwrap();
        }
        let report = exec.step().unwrap();
        assert_eq!(
            report.status,
            CycleStatus::Aborted(FailureReason::StaleReference { cycles: limit + 1 })
        );
        assert!(exec.actuator().unavailable);
    }

    #[test]
    fn test_refreshed_inputs_keep_running() {
        let mut exec = executor(vec![], ScriptedReply::Status(ExitStatus::Converged));
        let sender = exec.input_sender();
        for _ in 0..3 * config().failure.max_stale_cycles {
            let state = exec.robot_state().unwrap_or_default();
            sender.odometry(state).unwrap();
            sender
                .reference(ReferenceTrajectory::straight_line(&state, 1.0, 0.2, 4))
                .unwrap();
            assert_eq!(exec.step().unwrap().status, CycleStatus::Converged);
        }
        assert_eq!(exec.state(), ExecutorState::Planning);
        assert!(!exec.actuator().unavailable);
    }

    #[test]
    fn test_timeout_reports_time_waited() {
        let mut exec = executor(
            vec![ScriptedReply::Delayed(ExitStatus::Converged, Duration::from_millis(300))],
            ScriptedReply::Status(ExitStatus::Converged),
        );
        initialise(&exec);
        let report = exec.step().unwrap();
        assert_eq!(report.status, CycleStatus::Fallback(FailureReason::Timeout));
        assert!(report.solve_time_ms >= 100.0, "{}", report.solve_time_ms);
    }

    #[test]
    fn test_unbuildable_problem_still_reports_the_cycle() {
        let mut exec = executor(vec![], ScriptedReply::Status(ExitStatus::Converged));
        let sender = exec.input_sender();
        sender.odometry(State::default()).unwrap();
        sender.reference(ReferenceTrajectory::new(vec![])).unwrap();
        sender
            .obstacles(
                vec![StaticObstacle::rectangle(Pt2::new(2.0, -0.5), Pt2::new(3.0, 0.5))],
                vec![],
            )
            .unwrap();

        let report = exec.step().unwrap();
        assert!(matches!(report.status, CycleStatus::Fallback(FailureReason::Problem(_))));
        assert_eq!(report.cycle, 1);
        assert_eq!(report.static_obstacles, 1);
        assert_eq!(report.applied, vec![Control::zero()]);
    }

    #[test]
    fn test_invalid_config_prevents_construction() {
        let mut config = config();
        config.horizon.action_steps = 10;
        let backend = ScriptedSolver::always(ExitStatus::Converged);
        let result = HorizonExecutor::with_solver(&config, Box::new(backend), Recorder::default());
        assert!(matches!(result, Err(ExecutorError::Config(_))));
    }
}
