//! Closed-loop scenario tests
//!
//! Scenes A to D from `navmpc_planner::scenarios`, run against the PANOC
//! backend (or the scripted one for D) with simulated robots.

use navmpc_core::{Control, Pt2, State};
use navmpc_planner::executor::{Actuator, CycleStatus, ExecutorError, ExecutorState, HorizonExecutor};
use navmpc_planner::failure::FailureReason;
use navmpc_planner::obstacles::{DynamicObstacle, ObstacleEncoder};
use navmpc_planner::scenarios::{AgentStatus, CycleRecord, Scenario, Simulation};
use navmpc_planner::solver::ExitStatus;
use navmpc_planner::MpcConfig;

fn run(scenario: Scenario) -> (Simulation, Vec<CycleRecord>) {
    let budget = scenario.max_cycles;
    let mut sim = Simulation::new(scenario).unwrap();
    let records = sim.run(budget);
    (sim, records)
}

/// Scene A: free space
mod free_space {
    use super::*;

    #[test]
    fn test_accelerates_smoothly_and_arrives() {
        let config = MpcConfig::default();
        let (sim, records) = run(Scenario::free_space(&config).unwrap());

        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.report.status.is_committed()));

        let speeds: Vec<f64> = records.iter().map(|r| r.report.applied[0].v).collect();
        assert!(speeds[0] > 0.0);
        assert!(speeds.iter().all(|v| *v <= config.robot.lin_vel_max + 1e-9));
        // Acceleration phase: no speed reversals beyond solver noise
        for pair in speeds[..5].windows(2) {
            assert!(pair[1] >= pair[0] - 0.05, "speed dropped during acceleration: {speeds:?}");
        }

        // Warm-started cycles settle on the reference speed
        for v in &speeds[10..20] {
            assert!((v - 1.0).abs() < 0.3, "speed did not settle: {speeds:?}");
        }

        let pose = sim.agents()[0].pose();
        assert!(
            sim.agents()[0].status() == AgentStatus::Arrived || pose.x > 9.0,
            "robot stopped at {pose:?}"
        );
        assert!(records.iter().all(|r| r.pose.y.abs() < 0.2));
    }
}

/// Scene B: static obstacle on the path
mod static_block {
    use super::*;

    #[test]
    fn test_detours_around_block_and_rejoins() {
        let config = MpcConfig::default();
        let (_sim, records) = run(Scenario::static_block(&config).unwrap());

        assert!(records.iter().all(|r| r.clearance > 0.0), "robot entered the obstacle");

        let passing: Vec<&CycleRecord> = records
            .iter()
            .filter(|r| r.pose.x > 5.0 && r.pose.x < 6.0)
            .collect();
        assert!(!passing.is_empty(), "robot never reached the obstacle");
        let deviation = passing.iter().map(|r| r.pose.y.abs()).fold(0.0, f64::max);
        assert!(deviation > 0.4, "lateral deviation {deviation} too small");

        let last = records.last().unwrap();
        assert!(last.pose.x > 7.0);
        assert!(last.pose.y.abs() < 0.5, "did not rejoin the reference: {:?}", last.pose);
    }
}

/// Scene C: moving obstacle on a collision course
mod crossing {
    use super::*;

    #[test]
    fn test_encoded_prediction_is_constant_velocity() {
        let config = MpcConfig::default();
        let scenario = Scenario::crossing(&config).unwrap();
        let mover = scenario.moving_obstacles[0];
        let obstacle = DynamicObstacle::new(mover.position, mover.velocity, mover.radius);

        let encoder = ObstacleEncoder::new(&config);
        let encoded = encoder.encode(&Pt2::origin(), &[], &[obstacle]);
        let ts = config.horizon.ts;
        for k in 1..=config.horizon.n_hor {
            let row = &encoded.dynamic_params[(k - 1) * 6..k * 6];
            let expected = mover.position + mover.velocity * (k as f64 * ts);
            assert!((row[0] - expected.x).abs() < 1e-12);
            assert!((row[1] - expected.y).abs() < 1e-12);
            assert_eq!(row[5], 1.0);
        }
    }

    #[test]
    fn test_velocity_from_consecutive_detections() {
        let config = MpcConfig::default();
        let ts = config.horizon.ts;
        let obstacle = DynamicObstacle::from_consecutive_positions(
            Pt2::new(5.0, -5.0),
            Pt2::new(5.0, -5.0 + ts),
            ts,
            0.3,
        );
        assert!((obstacle.velocity.y - 1.0).abs() < 1e-12);
        assert!(obstacle.velocity.x.abs() < 1e-12);
    }

    #[test]
    fn test_no_collision_with_moving_obstacle() {
        let config = MpcConfig::default();
        let (_sim, records) = run(Scenario::crossing(&config).unwrap());
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.clearance > 0.0), "robot hit the moving obstacle");
    }
}

/// Scene D: the solver never makes its deadline
mod solver_timeout {
    use super::*;

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

    #[test]
    fn test_only_fallbacks_then_abort_at_threshold() {
        let config = MpcConfig::default();
        let scenario = Scenario::solver_timeout(&config).unwrap();
        let mut exec = HorizonExecutor::with_solver(&config, scenario.backend().unwrap(), Recorder::default()).unwrap();

        let sender = exec.input_sender();
        let start = State::default();
        sender.odometry(start).unwrap();
        sender.reference(scenario.robots[0].path.sample(&start.position())).unwrap();

        let max = config.failure.max_consecutive_failures;
        let mut reference = None;
        for cycle in 1..=max {
            let report = exec.step().unwrap();
            let expected = FailureReason::BadExit(ExitStatus::NotConvergedOutOfTime);
            if cycle < max {
                assert_eq!(report.status, CycleStatus::Fallback(expected));
                assert_eq!(exec.state(), ExecutorState::Planning);
            } else {
                assert_eq!(report.status, CycleStatus::Aborted(expected));
            }
            assert_eq!(report.consecutive_failures, cycle);

            // The reference window never moves without a committed solution
            let current = exec.reference().cloned();
            if let Some(previous) = &reference {
                assert_eq!(&current, previous);
            }
            reference = Some(current);
        }

        assert_eq!(exec.state(), ExecutorState::Aborted);
        assert!(exec.actuator().unavailable);
        // Decelerating from rest stays at rest
        assert_eq!(exec.actuator().applied, vec![Control::zero(); max - 1]);
        assert!(matches!(exec.step(), Err(ExecutorError::Aborted)));
    }

    #[test]
    fn test_simulated_robot_halts_on_abort() {
        let config = MpcConfig::default();
        let (sim, records) = run(Scenario::solver_timeout(&config).unwrap());
        let agent = &sim.agents()[0];
        assert_eq!(agent.status(), AgentStatus::Aborted);
        assert_eq!(records.len(), config.failure.max_consecutive_failures);
        assert!(records.iter().all(|r| !r.report.status.is_committed()));
        assert!(agent.executor().actuator().robot().is_halted());
        assert_eq!(agent.pose(), State::default());
    }
}

/// Two robots, each treating the other as a moving obstacle
mod multi_robot {
    use super::*;

    #[test]
    fn test_robots_keep_apart() {
        let config = MpcConfig::default();
        let (_sim, records) = run(Scenario::multi_robot(&config).unwrap());
        assert!(records.iter().any(|r| r.robot == 1));
        // Centres never closer than one footprint
        assert!(records.iter().all(|r| r.clearance > 0.0));
    }
}
