//! navmpc Planner
//!
//! Receding-horizon nonlinear MPC for a differential-drive robot tracking a
//! reference trajectory among static and moving obstacles.
//!
//! # Architecture
//!
//! Every sampling interval `ts` the executor solves
//!
//! ```text
//! minimize    J(u) = Σ_k tracking + smoothness + path deviation
//!                  + w_s · static penalty + w_d · dynamic penalty + terminal
//! subject to  s_{k+1} = f(s_k, u_k)          (discrete unicycle)
//!             v_min ≤ v_k ≤ v_max, |ω_k| ≤ ω_max
//! ```
//!
//! over `u = (v_0, ω_0, …, v_{N-1}, ω_{N-1})`, applies the first
//! `action_steps` controls and shifts the solution into the next initial
//! guess. Obstacles enter the parameter vector as fixed-size slot blocks.
//!
//! # Components
//!
//! - [`config`]: sampling, limits, slot capacities, weights, solver and failure settings
//! - [`obstacles`]: obstacle lists to padded parameter blocks
//! - [`problem`]: parameter vector layout, reference window, warm start
//! - [`cost`]: penalized cost and its gradient
//! - [`solver`]: backend trait, PANOC backend, deadline-bounded adapter
//! - [`failure`]: fallback control and abort policy
//! - [`executor`]: the receding-horizon state machine
//! - [`reference`]: polyline reference sampling
//! - [`scenarios`]: canonical scenes and closed-loop simulation

pub mod config;
pub mod obstacles;
pub mod problem;
pub mod cost;
pub mod solver;
pub mod failure;
pub mod executor;
pub mod reference;
pub mod scenarios;

// Re-exports
pub use config::{ConfigError, MpcConfig};
pub use executor::{Actuator, ControlRequest, ControlResponse, CycleReport, CycleStatus, ExecutorState, HorizonExecutor};
pub use obstacles::{DynamicObstacle, ObstacleEncoder, StaticObstacle};
pub use problem::{ProblemBuilder, ReferencePoint, ReferenceTrajectory};
pub use solver::{ExitStatus, NmpcSolver, SolverAdapter};
