//! Controller configuration
//!
//! One immutable document, loaded once at startup and passed by reference
//! to every component constructor. Every field has a default so a partial
//! TOML file is valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::solver::{self, ExitStatus};

/// Number of scalars per static obstacle edge `(nx, ny, d)`
pub const PARAMS_PER_EDGE: usize = 3;

/// Number of scalars per dynamic obstacle step `(x, y, rx, ry, heading, alpha)`
pub const PARAMS_PER_DYNAMIC: usize = 6;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Top-level controller configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpcConfig {
    pub horizon: HorizonConfig,
    pub robot: RobotConfig,
    pub obstacles: ObstacleConfig,
    pub weights: CostWeights,
    pub solver: SolverConfig,
    pub failure: FailureConfig,
}

impl MpcConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: MpcConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check every cross-field constraint; any violation is fatal
    pub fn validate(&self) -> Result<(), ConfigError> {
        let h = &self.horizon;
        if !(h.ts > 0.0) || !h.ts.is_finite() {
            return Err(ConfigError::invalid("horizon.ts", format!("must be positive, got {}", h.ts)));
        }
        if h.n_hor == 0 {
            return Err(ConfigError::invalid("horizon.n_hor", "must be at least 1"));
        }
        if h.action_steps == 0 || h.action_steps > h.n_hor {
            return Err(ConfigError::invalid(
                "horizon.action_steps",
                format!("must be in 1..={}, got {}", h.n_hor, h.action_steps),
            ));
        }

        let r = &self.robot;
        if r.lin_vel_min > r.lin_vel_max {
            return Err(ConfigError::invalid(
                "robot.lin_vel_min",
                format!("{} exceeds lin_vel_max {}", r.lin_vel_min, r.lin_vel_max),
            ));
        }
        if !(r.ang_vel_max > 0.0) {
            return Err(ConfigError::invalid("robot.ang_vel_max", "must be positive"));
        }
        if r.vehicle_radius < 0.0 || r.safety_margin < 0.0 {
            return Err(ConfigError::invalid(
                "robot.vehicle_radius",
                "radius and safety margin must be non-negative",
            ));
        }

        let o = &self.obstacles;
        if o.edges_per_static < 4 {
            return Err(ConfigError::invalid(
                "obstacles.edges_per_static",
                format!("must be at least 4, got {}", o.edges_per_static),
            ));
        }
        if o.params_per_edge != PARAMS_PER_EDGE {
            return Err(ConfigError::invalid(
                "obstacles.params_per_edge",
                format!("must be {PARAMS_PER_EDGE}, got {}", o.params_per_edge),
            ));
        }
        if o.params_per_dynamic != PARAMS_PER_DYNAMIC {
            return Err(ConfigError::invalid(
                "obstacles.params_per_dynamic",
                format!("must be {PARAMS_PER_DYNAMIC}, got {}", o.params_per_dynamic),
            ));
        }
        if o.dynamic_default_size < 0.0 {
            return Err(ConfigError::invalid("obstacles.dynamic_default_size", "must be non-negative"));
        }

        for (name, value) in self.weights.named() {
            if value < 0.0 || !value.is_finite() {
                return Err(ConfigError::invalid("weights", format!("{name} must be non-negative, got {value}")));
            }
        }

        let s = &self.solver;
        if !solver::is_known_backend(&s.backend) {
            return Err(solver::unknown_backend(&s.backend));
        }
        if s.timeout_ms == 0 {
            return Err(ConfigError::invalid("solver.timeout_ms", "must be positive"));
        }
        if s.max_iterations == 0 {
            return Err(ConfigError::invalid("solver.max_iterations", "must be positive"));
        }
        if !(s.tolerance > 0.0) {
            return Err(ConfigError::invalid("solver.tolerance", "must be positive"));
        }
        if s.lbfgs_memory == 0 {
            return Err(ConfigError::invalid("solver.lbfgs_memory", "must be positive"));
        }
        if s.bad_exit_codes.contains(&ExitStatus::Converged) {
            return Err(ConfigError::invalid("solver.bad_exit_codes", "Converged cannot be a bad exit code"));
        }

        let f = &self.failure;
        if f.lin_decel < 0.0 || f.ang_decel < 0.0 {
            return Err(ConfigError::invalid("failure.lin_decel", "deceleration rates must be non-negative"));
        }
        if f.max_consecutive_failures == 0 {
            return Err(ConfigError::invalid("failure.max_consecutive_failures", "must be at least 1"));
        }

        Ok(())
    }

    /// Solver deadline actually enforced: `min(timeout_ms, ts)`
    pub fn effective_deadline(&self) -> Duration {
        let timeout = Duration::from_millis(self.solver.timeout_ms);
        let period = Duration::from_secs_f64(self.horizon.ts);
        timeout.min(period)
    }

    /// Whether the configured timeout had to be clamped to the sampling time
    pub fn timeout_clamped(&self) -> bool {
        Duration::from_millis(self.solver.timeout_ms) > Duration::from_secs_f64(self.horizon.ts)
    }

    /// Inflation applied to every obstacle
    pub fn inflation(&self) -> f64 {
        self.robot.vehicle_radius + self.robot.safety_margin
    }
}

/// Horizon and sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonConfig {
    /// Sampling time [s]
    pub ts: f64,
    /// Number of horizon steps (N)
    pub n_hor: usize,
    /// Control pairs committed per cycle
    pub action_steps: usize,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            ts: 0.2,
            n_hor: 20,
            action_steps: 1,
        }
    }
}

/// Vehicle limits and footprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Minimum linear velocity [m/s]
    pub lin_vel_min: f64,
    /// Maximum linear velocity [m/s]
    pub lin_vel_max: f64,
    /// Maximum absolute angular velocity [rad/s]
    pub ang_vel_max: f64,
    /// Linear acceleration limit [m/s²]
    pub lin_acc_max: f64,
    /// Angular acceleration limit [rad/s²]
    pub ang_acc_max: f64,
    /// Footprint radius [m]
    pub vehicle_radius: f64,
    /// Extra clearance added to every obstacle [m]
    pub safety_margin: f64,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            lin_vel_min: -0.5,
            lin_vel_max: 1.5,
            ang_vel_max: 0.5,
            lin_acc_max: 1.0,
            ang_acc_max: 1.0,
            vehicle_radius: 0.5,
            safety_margin: 0.1,
        }
    }
}

/// Obstacle slot capacities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObstacleConfig {
    /// Static obstacle slots
    pub n_stcobs: usize,
    /// Edges encoded per static obstacle
    pub edges_per_static: usize,
    /// Scalars per edge (fixed)
    pub params_per_edge: usize,
    /// Dynamic obstacle slots
    pub n_dynobs: usize,
    /// Scalars per dynamic obstacle step (fixed)
    pub params_per_dynamic: usize,
    /// Size assumed for dynamic obstacles without one [m]
    pub dynamic_default_size: f64,
}

impl Default for ObstacleConfig {
    fn default() -> Self {
        Self {
            n_stcobs: 10,
            edges_per_static: 4,
            params_per_edge: PARAMS_PER_EDGE,
            n_dynobs: 5,
            params_per_dynamic: PARAMS_PER_DYNAMIC,
            dynamic_default_size: 0.8,
        }
    }
}

/// Penalty weights, in parameter-vector order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    pub lin_vel: f64,
    pub ang_vel: f64,
    pub lin_acc: f64,
    pub ang_acc: f64,
    /// Squared distance to the reference polyline
    pub path_deviation: f64,
    pub position: f64,
    /// Linear speed against the reference speed
    pub velocity: f64,
    pub heading: f64,
    pub static_obstacle: f64,
    pub dynamic_obstacle: f64,
    pub terminal_position: f64,
    pub terminal_heading: f64,
}

impl CostWeights {
    pub const COUNT: usize = 12;

    /// Weights in parameter-vector order
    pub fn to_array(&self) -> [f64; Self::COUNT] {
        [
            self.lin_vel,
            self.ang_vel,
            self.lin_acc,
            self.ang_acc,
            self.path_deviation,
            self.position,
            self.velocity,
            self.heading,
            self.static_obstacle,
            self.dynamic_obstacle,
            self.terminal_position,
            self.terminal_heading,
        ]
    }

    fn named(&self) -> [(&'static str, f64); Self::COUNT] {
        const NAMES: [&str; CostWeights::COUNT] = [
            "lin_vel",
            "ang_vel",
            "lin_acc",
            "ang_acc",
            "path_deviation",
            "position",
            "velocity",
            "heading",
            "static_obstacle",
            "dynamic_obstacle",
            "terminal_position",
            "terminal_heading",
        ];
        let values = self.to_array();
        std::array::from_fn(|i| (NAMES[i], values[i]))
    }
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            lin_vel: 1.0,
            ang_vel: 1.0,
            lin_acc: 0.5,
            ang_acc: 0.5,
            path_deviation: 1.0,
            position: 1.0,
            velocity: 1.0,
            heading: 0.5,
            static_obstacle: 100.0,
            dynamic_obstacle: 100.0,
            terminal_position: 10.0,
            terminal_heading: 1.0,
        }
    }
}

/// Initial guess used when no previous solution is available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColdStart {
    /// Reference speed, zero turn rate
    ReferenceSpeed,
    /// All zeros
    Zero,
}

/// Solver selection and limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Backend name
    pub backend: String,
    /// Identifier of the generated problem build, reported in telemetry
    pub build_id: String,
    /// Wall-clock budget per solve [ms]
    pub timeout_ms: u64,
    /// Extra time the watchdog grants beyond the deadline [ms]
    pub watchdog_slack_ms: u64,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub lbfgs_memory: usize,
    /// Exit statuses that trigger the failure policy
    pub bad_exit_codes: Vec<ExitStatus>,
    pub cold_start: ColdStart,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            backend: "panoc".to_string(),
            build_id: "default".to_string(),
            timeout_ms: 500,
            watchdog_slack_ms: 5,
            max_iterations: 500,
            tolerance: 1e-4,
            lbfgs_memory: 10,
            bad_exit_codes: vec![
                ExitStatus::NotConvergedOutOfTime,
                ExitStatus::NotConvergedCost,
                ExitStatus::NotConvergedNotFiniteComputation,
            ],
            cold_start: ColdStart::ReferenceSpeed,
        }
    }
}

/// Control applied while the solver is failing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    /// Bounded deceleration toward zero velocity
    Decelerate,
    /// Repeat the last committed control
    Hold,
}

/// Warm start used for the retry after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryWarmStart {
    Previous,
    Fresh,
}

/// Failure policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureConfig {
    pub fallback: FallbackMode,
    /// Linear deceleration while falling back [m/s²]
    pub lin_decel: f64,
    /// Angular deceleration while falling back [rad/s²]
    pub ang_decel: f64,
    /// Consecutive failures that abort the controller
    pub max_consecutive_failures: usize,
    /// Cycles the controller may run on the same odometry or reference
    /// before treating the input as lost
    pub max_stale_cycles: usize,
    pub retry_warm_start: RetryWarmStart,
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self {
            fallback: FallbackMode::Decelerate,
            lin_decel: 1.0,
            ang_decel: 1.0,
            max_consecutive_failures: 3,
            max_stale_cycles: 5,
            retry_warm_start: RetryWarmStart::Previous,
        }
    }
}
