//! Failure Policy
//!
//! Chooses the control applied when a cycle has no committable solution
//! and decides when repeated failures abort the controller.

use std::fmt;

use navmpc_core::Control;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::config::{FallbackMode, MpcConfig, RetryWarmStart};
use crate::solver::{AdapterFailure, ExitStatus};

/// Why a cycle produced no committable solution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Status in the configured bad set
    BadExit(ExitStatus),
    /// Deadline missed
    Timeout,
    /// Previous timed-out solve still running
    Busy,
    /// Worker unreachable
    Crashed,
    /// Backend refused the problem
    Backend(String),
    /// Problem could not be assembled
    Problem(String),
    /// No fresh odometry for more than the allowed number of cycles
    StaleOdometry { cycles: usize },
    /// No fresh reference for more than the allowed number of cycles
    StaleReference { cycles: usize },
}

impl FailureReason {
    /// Required inputs are gone; retrying cannot help
    pub fn is_input_loss(&self) -> bool {
        matches!(self, FailureReason::StaleOdometry { .. } | FailureReason::StaleReference { .. })
    }
}

impl From<&AdapterFailure> for FailureReason {
    fn from(failure: &AdapterFailure) -> Self {
        match failure {
            AdapterFailure::Timeout { .. } => FailureReason::Timeout,
            AdapterFailure::Busy => FailureReason::Busy,
            AdapterFailure::Crashed => FailureReason::Crashed,
            AdapterFailure::Backend(err) => FailureReason::Backend(err.to_string()),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::BadExit(status) => write!(f, "bad exit status {status}"),
            FailureReason::Timeout => f.write_str("timeout"),
            FailureReason::Busy => f.write_str("solver busy"),
            FailureReason::Crashed => f.write_str("solver unreachable"),
            FailureReason::Backend(msg) => write!(f, "backend error: {msg}"),
            FailureReason::Problem(msg) => write!(f, "problem error: {msg}"),
            FailureReason::StaleOdometry { cycles } => write!(f, "no odometry for {cycles} cycles"),
            FailureReason::StaleReference { cycles } => write!(f, "no reference for {cycles} cycles"),
        }
    }
}

/// What to do about a failed cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailureDecision {
    /// Apply `control` for one sampling interval and retry next cycle
    Fallback { control: Control, consecutive: usize },
    /// Give up control authority
    Abort { consecutive: usize },
}

#[derive(Debug, Clone)]
pub struct FailurePolicy {
    mode: FallbackMode,
    lin_step: f64,
    ang_step: f64,
    max_consecutive: usize,
    retry: RetryWarmStart,
    consecutive: usize,
}

impl FailurePolicy {
    pub fn new(config: &MpcConfig) -> Self {
        let f = &config.failure;
        let r = &config.robot;
        // Never brake harder than the vehicle can
        Self {
            mode: f.fallback,
            lin_step: f.lin_decel.min(r.lin_acc_max) * config.horizon.ts,
            ang_step: f.ang_decel.min(r.ang_acc_max) * config.horizon.ts,
            max_consecutive: f.max_consecutive_failures,
            retry: f.retry_warm_start,
            consecutive: 0,
        }
    }

    /// A cycle committed a solution
    pub fn on_success(&mut self) {
        self.consecutive = 0;
    }

    /// A cycle failed; `last` is the last control applied
    ///
    /// Input loss aborts at once; solver failures abort when the
    /// consecutive count reaches the configured limit.
    pub fn on_failure(&mut self, last: &Control, reason: &FailureReason) -> FailureDecision {
        self.consecutive += 1;
        if reason.is_input_loss() || self.consecutive >= self.max_consecutive {
            error!(
                %reason,
                consecutive = self.consecutive,
                "controller unavailable"
            );
            return FailureDecision::Abort {
                consecutive: self.consecutive,
            };
        }

        let control = self.fallback_control(last);
        warn!(
            %reason,
            consecutive = self.consecutive,
            v = control.v,
            omega = control.omega,
            "solver failure; applying fallback"
        );
        FailureDecision::Fallback {
            control,
            consecutive: self.consecutive,
        }
    }

    /// Fallback control derived from the last applied one
    pub fn fallback_control(&self, last: &Control) -> Control {
        match self.mode {
            FallbackMode::Hold => *last,
            FallbackMode::Decelerate => Control::new(
                toward_zero(last.v, self.lin_step),
                toward_zero(last.omega, self.ang_step),
            ),
        }
    }

    pub fn retry_warm_start(&self) -> RetryWarmStart {
        self.retry
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive
    }
}

fn toward_zero(value: f64, step: f64) -> f64 {
    if value.abs() <= step {
        0.0
    } else {
        value - step * value.signum()
    }
}
