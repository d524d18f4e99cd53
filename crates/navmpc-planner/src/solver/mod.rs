//! Solver boundary
//!
//! The optimizer is an opaque capability: parameter vector and initial
//! guess in, solution vector plus exit status out. Backends implement
//! [`NmpcSolver`]; the [`SolverAdapter`] runs one on a worker thread under a
//! hard deadline and classifies what comes back.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use navmpc_core::Control;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ConfigError, MpcConfig};

pub mod adapter;
pub mod panoc;
pub mod scripted;

pub use adapter::{AdapterFailure, ExitClassifier, SolveOutcome, SolverAdapter};
pub use panoc::PanocSolver;
pub use scripted::{ScriptedReply, ScriptedSolver};

/// How a solve terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitStatus {
    Converged,
    NotConvergedIterations,
    NotConvergedOutOfTime,
    NotConvergedCost,
    NotConvergedNotFiniteComputation,
}

impl ExitStatus {
    pub const ALL: [ExitStatus; 5] = [
        ExitStatus::Converged,
        ExitStatus::NotConvergedIterations,
        ExitStatus::NotConvergedOutOfTime,
        ExitStatus::NotConvergedCost,
        ExitStatus::NotConvergedNotFiniteComputation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExitStatus::Converged => "Converged",
            ExitStatus::NotConvergedIterations => "NotConvergedIterations",
            ExitStatus::NotConvergedOutOfTime => "NotConvergedOutOfTime",
            ExitStatus::NotConvergedCost => "NotConvergedCost",
            ExitStatus::NotConvergedNotFiniteComputation => "NotConvergedNotFiniteComputation",
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExitStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown exit status {s:?}"))
    }
}

/// Backend output for one solve
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Decision vector `(v_0, ω_0, …)`
    pub u: Vec<f64>,
    pub exit_status: ExitStatus,
    pub iterations: usize,
    pub solve_time: Duration,
    /// Cost at `u`
    pub cost: f64,
}

impl Solution {
    pub fn controls(&self) -> Vec<Control> {
        Control::sequence_from_slice(&self.u)
    }

    pub fn is_finite(&self) -> bool {
        self.u.iter().all(|x| x.is_finite())
    }
}

/// Errors a backend reports instead of a solution
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("{what} has length {got}, backend expects {expected}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("backend rejected the problem: {0}")]
    Rejected(String),
}

/// Numerical optimizer for the NMPC problem
///
/// Implementations must return within roughly `deadline`; the adapter
/// stops waiting shortly after it regardless.
pub trait NmpcSolver: Send {
    fn name(&self) -> &str;

    fn solve(
        &mut self,
        parameters: &[f64],
        initial_guess: &[f64],
        deadline: Duration,
    ) -> Result<Solution, BackendError>;
}

type BackendFactory = fn(&MpcConfig) -> Box<dyn NmpcSolver>;

/// Backends selectable through `solver.backend`
const BACKENDS: &[(&str, BackendFactory)] = &[(PanocSolver::NAME, panoc_backend)];

fn panoc_backend(config: &MpcConfig) -> Box<dyn NmpcSolver> {
    Box::new(PanocSolver::new(config))
}

pub fn backend_names() -> impl Iterator<Item = &'static str> {
    BACKENDS.iter().map(|(name, _)| *name)
}

pub fn is_known_backend(name: &str) -> bool {
    backend_names().any(|known| known == name)
}

pub(crate) fn unknown_backend(name: &str) -> ConfigError {
    ConfigError::Invalid {
        field: "solver.backend",
        reason: format!(
            "unknown backend {name:?}, expected one of {:?}",
            backend_names().collect::<Vec<_>>()
        ),
    }
}

/// Build the backend named in the configuration
pub fn build_backend(config: &MpcConfig) -> Result<Box<dyn NmpcSolver>, ConfigError> {
    let name = config.solver.backend.as_str();
    BACKENDS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, make)| make(config))
        .ok_or_else(|| unknown_backend(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_string_roundtrip() {
        for status in ExitStatus::ALL {
            assert_eq!(status.to_string().parse::<ExitStatus>(), Ok(status));
        }
        assert!("Diverged".parse::<ExitStatus>().is_err());
    }

    #[test]
    fn test_build_backend_by_name() {
        let config = MpcConfig::default();
        let backend = build_backend(&config).unwrap();
        assert_eq!(backend.name(), "panoc");

        let mut config = MpcConfig::default();
        config.solver.backend = "ipopt".into();
        assert!(build_backend(&config).is_err());
    }

    #[test]
    fn test_every_known_backend_validates_and_builds() {
        for name in backend_names() {
            let mut config = MpcConfig::default();
            config.solver.backend = name.to_string();
            assert!(config.validate().is_ok(), "{name}");
            assert_eq!(build_backend(&config).unwrap().name(), name);
        }
        assert!(!is_known_backend("scripted"));
    }
}
