//! Scripted backend for exercising the adapter and executor
//!
//! Replays a queue of canned replies; once the queue is empty the default
//! reply repeats forever. Solutions echo the initial guess.

use std::collections::VecDeque;
use std::time::Duration;

use super::{BackendError, ExitStatus, NmpcSolver, Solution};

/// One canned backend behaviour
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    /// Return the initial guess with this status
    Status(ExitStatus),
    /// Return the initial guess with this status after sleeping
    Delayed(ExitStatus, Duration),
    /// Return these controls, converged
    Controls(Vec<f64>),
    /// Report a backend error
    Error(String),
    /// Panic inside the worker
    Crash,
}

#[derive(Debug, Clone)]
pub struct ScriptedSolver {
    script: VecDeque<ScriptedReply>,
    default: ScriptedReply,
    calls: usize,
}

impl ScriptedSolver {
    pub fn new(script: impl IntoIterator<Item = ScriptedReply>, default: ScriptedReply) -> Self {
        Self {
            script: script.into_iter().collect(),
            default,
            calls: 0,
        }
    }

    /// Same status on every call
    pub fn always(status: ExitStatus) -> Self {
        Self::new([], ScriptedReply::Status(status))
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl NmpcSolver for ScriptedSolver {
    fn name(&self) -> &str {
        "scripted"
    }

    fn solve(
        &mut self,
        _parameters: &[f64],
        initial_guess: &[f64],
        _deadline: Duration,
    ) -> Result<Solution, BackendError> {
        self.calls += 1;
        let reply = self.script.pop_front().unwrap_or_else(|| self.default.clone());
        let echo = |exit_status| Solution {
            u: initial_guess.to_vec(),
            exit_status,
            iterations: 1,
            solve_time: Duration::ZERO,
            cost: 0.0,
        };
        match reply {
            ScriptedReply::Status(status) => Ok(echo(status)),
            ScriptedReply::Delayed(status, delay) => {
                std::thread::sleep(delay);
                let mut solution = echo(status);
                solution.solve_time = delay;
                Ok(solution)
            }
            ScriptedReply::Controls(u) => Ok(Solution {
                u,
                ..echo(ExitStatus::Converged)
            }),
            ScriptedReply::Error(reason) => Err(BackendError::Rejected(reason)),
            ScriptedReply::Crash => panic!("scripted backend crash"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_then_default() {
        let mut solver = ScriptedSolver::new(
            [ScriptedReply::Status(ExitStatus::NotConvergedCost)],
            ScriptedReply::Status(ExitStatus::Converged),
        );
        let guess = [0.5, 0.0];
        let first = solver.solve(&[], &guess, Duration::ZERO).unwrap();
        let second = solver.solve(&[], &guess, Duration::ZERO).unwrap();
        let third = solver.solve(&[], &guess, Duration::ZERO).unwrap();
        assert_eq!(first.exit_status, ExitStatus::NotConvergedCost);
        assert_eq!(second.exit_status, ExitStatus::Converged);
        assert_eq!(third.u, vec![0.5, 0.0]);
        assert_eq!(solver.calls(), 3);
    }

    #[test]
    fn test_error_reply() {
        let mut solver = ScriptedSolver::new([ScriptedReply::Error("bad".into())], ScriptedReply::Crash);
        assert_eq!(
            solver.solve(&[], &[], Duration::ZERO),
            Err(BackendError::Rejected("bad".into()))
        );
    }
}
