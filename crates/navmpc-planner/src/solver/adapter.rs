//! Solver Adapter
//!
//! Runs a backend on a dedicated worker thread and waits for it with a
//! hard deadline. A solve that misses the deadline is reported as a
//! timeout; the worker keeps running and its late reply is discarded on
//! the next call. While the worker is still busy no second solve is
//! started.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use thiserror::Error;
use tracing::{debug, warn};

use super::{BackendError, ExitStatus, NmpcSolver, Solution};
use crate::config::MpcConfig;
use crate::problem::{ParameterLayout, ProblemInstance};

/// Failures of the adapter itself, as opposed to a bad exit status
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AdapterFailure {
    #[error("solver missed its deadline after {waited:?}")]
    Timeout { waited: Duration },
    #[error("solver still busy with a previous request")]
    Busy,
    #[error("solver worker is gone")]
    Crashed,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Classified result of one solve
#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome {
    /// Converged; commit
    Converged(Solution),
    /// Non-converged status outside the bad set; commit, flag as degraded
    Degraded(Solution),
    /// Status in the bad set; never commit
    Rejected(Solution),
    /// No usable solution
    Failed(AdapterFailure),
}

/// Splits exit statuses into acceptable and bad
#[derive(Debug, Clone, PartialEq)]
pub struct ExitClassifier {
    bad: Vec<ExitStatus>,
    n_decision: usize,
}

impl ExitClassifier {
    /// `n_decision` is the fixed length every solution vector must have
    pub fn new(bad: impl IntoIterator<Item = ExitStatus>, n_decision: usize) -> Self {
        Self {
            bad: bad.into_iter().filter(|s| *s != ExitStatus::Converged).collect(),
            n_decision,
        }
    }

    pub fn from_config(config: &MpcConfig) -> Self {
        Self::new(
            config.solver.bad_exit_codes.iter().copied(),
            ParameterLayout::new(config).n_decision(),
        )
    }

    pub fn is_bad(&self, status: ExitStatus) -> bool {
        self.bad.contains(&status)
    }

    /// Wrong-sized or non-finite controls are never committed, whatever the
    /// status says
    pub fn classify(&self, mut solution: Solution) -> SolveOutcome {
        if solution.u.len() != self.n_decision {
            return SolveOutcome::Failed(AdapterFailure::Backend(BackendError::DimensionMismatch {
                what: "solution",
                expected: self.n_decision,
                got: solution.u.len(),
            }));
        }
        if !solution.is_finite() {
            solution.exit_status = ExitStatus::NotConvergedNotFiniteComputation;
            return SolveOutcome::Rejected(solution);
        }
        match solution.exit_status {
            ExitStatus::Converged => SolveOutcome::Converged(solution),
            status if self.is_bad(status) => SolveOutcome::Rejected(solution),
            _ => SolveOutcome::Degraded(solution),
        }
    }
}

struct SolveRequest {
    id: u64,
    parameters: Vec<f64>,
    initial_guess: Vec<f64>,
    deadline: Duration,
}

struct SolveReply {
    id: u64,
    result: Result<Solution, BackendError>,
}

/// Deadline-bounded front end to a backend on a worker thread
pub struct SolverAdapter {
    requests: Option<Sender<SolveRequest>>,
    replies: Receiver<SolveReply>,
    worker: Option<JoinHandle<()>>,
    backend_name: String,
    classifier: ExitClassifier,
    deadline: Duration,
    watchdog_slack: Duration,
    next_id: u64,
    in_flight: Option<u64>,
}

impl SolverAdapter {
    pub fn new(config: &MpcConfig, backend: Box<dyn NmpcSolver>) -> Self {
        let deadline = config.effective_deadline();
        if config.timeout_clamped() {
            warn!(
                timeout_ms = config.solver.timeout_ms,
                ts = config.horizon.ts,
                deadline_ms = deadline.as_millis() as u64,
                "solver timeout exceeds the sampling time; clamping"
            );
        }

        let backend_name = backend.name().to_string();
        let (request_tx, request_rx) = channel::unbounded::<SolveRequest>();
        let (reply_tx, reply_rx) = channel::unbounded::<SolveReply>();
        let worker = thread::Builder::new()
            .name(format!("nmpc-{backend_name}"))
            .spawn(move || run_worker(backend, request_rx, reply_tx))
            .ok();
        if worker.is_none() {
            warn!(backend = %backend_name, "failed to spawn solver worker");
        }

        Self {
            requests: worker.as_ref().map(|_| request_tx),
            replies: reply_rx,
            worker,
            backend_name,
            classifier: ExitClassifier::from_config(config),
            deadline,
            watchdog_slack: Duration::from_millis(config.solver.watchdog_slack_ms),
            next_id: 0,
            in_flight: None,
        }
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    /// Deadline handed to the backend
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Whether a timed-out request is still running
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Solve one problem instance, waiting at most `deadline + slack`
    pub fn solve(&mut self, instance: &ProblemInstance) -> SolveOutcome {
        if let Err(failure) = self.collect_late_reply() {
            return SolveOutcome::Failed(failure);
        }
        let Some(requests) = self.requests.as_ref() else {
            return SolveOutcome::Failed(AdapterFailure::Crashed);
        };

        let id = self.next_id;
        self.next_id += 1;
        let request = SolveRequest {
            id,
            parameters: instance.parameters.clone(),
            initial_guess: instance.initial_guess.clone(),
            deadline: self.deadline,
        };
        if requests.send(request).is_err() {
            return SolveOutcome::Failed(AdapterFailure::Crashed);
        }
        self.in_flight = Some(id);

        let started = Instant::now();
        let limit = self.deadline + self.watchdog_slack;
        loop {
            let remaining = limit.saturating_sub(started.elapsed());
            match self.replies.recv_timeout(remaining) {
                Ok(reply) if reply.id == id => {
                    self.in_flight = None;
                    return match reply.result {
                        Ok(solution) => self.classifier.classify(solution),
                        Err(err) => SolveOutcome::Failed(AdapterFailure::Backend(err)),
                    };
                }
                Ok(stale) => {
                    debug!(id = stale.id, "discarding stale solver reply");
                }
                Err(RecvTimeoutError::Timeout) => {
                    return SolveOutcome::Failed(AdapterFailure::Timeout {
                        waited: started.elapsed(),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.in_flight = None;
                    return SolveOutcome::Failed(AdapterFailure::Crashed);
                }
            }
        }
    }

    /// Drain the reply of a request that previously timed out
    fn collect_late_reply(&mut self) -> Result<(), AdapterFailure> {
        let Some(pending) = self.in_flight else {
            return Ok(());
        };
        loop {
            match self.replies.try_recv() {
                Ok(reply) => {
                    debug!(id = reply.id, "discarding late solver reply");
                    if reply.id == pending {
                        self.in_flight = None;
                        return Ok(());
                    }
                }
                Err(TryRecvError::Empty) => return Err(AdapterFailure::Busy),
                Err(TryRecvError::Disconnected) => {
                    self.in_flight = None;
                    return Err(AdapterFailure::Crashed);
                }
            }
        }
    }
}

impl Drop for SolverAdapter {
    fn drop(&mut self) {
        // Closing the request channel stops the worker after its current solve
        self.requests.take();
        if self.in_flight.is_none() {
            if let Some(worker) = self.worker.take() {
                let _ = worker.join();
            }
        }
    }
}

fn run_worker(mut backend: Box<dyn NmpcSolver>, requests: Receiver<SolveRequest>, replies: Sender<SolveReply>) {
    for request in requests.iter() {
        let result = backend.solve(&request.parameters, &request.initial_guess, request.deadline);
        if replies.send(SolveReply { id: request.id, result }).is_err() {
            break;
        }
    }
}
