//! Bridge to the clarabel interior-point solver.
//!
//! The problem is moved into a worker thread and the caller waits on a
//! channel with a wall-clock timeout. The solver also gets the timeout as its
//! own time limit, so an abandoned worker exits shortly after the caller
//! gives up. The worker owns all of its data and never touches the model.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use clarabel::solver::*;
use log::{debug, trace};
use thiserror::Error;

use super::qp::QpProblem;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolveError {
    #[error("solver did not finish within {0:?}")]
    Timeout(Duration),

    #[error("solver stopped with status {0}")]
    Status(String),

    #[error("solver settings rejected: {0}")]
    Settings(String),

    #[error("solver worker failed: {0}")]
    Worker(String),
}

/// Solve on a worker thread; returns the primal solution `x`.
pub fn solve(problem: QpProblem, timeout: Duration) -> Result<Vec<f64>, SolveError> {
    run_with_timeout(timeout, move || solve_blocking(&problem, timeout))?
}

pub(crate) fn run_with_timeout<T, F>(timeout: Duration, job: F) -> Result<T, SolveError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let handle = thread::Builder::new()
        .name("qp-solver".into())
        .spawn(move || {
            // receiver may already be gone after a timeout
            let _ = tx.send(job());
        })
        .map_err(|e| SolveError::Worker(e.to_string()))?;

    match rx.recv_timeout(timeout) {
        Ok(value) => {
            let _ = handle.join();
            Ok(value)
        }
        Err(RecvTimeoutError::Timeout) => Err(SolveError::Timeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(SolveError::Worker(
            "worker exited without a result".into(),
        )),
    }
}

fn solve_blocking(problem: &QpProblem, time_limit: Duration) -> Result<Vec<f64>, SolveError> {
    let start = std::time::Instant::now();
    let settings = DefaultSettingsBuilder::<f64>::default()
        .verbose(false)
        .time_limit(time_limit.as_secs_f64())
        .build()
        .map_err(|e| SolveError::Settings(format!("{:?}", e)))?;
    let cones = [SupportedConeT::NonnegativeConeT(problem.b.len())];
    trace!(
        "solving QP: {} variables ({} slack), {} constraints",
        problem.q.len(),
        problem.slack_count,
        problem.b.len()
    );

    let mut solver = DefaultSolver::new(
        &problem.p,
        &problem.q,
        &problem.a,
        &problem.b,
        &cones,
        settings,
    );
    solver.solve();

    debug!(
        "QP finished with {:?} in {:?}",
        solver.solution.status,
        start.elapsed()
    );
    match &solver.solution.status {
        SolverStatus::Solved | SolverStatus::AlmostSolved => Ok(solver.solution.x.clone()),
        other => Err(SolveError::Status(format!("{:?}", other))),
    }
}
