//! Run lifecycle: creation, finalization, and run-context resolution.

use tracing::{info, warn};

use crate::error::{PumpkinError, PumpkinResult};
use crate::models::{Run, RunStatus};
use crate::repository::RunRepository;

/// Outcome tag produced by the scheduler, driving finalization and the
/// process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    AllPassed,
    SomePassed,
    NoneCompleted,
}

/// How a run id was obtained by `ensure_run_context`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunContext {
    /// The caller (or its environment) supplied an existing run.
    Attached(i64),
    /// A fresh single-test run was created and must be finalized by us.
    Created(i64),
}

impl RunContext {
    #[must_use]
    pub fn run_id(self) -> i64 {
        match self {
            Self::Attached(id) | Self::Created(id) => id,
        }
    }
}

/// Owns run rows' lifecycle. Status transitions are strict:
/// `RUNNING -> {COMPLETED, PARTIAL, FAILED}`, nothing else.
#[derive(Clone)]
pub struct RunCoordinator {
    runs: RunRepository,
}

impl RunCoordinator {
    pub fn new(runs: RunRepository) -> Self {
        Self { runs }
    }

    /// Insert a run in `RUNNING` state.
    pub async fn create_run(
        &self,
        total_urls: i64,
        parallel_workers: i64,
        notes: Option<String>,
    ) -> PumpkinResult<(i64, String)> {
        let (id, uuid) = self.runs.create(total_urls, parallel_workers, notes).await?;
        info!(run_id = id, total_urls, parallel_workers, "created run");
        Ok((id, uuid))
    }

    /// Finalize a run after every ingestion has settled. The terminal
    /// status is derived from the trigger-maintained counters: zero
    /// failures means COMPLETED, anything else PARTIAL.
    pub async fn finalize_run(
        &self,
        run_id: i64,
        duration_ms: i64,
        outcome: RunOutcome,
    ) -> PumpkinResult<Run> {
        let run = self
            .runs
            .get(run_id)
            .await?
            .ok_or(PumpkinError::RunMissing(run_id))?;

        let target = if run.failed == 0 {
            RunStatus::Completed
        } else {
            RunStatus::Partial
        };
        if target == RunStatus::Completed && outcome != RunOutcome::AllPassed && run.total_urls > 0
        {
            warn!(run_id, ?outcome, "scheduler outcome disagrees with counters");
        }

        let run = self.runs.transition(run_id, target, duration_ms).await?;
        info!(
            run_id,
            status = run.status.as_str(),
            passed = run.passed,
            failed = run.failed,
            duration_ms,
            "finalized run"
        );
        Ok(run)
    }

    /// Mark an aborted run FAILED. Used when the scheduler itself failed
    /// or the process was interrupted.
    pub async fn abort_run(&self, run_id: i64, duration_ms: i64) -> PumpkinResult<Run> {
        let run = self
            .runs
            .transition(run_id, RunStatus::Failed, duration_ms)
            .await?;
        warn!(run_id, duration_ms, "aborted run");
        Ok(run)
    }

    /// Resolve the run a single-test invocation should attach to:
    /// an injected id first, then the environment-provided id, then a
    /// fresh single-URL run.
    pub async fn ensure_run_context(
        &self,
        injected: Option<i64>,
        env_run_id: Option<i64>,
    ) -> PumpkinResult<RunContext> {
        if let Some(id) = injected.or(env_run_id) {
            let run = self
                .runs
                .get(id)
                .await?
                .ok_or(PumpkinError::RunMissing(id))?;
            if run.status.is_terminal() {
                return Err(PumpkinError::RunClosed(id));
            }
            return Ok(RunContext::Attached(id));
        }
        let (id, _) = self.create_run(1, 1, None).await?;
        Ok(RunContext::Created(id))
    }
}
