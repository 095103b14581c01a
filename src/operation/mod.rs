//! Long-running, step-driven operations.
//!
//! Every operation is an explicit state machine advanced one bounded step at a
//! time by the caller:
//!
//! ```text
//! Created ──advance──▶ Running(0) ──advance──▶ Running(1) ... ──▶ Completed
//!    │                     │                                  ├─▶ Failed
//!    └──────cancel─────────┴──────────────────────────────────└─▶ Cancelled
//! ```
//!
//! Construction never performs work; the first [`Operation::advance`] runs
//! step 0. No background task is spawned, so cancellation and the optional
//! wall-clock timeout are checked at step entry only. Advancing a terminal
//! operation fails with [`SessionError::OperationClosed`].
//!
//! Operations are not safe to advance concurrently; the server keeps each one
//! behind its own mutex.

mod algorithms;
mod prepare;
mod procedure;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::SessionError;

pub use algorithms::{RunAlgorithms, RunAlgorithmsStatus};
pub use prepare::{DeferredCapturePrepare, DeferredCapturePrepareStatus, PrepareOutcome};
pub use procedure::{
    FrameAssessment, FrameTargetPolicy, ProcedurePolicy, ScanningProcedure,
    ScanningProcedureSettings, ScanningProcedureStatus,
};

// =============================================================================
// State
// =============================================================================

/// Lifecycle of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OperationState {
    Created,
    /// Last step performed was `step`
    Running { step: usize },
    Completed,
    Failed,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Failed | OperationState::Cancelled
        )
    }
}

/// Result of one advance: the step's status and whether the operation is
/// now terminal.
#[derive(Debug, Clone, Serialize)]
pub struct Advance<S> {
    pub status: S,
    pub done: bool,
}

/// A resumable unit of work.
#[async_trait]
pub trait Operation: Send {
    type Status: Serialize + Send;

    /// Perform exactly one step.
    async fn advance(&mut self) -> Result<Advance<Self::Status>, SessionError>;

    /// Stop before the next step. Returns false if already terminal.
    fn cancel(&mut self) -> bool;

    fn state(&self) -> OperationState;
}

// =============================================================================
// StepCursor
// =============================================================================

/// Step bookkeeping shared by all operations.
#[derive(Debug, Clone)]
pub struct StepCursor {
    state: OperationState,
    next_step: usize,
    started: Option<Instant>,
    timeout: Option<Duration>,
}

impl StepCursor {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            state: OperationState::Created,
            next_step: 0,
            started: None,
            timeout,
        }
    }

    /// Enter the next step and return its index.
    ///
    /// Fails with `OperationClosed` once terminal, and with
    /// `OperationTimedOut` (moving to `Failed`) when the budget measured from
    /// the first step has run out.
    pub fn enter(&mut self) -> Result<usize, SessionError> {
        if self.state.is_terminal() {
            return Err(SessionError::OperationClosed);
        }

        let started = *self.started.get_or_insert_with(Instant::now);
        if let Some(timeout) = self.timeout {
            if started.elapsed() > timeout {
                self.state = OperationState::Failed;
                return Err(SessionError::OperationTimedOut {
                    steps: self.next_step,
                });
            }
        }

        let step = self.next_step;
        self.state = OperationState::Running { step };
        Ok(step)
    }

    pub fn complete_step(&mut self) {
        self.next_step += 1;
    }

    pub fn finish(&mut self, state: OperationState) {
        self.state = state;
    }

    pub fn cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = OperationState::Cancelled;
        true
    }

    pub fn steps_taken(&self) -> usize {
        self.next_step
    }

    pub fn state(&self) -> OperationState {
        self.state
    }
}

// =============================================================================
// AnyOperation
// =============================================================================

/// Any operation the session can hand out, for storage behind one handle
/// table.
pub enum AnyOperation {
    ScanningProcedure(ScanningProcedure),
    RunAlgorithms(RunAlgorithms),
    DeferredCapturePrepare(DeferredCapturePrepare),
}

/// Status of any operation, tagged with its kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationStatus {
    ScanningProcedure(ScanningProcedureStatus),
    RunAlgorithms(RunAlgorithmsStatus),
    DeferredCapturePrepare(DeferredCapturePrepareStatus),
}

fn map_advance<S>(
    advance: Advance<S>,
    wrap: impl FnOnce(S) -> OperationStatus,
) -> Advance<OperationStatus> {
    Advance {
        status: wrap(advance.status),
        done: advance.done,
    }
}

impl AnyOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            AnyOperation::ScanningProcedure(_) => "scanning_procedure",
            AnyOperation::RunAlgorithms(_) => "run_algorithms",
            AnyOperation::DeferredCapturePrepare(_) => "deferred_capture_prepare",
        }
    }
}

#[async_trait]
impl Operation for AnyOperation {
    type Status = OperationStatus;

    async fn advance(&mut self) -> Result<Advance<OperationStatus>, SessionError> {
        Ok(match self {
            AnyOperation::ScanningProcedure(op) => {
                map_advance(op.advance().await?, OperationStatus::ScanningProcedure)
            }
            AnyOperation::RunAlgorithms(op) => {
                map_advance(op.advance().await?, OperationStatus::RunAlgorithms)
            }
            AnyOperation::DeferredCapturePrepare(op) => {
                map_advance(op.advance().await?, OperationStatus::DeferredCapturePrepare)
            }
        })
    }

    fn cancel(&mut self) -> bool {
        match self {
            AnyOperation::ScanningProcedure(op) => op.cancel(),
            AnyOperation::RunAlgorithms(op) => op.cancel(),
            AnyOperation::DeferredCapturePrepare(op) => op.cancel(),
        }
    }

    fn state(&self) -> OperationState {
        match self {
            AnyOperation::ScanningProcedure(op) => op.state(),
            AnyOperation::RunAlgorithms(op) => op.state(),
            AnyOperation::DeferredCapturePrepare(op) => op.state(),
        }
    }
}

impl From<ScanningProcedure> for AnyOperation {
    fn from(op: ScanningProcedure) -> Self {
        AnyOperation::ScanningProcedure(op)
    }
}

impl From<RunAlgorithms> for AnyOperation {
    fn from(op: RunAlgorithms) -> Self {
        AnyOperation::RunAlgorithms(op)
    }
}

impl From<DeferredCapturePrepare> for AnyOperation {
    fn from(op: DeferredCapturePrepare) -> Self {
        AnyOperation::DeferredCapturePrepare(op)
    }
}

/// Advance until terminal, collecting every status.
///
/// Stops at the first error; statuses seen so far are dropped.
pub async fn run_to_completion<O: Operation>(
    operation: &mut O,
) -> Result<Vec<O::Status>, SessionError> {
    let mut statuses = Vec::new();
    loop {
        let Advance { status, done } = operation.advance().await?;
        statuses.push(status);
        if done {
            return Ok(statuses);
        }
    }
}
