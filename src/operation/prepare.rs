//! Batch preparation of deferred captures.
//!
//! One capture per step. A failing capture is recorded and the batch moves
//! on; the terminal status lists every outcome in input order.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::SessionError;
use crate::registry::Handle;
use crate::session::ScannerSession;

use super::{Advance, Operation, OperationState, StepCursor};

/// Result of preparing one capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrepareOutcome {
    pub handle: Handle,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeferredCapturePrepareStatus {
    pub index: usize,
    pub total: usize,
    /// `None` when the batch was empty
    pub handle: Option<Handle>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Every outcome, filled on the final step only
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outcomes: Vec<PrepareOutcome>,
}

/// Fail-soft reconstruction of a list of deferred captures.
pub struct DeferredCapturePrepare {
    session: Arc<ScannerSession>,
    handles: Vec<Handle>,
    prepare_mesh: bool,
    prepare_stl: bool,
    outcomes: Vec<PrepareOutcome>,
    cursor: StepCursor,
}

impl DeferredCapturePrepare {
    pub fn new(
        session: Arc<ScannerSession>,
        handles: Vec<Handle>,
        prepare_mesh: bool,
        prepare_stl: bool,
    ) -> Self {
        let timeout = session.operation_timeout();
        Self {
            session,
            handles,
            prepare_mesh,
            prepare_stl,
            outcomes: Vec::new(),
            cursor: StepCursor::new(timeout),
        }
    }

    pub fn outcomes(&self) -> &[PrepareOutcome] {
        &self.outcomes
    }

    async fn prepare_one(&self, handle: Handle) -> Result<(), SessionError> {
        if self.prepare_mesh {
            self.session.get_deferred_capture_mesh(handle).await?;
        }
        if self.prepare_stl {
            self.session.get_deferred_capture_stl(handle).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Operation for DeferredCapturePrepare {
    type Status = DeferredCapturePrepareStatus;

    async fn advance(&mut self) -> Result<Advance<DeferredCapturePrepareStatus>, SessionError> {
        let index = self.cursor.enter()?;
        let total = self.handles.len();

        let Some(&handle) = self.handles.get(index) else {
            self.cursor.finish(OperationState::Completed);
            return Ok(Advance {
                status: DeferredCapturePrepareStatus {
                    index,
                    total,
                    handle: None,
                    success: true,
                    error: None,
                    outcomes: Vec::new(),
                },
                done: true,
            });
        };

        let outcome = match self.prepare_one(handle).await {
            Ok(()) => PrepareOutcome {
                handle,
                success: true,
                error: None,
            },
            Err(e) => {
                warn!("Failed to prepare deferred capture {}: {}", handle, e);
                PrepareOutcome {
                    handle,
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        };
        self.outcomes.push(outcome.clone());
        self.cursor.complete_step();

        let done = index + 1 >= total;
        let outcomes = if done {
            let failed = self.outcomes.iter().filter(|o| !o.success).count();
            info!(
                "Deferred capture prepare complete: {} prepared, {} failed",
                total - failed,
                failed
            );
            self.cursor.finish(OperationState::Completed);
            self.outcomes.clone()
        } else {
            Vec::new()
        };

        Ok(Advance {
            status: DeferredCapturePrepareStatus {
                index,
                total,
                handle: Some(handle),
                success: outcome.success,
                error: outcome.error,
                outcomes,
            },
            done,
        })
    }

    fn cancel(&mut self) -> bool {
        self.cursor.cancel()
    }

    fn state(&self) -> OperationState {
        self.cursor.state()
    }
}
