//! Batch algorithm execution against one model.
//!
//! Algorithms run strictly in order, one per step, under the model's write
//! lock. The first failure ends the operation; later algorithms never run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

use crate::engine::{AlgorithmDescriptor, AlgorithmEngine};
use crate::error::SessionError;
use crate::model::ModelSession;
use crate::registry::Handle;

use super::{Advance, Operation, OperationState, StepCursor};

/// Status yielded after each algorithm.
#[derive(Debug, Clone, Serialize)]
pub struct RunAlgorithmsStatus {
    /// Index of the algorithm this step ran
    pub index: usize,
    pub total: usize,
    /// `None` when the list was empty
    pub algorithm: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub model_handle: Handle,
}

/// Fail-fast run of algorithm descriptors over a model.
pub struct RunAlgorithms {
    engine: Arc<dyn AlgorithmEngine>,
    model_handle: Handle,
    model: Arc<ModelSession>,
    algorithms: Vec<AlgorithmDescriptor>,
    cursor: StepCursor,
}

impl RunAlgorithms {
    pub fn new(
        engine: Arc<dyn AlgorithmEngine>,
        model_handle: Handle,
        model: Arc<ModelSession>,
        algorithms: Vec<AlgorithmDescriptor>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            engine,
            model_handle,
            model,
            algorithms,
            cursor: StepCursor::new(timeout),
        }
    }

    pub fn algorithm_count(&self) -> usize {
        self.algorithms.len()
    }
}

#[async_trait]
impl Operation for RunAlgorithms {
    type Status = RunAlgorithmsStatus;

    async fn advance(&mut self) -> Result<Advance<RunAlgorithmsStatus>, SessionError> {
        let index = self.cursor.enter()?;
        let total = self.algorithms.len();

        let Some(descriptor) = self.algorithms.get(index) else {
            self.cursor.finish(OperationState::Completed);
            return Ok(Advance {
                status: RunAlgorithmsStatus {
                    index,
                    total,
                    algorithm: None,
                    success: true,
                    error: None,
                    model_handle: self.model_handle,
                },
                done: true,
            });
        };

        info!(
            "Running algorithm {} ({}/{}) on model {}",
            descriptor.name,
            index + 1,
            total,
            self.model_handle
        );

        let result = {
            let mut model = self.model.write().await;
            self.engine.run(&mut model, descriptor).await
        };
        self.cursor.complete_step();

        let mut status = RunAlgorithmsStatus {
            index,
            total,
            algorithm: Some(descriptor.name.clone()),
            success: true,
            error: None,
            model_handle: self.model_handle,
        };

        let done = match result {
            Ok(()) => {
                let done = index + 1 >= total;
                if done {
                    self.cursor.finish(OperationState::Completed);
                    info!("All algorithms complete on model {}", self.model_handle);
                }
                done
            }
            Err(e) => {
                error!(
                    "Algorithm {} failed on model {}: {}",
                    descriptor.name, self.model_handle, e
                );
                status.success = false;
                status.error = Some(e.to_string());
                self.cursor.finish(OperationState::Failed);
                true
            }
        };

        Ok(Advance { status, done })
    }

    fn cancel(&mut self) -> bool {
        self.cursor.cancel()
    }

    fn state(&self) -> OperationState {
        self.cursor.state()
    }
}
