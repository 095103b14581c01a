//! Table of operations parked between remote `next` calls.
//!
//! Operation ids come from their own [`HandleAllocator`], independent of the
//! session's model/capture handles. Each operation sits behind its own mutex
//! so concurrent `next` calls on one id run one after the other, while
//! different operations advance independently.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::SessionError;
use crate::operation::{Advance, AnyOperation, Operation, OperationState, OperationStatus};
use crate::registry::{Handle, HandleAllocator, HandleTable};

type SharedOperation = Arc<Mutex<AnyOperation>>;

struct Entries {
    ids: HandleAllocator,
    operations: HandleTable<SharedOperation>,
}

/// Registry of in-flight operations.
pub struct OperationTable {
    entries: Mutex<Entries>,
}

impl OperationTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries {
                ids: HandleAllocator::new(),
                operations: HandleTable::new("operation"),
            }),
        }
    }

    /// Park an operation and return its id.
    pub async fn insert(&self, operation: impl Into<AnyOperation>) -> Handle {
        let operation = operation.into();
        let kind = operation.kind();
        let mut entries = self.entries.lock().await;
        let id = entries.ids.allocate();
        entries
            .operations
            .insert(id, Arc::new(Mutex::new(operation)));
        info!("Created {} operation: {}", kind, id);
        id
    }

    async fn get(&self, id: Handle) -> Result<SharedOperation, SessionError> {
        let entries = self.entries.lock().await;
        entries.operations.lookup(id).cloned()
    }

    /// Run one step of operation `id`.
    ///
    /// The table lock is released before the step runs. A finished operation
    /// answers one more `next` with [`SessionError::OperationClosed`] and is
    /// evicted; its id is unknown from then on.
    pub async fn advance(&self, id: Handle) -> Result<Advance<OperationStatus>, SessionError> {
        let operation = self.get(id).await?;
        let result = operation.lock().await.advance().await;
        match result {
            Ok(advance) => {
                debug!("Operation {} advanced, done: {}", id, advance.done);
                Ok(advance)
            }
            Err(SessionError::OperationClosed) => {
                if self.entries.lock().await.operations.remove(id).is_some() {
                    debug!("Evicted closed operation: {}", id);
                }
                Err(SessionError::OperationClosed)
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel operation `id` before its next step and return its state.
    pub async fn cancel(&self, id: Handle) -> Result<OperationState, SessionError> {
        let operation = self.get(id).await?;
        let mut operation = operation.lock().await;
        if operation.cancel() {
            info!("Cancelled operation: {}", id);
        }
        Ok(operation.state())
    }

    pub async fn state(&self, id: Handle) -> Result<OperationState, SessionError> {
        let operation = self.get(id).await?;
        let operation = operation.lock().await;
        Ok(operation.state())
    }

    /// Drop operation `id`, cancelling it if still live.
    pub async fn remove(&self, id: Handle) -> Result<(), SessionError> {
        let operation = {
            let mut entries = self.entries.lock().await;
            entries.operations.erase(id)?
        };
        operation.lock().await.cancel();
        info!("Removed operation: {}", id);
        Ok(())
    }

    pub async fn ids(&self) -> Vec<Handle> {
        self.entries.lock().await.operations.handles()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.operations.len()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.operations.clear();
    }
}

impl Default for OperationTable {
    fn default() -> Self {
        Self::new()
    }
}
