//! Handle registry for session-owned objects.
//!
//! Clients never see object identity, only integer handles. The registry
//! provides:
//! - A monotonically increasing handle counter starting at 1 (never recycled)
//! - Owning handle tables for models and deferred captures
//! - The [`SessionState`] bundle guarded by the session's single lock
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │          Mutex<SessionState>                  │
//! │  ┌──────────────┐ ┌─────────┐ ┌────────────┐  │
//! │  │HandleAllocator│ │ models  │ │  captures  │  │
//! │  └──────────────┘ └─────────┘ └────────────┘  │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Lookups hand out clones (`Arc`s or owned snapshots) so nothing borrowed
//! from a table outlives the critical section.

use std::collections::HashMap;
use std::sync::Arc;

use crate::capture::DeferredCapture;
use crate::error::SessionError;
use crate::model::ModelSession;

/// Opaque handle issued to remote callers.
pub type Handle = i32;

// =============================================================================
// HandleAllocator
// =============================================================================

/// Monotonic handle counter.
///
/// The first handle issued is 1; zero and negative values are never issued
/// and may be used by callers as "invalid" sentinels.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    last: Handle,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next handle.
    pub fn allocate(&mut self) -> Handle {
        self.last += 1;
        self.last
    }

    /// The most recently issued handle (0 if none yet).
    pub fn last(&self) -> Handle {
        self.last
    }
}

// =============================================================================
// HandleTable
// =============================================================================

/// Owning map from handle to object.
#[derive(Debug)]
pub struct HandleTable<T> {
    kind: &'static str,
    entries: HashMap<Handle, T>,
}

impl<T> HandleTable<T> {
    /// Create an empty table. `kind` names the object type in errors.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, handle: Handle, value: T) {
        self.entries.insert(handle, value);
    }

    /// Look up a live entry.
    pub fn lookup(&self, handle: Handle) -> Result<&T, SessionError> {
        self.entries.get(&handle).ok_or(SessionError::InvalidHandle {
            kind: self.kind,
            handle,
        })
    }

    pub fn lookup_mut(&mut self, handle: Handle) -> Result<&mut T, SessionError> {
        let kind = self.kind;
        self.entries
            .get_mut(&handle)
            .ok_or(SessionError::InvalidHandle { kind, handle })
    }

    /// Remove an entry, failing if it is not present.
    pub fn erase(&mut self, handle: Handle) -> Result<T, SessionError> {
        self.entries.remove(&handle).ok_or(SessionError::InvalidHandle {
            kind: self.kind,
            handle,
        })
    }

    /// Remove an entry if present.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        self.entries.remove(&handle)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Handles currently live, in ascending order.
    pub fn handles(&self) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self.entries.keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

// =============================================================================
// SessionState
// =============================================================================

/// Everything protected by the session lock: the shared handle counter and
/// both handle tables.
///
/// Models and deferred captures draw from the same counter, so a handle value
/// identifies at most one object in the session.
#[derive(Debug)]
pub struct SessionState {
    pub handles: HandleAllocator,
    pub models: HandleTable<Arc<ModelSession>>,
    pub captures: HandleTable<DeferredCapture>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            handles: HandleAllocator::new(),
            models: HandleTable::new("model"),
            captures: HandleTable::new("deferred capture"),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
