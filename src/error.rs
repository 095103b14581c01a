use std::path::PathBuf;

use thiserror::Error;

use crate::registry::Handle;

/// Failures reported by the external collaborators (device, reconstruction,
/// persistence, algorithm engine).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// Capture hardware or driver failure
    #[error("device error: {0}")]
    Device(String),

    /// Frame could not be reconstructed into a mesh
    #[error("reconstruction error: {0}")]
    Reconstruction(String),

    /// Project could not be opened, read or written
    #[error("persistence error: {0}")]
    Persistence(String),

    /// An algorithm ran and reported failure
    #[error("algorithm '{name}' failed: {message}")]
    Algorithm { name: String, message: String },

    /// The algorithm engine does not know this algorithm
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Native model resources could not be released
    #[error("release error: {0}")]
    Release(String),
}

/// Errors surfaced by the scanner session and its operations.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// A device-touching call was made with no scanner bound
    #[error("no scanner available")]
    NoDevice,

    /// Unknown model, capture or operation handle
    #[error("invalid {kind} handle: {handle}")]
    InvalidHandle { kind: &'static str, handle: Handle },

    /// Index outside `[0, count)`
    #[error("invalid {what} index: {index} (count is {count})")]
    InvalidIndex {
        what: &'static str,
        index: usize,
        count: usize,
    },

    /// Object is not in a state that supports the request
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Project name does not match `^[A-Za-z0-9_-]+$`
    #[error("invalid project name: {0:?}")]
    InvalidName(String),

    /// Save target directory is already present
    #[error("project already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// Save/load attempted before a save directory was configured
    #[error("project save path not specified")]
    NoSavePath,

    /// Configured save path is not a directory
    #[error("project save path is not a directory: {}", .0.display())]
    InvalidSavePath(PathBuf),

    #[error("{context}: {source}")]
    Device {
        context: String,
        #[source]
        source: EngineError,
    },

    #[error("{context}: {source}")]
    Reconstruction {
        context: String,
        #[source]
        source: EngineError,
    },

    #[error("{context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: EngineError,
    },

    #[error("{context}: {source}")]
    Algorithm {
        context: String,
        #[source]
        source: EngineError,
    },

    /// Local filesystem failure while preparing a project directory
    #[error("{context}: {message}")]
    Io { context: String, message: String },

    /// Advance requested after the operation reached a terminal state
    #[error("operation is closed")]
    OperationClosed,

    /// Operation ran past its wall-clock budget
    #[error("operation timed out after {steps} step(s)")]
    OperationTimedOut { steps: usize },
}

impl SessionError {
    pub fn device(context: impl Into<String>, source: EngineError) -> Self {
        SessionError::Device {
            context: context.into(),
            source,
        }
    }

    pub fn reconstruction(context: impl Into<String>, source: EngineError) -> Self {
        SessionError::Reconstruction {
            context: context.into(),
            source,
        }
    }

    pub fn persistence(context: impl Into<String>, source: EngineError) -> Self {
        SessionError::Persistence {
            context: context.into(),
            source,
        }
    }

    pub fn algorithm(context: impl Into<String>, source: EngineError) -> Self {
        SessionError::Algorithm {
            context: context.into(),
            source,
        }
    }

    pub fn io(context: impl Into<String>, err: std::io::Error) -> Self {
        SessionError::Io {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// True for errors raised by request validation, before any engine call.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidHandle { .. }
                | SessionError::InvalidIndex { .. }
                | SessionError::InvalidState(_)
                | SessionError::InvalidName(_)
                | SessionError::InvalidSavePath(_)
        )
    }
}
