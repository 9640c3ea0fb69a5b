//! Dataset error handling
//!
//! Provides typed errors for dataset operations with descriptive messages
//! and recovery suggestions.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Classification of a failed transport call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request did not complete within the configured timeout
    Timeout,
    /// The server could not be reached
    Unreachable,
    /// The server answered with a non-2xx status
    Status(u16),
    /// The response body could not be decoded
    MalformedResponse,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Timeout => write!(f, "timeout"),
            TransportErrorKind::Unreachable => write!(f, "unreachable"),
            TransportErrorKind::Status(code) => write!(f, "status {}", code),
            TransportErrorKind::MalformedResponse => write!(f, "malformed response"),
        }
    }
}

/// A failed request to the collaboration server
#[derive(Error, Debug, Clone)]
#[error("Request to '{endpoint}' failed ({kind}): {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub endpoint: String,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }
}

/// A single patch operation that could not be applied
///
/// These are collected and returned next to the patched document rather than
/// aborting the whole patch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Patch op #{index} at '{path}' skipped: {reason}")]
pub struct PatchError {
    pub index: usize,
    pub path: String,
    pub reason: String,
}

/// Errors that can occur during dataset operations
#[derive(Error, Debug)]
pub enum DatasetError {
    /// Network, timeout or decoding failure talking to the server
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server does not know this session
    #[error("Collaborative session '{session_id}' not found")]
    SessionNotFound { session_id: String },

    /// An operation needs a session but none was created or joined
    #[error("Not in a collaborative session")]
    NoSession,

    /// Required configuration is missing or invalid
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// The property cannot be read or written through the property API
    #[error("Dataset property '{key}' cannot be set directly")]
    InvalidProperty { key: String },

    /// No sample with this id or index
    #[error("Sample not found: {id}")]
    SampleNotFound { id: String },

    /// Failed to read or write backing storage
    #[error("Storage error at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Stored or received JSON did not match the expected shape
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DatasetError {
    /// Create a storage error with path context
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DatasetError::Storage {
            path: path.into(),
            source,
        }
    }

    /// Check if retrying the same operation later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DatasetError::Transport(_) | DatasetError::Storage { .. })
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            DatasetError::Transport(e) => match e.kind {
                TransportErrorKind::Timeout | TransportErrorKind::Unreachable => {
                    Some("Check that the collaboration server is running and reachable, then retry.")
                }
                _ => None,
            },
            DatasetError::SessionNotFound { .. } => {
                Some("The session no longer exists. Create a new session or join another one.")
            }
            DatasetError::NoSession => Some("Import a dataset or join an existing session first."),
            DatasetError::Validation(_) => Some("Fix the configuration file or UDT_* environment variables."),
            _ => None,
        }
    }
}

/// Result type for dataset operations
pub type DatasetResult<T> = Result<T, DatasetError>;
