use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::classify::ErrorCategory;

/// Failure kinds reported by a [`RecordSink`](crate::sink::RecordSink).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InsertErrorKind {
    Timeout,
    Connectivity,
    Server,
    ConstraintViolation,
    Unknown,
}

impl fmt::Display for InsertErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InsertErrorKind::Timeout => "timeout",
            InsertErrorKind::Connectivity => "connectivity",
            InsertErrorKind::Server => "server",
            InsertErrorKind::ConstraintViolation => "constraint violation",
            InsertErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A failed bulk insert, as reported by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct InsertError {
    pub kind: InsertErrorKind,
    pub message: String,
}

impl InsertError {
    pub fn new(kind: InsertErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(InsertErrorKind::Timeout, message)
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::new(InsertErrorKind::Connectivity, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(InsertErrorKind::Server, message)
    }

    pub fn constraint_violation(message: impl Into<String>) -> Self {
        Self::new(InsertErrorKind::ConstraintViolation, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(InsertErrorKind::Unknown, message)
    }
}

/// Returned when a cancellation token fires during a suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Terminal outcome of a single batch that did not succeed.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch {batch_index} failed after {attempts} attempts with retriable {category} error: {source}")]
    RetriesExhausted {
        batch_index: u64,
        attempts: u32,
        category: ErrorCategory,
        #[source]
        source: InsertError,
    },

    #[error("batch {batch_index} failed on attempt {attempts} with non-retriable {category} error: {source}")]
    Permanent {
        batch_index: u64,
        attempts: u32,
        category: ErrorCategory,
        #[source]
        source: InsertError,
    },

    #[error("batch {batch_index} cancelled")]
    Cancelled { batch_index: u64 },
}

impl BatchError {
    pub fn batch_index(&self) -> u64 {
        match self {
            BatchError::RetriesExhausted { batch_index, .. }
            | BatchError::Permanent { batch_index, .. }
            | BatchError::Cancelled { batch_index } => *batch_index,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, BatchError::Cancelled { .. })
    }
}

/// Errors surfaced by [`BatchScheduler`](crate::scheduler::BatchScheduler).
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Count must be between {min} and {max}, got {count}")]
    Validation { count: u64, min: u64, max: u64 },

    #[error("invalid scheduler settings: {0}")]
    InvalidSettings(String),

    #[error("generation failed after {completed_batches}/{total_batches} batches: {source}")]
    Failed {
        completed_batches: u64,
        total_batches: u64,
        #[source]
        source: BatchError,
    },

    #[error("generation cancelled after {completed_batches}/{total_batches} batches")]
    Cancelled {
        completed_batches: u64,
        total_batches: u64,
    },

    #[error("batch task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl GenerationError {
    pub fn is_validation(&self) -> bool {
        matches!(self, GenerationError::Validation { .. })
    }
}
