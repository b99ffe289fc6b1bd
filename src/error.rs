//! Error types for the coordinator, the worker and the RPC layer.

use std::path::PathBuf;

use thiserror::Error;
use tonic::{Code, Status};

use crate::TaskKind;

/// Message carried by the status a coordinator returns once every task
/// of the job is complete.
pub const NO_MORE_TASKS: &str = "no more tasks";

/// Primary error type for all MapReduce operations.
#[derive(Debug, Error)]
pub enum MrError {
    // ========== Scheduling ==========
    /// Both phases are complete. A worker stops polling on this.
    #[error("no more tasks")]
    NoMoreTasks,

    /// A completion report named a task the job does not have.
    #[error("unknown {kind} task `{name}`")]
    UnknownTask { kind: TaskKind, name: String },

    /// The job cannot be built from the given parameters.
    #[error("invalid job: {reason}")]
    InvalidJob { reason: String },

    // ========== Transport ==========
    /// The coordinator endpoint cannot be reached.
    #[error("coordinator unreachable at {}: {reason}", socket.display())]
    Transport { socket: PathBuf, reason: String },

    /// The coordinator answered with an unexpected status.
    #[error("rpc failed: {0}")]
    Rpc(Status),

    // ========== Task execution ==========
    /// A file could not be opened, read or written.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An intermediate record could not be decoded.
    #[error("malformed record in {}:{line}: {source}", path.display())]
    Decode {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// The application's map or reduce function failed.
    #[error("{kind} function failed: {source}")]
    Workload {
        kind: TaskKind,
        #[source]
        source: anyhow::Error,
    },

    /// The thread running a task panicked or was cancelled.
    #[error("{kind} task `{name}` aborted: {reason}")]
    Aborted {
        kind: TaskKind,
        name: String,
        reason: String,
    },
}

impl MrError {
    /// Shorthand for wrapping an [`std::io::Error`] with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MrError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns false only for the graceful end-of-job signal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MrError::NoMoreTasks)
    }
}

impl From<MrError> for Status {
    fn from(err: MrError) -> Self {
        match err {
            MrError::NoMoreTasks => Status::not_found(NO_MORE_TASKS),
            err @ MrError::UnknownTask { .. } => Status::not_found(err.to_string()),
            err @ MrError::InvalidJob { .. } => Status::invalid_argument(err.to_string()),
            MrError::Rpc(status) => status,
            err => Status::internal(err.to_string()),
        }
    }
}

impl From<Status> for MrError {
    fn from(status: Status) -> Self {
        if status.code() == Code::NotFound && status.message() == NO_MORE_TASKS {
            MrError::NoMoreTasks
        } else {
            MrError::Rpc(status)
        }
    }
}

/// Result type alias for MapReduce operations.
pub type Result<T> = std::result::Result<T, MrError>;
