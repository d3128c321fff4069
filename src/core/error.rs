//! Error types for ParaKV.

use crate::core::types::{Key, NodeId, TableId, ThreadId};
use thiserror::Error;

/// Result type alias for ParaKV operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ParaKV operations.
///
/// Configuration faults (unknown table, out-of-range key, length
/// mismatch, bad worker allocation) indicate a programming error in
/// task or setup code and abort the offending operation before any
/// network dispatch.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration faults
    #[error("unknown table id: {0}")]
    UnknownTable(TableId),

    #[error("key {key} outside table {table} domain [0, {capacity})")]
    KeyOutOfRange {
        table: TableId,
        key: Key,
        capacity: Key,
    },

    #[error("key/delta length mismatch: {keys} keys, {deltas} deltas")]
    LengthMismatch { keys: usize, deltas: usize },

    #[error("worker allocation references unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("allocation of {requested} workers on node {node} exceeds pool of {pool}")]
    WorkerPoolExceeded {
        node: NodeId,
        requested: usize,
        pool: usize,
    },

    #[error("worker pool of {requested} exceeds per-node thread capacity of {max}")]
    InvalidWorkerCount { requested: usize, max: usize },

    // Engine lifecycle errors
    #[error("engine is {actual}, operation requires {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    // Transport errors
    #[error("no queue registered for thread {0}")]
    UnknownThread(ThreadId),

    #[error("channel closed for thread {0}")]
    ChannelClosed(ThreadId),

    // Task execution errors
    #[error("task instance failed: {0}")]
    TaskFailed(String),

    // Serialization errors
    #[error("message serialization failed: {0}")]
    Serialization(String),

    // Shutdown faults
    #[error("{0} requests still pending at shutdown")]
    PendingAtShutdown(usize),
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::LengthMismatch { keys: 2, deltas: 1 };
        assert!(err.to_string().contains("2 keys"));

        let err = Error::KeyOutOfRange {
            table: 0,
            key: 10,
            capacity: 8,
        };
        assert!(err.to_string().contains("key 10"));
    }
}
