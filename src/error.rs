//! Error types for the grid library

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridError {
    /// The shared-memory segment or its lock could not be created, sized or mapped.
    /// Fatal at startup: there is no degraded mode without the shared state.
    #[error("cannot {op} shared memory `{name}`: {source}")]
    SharedMemory {
        op: &'static str,
        name: String,
        #[source]
        source: io::Error,
    },

    /// Requested grid does not fit the fixed cell capacity
    #[error("grid size {requested} is outside 1..={max}")]
    InvalidGridSize { requested: i64, max: usize },

    #[error("cell ({row}, {col}) is outside a {size}x{size} grid")]
    CellOutOfRange { row: usize, col: usize, size: usize },

    /// A persisted config field did not parse; the field keeps its default
    #[error("config line {line}: {reason}")]
    ConfigFormat { line: usize, reason: String },

    #[error("invalid argument `{flag}`: {reason}")]
    InvalidArgument { flag: String, reason: String },

    /// The notification channel itself could not be set up
    #[error("update channel: {0}")]
    Broadcast(#[source] io::Error),

    #[error("peer {peer} did not accept the update within {timeout_ms}ms")]
    PeerUnresponsive { peer: String, timeout_ms: u64 },
}

pub type Result<T, E = GridError> = std::result::Result<T, E>;

impl GridError {
    pub(crate) fn shm(op: &'static str, name: &str, source: io::Error) -> Self {
        GridError::SharedMemory {
            op,
            name: name.to_string(),
            source,
        }
    }
}
