//! Error type for transfer sessions.
//!
//! Every variant records how many bytes were committed when the session
//! failed. The sink (or remote file, for uploads) holds a valid prefix of
//! exactly that length.

use std::io;

use thiserror::Error;

use crate::frame::StatusCode;

/// Terminal failure of a single transfer attempt. Nothing is retried
/// internally.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Sending a request or receiving a reply failed.
    #[error("transport error after {committed} bytes: {source}")]
    Transport {
        committed: u64,
        #[source]
        source: io::Error,
    },

    /// Malformed or mismatched reply.
    #[error("protocol error after {committed} bytes: {message}")]
    Protocol { committed: u64, message: String },

    /// Server rejected a request.
    #[error("server status {code} for offset {offset} after {committed} bytes: {message}")]
    Status {
        committed: u64,
        offset: u64,
        code: StatusCode,
        message: String,
    },

    /// Final byte count disagrees with the expected file size.
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// A structural invariant of the engine was broken.
    #[error("internal consistency error after {committed} bytes: {message}")]
    InternalConsistency { committed: u64, message: String },

    /// Writing the sink or reading the local source failed.
    #[error("local I/O error after {committed} bytes: {source}")]
    LocalIo {
        committed: u64,
        #[source]
        source: io::Error,
    },

    /// Window or chunk size out of range.
    #[error("invalid transfer config: {message}")]
    InvalidConfig { message: String },
}

impl TransferError {
    /// Bytes committed in file order before the failure.
    pub fn committed(&self) -> u64 {
        match self {
            Self::Transport { committed, .. }
            | Self::Protocol { committed, .. }
            | Self::Status { committed, .. }
            | Self::InternalConsistency { committed, .. }
            | Self::LocalIo { committed, .. } => *committed,
            Self::SizeMismatch { actual, .. } => *actual,
            Self::InvalidConfig { .. } => 0,
        }
    }

    /// True when retrying from [`committed`](Self::committed) on a fresh
    /// connection may succeed. Protocol and consistency errors will repeat.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Status { .. } | Self::LocalIo { .. }
        )
    }
}
