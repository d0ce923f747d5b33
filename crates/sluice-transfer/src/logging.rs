/// Transfer logging trait for structured session logs.
///
/// The driver reports lifecycle and per-chunk events through a
/// [`TransferLogger`] so hosts can route them to `tracing`, a remote
/// collector, or nowhere.

use std::fmt;

use uuid::Uuid;

use crate::frame::{CorrelationId, StatusCode};
use crate::session::{Direction, TransferState};

/// Structured log entry for a transfer session.
#[derive(Debug, Clone)]
pub struct TransferLog {
    pub component: &'static str,
    pub transfer_id: Uuid,
    pub event: TransferEvent,
}

/// Transfer events that can be logged.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Session sized and configured
    Started {
        direction: Direction,
        file_size: u64,
        window_limit: usize,
        chunk_size: u32,
    },
    /// Request put on the wire
    RequestIssued {
        id: CorrelationId,
        offset: u64,
        len: u32,
    },
    /// Chunk released in file order
    ChunkCommitted {
        offset: u64,
        len: u32,
        committed: u64,
    },
    /// Reply for an unknown or already-resolved request
    StrayResponse { id: CorrelationId },
    /// Server rejected a request
    StatusReceived {
        id: CorrelationId,
        offset: u64,
        code: StatusCode,
    },
    /// State machine transition
    StateChanged {
        from: TransferState,
        to: TransferState,
    },
    /// Transfer complete
    Complete {
        total_bytes: u64,
        duration_ms: u64,
        requests: u64,
    },
    /// Session failed
    Failed { committed: u64, message: String },
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { direction, file_size, window_limit, chunk_size } => {
                write!(f, "started direction={} size={} window={} chunk={}", direction, file_size, window_limit, chunk_size)
            }
            Self::RequestIssued { id, offset, len } => {
                write!(f, "request_issued id={} offset={} len={}", id, offset, len)
            }
            Self::ChunkCommitted { offset, len, committed } => {
                write!(f, "chunk_committed offset={} len={} committed={}", offset, len, committed)
            }
            Self::StrayResponse { id } => {
                write!(f, "stray_response id={}", id)
            }
            Self::StatusReceived { id, offset, code } => {
                write!(f, "status_received id={} offset={} code={}", id, offset, code)
            }
            Self::StateChanged { from, to } => {
                write!(f, "state_changed {:?} -> {:?}", from, to)
            }
            Self::Complete { total_bytes, duration_ms, requests } => {
                write!(f, "transfer_complete bytes={} duration_ms={} requests={}", total_bytes, duration_ms, requests)
            }
            Self::Failed { committed, message } => {
                write!(f, "failed committed={}: {}", committed, message)
            }
        }
    }
}

/// Trait for transfer logging. Implementations can forward to `tracing`,
/// collect entries for inspection, or discard them.
pub trait TransferLogger: Send + Sync {
    fn log(&self, entry: TransferLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn log(&self, entry: TransferLog) {
        let tid = hex::encode(entry.transfer_id.as_bytes());
        // Lifecycle at info, per-chunk chatter at debug
        match &entry.event {
            TransferEvent::Started { .. }
            | TransferEvent::StateChanged { .. }
            | TransferEvent::Complete { .. } => {
                tracing::info!(
                    component = entry.component,
                    transfer_id = %tid,
                    "{}",
                    entry.event,
                );
            }
            TransferEvent::Failed { .. } => {
                tracing::warn!(
                    component = entry.component,
                    transfer_id = %tid,
                    "{}",
                    entry.event,
                );
            }
            _ => {
                tracing::debug!(
                    component = entry.component,
                    transfer_id = %tid,
                    "{}",
                    entry.event,
                );
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl TransferLogger for NullLogger {
    fn log(&self, _entry: TransferLog) {}
}
