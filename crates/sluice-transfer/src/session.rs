//! Per-transfer bookkeeping: sizes, counters and the state machine position.

use std::fmt;

use uuid::Uuid;

use crate::error::TransferError;

/// Which way the bytes flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Upload => write!(f, "upload"),
        }
    }
}

/// Driver state machine.
///
/// ```text
/// Init -> Streaming -> Draining -> Done
///            |            |
///            +------------+-----> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Sized and configured, nothing sent yet.
    Init,
    /// Issuing requests while data remains.
    Streaming,
    /// Everything requested; waiting for the stragglers.
    Draining,
    Done,
    Failed,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Counters for one transfer attempt.
///
/// `committed <= requested <= file_size` holds after every driver step.
pub struct TransferSession {
    pub(crate) transfer_id: Uuid,
    pub(crate) file_size: u64,
    pub(crate) requested: u64,
    pub(crate) committed: u64,
    pub(crate) window_limit: usize,
    pub(crate) chunk_size: u32,
    /// Server status held until the driver's next safe point.
    pub(crate) last_error: Option<TransferError>,
    pub(crate) state: TransferState,
}

impl TransferSession {
    pub fn new(file_size: u64, window_limit: usize, chunk_size: u32) -> Self {
        Self {
            transfer_id: Uuid::new_v4(),
            file_size,
            requested: 0,
            committed: 0,
            window_limit,
            chunk_size,
            last_error: None,
            state: TransferState::Init,
        }
    }

    pub fn transfer_id(&self) -> Uuid {
        self.transfer_id
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn requested(&self) -> u64 {
        self.requested
    }

    pub fn committed(&self) -> u64 {
        self.committed
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn remaining_to_request(&self) -> u64 {
        self.file_size - self.requested
    }

    pub fn fully_requested(&self) -> bool {
        self.requested >= self.file_size
    }

    pub fn fully_committed(&self) -> bool {
        self.committed >= self.file_size
    }

    /// Record a deferred server error. The first one wins.
    pub(crate) fn defer_error(&mut self, err: TransferError) {
        if self.last_error.is_none() {
            self.last_error = Some(err);
        }
    }

    pub(crate) fn take_error(&mut self) -> Option<TransferError> {
        self.last_error.take()
    }
}

/// Point-in-time copy of a session plus its in-flight counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: TransferState,
    pub file_size: u64,
    pub requested: u64,
    pub committed: u64,
    pub pending: usize,
    pub buffered: usize,
    pub window_limit: usize,
}

impl SessionSnapshot {
    /// Both structural invariants: ordered counters and a respected window.
    pub fn invariants_hold(&self) -> bool {
        self.committed <= self.requested
            && self.requested <= self.file_size
            && self.pending + self.buffered <= self.window_limit
    }
}
