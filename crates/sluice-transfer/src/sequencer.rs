/// Request sequencer: correlation IDs and window refill.
///
/// Requests go out in strictly increasing offset order. Each one is recorded
/// in a caller-owned pending map until its reply (or the session) resolves
/// it; the connection never sees this bookkeeping.

use std::collections::HashMap;

use crate::connection::Connection;
use crate::error::TransferError;
use crate::frame::{CorrelationId, Request};
use crate::session::TransferSession;

/// A request on the wire, awaiting its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: CorrelationId,
    pub offset: u64,
    pub size: u32,
}

/// Allocates IDs and owns the pending map.
#[derive(Default)]
pub struct RequestSequencer {
    next_id: CorrelationId,
    pending: HashMap<CorrelationId, PendingRequest>,
    issued: u64,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next request if the window and the file allow it.
    ///
    /// `buffered` is the number of replies received but not yet committed;
    /// they count against the window. `build` turns the allocated slot into
    /// the request frame (reads just describe the range, writes pull the
    /// payload from the local source).
    ///
    /// A failed send marks nothing itself; the driver fails the session.
    pub fn issue_next<C, B>(
        &mut self,
        session: &mut TransferSession,
        buffered: usize,
        conn: &mut C,
        build: B,
    ) -> Result<Option<PendingRequest>, TransferError>
    where
        C: Connection + ?Sized,
        B: FnOnce(PendingRequest) -> Result<Request, TransferError>,
    {
        if session.fully_requested() || self.pending.len() + buffered >= session.window_limit {
            return Ok(None);
        }

        let size = session
            .remaining_to_request()
            .min(u64::from(session.chunk_size)) as u32;
        let slot = PendingRequest {
            id: self.allocate_id(),
            offset: session.requested,
            size,
        };

        let request = build(slot)?;
        conn.send(request).map_err(|source| TransferError::Transport {
            committed: session.committed,
            source,
        })?;

        session.requested += u64::from(size);
        self.pending.insert(slot.id, slot);
        self.issued += 1;
        Ok(Some(slot))
    }

    /// Remove and return the pending request for `id`, if any.
    pub fn resolve(&mut self, id: CorrelationId) -> Option<PendingRequest> {
        self.pending.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Total requests sent over the session's lifetime.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Forget everything in flight (session failed).
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Next free ID. Wraps at `u32::MAX`, skipping IDs still pending.
    fn allocate_id(&mut self) -> CorrelationId {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }
}
