/// Chunk reassembly: out-of-order replies in, file-ordered commits out.
///
/// Downloads park each completed chunk by offset until the gap in front of
/// it closes; uploads park bare acknowledgements the same way. `flush`
/// releases the longest contiguous run starting at `committed`, so the sink
/// only ever sees an unbroken prefix of the file.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::TransferError;
use crate::progress::{self, ProgressReporter};
use crate::session::TransferSession;

/// A reply that matched its request. `data` is absent for write acks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedChunk {
    pub offset: u64,
    pub size: u32,
    pub data: Option<Bytes>,
}

/// Offset-keyed buffer of completed, not yet contiguous chunks.
#[derive(Default)]
pub struct ChunkReassembler {
    buffered: HashMap<u64, CompletedChunk>,
    buffered_bytes: u64,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a completed chunk. Two chunks at one offset means the sequencer
    /// handed out overlapping ranges, which cannot happen.
    pub fn insert(
        &mut self,
        session: &TransferSession,
        chunk: CompletedChunk,
    ) -> Result<(), TransferError> {
        if chunk.offset < session.committed || self.buffered.contains_key(&chunk.offset) {
            return Err(TransferError::InternalConsistency {
                committed: session.committed,
                message: format!("duplicate chunk at offset {}", chunk.offset),
            });
        }
        self.buffered_bytes += chunk.data.as_ref().map_or(0, |d| d.len() as u64);
        self.buffered.insert(chunk.offset, chunk);
        Ok(())
    }

    /// Release every chunk contiguous with `session.committed`, in order.
    ///
    /// `write` receives each chunk before `committed` advances past it; if
    /// it fails, `committed` stays at that chunk's offset. Returns the bytes
    /// committed by this call.
    pub fn flush<W, P>(
        &mut self,
        session: &mut TransferSession,
        mut write: W,
        progress: &mut P,
    ) -> Result<u64, TransferError>
    where
        W: FnMut(&CompletedChunk) -> Result<(), TransferError>,
        P: ProgressReporter + ?Sized,
    {
        let start = session.committed;
        while let Some(chunk) = self.buffered.remove(&session.committed) {
            self.buffered_bytes -= chunk.data.as_ref().map_or(0, |d| d.len() as u64);
            write(&chunk)?;
            session.committed += u64::from(chunk.size);
            progress::notify(progress, u64::from(chunk.size));
        }
        Ok(session.committed - start)
    }

    pub fn len(&self) -> usize {
        self.buffered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffered.is_empty()
    }

    /// Payload bytes currently held.
    pub fn buffered_bytes(&self) -> u64 {
        self.buffered_bytes
    }

    /// Drop everything buffered (session failed).
    pub fn clear(&mut self) {
        self.buffered.clear();
        self.buffered_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;

    fn chunk(offset: u64, size: u32) -> CompletedChunk {
        CompletedChunk {
            offset,
            size,
            data: Some(Bytes::from(vec![offset as u8; size as usize])),
        }
    }

    #[test]
    fn holds_back_until_gap_closes() {
        let mut session = TransferSession::new(40, 8, 10);
        session.requested = 40;
        let mut asm = ChunkReassembler::new();
        let mut written = Vec::new();

        asm.insert(&session, chunk(30, 10)).unwrap();
        asm.insert(&session, chunk(10, 10)).unwrap();
        let n = asm
            .flush(&mut session, |c| { written.push(c.offset); Ok(()) }, &mut NoProgress)
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(asm.len(), 2);
        assert_eq!(asm.buffered_bytes(), 20);

        asm.insert(&session, chunk(0, 10)).unwrap();
        let n = asm
            .flush(&mut session, |c| { written.push(c.offset); Ok(()) }, &mut NoProgress)
            .unwrap();
        assert_eq!(n, 20);
        assert_eq!(written, vec![0, 10]);
        assert_eq!(session.committed(), 20);

        asm.insert(&session, chunk(20, 10)).unwrap();
        asm.flush(&mut session, |c| { written.push(c.offset); Ok(()) }, &mut NoProgress)
            .unwrap();
        assert_eq!(written, vec![0, 10, 20, 30]);
        assert!(asm.is_empty());
        assert_eq!(asm.buffered_bytes(), 0);
    }

    #[test]
    fn duplicate_offset_is_an_internal_error() {
        let session = TransferSession::new(20, 8, 10);
        let mut asm = ChunkReassembler::new();
        asm.insert(&session, chunk(10, 10)).unwrap();
        let err = asm.insert(&session, chunk(10, 10)).unwrap_err();
        assert!(matches!(err, TransferError::InternalConsistency { .. }));
    }

    #[test]
    fn failed_write_stops_before_committing() {
        let mut session = TransferSession::new(20, 8, 10);
        let mut asm = ChunkReassembler::new();
        asm.insert(&session, chunk(0, 10)).unwrap();
        asm.insert(&session, chunk(10, 10)).unwrap();

        let err = asm
            .flush(
                &mut session,
                |c| {
                    if c.offset == 10 {
                        Err(TransferError::LocalIo {
                            committed: 10,
                            source: std::io::Error::other("disk full"),
                        })
                    } else {
                        Ok(())
                    }
                },
                &mut NoProgress,
            )
            .unwrap_err();
        assert!(matches!(err, TransferError::LocalIo { .. }));
        assert_eq!(session.committed(), 10);
    }

    #[test]
    fn progress_sees_each_committed_chunk() {
        let mut session = TransferSession::new(25, 8, 10);
        let mut asm = ChunkReassembler::new();
        let mut seen = Vec::new();
        asm.insert(&session, chunk(20, 5)).unwrap();
        asm.insert(&session, chunk(0, 10)).unwrap();
        asm.insert(&session, chunk(10, 10)).unwrap();
        asm.flush(&mut session, |_| Ok(()), &mut |n: u64| seen.push(n))
            .unwrap();
        assert_eq!(seen, vec![10, 10, 5]);
    }
}
