/// Transfer driver: the single-threaded loop tying the parts together.
///
/// ```text
/// loop:
///   [Sequencer]  refill window (Streaming only)
///   consistency check
///   [Demux]      block for one reply
///   deferred server error? -> Failed
///   [Reassembler] flush contiguous prefix -> sink / progress
///   committed == file_size? -> Done
/// ```
///
/// Each call to a `step_*` method runs one iteration so callers (and tests)
/// can observe the session between replies. The `run_*` methods loop until
/// the session is terminal.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use crate::config::TransferConfig;
use crate::connection::Connection;
use crate::demux::ResponseDemultiplexer;
use crate::error::TransferError;
use crate::frame::Request;
use crate::logging::{TransferEvent, TransferLog, TransferLogger};
use crate::progress::ProgressReporter;
use crate::reassembly::{ChunkReassembler, CompletedChunk};
use crate::sequencer::{PendingRequest, RequestSequencer};
use crate::session::{SessionSnapshot, TransferSession, TransferState};

pub use crate::session::Direction;

/// Owns every piece of state for one transfer attempt.
pub struct TransferDriver {
    direction: Direction,
    handle: Bytes,
    session: TransferSession,
    sequencer: RequestSequencer,
    reassembler: ChunkReassembler,
    demux: ResponseDemultiplexer,
    logger: Option<Arc<dyn TransferLogger>>,
    started: Instant,
    /// Bytes handed to the download sink.
    sink_bytes: u64,
}

impl TransferDriver {
    /// Size the session and validate the config. Nothing is sent yet.
    pub fn new(
        direction: Direction,
        handle: Bytes,
        file_size: u64,
        config: &TransferConfig,
    ) -> Result<Self, TransferError> {
        config.validate()?;
        let driver = Self {
            direction,
            handle,
            session: TransferSession::new(file_size, config.window_limit, config.chunk_size),
            sequencer: RequestSequencer::new(),
            reassembler: ChunkReassembler::new(),
            demux: ResponseDemultiplexer::new(direction),
            logger: config.logger.clone(),
            started: Instant::now(),
            sink_bytes: 0,
        };
        driver.log(TransferEvent::Started {
            direction,
            file_size,
            window_limit: config.window_limit,
            chunk_size: config.chunk_size,
        });
        Ok(driver)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    pub fn state(&self) -> TransferState {
        self.session.state
    }

    /// Requests sent so far.
    pub fn requests_issued(&self) -> u64 {
        self.sequencer.issued()
    }

    /// Replies ignored because nobody was waiting for them.
    pub fn stray_replies(&self) -> u64 {
        self.demux.strays()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.session.state,
            file_size: self.session.file_size,
            requested: self.session.requested,
            committed: self.session.committed,
            pending: self.sequencer.len(),
            buffered: self.reassembler.len(),
            window_limit: self.session.window_limit,
        }
    }

    /// Download until done or failed. Returns bytes written to `sink`.
    pub fn run_download<C, W, P>(
        &mut self,
        conn: &mut C,
        sink: &mut W,
        progress: &mut P,
    ) -> Result<u64, TransferError>
    where
        C: Connection + ?Sized,
        W: Write + ?Sized,
        P: ProgressReporter + ?Sized,
    {
        while !self.step_download(conn, sink, progress)?.is_terminal() {}
        Ok(self.session.committed)
    }

    /// Upload until done or failed. Returns bytes acknowledged by the server.
    pub fn run_upload<C, R, P>(
        &mut self,
        conn: &mut C,
        source: &mut R,
        progress: &mut P,
    ) -> Result<u64, TransferError>
    where
        C: Connection + ?Sized,
        R: Read + ?Sized,
        P: ProgressReporter + ?Sized,
    {
        while !self.step_upload(conn, source, progress)?.is_terminal() {}
        Ok(self.session.committed)
    }

    /// One download iteration: refill, receive one reply, flush to `sink`.
    pub fn step_download<C, W, P>(
        &mut self,
        conn: &mut C,
        sink: &mut W,
        progress: &mut P,
    ) -> Result<TransferState, TransferError>
    where
        C: Connection + ?Sized,
        W: Write + ?Sized,
        P: ProgressReporter + ?Sized,
    {
        self.expect_direction(Direction::Download)?;
        let handle = self.handle.clone();
        let mut written = 0u64;
        let result = self.step(
            conn,
            progress,
            |slot| {
                Ok(Request::Read {
                    id: slot.id,
                    handle: handle.clone(),
                    offset: slot.offset,
                    len: slot.size,
                })
            },
            |chunk| {
                if let Some(data) = &chunk.data {
                    sink.write_all(data).map_err(|err| TransferError::LocalIo {
                        committed: chunk.offset,
                        source: err,
                    })?;
                    written += data.len() as u64;
                }
                Ok(())
            },
        );
        self.sink_bytes += written;
        let state = result?;
        if state == TransferState::Done {
            self.verify_download()?;
        }
        Ok(state)
    }

    /// One upload iteration: refill from `source`, receive one ack, commit.
    pub fn step_upload<C, R, P>(
        &mut self,
        conn: &mut C,
        source: &mut R,
        progress: &mut P,
    ) -> Result<TransferState, TransferError>
    where
        C: Connection + ?Sized,
        R: Read + ?Sized,
        P: ProgressReporter + ?Sized,
    {
        self.expect_direction(Direction::Upload)?;
        let handle = self.handle.clone();
        let committed = self.session.committed;
        self.step(
            conn,
            progress,
            |slot| {
                let mut buf = vec![0u8; slot.size as usize];
                source
                    .read_exact(&mut buf)
                    .map_err(|err| TransferError::LocalIo {
                        committed,
                        source: err,
                    })?;
                Ok(Request::Write {
                    id: slot.id,
                    handle: handle.clone(),
                    offset: slot.offset,
                    data: Bytes::from(buf),
                })
            },
            |_| Ok(()),
        )
    }

    fn step<C, P, B, W>(
        &mut self,
        conn: &mut C,
        progress: &mut P,
        build: B,
        write: W,
    ) -> Result<TransferState, TransferError>
    where
        C: Connection + ?Sized,
        P: ProgressReporter + ?Sized,
        B: FnMut(PendingRequest) -> Result<Request, TransferError>,
        W: FnMut(&CompletedChunk) -> Result<(), TransferError>,
    {
        match self.session.state {
            TransferState::Done | TransferState::Failed => return Ok(self.session.state),
            TransferState::Init => {
                if self.session.file_size == 0 {
                    return Ok(self.finish());
                }
                self.transition(TransferState::Streaming);
            }
            TransferState::Streaming | TransferState::Draining => {}
        }

        if let Err(err) = self.advance(conn, progress, build, write) {
            return Err(self.fail(err));
        }
        debug_assert!(self.snapshot().invariants_hold());

        if self.session.fully_committed() {
            return Ok(self.finish());
        }
        Ok(self.session.state)
    }

    fn advance<C, P, B, W>(
        &mut self,
        conn: &mut C,
        progress: &mut P,
        mut build: B,
        mut write: W,
    ) -> Result<(), TransferError>
    where
        C: Connection + ?Sized,
        P: ProgressReporter + ?Sized,
        B: FnMut(PendingRequest) -> Result<Request, TransferError>,
        W: FnMut(&CompletedChunk) -> Result<(), TransferError>,
    {
        if self.session.state == TransferState::Streaming {
            while let Some(slot) =
                self.sequencer
                    .issue_next(&mut self.session, self.reassembler.len(), conn, &mut build)?
            {
                self.log(TransferEvent::RequestIssued {
                    id: slot.id,
                    offset: slot.offset,
                    len: slot.size,
                });
            }
            if self.session.fully_requested() {
                self.transition(TransferState::Draining);
            }
        }

        self.check_consistency()?;

        self.demux.receive_one(
            conn,
            &mut self.session,
            &mut self.sequencer,
            &mut self.reassembler,
            self.logger.as_deref(),
        )?;

        // Server errors surface here, between replies, never mid-dispatch.
        if let Some(err) = self.session.take_error() {
            return Err(err);
        }

        let logger = self.logger.as_deref();
        let transfer_id = self.session.transfer_id;
        self.reassembler.flush(
            &mut self.session,
            |chunk| {
                write(chunk)?;
                if let Some(logger) = logger {
                    logger.log(TransferLog {
                        component: "reassembler",
                        transfer_id,
                        event: TransferEvent::ChunkCommitted {
                            offset: chunk.offset,
                            len: chunk.size,
                            committed: chunk.offset + u64::from(chunk.size),
                        },
                    });
                }
                Ok(())
            },
            progress,
        )?;
        Ok(())
    }

    /// With nothing pending, no reply can ever arrive to close the gap in
    /// front of the buffered chunks.
    fn check_consistency(&self) -> Result<(), TransferError> {
        if !self.sequencer.is_empty() || self.session.fully_committed() {
            return Ok(());
        }
        let buffered = self.reassembler.len();
        let message = if buffered >= self.session.window_limit {
            format!(
                "window exhausted: no requests pending and {} buffered chunks cannot be flushed",
                buffered
            )
        } else {
            format!(
                "no requests pending with {} bytes uncommitted",
                self.session.file_size - self.session.committed
            )
        };
        Err(TransferError::InternalConsistency {
            committed: self.session.committed,
            message,
        })
    }

    /// Final byte count check. Per-chunk size checks in the demultiplexer
    /// already reject short replies, so this only trips if the sink count
    /// and `committed` drift apart.
    fn verify_download(&mut self) -> Result<(), TransferError> {
        if self.sink_bytes != self.session.file_size {
            let err = TransferError::SizeMismatch {
                expected: self.session.file_size,
                actual: self.sink_bytes,
            };
            return Err(self.fail(err));
        }
        Ok(())
    }

    fn expect_direction(&self, direction: Direction) -> Result<(), TransferError> {
        if self.direction != direction {
            return Err(TransferError::InvalidConfig {
                message: format!("driver was created for {}, not {}", self.direction, direction),
            });
        }
        Ok(())
    }

    fn finish(&mut self) -> TransferState {
        self.transition(TransferState::Done);
        self.log(TransferEvent::Complete {
            total_bytes: self.session.committed,
            duration_ms: self.started.elapsed().as_millis() as u64,
            requests: self.sequencer.issued(),
        });
        TransferState::Done
    }

    /// Enter Failed, drop everything in flight, hand the error back.
    fn fail(&mut self, err: TransferError) -> TransferError {
        self.transition(TransferState::Failed);
        self.sequencer.clear();
        self.reassembler.clear();
        self.log(TransferEvent::Failed {
            committed: err.committed(),
            message: err.to_string(),
        });
        err
    }

    fn transition(&mut self, to: TransferState) {
        let from = self.session.state;
        if from == to {
            return;
        }
        self.session.state = to;
        self.log(TransferEvent::StateChanged { from, to });
    }

    fn log(&self, event: TransferEvent) {
        if let Some(ref logger) = self.logger {
            logger.log(TransferLog {
                component: "driver",
                transfer_id: self.session.transfer_id,
                event,
            });
        }
    }
}
