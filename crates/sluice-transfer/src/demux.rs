/// Response demultiplexer: one blocking receive, routed by correlation ID.
///
/// ```text
/// Data   -> size check -> CompletedChunk (download)
/// Status -> Ok on a write -> ack chunk (upload)
///        -> anything else -> deferred session error
/// unknown / already-resolved ID -> ignored
/// ```
///
/// Server-reported failures are parked on the session rather than returned,
/// so the driver raises them at its next safe point. Transport and protocol
/// faults are returned immediately.

use crate::connection::Connection;
use crate::error::TransferError;
use crate::frame::{CorrelationId, Response, StatusCode};
use crate::logging::{TransferEvent, TransferLog, TransferLogger};
use crate::reassembly::{ChunkReassembler, CompletedChunk};
use crate::sequencer::RequestSequencer;
use crate::session::{Direction, TransferSession};

/// What the last receive turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Chunk or ack handed to the reassembler.
    Completed { offset: u64 },
    /// Server error recorded on the session.
    Deferred { offset: u64 },
    /// Reply for nobody we know.
    Ignored { id: CorrelationId },
}

/// Routes replies for one session.
pub struct ResponseDemultiplexer {
    direction: Direction,
    strays: u64,
}

impl ResponseDemultiplexer {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            strays: 0,
        }
    }

    /// Replies ignored so far.
    pub fn strays(&self) -> u64 {
        self.strays
    }

    /// Block for the next reply and route it.
    pub fn receive_one<C: Connection + ?Sized>(
        &mut self,
        conn: &mut C,
        session: &mut TransferSession,
        sequencer: &mut RequestSequencer,
        reassembler: &mut ChunkReassembler,
        logger: Option<&dyn TransferLogger>,
    ) -> Result<Dispatch, TransferError> {
        let response = conn.receive().map_err(|source| TransferError::Transport {
            committed: session.committed,
            source,
        })?;
        self.dispatch(response, session, sequencer, reassembler, logger)
    }

    /// Route one already-received reply.
    pub fn dispatch(
        &mut self,
        response: Response,
        session: &mut TransferSession,
        sequencer: &mut RequestSequencer,
        reassembler: &mut ChunkReassembler,
        logger: Option<&dyn TransferLogger>,
    ) -> Result<Dispatch, TransferError> {
        let id = response.id();
        let Some(pending) = sequencer.resolve(id) else {
            self.strays += 1;
            if let Some(logger) = logger {
                logger.log(TransferLog {
                    component: "demux",
                    transfer_id: session.transfer_id,
                    event: TransferEvent::StrayResponse { id },
                });
            }
            return Ok(Dispatch::Ignored { id });
        };

        match (self.direction, response) {
            (Direction::Download, Response::Data { data, .. }) => {
                if data.len() != pending.size as usize {
                    return Err(TransferError::Protocol {
                        committed: session.committed,
                        message: format!(
                            "invalid data block size at offset {}: expected {} bytes, got {}",
                            pending.offset,
                            pending.size,
                            data.len()
                        ),
                    });
                }
                reassembler.insert(
                    session,
                    CompletedChunk {
                        offset: pending.offset,
                        size: pending.size,
                        data: Some(data),
                    },
                )?;
                Ok(Dispatch::Completed {
                    offset: pending.offset,
                })
            }
            (Direction::Upload, Response::Status { code: StatusCode::Ok, .. }) => {
                reassembler.insert(
                    session,
                    CompletedChunk {
                        offset: pending.offset,
                        size: pending.size,
                        data: None,
                    },
                )?;
                Ok(Dispatch::Completed {
                    offset: pending.offset,
                })
            }
            (Direction::Download, Response::Status { code: StatusCode::Ok, .. }) => {
                Err(TransferError::Protocol {
                    committed: session.committed,
                    message: format!("status ok in reply to read at offset {}", pending.offset),
                })
            }
            (Direction::Upload, Response::Data { .. }) => Err(TransferError::Protocol {
                committed: session.committed,
                message: format!("data in reply to write at offset {}", pending.offset),
            }),
            (_, Response::Status { code, message, .. }) => {
                if let Some(logger) = logger {
                    logger.log(TransferLog {
                        component: "demux",
                        transfer_id: session.transfer_id,
                        event: TransferEvent::StatusReceived {
                            id,
                            offset: pending.offset,
                            code,
                        },
                    });
                }
                session.defer_error(TransferError::Status {
                    committed: session.committed,
                    offset: pending.offset,
                    code,
                    message,
                });
                Ok(Dispatch::Deferred {
                    offset: pending.offset,
                })
            }
        }
    }
}
