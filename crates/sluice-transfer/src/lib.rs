/// Sluice: bounded-window pipelined file transfer.
///
/// Drives offset/size read and write requests against an already-open remote
/// file over a single request/response connection (SFTP and friends):
/// - Up to `window_limit` requests outstanding at once
/// - Correlation-ID dispatch owned by the caller, not the transport
/// - Out-of-order replies reassembled so the sink sees bytes in file order
/// - Upload commits advance only on server acknowledgement
/// - Failures surface with the committed prefix length for resume decisions
///
/// The engine never spawns threads. Everything happens on the caller's
/// control flow and the only blocking point is [`Connection::receive`].

pub mod channel;
pub mod config;
pub mod connection;
pub mod demux;
pub mod driver;
pub mod error;
pub mod frame;
pub mod logging;
pub mod loopback;
pub mod progress;
pub mod reassembly;
pub mod sequencer;
pub mod session;
pub mod transfer;
pub mod wire;

// Re-export key types for convenience.
pub use channel::{ChannelConnection, ServerEnd, channel_pair};
pub use config::TransferConfig;
pub use connection::{Connection, RemoteFile};
pub use driver::{Direction, TransferDriver};
pub use error::TransferError;
pub use frame::{
    CorrelationId, DEFAULT_CHUNK_SIZE, DEFAULT_WINDOW, MAX_CHUNK_SIZE, Request, Response,
    StatusCode,
};
pub use logging::{NullLogger, TracingLogger, TransferEvent, TransferLog, TransferLogger};
pub use loopback::{LoopbackRemote, ReplyOrder, spawn_loopback_server};
pub use progress::{NoProgress, ProgressReporter, SharedProgress, StepLogger};
pub use session::{SessionSnapshot, TransferState};
pub use transfer::{download, download_file, upload, upload_file};
pub use wire::StreamConnection;
