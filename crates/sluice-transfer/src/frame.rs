/// Frames exchanged with the remote file server.
///
/// The engine only ever emits reads and writes against an open handle and
/// only ever consumes data and status replies. Byte layout on the wire is the
/// connection's business (see [`crate::wire`] for SFTP v3).

use std::fmt;

use bytes::Bytes;

/// Default number of requests kept in flight.
pub const DEFAULT_WINDOW: usize = 48;

/// Default bytes per read/write request (32 KiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 0x8000;

/// Largest chunk the engine will request. SFTP servers are only required to
/// honour 32 KiB; OpenSSH caps reads at 256 KiB.
pub const MAX_CHUNK_SIZE: u32 = 256 * 1024;

/// Caller-assigned tag linking a request to its eventual reply.
pub type CorrelationId = u32;

/// Request sent to the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Read `len` bytes at `offset`.
    Read {
        id: CorrelationId,
        handle: Bytes,
        offset: u64,
        len: u32,
    },
    /// Write `data` at `offset`.
    Write {
        id: CorrelationId,
        handle: Bytes,
        offset: u64,
        data: Bytes,
    },
}

impl Request {
    pub fn id(&self) -> CorrelationId {
        match self {
            Self::Read { id, .. } | Self::Write { id, .. } => *id,
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            Self::Read { offset, .. } | Self::Write { offset, .. } => *offset,
        }
    }

    pub fn handle(&self) -> &Bytes {
        match self {
            Self::Read { handle, .. } | Self::Write { handle, .. } => handle,
        }
    }
}

/// Reply received from the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Payload answering a read.
    Data { id: CorrelationId, data: Bytes },
    /// Outcome of a request. `Ok` acknowledges a write.
    Status {
        id: CorrelationId,
        code: StatusCode,
        message: String,
    },
}

impl Response {
    pub fn id(&self) -> CorrelationId {
        match self {
            Self::Data { id, .. } | Self::Status { id, .. } => *id,
        }
    }
}

/// Server status codes (SFTP v3 numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Eof,
    NoSuchFile,
    PermissionDenied,
    Failure,
    BadMessage,
    NoConnection,
    ConnectionLost,
    OpUnsupported,
    Other(u32),
}

impl From<u32> for StatusCode {
    fn from(code: u32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Eof,
            2 => Self::NoSuchFile,
            3 => Self::PermissionDenied,
            4 => Self::Failure,
            5 => Self::BadMessage,
            6 => Self::NoConnection,
            7 => Self::ConnectionLost,
            8 => Self::OpUnsupported,
            other => Self::Other(other),
        }
    }
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::Ok => 0,
            StatusCode::Eof => 1,
            StatusCode::NoSuchFile => 2,
            StatusCode::PermissionDenied => 3,
            StatusCode::Failure => 4,
            StatusCode::BadMessage => 5,
            StatusCode::NoConnection => 6,
            StatusCode::ConnectionLost => 7,
            StatusCode::OpUnsupported => 8,
            StatusCode::Other(other) => other,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Eof => write!(f, "end of file"),
            Self::NoSuchFile => write!(f, "no such file"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::Failure => write!(f, "failure"),
            Self::BadMessage => write!(f, "bad message"),
            Self::NoConnection => write!(f, "no connection"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::OpUnsupported => write!(f, "operation unsupported"),
            Self::Other(code) => write!(f, "status {}", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_keep_unknown_values() {
        assert_eq!(StatusCode::from(4), StatusCode::Failure);
        assert_eq!(StatusCode::from(31), StatusCode::Other(31));
        assert_eq!(u32::from(StatusCode::Other(31)), 31);
        assert_eq!(u32::from(StatusCode::PermissionDenied), 3);
    }

    #[test]
    fn request_accessors() {
        let req = Request::Write {
            id: 9,
            handle: Bytes::from_static(b"h1"),
            offset: 4096,
            data: Bytes::from_static(b"abc"),
        };
        assert_eq!(req.id(), 9);
        assert_eq!(req.offset(), 4096);
        assert_eq!(req.handle().as_ref(), b"h1");
    }
}
