/// Frame-in/frame-out view of the remote file server.
///
/// Implementations own framing and transport. The engine owns correlation:
/// it assigns every request ID and keeps its own map of what is pending, so
/// a connection never needs to know which replies belong to whom.

use std::io;

use bytes::Bytes;

use crate::frame::{Request, Response};

/// Duplex request/response channel to one remote server.
///
/// Must tolerate at least `window_limit` unanswered requests. Closing the
/// underlying transport is the only way to cancel a transfer blocked in
/// [`receive`](Connection::receive).
pub trait Connection {
    /// Queue one request for the remote.
    fn send(&mut self, request: Request) -> io::Result<()>;

    /// Block until the next reply arrives, in whatever order the server
    /// chose to answer.
    fn receive(&mut self) -> io::Result<Response>;
}

impl<C: Connection + ?Sized> Connection for &mut C {
    fn send(&mut self, request: Request) -> io::Result<()> {
        (**self).send(request)
    }

    fn receive(&mut self) -> io::Result<Response> {
        (**self).receive()
    }
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn send(&mut self, request: Request) -> io::Result<()> {
        (**self).send(request)
    }

    fn receive(&mut self) -> io::Result<Response> {
        (**self).receive()
    }
}

/// An already-opened remote file. Opening, stat-ing and closing it are the
/// caller's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub handle: Bytes,
    pub size: u64,
}

impl RemoteFile {
    pub fn new(handle: impl Into<Bytes>, size: u64) -> Self {
        Self {
            handle: handle.into(),
            size,
        }
    }
}
