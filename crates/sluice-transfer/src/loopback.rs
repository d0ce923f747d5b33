/// In-process remote file server.
///
/// Two flavours:
/// - [`LoopbackRemote`] implements [`Connection`] directly. Replies are
///   produced on `receive`, in a chosen order, with optional fault
///   injection. Deterministic, single-threaded; what the tests use.
/// - [`spawn_loopback_server`] answers a [`ChannelConnection`] from its own
///   thread after a fixed latency, which is what makes pipelining pay off.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::RecvTimeoutError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::channel::{ChannelConnection, channel_pair};
use crate::connection::Connection;
use crate::frame::{CorrelationId, Request, Response, StatusCode};

/// Handle under which the loopback file is "open".
pub const LOOPBACK_HANDLE: &[u8] = b"loopback-0";

/// Largest file the loopback store will grow to (1 GiB).
pub const MAX_LOOPBACK_SIZE: u64 = 1 << 30;

/// Order in which queued requests are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOrder {
    Fifo,
    Lifo,
    /// Uniformly random among outstanding requests, reproducible by seed.
    Shuffled { seed: u64 },
}

/// One request as the remote saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestRecord {
    pub id: CorrelationId,
    pub offset: u64,
    pub len: u32,
    pub write: bool,
}

/// File contents plus the logic to answer reads and writes against them.
struct RemoteFileStore {
    handle: Bytes,
    contents: Vec<u8>,
}

impl RemoteFileStore {
    fn new(contents: Vec<u8>) -> Self {
        Self {
            handle: Bytes::from_static(LOOPBACK_HANDLE),
            contents,
        }
    }

    fn answer(&mut self, request: Request) -> Response {
        let id = request.id();
        if request.handle() != &self.handle {
            return Response::Status {
                id,
                code: StatusCode::Failure,
                message: "invalid handle".into(),
            };
        }
        match request {
            Request::Read { offset, len, .. } => {
                let size = self.contents.len() as u64;
                if offset >= size {
                    return Response::Status {
                        id,
                        code: StatusCode::Eof,
                        message: "end of file".into(),
                    };
                }
                let end = (offset + u64::from(len)).min(size);
                Response::Data {
                    id,
                    data: Bytes::copy_from_slice(&self.contents[offset as usize..end as usize]),
                }
            }
            Request::Write { offset, data, .. } => {
                let end = offset
                    .checked_add(data.len() as u64)
                    .filter(|end| *end <= MAX_LOOPBACK_SIZE)
                    .and_then(|end| usize::try_from(end).ok());
                let Some(end) = end else {
                    return Response::Status {
                        id,
                        code: StatusCode::Failure,
                        message: format!("write at offset {} exceeds loopback storage", offset),
                    };
                };
                let start = end - data.len();
                if self.contents.len() < end {
                    self.contents.resize(end, 0);
                }
                self.contents[start..end].copy_from_slice(&data);
                Response::Status {
                    id,
                    code: StatusCode::Ok,
                    message: String::new(),
                }
            }
        }
    }
}

/// Scriptable remote answering on the caller's thread.
pub struct LoopbackRemote {
    store: RemoteFileStore,
    order: ReplyOrder,
    rng: StdRng,
    queue: VecDeque<Request>,
    extra: VecDeque<Response>,
    short_replies: HashMap<u64, u32>,
    failures: HashMap<u64, (StatusCode, String)>,
    close_after: Option<usize>,
    duplicate_replies: bool,
    records: Vec<RequestRecord>,
    replies: Vec<u64>,
    max_outstanding: usize,
    closed: bool,
}

impl LoopbackRemote {
    pub fn new(contents: Vec<u8>, order: ReplyOrder) -> Self {
        let seed = match order {
            ReplyOrder::Shuffled { seed } => seed,
            _ => 0,
        };
        Self {
            store: RemoteFileStore::new(contents),
            order,
            rng: StdRng::seed_from_u64(seed),
            queue: VecDeque::new(),
            extra: VecDeque::new(),
            short_replies: HashMap::new(),
            failures: HashMap::new(),
            close_after: None,
            duplicate_replies: false,
            records: Vec::new(),
            replies: Vec::new(),
            max_outstanding: 0,
            closed: false,
        }
    }

    /// Answer the read at `offset` with only `len` bytes.
    pub fn short_reply_at(mut self, offset: u64, len: u32) -> Self {
        self.short_replies.insert(offset, len);
        self
    }

    /// Answer the request at `offset` with a failure status.
    pub fn fail_at(mut self, offset: u64, code: StatusCode, message: &str) -> Self {
        self.failures.insert(offset, (code, message.to_string()));
        self
    }

    /// Drop the connection once `replies` replies have been delivered.
    pub fn close_after(mut self, replies: usize) -> Self {
        self.close_after = Some(replies);
        self
    }

    /// Deliver every reply twice.
    pub fn duplicate_replies(mut self) -> Self {
        self.duplicate_replies = true;
        self
    }

    /// Queue an arbitrary reply ahead of the next real one.
    pub fn inject(&mut self, response: Response) {
        self.extra.push_back(response);
    }

    pub fn handle(&self) -> &Bytes {
        &self.store.handle
    }

    pub fn contents(&self) -> &[u8] {
        &self.store.contents
    }

    pub fn into_contents(self) -> Vec<u8> {
        self.store.contents
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> &[RequestRecord] {
        &self.records
    }

    /// Offsets answered, in reply order.
    pub fn replies(&self) -> &[u64] {
        &self.replies
    }

    /// Most requests ever outstanding at once.
    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding
    }

    fn next_request(&mut self) -> Option<Request> {
        match self.order {
            ReplyOrder::Fifo => self.queue.pop_front(),
            ReplyOrder::Lifo => self.queue.pop_back(),
            ReplyOrder::Shuffled { .. } => {
                if self.queue.is_empty() {
                    return None;
                }
                let idx = self.rng.random_range(0..self.queue.len());
                self.queue.remove(idx)
            }
        }
    }
}

impl Connection for LoopbackRemote {
    fn send(&mut self, request: Request) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "loopback remote closed"));
        }
        let (offset, len, write) = match &request {
            Request::Read { offset, len, .. } => (*offset, *len, false),
            Request::Write { offset, data, .. } => (*offset, data.len() as u32, true),
        };
        self.records.push(RequestRecord {
            id: request.id(),
            offset,
            len,
            write,
        });
        self.queue.push_back(request);
        self.max_outstanding = self.max_outstanding.max(self.queue.len());
        Ok(())
    }

    fn receive(&mut self) -> io::Result<Response> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "loopback remote closed"));
        }
        if let Some(response) = self.extra.pop_front() {
            return Ok(response);
        }
        if self.close_after == Some(self.replies.len()) {
            self.closed = true;
            self.queue.clear();
            return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "loopback remote closed"));
        }
        let Some(request) = self.next_request() else {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no outstanding requests"));
        };

        let id = request.id();
        let offset = request.offset();
        let response = if let Some((code, message)) = self.failures.get(&offset) {
            Response::Status {
                id,
                code: *code,
                message: message.clone(),
            }
        } else {
            match self.store.answer(request) {
                Response::Data { id, data } => match self.short_replies.get(&offset) {
                    Some(&len) => Response::Data {
                        id,
                        data: data.slice(..(len as usize).min(data.len())),
                    },
                    None => Response::Data { id, data },
                },
                status => status,
            }
        };

        self.replies.push(offset);
        if self.duplicate_replies {
            self.extra.push_back(response.clone());
        }
        Ok(response)
    }
}

/// Serve `contents` from a background thread, answering each request
/// `latency` after it arrives. `capacity` sizes both channel directions
/// (see [`channel_pair`]); pass the transfer's `window_limit`.
///
/// The thread exits once the client side is dropped and returns the file
/// contents (uploads land there).
pub fn spawn_loopback_server(
    contents: Vec<u8>,
    latency: Duration,
    capacity: usize,
) -> (ChannelConnection, JoinHandle<Vec<u8>>) {
    let (conn, server) = channel_pair(capacity);
    let handle = std::thread::spawn(move || {
        let mut store = RemoteFileStore::new(contents);
        let mut in_flight: VecDeque<(Instant, Request)> = VecDeque::new();
        let mut served: u64 = 0;

        loop {
            let now = Instant::now();
            while in_flight.front().is_some_and(|(due, _)| *due <= now) {
                if let Some((_, request)) = in_flight.pop_front() {
                    if server.responses.send(store.answer(request)).is_err() {
                        tracing::debug!(served, "loopback client went away");
                        return store.contents;
                    }
                    served += 1;
                }
            }

            let next = match in_flight.front() {
                Some((due, _)) => server
                    .requests
                    .recv_timeout(due.saturating_duration_since(Instant::now())),
                None => server
                    .requests
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };
            match next {
                Ok(request) => in_flight.push_back((Instant::now() + latency, request)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::debug!(served, "loopback server stopped");
                    return store.contents;
                }
            }
        }
    });
    (conn, handle)
}
