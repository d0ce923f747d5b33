/// Connection over a pair of crossbeam channels.
///
/// ```text
/// [Engine] --Request--> [ServerEnd.requests]  (server thread)
/// [Engine] <-Response-- [ServerEnd.responses]
/// ```
///
/// Dropping the server end closes the connection: a blocked
/// [`receive`](Connection::receive) returns `ConnectionAborted`.

use std::io;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::connection::Connection;
use crate::frame::{Request, Response};

/// Client half, handed to the transfer engine.
pub struct ChannelConnection {
    tx: Sender<Request>,
    rx: Receiver<Response>,
}

/// Server half, owned by whatever answers the requests.
pub struct ServerEnd {
    pub requests: Receiver<Request>,
    pub responses: Sender<Response>,
}

/// Create a connected pair. `capacity` bounds each direction and is raised
/// to at least 1, so a send never waits for a rendezvous.
///
/// Size it to the transfer window: with fewer slots a client blocked
/// sending requests and a server blocked sending replies wait on each other
/// forever.
pub fn channel_pair(capacity: usize) -> (ChannelConnection, ServerEnd) {
    let capacity = capacity.max(1);
    let (req_tx, req_rx) = bounded::<Request>(capacity);
    let (resp_tx, resp_rx) = bounded::<Response>(capacity);
    (
        ChannelConnection {
            tx: req_tx,
            rx: resp_rx,
        },
        ServerEnd {
            requests: req_rx,
            responses: resp_tx,
        },
    )
}

impl Connection for ChannelConnection {
    fn send(&mut self, request: Request) -> io::Result<()> {
        self.tx
            .send(request)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "server end closed"))
    }

    fn receive(&mut self) -> io::Result<Response> {
        self.rx
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionAborted, "server end closed"))
    }
}
