/// SFTP v3 packet codec for the four packet types the engine uses.
///
/// ```text
/// [0..4]   Length (u32 BE, counts everything after itself)
/// [4]      Packet type
/// [5..9]   Request ID (u32 BE)
/// [9..]    Payload
///
/// READ   (5):   string handle, u64 offset, u32 len
/// WRITE  (6):   string handle, u64 offset, string data
/// STATUS (101): u32 code, string message, string language tag
/// DATA   (103): string data
/// ```
///
/// `string` is a u32 BE length followed by that many bytes.

use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::connection::Connection;
use crate::frame::{MAX_CHUNK_SIZE, Request, Response, StatusCode};

pub const SSH_FXP_READ: u8 = 5;
pub const SSH_FXP_WRITE: u8 = 6;
pub const SSH_FXP_STATUS: u8 = 101;
pub const SSH_FXP_DATA: u8 = 103;

/// Type byte plus request ID.
pub const PACKET_HEADER: usize = 5;

/// Largest packet body accepted: one maximal chunk plus room for the handle
/// and framing.
pub const MAX_PACKET: usize = MAX_CHUNK_SIZE as usize + 1024;

/// Language tag sent with every status.
const LANGUAGE_TAG: &[u8] = b"en";

fn put_string(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

fn finish(body: BytesMut) -> Bytes {
    let mut out = BytesMut::with_capacity(4 + body.len());
    out.put_u32(body.len() as u32);
    out.put_slice(&body);
    out.freeze()
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn truncated() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "truncated packet")
}

fn get_u32(buf: &mut Bytes) -> io::Result<u32> {
    if buf.remaining() < 4 {
        return Err(truncated());
    }
    Ok(buf.get_u32())
}

fn get_u64(buf: &mut Bytes) -> io::Result<u64> {
    if buf.remaining() < 8 {
        return Err(truncated());
    }
    Ok(buf.get_u64())
}

fn get_string(buf: &mut Bytes) -> io::Result<Bytes> {
    let len = get_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(truncated());
    }
    Ok(buf.split_to(len))
}

/// Split a packet body into (type, id, payload).
fn split_header(mut body: Bytes) -> io::Result<(u8, u32, Bytes)> {
    if body.remaining() < PACKET_HEADER {
        return Err(truncated());
    }
    let kind = body.get_u8();
    let id = body.get_u32();
    Ok((kind, id, body))
}

/// Encode a request as a complete length-prefixed packet.
pub fn encode_request(request: &Request) -> Bytes {
    let mut body = BytesMut::new();
    match request {
        Request::Read { id, handle, offset, len } => {
            body.put_u8(SSH_FXP_READ);
            body.put_u32(*id);
            put_string(&mut body, handle);
            body.put_u64(*offset);
            body.put_u32(*len);
        }
        Request::Write { id, handle, offset, data } => {
            body.put_u8(SSH_FXP_WRITE);
            body.put_u32(*id);
            put_string(&mut body, handle);
            body.put_u64(*offset);
            put_string(&mut body, data);
        }
    }
    finish(body)
}

/// Decode a request from a packet body (length prefix already stripped).
pub fn decode_request(body: Bytes) -> io::Result<Request> {
    let (kind, id, mut payload) = split_header(body)?;
    match kind {
        SSH_FXP_READ => {
            let handle = get_string(&mut payload)?;
            let offset = get_u64(&mut payload)?;
            let len = get_u32(&mut payload)?;
            Ok(Request::Read { id, handle, offset, len })
        }
        SSH_FXP_WRITE => {
            let handle = get_string(&mut payload)?;
            let offset = get_u64(&mut payload)?;
            let data = get_string(&mut payload)?;
            Ok(Request::Write { id, handle, offset, data })
        }
        other => Err(invalid(format!("unexpected request packet type {}", other))),
    }
}

/// Encode a response as a complete length-prefixed packet.
pub fn encode_response(response: &Response) -> Bytes {
    let mut body = BytesMut::new();
    match response {
        Response::Data { id, data } => {
            body.put_u8(SSH_FXP_DATA);
            body.put_u32(*id);
            put_string(&mut body, data);
        }
        Response::Status { id, code, message } => {
            body.put_u8(SSH_FXP_STATUS);
            body.put_u32(*id);
            body.put_u32(u32::from(*code));
            put_string(&mut body, message.as_bytes());
            put_string(&mut body, LANGUAGE_TAG);
        }
    }
    finish(body)
}

/// Decode a response from a packet body (length prefix already stripped).
///
/// Some servers omit the message and language tag on STATUS; both are
/// optional here.
pub fn decode_response(body: Bytes) -> io::Result<Response> {
    let (kind, id, mut payload) = split_header(body)?;
    match kind {
        SSH_FXP_DATA => Ok(Response::Data {
            id,
            data: get_string(&mut payload)?,
        }),
        SSH_FXP_STATUS => {
            let code = StatusCode::from(get_u32(&mut payload)?);
            let message = if payload.has_remaining() {
                String::from_utf8_lossy(&get_string(&mut payload)?).into_owned()
            } else {
                String::new()
            };
            Ok(Response::Status { id, code, message })
        }
        other => Err(invalid(format!("unexpected response packet type {}", other))),
    }
}

/// Read one length-prefixed packet body.
pub fn read_packet<R: Read + ?Sized>(reader: &mut R) -> io::Result<Bytes> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_PACKET {
        return Err(invalid(format!("packet of {} bytes exceeds limit of {}", len, MAX_PACKET)));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(Bytes::from(body))
}

/// [`Connection`] over any byte stream pair speaking SFTP v3 packets,
/// e.g. the stdin/stdout of an `sftp-server` subprocess.
pub struct StreamConnection<R, W> {
    reader: R,
    writer: W,
}

impl<R: Read, W: Write> StreamConnection<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: Read, W: Write> Connection for StreamConnection<R, W> {
    fn send(&mut self, request: Request) -> io::Result<()> {
        self.writer.write_all(&encode_request(&request))?;
        self.writer.flush()
    }

    fn receive(&mut self) -> io::Result<Response> {
        let body = read_packet(&mut self.reader)?;
        decode_response(body)
    }
}
