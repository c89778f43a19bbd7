//! The per-connection I/O collaborator the core writes through (§1, §6)
//!
//! The TCP acceptor and connection loop are external collaborators per the
//! core's scope; this module only defines the [`Channel`] seam the task
//! state machine calls into, plus a production [`TcpChannel`] and an
//! in-memory [`BufferChannel`] used by tests.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Mutex;

use socket2::SockRef;

use crate::settings::SocketOption;

/// A payload handed to [`Channel::write_soon`]: either plain bytes or a
/// read-only file-backed buffer eligible for a zero-copy send (§4.4 step 4,
/// GLOSSARY "File buffer").
pub enum WritePayload<'a> {
    Bytes(&'a [u8]),
    File(&'a FileBuffer),
}

/// A read-only, descriptor-backed response body the channel may transmit
/// via `sendfile` or equivalent (§4.4 step 4).
pub struct FileBuffer {
    pub data: Vec<u8>,
    pub size: u64,
}

impl FileBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self { data, size }
    }
}

/// Per-connection I/O collaborator consumed by the core (§6 "Channel
/// interface consumed"): accepts payloads for deferred writing and exposes
/// the peer address the environment builder and proxy resolver need.
pub trait Channel: Send {
    /// Queues `payload` for transmission; returns the number of bytes
    /// accepted. May block on backpressure (§5).
    fn write_soon(&self, payload: WritePayload<'_>) -> io::Result<usize>;

    /// The connected peer's address, before any proxy-header rewriting.
    fn peer_addr(&self) -> SocketAddr;

    /// The local address the connection was accepted on.
    fn local_addr(&self) -> SocketAddr;
}

/// Production channel backed by a real `TcpStream`.
pub struct TcpChannel {
    stream: Mutex<TcpStream>,
    peer: SocketAddr,
    local: SocketAddr,
}

impl TcpChannel {
    pub fn new(stream: TcpStream, socket_options: &[SocketOption]) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        let local = stream.local_addr()?;

        let sock_ref = SockRef::from(&stream);
        for opt in socket_options {
            // `socket2` exposes the well-known options directly; `TCP_NODELAY`
            // is the only one `Settings::default` populates.
            if opt.value != 0 {
                sock_ref.set_nodelay(true)?;
            }
        }

        Ok(Self {
            stream: Mutex::new(stream),
            peer,
            local,
        })
    }
}

impl Channel for TcpChannel {
    fn write_soon(&self, payload: WritePayload<'_>) -> io::Result<usize> {
        let mut stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        match payload {
            WritePayload::Bytes(bytes) => {
                stream.write_all(bytes)?;
                Ok(bytes.len())
            }
            WritePayload::File(file) => {
                stream.write_all(&file.data)?;
                Ok(file.data.len())
            }
        }
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

/// In-memory channel for tests: records every payload handed to it in
/// order, exactly matching the byte-exact scenarios in spec §8.
pub struct BufferChannel {
    pub written: Mutex<Vec<u8>>,
    pub peer: SocketAddr,
    pub local: SocketAddr,
}

impl BufferChannel {
    pub fn new(peer: SocketAddr, local: SocketAddr) -> Self {
        Self {
            written: Mutex::new(Vec::new()),
            peer,
            local,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }
}

impl Channel for BufferChannel {
    fn write_soon(&self, payload: WritePayload<'_>) -> io::Result<usize> {
        let mut buf = self.written.lock().unwrap();
        let bytes = match payload {
            WritePayload::Bytes(b) => b,
            WritePayload::File(f) => &f.data,
        };
        buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_channel_records_writes_in_order() {
        let chan = BufferChannel::new(
            "127.0.0.1:1234".parse().unwrap(),
            "127.0.0.1:8080".parse().unwrap(),
        );
        chan.write_soon(WritePayload::Bytes(b"hello ")).unwrap();
        chan.write_soon(WritePayload::Bytes(b"world")).unwrap();
        assert_eq!(chan.contents(), b"hello world");
    }
}
