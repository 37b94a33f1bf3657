//! The uplink connection.
//!
//! A `Link` is one established socket plus the per-connection state the
//! poll loop needs: the inbound framer, bytes claimed from the outbound
//! queue but not yet written, and whether the socket can take writes.
//! A new connection always gets a fresh `Link`; nothing carries over.

use crate::runtime::framer::LineFramer;
use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the uplink runtime.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("failed to resolve uplink {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to uplink {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Current state of the uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No socket; the next poll iteration connects.
    Absent,
    /// Blocking connect in progress.
    Connecting,
    /// Socket registered with the poll loop.
    Established,
}

/// Outcome of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushResult {
    /// Everything pending was written.
    Done,
    /// The socket stopped accepting bytes; the rest waits for write readiness.
    Blocked,
    /// The write failed and the pending bytes were discarded.
    Dropped { bytes: usize },
}

/// An established uplink connection.
pub struct Link {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    pub framer: LineFramer,
    /// Bytes claimed from the outbound queue, not yet accepted by the socket.
    pending: BytesMut,
    /// Set by write-readiness events, cleared when a write would block.
    write_ready: bool,
}

impl Link {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self {
            stream,
            peer_addr,
            framer: LineFramer::new(),
            pending: BytesMut::new(),
            write_ready: false,
        }
    }

    /// Queue bytes behind anything already pending.
    pub fn stage(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Bytes waiting to be written.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn set_write_ready(&mut self) {
        self.write_ready = true;
    }

    pub fn is_write_ready(&self) -> bool {
        self.write_ready
    }

    /// Write as much pending data as the socket takes.
    ///
    /// Delivery is best effort: a hard write error discards what was pending
    /// and is not retried. A broken socket is noticed by the read side.
    pub fn flush(&mut self) -> FlushResult {
        while !self.pending.is_empty() {
            match self.stream.write(&self.pending) {
                Ok(0) => return self.drop_pending(),
                Ok(n) => self.pending.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.write_ready = false;
                    return FlushResult::Blocked;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => return self.drop_pending(),
            }
        }
        FlushResult::Done
    }

    fn drop_pending(&mut self) -> FlushResult {
        let bytes = self.pending.len();
        self.pending.clear();
        FlushResult::Dropped { bytes }
    }
}

/// Open a blocking connection to `host:port`, then switch it to
/// non-blocking mode for the poll loop.
///
/// Every resolved address is tried in order; the last failure is reported.
pub fn connect(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<(TcpStream, SocketAddr), PeerError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| PeerError::Resolve {
            host: host.to_string(),
            source,
        })?
        .collect();

    let mut last_error = io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");

    for addr in addrs {
        match connect_addr(addr, timeout) {
            Ok(stream) => return Ok((TcpStream::from_std(stream), addr)),
            Err(e) => last_error = e,
        }
    }

    Err(PeerError::Connect {
        host: host.to_string(),
        port,
        source: last_error,
    })
}

fn connect_addr(addr: SocketAddr, timeout: Duration) -> io::Result<std::net::TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.connect_timeout(&addr.into(), timeout)?;
    socket.set_nodelay(true)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    fn pair() -> (Link, std::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let (stream, addr) = connect("127.0.0.1", port, Duration::from_secs(2)).unwrap();
        let (server, _) = listener.accept().unwrap();
        (Link::new(stream, addr), server)
    }

    #[test]
    fn test_connect_and_flush() {
        let (mut link, mut server) = pair();

        link.stage(b"PASS a\r\n");
        link.stage(b"SERVER b 1 :c\r\n");
        assert_eq!(link.pending_len(), 23);

        assert_eq!(link.flush(), FlushResult::Done);
        assert_eq!(link.pending_len(), 0);

        let mut buf = [0u8; 23];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"PASS a\r\nSERVER b 1 :c\r\n");
    }

    #[test]
    fn test_flush_nothing_pending() {
        let (mut link, _server) = pair();
        assert_eq!(link.flush(), FlushResult::Done);
    }

    #[test]
    fn test_new_link_not_write_ready() {
        let (mut link, _server) = pair();
        assert!(!link.is_write_ready());
        link.set_write_ready();
        assert!(link.is_write_ready());
        assert!(link.framer.is_empty());
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to find a port nothing listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        match connect("127.0.0.1", port, Duration::from_secs(2)) {
            Err(PeerError::Connect { port: p, .. }) => assert_eq!(p, port),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connected to a closed port"),
        }
    }
}
