//! mio event loop for the uplink connection.
//!
//! Readiness-based model: poll tells us when the socket is ready, then we
//! perform non-blocking read/write syscalls. Uses epoll on Linux, kqueue on
//! macOS.
//!
//! Each turn of the loop:
//! 1. connects if there is no link (sending the handshake first),
//! 2. waits for readiness, bounded by the poll interval,
//! 3. drains the socket into the framer and hands complete lines over,
//! 4. claims the outbound queue and writes what the socket accepts.
//!
//! The socket is only ever touched from this thread. Producers on other
//! threads reach it through `OutboundQueue`, whose waker cuts the poll wait
//! short.

use crate::config::Config;
use crate::console::Console;
use crate::protocol::handshake;
use crate::runtime::connection::{connect, ConnState, FlushResult, Link, PeerError};
use crate::runtime::queue::{LineSender, OutboundQueue, LINE_TERMINATOR};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

pub const UPLINK_TOKEN: Token = Token(0);
pub const WAKER_TOKEN: Token = Token(1);

/// Bytes read per syscall.
const READ_CHUNK: usize = 4096;

const EVENT_CAPACITY: usize = 16;

/// Upper bound for the doubling reconnect delay.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Counters kept across reconnects.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub connects: u64,
    pub failed_connects: u64,
    pub lines_in: u64,
    pub bytes_out: u64,
    pub bytes_dropped: u64,
}

/// Owner of the uplink socket.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    config: Config,
    outbound: OutboundQueue,
    lines: LineSender,
    console: Console,
    shutdown: Arc<AtomicBool>,
    link: Option<Link>,
    state: ConnState,
    stats: LoopStats,
}

impl EventLoop {
    pub fn new(
        poll: Poll,
        config: Config,
        outbound: OutboundQueue,
        lines: LineSender,
        console: Console,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            config,
            outbound,
            lines,
            console,
            shutdown,
            link: None,
            state: ConnState::Absent,
            stats: LoopStats::default(),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Run until shutdown is requested or the uplink cannot be reached.
    pub fn run(mut self) -> Result<(), PeerError> {
        info!(
            uplink = %self.config.identity.uplink,
            port = self.config.port,
            name = %self.config.identity.name,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Starting uplink poll loop"
        );

        let result = loop {
            if self.shutdown.load(Ordering::Acquire) {
                break Ok(());
            }
            if let Err(e) = self.turn() {
                break Err(e);
            }
        };

        self.teardown();
        info!(
            connects = self.stats.connects,
            failed_connects = self.stats.failed_connects,
            lines_in = self.stats.lines_in,
            bytes_out = self.stats.bytes_out,
            bytes_dropped = self.stats.bytes_dropped,
            "Uplink poll loop stopped"
        );
        result
    }

    /// One iteration of the loop.
    pub fn turn(&mut self) -> Result<(), PeerError> {
        if self.link.is_none() {
            self.establish()?;
            if self.link.is_none() {
                // Shutdown arrived while backing off.
                return Ok(());
            }
        }

        match self.poll.poll(&mut self.events, Some(self.config.poll_interval)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let mut readable = false;
        let mut writable = false;
        for event in self.events.iter() {
            // Waker events need no handling: every turn claims the queue.
            if event.token() == UPLINK_TOKEN {
                readable |= event.is_readable() || event.is_read_closed() || event.is_error();
                writable |= event.is_writable();
            }
        }

        if readable {
            if let Err(e) = self.handle_readable() {
                warn!(error = %e, "Uplink connection lost");
                self.teardown();
                return Ok(());
            }
        }

        if writable {
            if let Some(link) = self.link.as_mut() {
                link.set_write_ready();
            }
        }

        self.flush();
        Ok(())
    }

    /// Connect, retrying per the configured policy.
    fn establish(&mut self) -> Result<(), PeerError> {
        let host = self.config.identity.uplink.clone();
        let port = self.config.port;
        let limit = self.config.connect_attempts;
        let mut delay = self.config.reconnect_delay;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.state = ConnState::Connecting;
            debug!(host = %host, port, attempt, "Connecting to uplink");

            match connect(&host, port, self.config.connect_timeout) {
                Ok((stream, addr)) => return self.attach(stream, addr).map_err(PeerError::from),
                Err(e) => {
                    self.state = ConnState::Absent;
                    self.stats.failed_connects += 1;
                    if limit != 0 && attempt >= limit {
                        return Err(e);
                    }
                    warn!(
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Uplink connection failed, retrying"
                    );
                    if self.sleep_unless_shutdown(delay) {
                        return Ok(());
                    }
                    delay = (delay * 2).min(MAX_RECONNECT_DELAY);
                }
            }
        }
    }

    /// Register a fresh connection and stage the handshake ahead of any
    /// queued output.
    fn attach(&mut self, mut stream: TcpStream, addr: SocketAddr) -> io::Result<()> {
        self.poll.registry().register(
            &mut stream,
            UPLINK_TOKEN,
            Interest::READABLE | Interest::WRITABLE,
        )?;

        let mut link = Link::new(stream, addr);
        for line in handshake(&self.config) {
            self.console.outbound(line.as_bytes());
            link.stage(line.as_bytes());
            link.stage(LINE_TERMINATOR);
        }

        self.link = Some(link);
        self.state = ConnState::Established;
        self.stats.connects += 1;
        info!(peer = %addr, "Connected to uplink");
        Ok(())
    }

    /// Drain the socket. Lines completed by this read go to the interpreter
    /// as one batch, even when the read ends in EOF or an error.
    fn handle_readable(&mut self) -> io::Result<()> {
        let Some(link) = self.link.as_mut() else {
            return Ok(());
        };

        let mut buf = [0u8; READ_CHUNK];
        let mut lines = Vec::new();
        let result = loop {
            match link.stream.read(&mut buf) {
                Ok(0) => {
                    break Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "uplink closed the connection",
                    ));
                }
                Ok(n) => lines.extend(link.framer.feed(&buf[..n])),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };

        if !lines.is_empty() {
            trace!(lines = lines.len(), "Framed inbound lines");
            self.stats.lines_in += lines.len() as u64;
            if !self.lines.send_batch(lines) {
                debug!("Interpreter gone, discarding inbound lines");
            }
        }

        result
    }

    /// Claim the outbound queue and write what the socket accepts.
    fn flush(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };

        for line in self.outbound.drain() {
            link.stage(&line);
        }
        if !link.is_write_ready() || link.pending_len() == 0 {
            return;
        }

        let before = link.pending_len();
        match link.flush() {
            FlushResult::Done => self.stats.bytes_out += before as u64,
            FlushResult::Blocked => {
                let written = before - link.pending_len();
                self.stats.bytes_out += written as u64;
                trace!(written, pending = link.pending_len(), "Uplink write would block");
            }
            FlushResult::Dropped { bytes } => {
                self.stats.bytes_out += (before - bytes) as u64;
                self.stats.bytes_dropped += bytes as u64;
                debug!(bytes, "Uplink write failed, discarding output");
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(mut link) = self.link.take() {
            let _ = self.poll.registry().deregister(&mut link.stream);
            debug!(
                peer = %link.peer_addr,
                unsent = link.pending_len(),
                partial = link.framer.pending().len(),
                "Uplink connection closed"
            );
        }
        self.state = ConnState::Absent;
    }

    /// Sleep for `delay` in poll-interval steps. Returns `true` if shutdown
    /// was requested meanwhile.
    fn sleep_unless_shutdown(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(self.config.poll_interval));
        }
    }
}
