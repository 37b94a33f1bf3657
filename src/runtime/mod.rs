//! Threaded runtime for the fake peer.
//!
//! Three activities run on their own OS threads:
//! - `uplink-io`: the mio poll loop that owns the socket
//! - `interpreter`: consumes inbound lines and answers keepalives
//! - `operator-input`: forwards stdin lines to the uplink
//!
//! They share:
//! - `OutboundQueue`: lines to send (operator, interpreter, handshake)
//! - the line channel: complete inbound lines for the interpreter
//! - a shutdown flag checked by the poll loop every turn

mod connection;
mod event_loop;
mod framer;
mod queue;

pub use connection::PeerError;
pub use queue::{line_channel, LineReceiver, OutboundQueue};

#[cfg(test)]
pub(crate) use framer::LineFramer;

use crate::config::Config;
use crate::console::Console;
use crate::input;
use crate::protocol::Interpreter;
use event_loop::{EventLoop, WAKER_TOKEN};
use mio::{Poll, Waker};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Why the session is ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// SIGINT or SIGTERM.
    Signal(i32),
    /// stdin reached EOF.
    InputClosed,
    /// The poll loop returned, normally or with an error.
    UplinkStopped,
}

/// Running poll loop and interpreter threads.
pub struct Uplink {
    outbound: OutboundQueue,
    console: Console,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
    io: JoinHandle<Result<(), PeerError>>,
    interpreter: JoinHandle<()>,
}

impl Uplink {
    /// Spawn the poll loop and interpreter. `exit` is told when the poll
    /// loop stops.
    pub fn start(config: Config, exit: Sender<Exit>) -> Result<Self, PeerError> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let outbound = OutboundQueue::with_waker(Arc::clone(&waker));
        let console = Console::new(config.echo);
        let shutdown = Arc::new(AtomicBool::new(false));
        let (line_tx, line_rx) = line_channel();

        let interpreter = Interpreter::new(config.identity.name.clone(), outbound.clone(), console);
        let interpreter = thread::Builder::new()
            .name("interpreter".to_string())
            .spawn(move || interpreter.run(line_rx))?;

        let event_loop = EventLoop::new(
            poll,
            config,
            outbound.clone(),
            line_tx,
            console,
            Arc::clone(&shutdown),
        );
        let io = thread::Builder::new()
            .name("uplink-io".to_string())
            .spawn(move || {
                let result = event_loop.run();
                if let Err(ref e) = result {
                    error!(error = %e, "Uplink poll loop failed");
                }
                let _ = exit.send(Exit::UplinkStopped);
                result
            })?;

        Ok(Self {
            outbound,
            console,
            shutdown,
            waker,
            io,
            interpreter,
        })
    }

    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    pub fn console(&self) -> Console {
        self.console
    }

    /// Ask the poll loop to stop without waiting for it.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            debug!(error = %e, "Failed to wake poll loop");
        }
    }

    /// Stop the poll loop and wait for both threads.
    ///
    /// Returns the poll loop's result, so an unreachable uplink surfaces here.
    pub fn shutdown(self) -> Result<(), PeerError> {
        self.stop();
        let result = self
            .io
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("uplink-io thread panicked").into()));
        // The poll loop dropped its line sender, so the interpreter drains and exits.
        if self.interpreter.join().is_err() {
            warn!("Interpreter thread panicked");
        }
        result
    }
}

/// Run a full session: uplink, interpreter, operator input and signals.
///
/// Returns when stdin closes, a signal arrives, or the uplink fails.
pub fn run(config: Config) -> Result<(), PeerError> {
    let (exit_tx, exit_rx) = mpsc::channel();

    // Install handlers before any thread exists so none sees the default action.
    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    let uplink = Uplink::start(config, exit_tx.clone())?;

    let signal_tx = exit_tx.clone();
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                let _ = signal_tx.send(Exit::Signal(signal));
            }
        })?;

    let outbound = uplink.outbound().clone();
    let console = uplink.console();
    let input_tx = exit_tx;
    thread::Builder::new()
        .name("operator-input".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            match input::forward_lines(stdin.lock(), &outbound, console) {
                Ok(lines) => debug!(lines, "Operator input closed"),
                Err(e) => warn!(error = %e, "Failed to read operator input"),
            }
            let _ = input_tx.send(Exit::InputClosed);
        })?;

    match exit_rx.recv().unwrap_or(Exit::UplinkStopped) {
        Exit::Signal(signal) => {
            // Interrupts end the session at once; the blocked threads die with the process.
            info!(signal, "Interrupted, exiting");
            uplink.stop();
            Ok(())
        }
        Exit::InputClosed => {
            info!("Operator input closed, shutting down");
            uplink.shutdown()
        }
        Exit::UplinkStopped => uplink.shutdown(),
    }
}
