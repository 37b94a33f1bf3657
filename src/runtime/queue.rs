//! Queues connecting the poll loop to its producers and consumer.
//!
//! - `OutboundQueue`: lines waiting to go to the uplink. Any thread may push;
//!   the poll loop claims the whole queue at once when the socket can take
//!   writes.
//! - `LineSender` / `LineReceiver`: complete inbound lines, handed from the
//!   poll loop to the interpreter in per-read batches.
//!
//! Lines are raw bytes throughout; nothing here assumes UTF-8.

use bytes::{Bytes, BytesMut};
use mio::Waker;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Wire terminator appended to every outbound line.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Ordered, shared queue of terminated outbound lines.
///
/// The lock is held only to append or to claim; never across socket I/O.
#[derive(Clone)]
pub struct OutboundQueue {
    lines: Arc<Mutex<Vec<Bytes>>>,
    /// Wakes the poll loop so queued lines go out without waiting for the
    /// poll timeout.
    waker: Option<Arc<Waker>>,
}

impl OutboundQueue {
    /// Create a queue that does not wake anything on push.
    pub fn new() -> Self {
        Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            waker: None,
        }
    }

    /// Create a queue that wakes `waker` after each push.
    pub fn with_waker(waker: Arc<Waker>) -> Self {
        Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            waker: Some(waker),
        }
    }

    /// Append a line, adding the wire terminator.
    pub fn push(&self, line: impl AsRef<[u8]>) {
        let line = line.as_ref();
        let mut framed = BytesMut::with_capacity(line.len() + LINE_TERMINATOR.len());
        framed.extend_from_slice(line);
        framed.extend_from_slice(LINE_TERMINATOR);

        self.lock().push(framed.freeze());

        if let Some(waker) = &self.waker {
            if let Err(e) = waker.wake() {
                trace!(error = %e, "Failed to wake poll loop");
            }
        }
    }

    /// Claim every queued line, leaving the queue empty.
    pub fn drain(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.lock())
    }

    /// Number of lines waiting.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if nothing is waiting.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Bytes>> {
        // Holders only push or take, so a poisoned queue is still consistent.
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the inbound line channel.
pub fn line_channel() -> (LineSender, LineReceiver) {
    let (tx, rx) = mpsc::channel();
    (LineSender { tx }, LineReceiver { rx })
}

/// Producer half of the inbound line queue, held by the poll loop.
#[derive(Debug, Clone)]
pub struct LineSender {
    tx: Sender<Vec<Bytes>>,
}

impl LineSender {
    /// Hand over one batch of lines.
    ///
    /// Empty batches are dropped. Returns `false` once the receiver is gone.
    pub fn send_batch(&self, lines: Vec<Bytes>) -> bool {
        if lines.is_empty() {
            return true;
        }
        self.tx.send(lines).is_ok()
    }
}

/// Consumer half of the inbound line queue, held by the interpreter.
#[derive(Debug)]
pub struct LineReceiver {
    rx: Receiver<Vec<Bytes>>,
}

impl LineReceiver {
    /// Block until at least one line is available, then take everything
    /// queued so far in arrival order.
    ///
    /// Returns `None` when every sender has been dropped and the queue is
    /// empty.
    pub fn recv_batch(&self) -> Option<Vec<Bytes>> {
        let mut lines = self.rx.recv().ok()?;
        for more in self.rx.try_iter() {
            lines.extend(more);
        }
        Some(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_push_drain_order() {
        let queue = OutboundQueue::new();
        queue.push("PASS secret");
        queue.push("SERVER a 1 :b");

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain(), vec!["PASS secret\r\n", "SERVER a 1 :b\r\n"]);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_push_is_verbatim() {
        let queue = OutboundQueue::new();
        queue.push("  PRIVMSG #x :spaced  out ");
        assert_eq!(queue.drain(), vec!["  PRIVMSG #x :spaced  out \r\n"]);
    }

    #[test]
    fn test_push_keeps_non_utf8_bytes() {
        let queue = OutboundQueue::new();
        queue.push(b"PRIVMSG #c :caf\xe9");
        assert_eq!(queue.drain(), vec![&b"PRIVMSG #c :caf\xe9\r\n"[..]]);
    }

    #[test]
    fn test_clones_share_queue() {
        let queue = OutboundQueue::new();
        let other = queue.clone();
        other.push("one");
        assert_eq!(queue.drain(), vec!["one\r\n"]);
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 2_000;

        let queue = OutboundQueue::new();
        let mut claimed = Vec::new();

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        queue.push(&format!("{p} {i}"));
                    }
                })
            })
            .collect();

        // Claim concurrently with the producers, like the poll loop does.
        while handles.iter().any(|h| !h.is_finished()) {
            claimed.extend(queue.drain());
        }
        for handle in handles {
            handle.join().unwrap();
        }
        claimed.extend(queue.drain());

        assert_eq!(claimed.len(), PRODUCERS * PER_PRODUCER);
        let unique: HashSet<_> = claimed.iter().collect();
        assert_eq!(unique.len(), claimed.len());

        // Per-producer order is preserved
        let mut next = [0usize; PRODUCERS];
        for line in &claimed {
            let line = std::str::from_utf8(line).unwrap();
            let mut parts = line.trim_end().split(' ');
            let p: usize = parts.next().unwrap().parse().unwrap();
            let i: usize = parts.next().unwrap().parse().unwrap();
            assert_eq!(i, next[p]);
            next[p] += 1;
        }
    }

    #[test]
    fn test_line_channel_batches() {
        let (tx, rx) = line_channel();
        assert!(tx.send_batch(vec!["a".into(), "b".into()]));
        assert!(tx.send_batch(Vec::new()));
        assert!(tx.send_batch(vec!["c".into()]));

        assert_eq!(rx.recv_batch(), Some(vec!["a".into(), "b".into(), "c".into()]));

        drop(tx);
        assert_eq!(rx.recv_batch(), None);
    }

    #[test]
    fn test_line_channel_blocks_until_lines_arrive() {
        let (tx, rx) = line_channel();

        let consumer = thread::spawn(move || rx.recv_batch());
        thread::sleep(std::time::Duration::from_millis(20));
        assert!(!consumer.is_finished());

        tx.send_batch(vec!["PING :x".into()]);
        assert_eq!(consumer.join().unwrap(), Some(vec![Bytes::from_static(b"PING :x")]));
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (tx, rx) = line_channel();
        drop(rx);
        assert!(!tx.send_batch(vec!["lost".into()]));
    }
}
