//! Line interpreter.
//!
//! Consumes complete inbound lines, echoes them, and answers the keepalive
//! probe. Everything else the uplink sends is only displayed.

use crate::config::Config;
use crate::console::Console;
use crate::protocol::parser::{self, Message};
use crate::runtime::{LineReceiver, OutboundQueue};
use tracing::{debug, trace};

/// Keepalive probe sent by the uplink.
pub const PING: &str = "PING";

/// Keepalive reply.
pub const PONG: &str = "PONG";

/// Lines that register this peer with the uplink, in send order.
pub fn handshake(config: &Config) -> [String; 3] {
    [
        format!("PROTOCOL {}", config.protocol),
        format!("PASS {}", config.identity.password),
        format!("SERVER {} 1 :{}", config.identity.name, config.description),
    ]
}

/// Reacts to inbound lines on behalf of one peer.
pub struct Interpreter {
    name: String,
    outbound: OutboundQueue,
    console: Console,
}

impl Interpreter {
    pub fn new(name: impl Into<String>, outbound: OutboundQueue, console: Console) -> Self {
        Self {
            name: name.into(),
            outbound,
            console,
        }
    }

    /// Consume batches until the poll loop goes away.
    pub fn run(&self, lines: LineReceiver) {
        while let Some(batch) = lines.recv_batch() {
            trace!(lines = batch.len(), "Interpreting batch");
            for line in &batch {
                self.handle_line(line);
            }
        }
        debug!("Line queue closed, interpreter stopping");
    }

    /// Echo, parse and react to one line.
    pub fn handle_line(&self, line: &[u8]) {
        self.console.inbound(line);

        let Some(message) = parser::parse(line) else {
            return;
        };

        if let Some(reply) = self.respond(&message) {
            self.console.outbound(&reply);
            self.outbound.push(&reply);
        }
    }

    /// Reply owed for `message`, if any.
    ///
    /// The PING token is echoed back byte for byte.
    pub fn respond(&self, message: &Message) -> Option<Vec<u8>> {
        if message.is(PING) {
            let mut reply = format!("{PONG} {}", self.name).into_bytes();
            if let Some(token) = message.args.first() {
                reply.extend_from_slice(b" :");
                reply.extend_from_slice(token);
            }
            return Some(reply);
        }

        // Remaining commands are displayed only.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::runtime::line_channel;
    use crate::runtime::LineFramer;

    fn interpreter(queue: &OutboundQueue) -> Interpreter {
        Interpreter::new("test.server", queue.clone(), Console::new(false))
    }

    #[test]
    fn test_ping_gets_pong() {
        let queue = OutboundQueue::new();
        interpreter(&queue).handle_line(b"PING :abc");
        assert_eq!(queue.drain(), vec!["PONG test.server :abc\r\n"]);
    }

    #[test]
    fn test_ping_with_sender_and_lowercase() {
        let queue = OutboundQueue::new();
        let interp = interpreter(&queue);
        interp.handle_line(b":irc.hub PING :irc.hub");
        interp.handle_line(b"ping tok");
        assert_eq!(
            queue.drain(),
            vec!["PONG test.server :irc.hub\r\n", "PONG test.server :tok\r\n"]
        );
    }

    #[test]
    fn test_ping_without_token() {
        let queue = OutboundQueue::new();
        interpreter(&queue).handle_line(b"PING");
        assert_eq!(queue.drain(), vec!["PONG test.server\r\n"]);
    }

    #[test]
    fn test_pong_echoes_non_utf8_token() {
        let queue = OutboundQueue::new();
        let interp = interpreter(&queue);
        let mut framer = LineFramer::new();

        for line in framer.feed(b"PING :tok\xe9n\r\n") {
            interp.handle_line(&line);
        }
        assert_eq!(queue.drain(), vec![&b"PONG test.server :tok\xe9n\r\n"[..]]);
    }

    #[test]
    fn test_other_lines_ignored() {
        let queue = OutboundQueue::new();
        let interp = interpreter(&queue);
        for line in ["", ":only.sender", ":hub NOTICE * :hello", "PONG x :y", "ERROR :bye"] {
            interp.handle_line(line.as_bytes());
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_run_processes_batches_in_order() {
        let queue = OutboundQueue::new();
        let (tx, rx) = line_channel();
        tx.send_batch(vec!["PING :1".into(), "NOTICE x".into(), "PING :2".into()]);
        tx.send_batch(vec!["PING :3".into()]);
        drop(tx);

        interpreter(&queue).run(rx);
        assert_eq!(
            queue.drain(),
            vec![
                "PONG test.server :1\r\n",
                "PONG test.server :2\r\n",
                "PONG test.server :3\r\n"
            ]
        );
    }

    #[test]
    fn test_handshake_lines() {
        let mut config = test_config(6667);
        config.identity.name = "leaf.example".to_string();
        config.identity.password = "linkpass".to_string();

        assert_eq!(
            handshake(&config),
            [
                "PROTOCOL dreamforge".to_string(),
                "PASS linkpass".to_string(),
                "SERVER leaf.example 1 :test server".to_string(),
            ]
        );
    }
}
