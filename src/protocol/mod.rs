//! Line protocol spoken with the uplink.
//!
//! A minimal subset of a server-to-server text protocol:
//! - Handshake on connect: `PROTOCOL`, `PASS`, `SERVER`
//! - Keepalive: uplink sends `PING <token>`, peer answers `PONG <name> :<token>`
//!
//! ## Protocol Format
//!
//! ```text
//! Sent:     PROTOCOL dreamforge\r\n
//!           PASS test.pass\r\n
//!           SERVER test.server 1 :test server\r\n
//!
//! Received: PING :irc.hub\r\n
//! Sent:     PONG test.server :irc.hub\r\n
//! ```
//!
//! Anything else is shown to the operator and otherwise ignored; the
//! operator types the rest of the conversation by hand.

pub mod handler;
pub mod parser;

pub use handler::{handshake, Interpreter};
