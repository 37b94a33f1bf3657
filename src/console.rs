//! Operator-facing echo of protocol traffic.
//!
//! Inbound lines are printed as `<<< line` and outbound lines as
//! `>>> line` on stdout. Diagnostics go through `tracing` on stderr instead.
//!
//! Lines are bytes on the wire; only the echo decodes them, lossily.

use std::io::{self, Write};

/// Prefix for lines received from the uplink.
pub const INBOUND_PREFIX: &str = "<<< ";

/// Prefix for lines sent to the uplink.
pub const OUTBOUND_PREFIX: &str = ">>> ";

/// Echo sink shared by every thread that sees traffic.
#[derive(Debug, Clone, Copy)]
pub struct Console {
    enabled: bool,
}

impl Console {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Echo a line received from the uplink.
    pub fn inbound(&self, line: &[u8]) {
        self.emit(INBOUND_PREFIX, line);
    }

    /// Echo a line about to be sent.
    pub fn outbound(&self, line: &[u8]) {
        self.emit(OUTBOUND_PREFIX, line);
    }

    fn emit(&self, prefix: &str, line: &[u8]) {
        if !self.enabled {
            return;
        }
        // Echo is best effort; a closed stdout must not stop the peer.
        let _ = writeln!(io::stdout().lock(), "{}", format_line(prefix, line));
    }
}

/// Render one echoed line without its newline.
fn format_line(prefix: &str, line: &[u8]) -> String {
    format!("{prefix}{}", String::from_utf8_lossy(line))
}
