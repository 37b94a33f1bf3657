//! Operator input path.
//!
//! Every line typed on stdin is sent to the uplink exactly as typed; only
//! the line terminator is replaced by the wire terminator. Lines are read
//! as bytes, so input that is not valid UTF-8 goes out unchanged.

use crate::console::Console;
use crate::runtime::OutboundQueue;
use std::io::{self, BufRead};
use tracing::trace;

/// Forward lines from `reader` until EOF. Returns the number of lines sent.
pub fn forward_lines<R: BufRead>(
    mut reader: R,
    outbound: &OutboundQueue,
    console: Console,
) -> io::Result<usize> {
    let mut line = Vec::new();
    let mut sent = 0;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(sent);
        }

        let typed = strip_terminator(&line);
        trace!(len = typed.len(), "Operator line");
        console.outbound(typed);
        outbound.push(typed);
        sent += 1;
    }
}

fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
