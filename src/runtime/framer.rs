//! Inbound line framing.
//!
//! Turns the raw byte stream coming off the uplink socket into discrete
//! protocol lines. Lines end at `\n`; every `\r` is dropped on receipt, so
//! both `\r\n` and bare `\n` terminators work.
//!
//! ## Partial Lines
//!
//! A read can end in the middle of a line. The unterminated tail stays in
//! the framer and is completed by a later `feed`.

use bytes::{Buf, Bytes, BytesMut};

/// Initial capacity of the accumulation buffer.
const INITIAL_CAPACITY: usize = 1024;

/// Accumulates bytes and yields complete lines.
///
/// Owned by the poll loop; one framer per connection.
#[derive(Debug)]
pub struct LineFramer {
    /// Bytes received but not yet terminated by `\n`.
    buf: BytesMut,
}

impl LineFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Append `data` and return every line it completes, in arrival order.
    ///
    /// The returned lines carry no terminator and are the bytes received,
    /// whether or not they are valid UTF-8.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buf.extend(data.iter().copied().filter(|&b| b != b'\r'));

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(pos).freeze();
            self.buf.advance(1);
            lines.push(line);
        }
        lines
    }

    /// Bytes held back waiting for a terminator.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Check if there is no partial line buffered.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(b"PING :abc\r\n"), vec!["PING :abc"]);
        assert!(framer.is_empty());
    }

    #[test]
    fn test_empty_feed() {
        let mut framer = LineFramer::new();
        assert!(framer.feed(b"").is_empty());
        assert!(framer.is_empty());
    }

    #[test]
    fn test_many_lines_one_read() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"one\r\ntwo\nthree\r\n");
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert!(framer.is_empty());
    }

    #[test]
    fn test_line_spans_reads() {
        let mut framer = LineFramer::new();

        assert!(framer.feed(b":uplink PI").is_empty());
        assert_eq!(framer.pending(), b":uplink PI");

        assert!(framer.feed(b"NG :tok").is_empty());

        // Terminator split between reads
        assert!(framer.feed(b"en\r").is_empty());
        assert_eq!(framer.feed(b"\nnext"), vec![":uplink PING :token"]);
        assert_eq!(framer.pending(), b"next");
    }

    #[test]
    fn test_carriage_returns_removed_everywhere() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"a\rb\r\r\n\r\n");
        assert_eq!(lines, vec!["ab", ""]);
    }

    #[test]
    fn test_empty_lines_preserved() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(b"\n\nx\n"), vec!["", "", "x"]);
    }

    #[test]
    fn test_invalid_utf8_kept_byte_exact() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"PING :tok\xe9n\r\ncaf\xc3");
        assert_eq!(lines, vec![&b"PING :tok\xe9n"[..]]);
        assert_eq!(framer.pending(), b"caf\xc3");
    }

    #[test]
    fn test_any_partition_yields_same_lines() {
        let input: &[u8] = b":srv NOTICE * :hello there\r\nPING :1\r\n\r\nERROR :bye\npartial";
        let expected = vec![":srv NOTICE * :hello there", "PING :1", "", "ERROR :bye"];

        for chunk in 1..input.len() {
            let mut framer = LineFramer::new();
            let mut lines = Vec::new();
            for piece in input.chunks(chunk) {
                lines.extend(framer.feed(piece));
            }
            assert_eq!(lines, expected, "chunk size {chunk}");
            assert_eq!(framer.pending(), b"partial", "chunk size {chunk}");

            // The tail is released once its terminator arrives
            assert_eq!(framer.feed(b"\r\n"), vec!["partial"]);
        }
    }
}
