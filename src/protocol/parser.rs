//! Line parser.
//!
//! Splits one protocol line into an optional sender, a command and its
//! arguments:
//!
//! ```text
//! :sender COMMAND arg1 arg2 :trailing argument with spaces
//! ```
//!
//! Splitting is on single spaces, so runs of spaces produce empty tokens.
//! Parts borrow from the line and keep its bytes as received.

/// A line split into its parts. Built per line and dropped after handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<'a> {
    pub sender: Option<&'a [u8]>,
    pub command: &'a [u8],
    pub args: Vec<&'a [u8]>,
}

impl Message<'_> {
    /// Whether the command matches `name`, ignoring ASCII case.
    pub fn is(&self, name: &str) -> bool {
        self.command.eq_ignore_ascii_case(name.as_bytes())
    }
}

/// Parse a line.
///
/// Returns `None` when the line carries no command: an empty line, a line
/// with only a sender, or one whose command token is empty.
pub fn parse(line: &[u8]) -> Option<Message<'_>> {
    let mut tokens: Vec<&[u8]> = match trailing_colon(line) {
        Some(idx) => {
            let trailing = &line[idx + 1..];
            let mut tokens: Vec<&[u8]> = split_spaces(line[..idx].trim_ascii_end()).collect();
            if !trailing.is_empty() {
                tokens.push(trailing);
            }
            tokens
        }
        None => split_spaces(line).collect(),
    };

    let sender = match tokens.first().copied() {
        Some(first) if first.starts_with(b":") => {
            tokens.remove(0);
            Some(&first[1..])
        }
        _ => None,
    };

    let mut tokens = tokens.into_iter();
    let command = tokens.next().filter(|c| !c.is_empty())?;

    Some(Message {
        sender,
        command,
        args: tokens.collect(),
    })
}

fn split_spaces(line: &[u8]) -> impl Iterator<Item = &[u8]> {
    line.split(|&b| b == b' ')
}

/// Byte index of the colon that starts the trailing argument.
///
/// This is the last colon in the line, unless that colon is the first
/// character (a sender prefix).
fn trailing_colon(line: &[u8]) -> Option<usize> {
    line.iter().rposition(|&b| b == b':').filter(|&idx| idx > 0)
}
