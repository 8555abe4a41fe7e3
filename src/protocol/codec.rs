//! Line framing for the machine link.
//!
//! Outbound commands are written as `<sequence> <command>\n`. Inbound lines carry
//! `<code>[:<sequence>] [payload]`, where a missing sequence means the line is an
//! unsolicited event rather than the answer to a request.

use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

/// Highest sequence number handed out before the counter wraps back to 1.
pub const SEQUENCE_CEILING: u32 = 5000;
/// Size of the receive accumulator; longer lines are truncated in place.
pub const RECEIVE_BUFFER_SIZE: usize = 2048;

/// Errors raised while decoding an inbound line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The line held nothing but whitespace.
    #[error("empty line")]
    Empty,
    /// The event code was not a number.
    #[error("invalid event code `{0}`")]
    InvalidCode(String),
    /// The sequence part of the leading token was not a number.
    #[error("invalid sequence `{0}`")]
    InvalidSequence(String),
    /// The code is known but its payload does not have the expected shape.
    #[error("invalid payload for code {code}: `{payload}`")]
    InvalidPayload {
        /// Event code that carried the payload.
        code: u16,
        /// Offending payload text.
        payload: String,
    },
}

/// A decoded inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundLine {
    /// Numeric event or response code.
    pub code: u16,
    /// Sequence of the request this line answers, `0` for unsolicited events.
    pub sequence: u32,
    /// Remaining text after the leading token, trimmed.
    pub payload: String,
}

impl InboundLine {
    /// Parse one line as received from the machine.
    pub fn parse(line: &str) -> Result<Self, DecodeError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(DecodeError::Empty);
        }

        let (head, payload) = match line.split_once(' ') {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        let (code, sequence) = match head.split_once(':') {
            Some((code, sequence)) => (
                code,
                sequence
                    .parse::<u32>()
                    .map_err(|_| DecodeError::InvalidSequence(sequence.to_string()))?,
            ),
            None => (head, 0),
        };

        let code = code
            .parse::<u16>()
            .map_err(|_| DecodeError::InvalidCode(code.to_string()))?;

        Ok(Self {
            code,
            sequence,
            payload: payload.to_string(),
        })
    }

    /// Payload split on single spaces.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.payload.split(' ').filter(|field| !field.is_empty())
    }
}

/// Render a command into its wire form.
pub fn encode_command(sequence: u32, command: &str) -> String {
    format!("{sequence} {command}\n")
}

/// Wrapping sequence generator shared by every sender on a connection.
///
/// Zero is never issued: it marks unsolicited events on the inbound side.
#[derive(Debug)]
pub struct SequenceCounter {
    next: AtomicU32,
}

impl SequenceCounter {
    /// Start a counter at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Hand out the current sequence and advance the counter.
    pub fn next(&self) -> u32 {
        let step = |current: u32| {
            Some(if current >= SEQUENCE_CEILING {
                1
            } else {
                current + 1
            })
        };
        match self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, step)
        {
            Ok(previous) | Err(previous) => previous,
        }
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Reassembles newline-terminated lines from arbitrary read chunks.
#[derive(Debug)]
pub struct LineAccumulator {
    buffer: Vec<u8>,
    capacity: usize,
}

impl LineAccumulator {
    /// Accumulator with the default receive size.
    pub fn new() -> Self {
        Self::with_capacity(RECEIVE_BUFFER_SIZE)
    }

    /// Accumulator bounded to `capacity` bytes per line.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Feed freshly read bytes, returning every line completed by them.
    ///
    /// Completed lines keep their trailing newline. Bytes after the last newline stay
    /// buffered for the next call. Once a line fills the buffer, further bytes overwrite
    /// its final byte until a newline arrives.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if self.buffer.len() < self.capacity {
                self.buffer.push(byte);
            } else if let Some(last) = self.buffer.last_mut() {
                *last = byte;
            }

            if byte == b'\n' {
                lines.push(String::from_utf8_lossy(&self.buffer).into_owned());
                self.buffer.clear();
            }
        }
        lines
    }

    /// Bytes waiting for their terminating newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for LineAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
