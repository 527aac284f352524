//! [`LineChannel`] over any byte stream, typically a serial port opened with a
//! short read timeout.

use crate::provision::{LineChannel, deadline_after, remaining};
use std::io::{self, Read, Write};
use std::time::Duration;

const READ_CHUNK: usize = 256;

/// Splits a byte stream into `\n`-terminated lines.
///
/// Reads that time out or would block count as silence, so the stream must not
/// block indefinitely. Partial lines are kept until the rest arrives.
#[derive(Debug)]
pub struct StreamLines<T> {
    stream: T,
    pending: Vec<u8>,
}

impl<T: Read + Write> StreamLines<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            pending: Vec::new(),
        }
    }

    pub fn into_inner(self) -> T {
        self.stream
    }

    /// Pop the next non-blank buffered line, trimmed, decoding invalid UTF-8 lossily
    fn take_line(&mut self) -> Option<String> {
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }
}

impl<T: Read + Write> LineChannel for StreamLines<T> {
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        let deadline = deadline_after(timeout);
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            let Some(left) = remaining(deadline) else {
                return Ok(None);
            };

            match self.stream.read(&mut chunk) {
                Ok(0) => std::thread::sleep(left.min(Duration::from_millis(10))),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.stream.write_all(line.as_bytes())?;
        self.stream.write_all(b"\n")?;
        self.stream.flush()
    }
}
