use core::fmt;

use heapless::Vec;

/// Longest accepted command line, excluding the terminator.
pub const LINE_CAPACITY: usize = 96;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineError {
    Overflow,
    InvalidUtf8,
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineError::Overflow => write!(f, "line longer than {LINE_CAPACITY} bytes"),
            LineError::InvalidUtf8 => f.write_str("invalid encoding"),
        }
    }
}

/// Assembles CR/LF terminated lines with backspace editing.
///
/// An overlong line is discarded up to its terminator and reported once.
#[derive(Debug, Default)]
pub struct LineBuffer {
    bytes: Vec<u8, LINE_CAPACITY>,
    overflowed: bool,
    completed: bool,
}

impl LineBuffer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: Vec::new(),
            overflowed: false,
            completed: false,
        }
    }

    /// Feeds one byte. Returns the finished line when `byte` terminates one.
    pub fn push(&mut self, byte: u8) -> Option<Result<&str, LineError>> {
        if self.completed {
            self.bytes.clear();
            self.completed = false;
        }

        match byte {
            b'\r' | b'\n' => {
                if self.overflowed {
                    self.overflowed = false;
                    self.completed = true;
                    return Some(Err(LineError::Overflow));
                }
                if self.bytes.is_empty() {
                    return None;
                }
                self.completed = true;
                Some(core::str::from_utf8(&self.bytes).map_err(|_| LineError::InvalidUtf8))
            }
            0x08 | 0x7F => {
                self.bytes.pop();
                None
            }
            _ => {
                if !self.overflowed && self.bytes.push(byte).is_err() {
                    self.overflowed = true;
                }
                None
            }
        }
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        if self.completed { 0 } else { self.bytes.len() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed<'a>(buffer: &'a mut LineBuffer, text: &[u8]) -> Option<Result<&'a str, LineError>> {
        let (last, head) = text.split_last()?;
        for byte in head {
            assert!(buffer.push(*byte).is_none());
        }
        buffer.push(*last)
    }

    #[test]
    fn assembles_lines_and_skips_blank_terminators() {
        let mut buffer = LineBuffer::new();
        assert_eq!(feed(&mut buffer, b"READ ALL\r"), Some(Ok("READ ALL")));
        assert_eq!(buffer.push(b'\n'), None);
        assert_eq!(feed(&mut buffer, b"STATUS\n"), Some(Ok("STATUS")));
    }

    #[test]
    fn backspace_edits_the_line() {
        let mut buffer = LineBuffer::new();
        assert_eq!(feed(&mut buffer, b"EXIX\x08T\r"), Some(Ok("EXIT")));
    }

    #[test]
    fn overlong_line_is_reported_once() {
        let mut buffer = LineBuffer::new();
        for _ in 0..LINE_CAPACITY + 10 {
            assert!(buffer.push(b'A').is_none());
        }
        assert_eq!(buffer.push(b'\r'), Some(Err(LineError::Overflow)));
        assert_eq!(feed(&mut buffer, b"HELP\r"), Some(Ok("HELP")));
    }
}
