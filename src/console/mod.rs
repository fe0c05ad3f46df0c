//! Serial console shell.
//!
//! Polled from the I/O context before sampling starts. Zero heap
//! allocation.

pub mod error;
pub mod line_buffer;
pub mod passthrough;

pub use error::ShellError;
pub use line_buffer::LineBuffer;
pub use passthrough::{CommandLink, Passthrough, ShellEvent, PROMPT, RESERVED, VERSION};

use crate::hal::SerialPort;

/// `core::fmt::Write` over a serial port. Output is best effort: a timed
/// out write is dropped.
pub struct SerialWriter<'a, W>(pub &'a mut W);

impl<W: SerialPort> core::fmt::Write for SerialWriter<'_, W> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let _ = self.0.transmit(s.as_bytes());
        Ok(())
    }
}
