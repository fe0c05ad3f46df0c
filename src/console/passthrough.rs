//! Interactive AT passthrough.
//!
//! Every line typed on the console goes verbatim to the co-processor and
//! its raw answer is printed back, except for the reserved words below.

use core::fmt::Write;
use core::time::Duration;

use crate::at::{CommError, ResponseText};
use crate::hal::{Clock, ControlPins, SerialPort};
use crate::modem::ModemSession;

use super::{LineBuffer, SerialWriter, ShellError};

/// Version string (set by build.rs, includes git hash)
pub const VERSION: &str = env!("VERSION_STRING");

pub const PROMPT: &str = "Prompt> ";

/// Poll period for console input in [`Passthrough::run`].
pub const POLL: Duration = Duration::from_millis(30);

/// Where forwarded lines go.
pub trait CommandLink {
    fn command(&self, cmd: &str) -> Result<ResponseText, CommError>;
}

impl<S, P, K> CommandLink for ModemSession<S, P, K>
where
    S: SerialPort,
    P: ControlPins,
    K: Clock,
{
    fn command(&self, cmd: &str) -> Result<ResponseText, CommError> {
        ModemSession::command(self, cmd)
    }
}

/// A word handled by the shell itself.
pub struct ReservedWord {
    pub name: &'static str,
    pub brief: &'static str,
}

pub static RESERVED: &[ReservedWord] = &[
    ReservedWord {
        name: "exit",
        brief: "Leave the passthrough and start sampling",
    },
    ReservedWord {
        name: "help",
        brief: "Print this message",
    },
];

/// Result of feeding one byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShellEvent {
    Continue,
    Exit,
}

/// Shell state machine
pub struct Passthrough {
    line: LineBuffer,
    /// Swallow the `\n` of a `\r\n` pair.
    after_cr: bool,
}

impl Passthrough {
    pub const fn new() -> Self {
        Self {
            line: LineBuffer::new(),
            after_cr: false,
        }
    }

    /// Feed one console byte.
    pub fn process_byte(
        &mut self,
        byte: u8,
        modem: &impl CommandLink,
        out: &mut dyn Write,
    ) -> ShellEvent {
        let after_cr = core::mem::replace(&mut self.after_cr, byte == b'\r');

        match byte {
            b'\n' if after_cr => ShellEvent::Continue,

            // Enter
            b'\r' | b'\n' => {
                let _ = write!(out, "\r\n");
                let event = self.submit(modem, out);
                self.line.clear();
                if event == ShellEvent::Continue {
                    self.print_prompt(out);
                }
                event
            }

            // Backspace
            0x7F | 0x08 => {
                if self.line.pop().is_some() {
                    let _ = write!(out, "\x08 \x08");
                }
                ShellEvent::Continue
            }

            // Ctrl+C
            0x03 => {
                let _ = write!(out, "^C\r\n");
                self.line.clear();
                self.print_prompt(out);
                ShellEvent::Continue
            }

            0x20..=0x7E => {
                if self.line.push(byte) {
                    let _ = write!(out, "{}", byte as char);
                }
                ShellEvent::Continue
            }

            _ => ShellEvent::Continue,
        }
    }

    fn submit(&mut self, modem: &impl CommandLink, out: &mut dyn Write) -> ShellEvent {
        if self.line.is_overflowed() {
            report(&ShellError::LineTooLong, out);
            return ShellEvent::Continue;
        }

        match self.line.as_str() {
            "" => ShellEvent::Continue,
            "exit" => ShellEvent::Exit,
            "help" => {
                print_help(out);
                ShellEvent::Continue
            }
            cmd => {
                match modem.command(cmd) {
                    Ok(response) => {
                        let _ = write!(out, "{}", response.as_str());
                    }
                    Err(e) => {
                        if let Some(partial) = e.response() {
                            let _ = write!(out, "{}", partial.as_str());
                        }
                        report(&ShellError::Modem(e), out);
                    }
                }
                ShellEvent::Continue
            }
        }
    }

    /// Read the console until `exit`.
    pub fn run<W, C, K>(&mut self, console: &mut W, modem: &C, clock: &K)
    where
        W: SerialPort,
        C: CommandLink,
        K: Clock,
    {
        self.print_banner(&mut SerialWriter(&mut *console));

        loop {
            let Ok(byte) = console.receive_byte(clock.now() + POLL) else {
                continue;
            };
            let event = self.process_byte(byte, modem, &mut SerialWriter(&mut *console));
            if event == ShellEvent::Exit {
                return;
            }
        }
    }

    pub fn print_prompt(&self, out: &mut dyn Write) {
        let _ = write!(out, "{}", PROMPT);
    }

    pub fn print_banner(&self, out: &mut dyn Write) {
        let _ = write!(out, "\r\n{}\r\n", VERSION);
        let _ = write!(out, "ESP-AT passthrough, type 'help' for reserved words.\r\n");
        self.print_prompt(out);
    }
}

impl Default for Passthrough {
    fn default() -> Self {
        Self::new()
    }
}

fn print_help(out: &mut dyn Write) {
    let _ = write!(
        out,
        "All lines go to the WiFi co-processor except:\r\n\r\n"
    );
    for word in RESERVED {
        let _ = write!(out, "  {:<6}{}\r\n", word.name, word.brief);
    }
}

fn report(err: &ShellError, out: &mut dyn Write) {
    let _ = write!(out, "{}: {}\r\n", err.code(), err);
}
