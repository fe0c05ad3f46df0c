//! Command/response transport over a half-duplex serial link.
//!
//! ```text
//! send_command("AT+CIPMUX?")
//!   TX: AT+CIPMUX?\r\n
//!   RX: +CIPMUX:1\r\n\r\nOK\r\n   <- tail match ends the read
//! ```
//!
//! The transport itself holds no lock. Callers that need several exchanges
//! to run back to back (length-prefixed send, then payload) own it behind
//! a single lock and call these methods while holding it.

use core::fmt;
use core::time::Duration;

use heapless::Vec;

use super::parse::{tokenize, ResponseDocument};
use crate::hal::{Clock, Instant, SerialPort};
use crate::logging::current_log_stream;

/// Response buffer capacity in bytes.
pub const RESPONSE_LEN: usize = 1024;

/// Longest command accepted, terminator excluded.
pub const COMMAND_LEN: usize = 256;

const TERMINATOR: &[u8] = b"\r\n";

/// Tail markers that end a response successfully.
const SUCCESS_MARKERS: &[&[u8]] = &[b"OK\r\n"];

/// Tail markers that end a response with a device-side failure.
const FAILURE_MARKERS: &[&[u8]] = &[b"ERROR\r\n", b"FAIL\r\n"];

/// Raw bytes of one response, terminator line included.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ResponseText {
    bytes: Vec<u8, RESPONSE_LEN>,
}

impl ResponseText {
    /// Build from captured bytes, keeping at most [`RESPONSE_LEN`].
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let take = bytes.len().min(RESPONSE_LEN);
        let mut text = Self::default();
        // Fits: at most RESPONSE_LEN bytes
        let _ = text.bytes.extend_from_slice(&bytes[..take]);
        text
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Longest valid UTF-8 prefix.
    pub fn as_str(&self) -> &str {
        match core::str::from_utf8(&self.bytes) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&self.bytes[..e.valid_up_to()]).unwrap_or(""),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn tokenize(&self) -> ResponseDocument {
        tokenize(&self.bytes)
    }

    fn ends_with_any(&self, markers: &[&[u8]]) -> bool {
        markers.iter().any(|m| self.bytes.ends_with(m))
    }
}

impl fmt::Debug for ResponseText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// Transport-level failure.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommError {
    /// No terminal marker before the deadline.
    #[error("no response before deadline")]
    Timeout,
    /// The co-processor answered `ERROR`.
    #[error("device reported error")]
    DeviceReported(ResponseText),
    /// Response did not fit; carries what was captured.
    #[error("response buffer exhausted")]
    BufferExhausted(ResponseText),
    /// Command longer than [`COMMAND_LEN`]; nothing was sent.
    #[error("command too long")]
    CommandTooLong,
}

impl CommError {
    /// Short code for logs and the status line.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout => "C01",
            Self::DeviceReported(_) => "C02",
            Self::BufferExhausted(_) => "C03",
            Self::CommandTooLong => "C04",
        }
    }

    /// Response captured before the failure, if any.
    pub fn response(&self) -> Option<&ResponseText> {
        match self {
            Self::DeviceReported(r) | Self::BufferExhausted(r) => Some(r),
            Self::Timeout | Self::CommandTooLong => None,
        }
    }
}

/// Request/response exchanges over a [`SerialPort`].
pub struct CommandTransport<S> {
    serial: S,
}

impl<S: SerialPort> CommandTransport<S> {
    pub const fn new(serial: S) -> Self {
        Self { serial }
    }

    pub fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }

    pub fn into_inner(self) -> S {
        self.serial
    }

    /// Write `cmd` + `\r\n` and read until `OK`/`ERROR`, timeout or a full buffer.
    pub fn send_command<K: Clock>(
        &mut self,
        clock: &K,
        cmd: &str,
        timeout: Duration,
    ) -> Result<ResponseText, CommError> {
        let cmd = cmd.as_bytes();
        if cmd.len() > COMMAND_LEN {
            return Err(CommError::CommandTooLong);
        }

        // One write per command so the co-processor never sees a split line
        let mut frame = [0u8; COMMAND_LEN + TERMINATOR.len()];
        frame[..cmd.len()].copy_from_slice(cmd);
        frame[cmd.len()..cmd.len() + TERMINATOR.len()].copy_from_slice(TERMINATOR);

        self.discard_stale(clock);
        let deadline = clock.now() + timeout;
        self.serial
            .transmit(&frame[..cmd.len() + TERMINATOR.len()])
            .map_err(|_| CommError::Timeout)?;
        self.read_response(deadline)
    }

    /// Write `payload` verbatim (no terminator) and read the response.
    pub fn send_raw<K: Clock>(
        &mut self,
        clock: &K,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<ResponseText, CommError> {
        self.discard_stale(clock);
        let deadline = clock.now() + timeout;
        self.serial.transmit(payload).map_err(|_| CommError::Timeout)?;
        self.read_response(deadline)
    }

    /// Late replies and unsolicited lines must not leak into the next response.
    fn discard_stale<K: Clock>(&mut self, clock: &K) {
        let dropped = self.serial.discard_input();
        if dropped > 0 {
            crate::node_debug!(
                current_log_stream(),
                clock.now().as_micros(),
                "dropped {} stale byte(s) before exchange",
                dropped
            );
        }
    }

    fn read_response(&mut self, deadline: Instant) -> Result<ResponseText, CommError> {
        let mut response = ResponseText::default();

        loop {
            let byte = self
                .serial
                .receive_byte(deadline)
                .map_err(|_| CommError::Timeout)?;

            if response.bytes.push(byte).is_err() {
                return Err(CommError::BufferExhausted(response));
            }

            if response.bytes.ends_with(TERMINATOR) {
                if response.ends_with_any(SUCCESS_MARKERS) {
                    return Ok(response);
                }
                if response.ends_with_any(FAILURE_MARKERS) {
                    return Err(CommError::DeviceReported(response));
                }
            }

            if response.bytes.is_full() {
                return Err(CommError::BufferExhausted(response));
            }
        }
    }
}
