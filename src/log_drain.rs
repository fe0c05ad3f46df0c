//! Drains the log streams to a serial port.
//!
//! Runs in the I/O context between multiplexer tasks. Writing may block on
//! the port; producers never wait on it.
//!
//! ```text
//! SAMPLER_LOG ─┐
//!              ├──▶ level filter ──▶ "[timestamp_us] LEVEL: msg\r\n" ──▶ SerialPort
//! IO_LOG ──────┘
//! ```

use crate::hal::{Instant, SerialPort};
use crate::logging::{format_to_buffer, LogEntry, LogLevel, LogStream, MAX_MSG_LEN};
use crate::{IO_LOG, SAMPLER_LOG};

/// How often drop counters are reported.
pub const DROP_REPORT_INTERVAL_US: i64 = 10_000_000;

/// Timestamp, level and separators on top of the message.
const LINE_LEN: usize = MAX_MSG_LEN + 32;

/// Format: `[timestamp_us] LEVEL: message\r\n`
pub fn format_log_entry(entry: &LogEntry, buf: &mut [u8]) -> usize {
    format_to_buffer(
        buf,
        format_args!(
            "[{:10}] {}: {}\r\n",
            entry.timestamp_us,
            entry.level.as_str(),
            entry.message()
        ),
    )
}

/// Consumer side of the global log streams.
pub struct LogDrain {
    last_report: Instant,
}

impl LogDrain {
    pub const fn new() -> Self {
        Self {
            last_report: Instant::ZERO,
        }
    }

    /// Write every pending entry of [`SAMPLER_LOG`] and [`IO_LOG`] at or
    /// above `max_level`. Returns entries consumed.
    pub fn pump<W: SerialPort>(&mut self, out: &mut W, now: Instant, max_level: LogLevel) -> usize {
        self.pump_streams(&[&SAMPLER_LOG, &IO_LOG], out, now, max_level)
    }

    /// [`pump`](Self::pump) over explicit streams, drained in order.
    pub fn pump_streams<W: SerialPort, const N: usize>(
        &mut self,
        streams: &[&LogStream<N>],
        out: &mut W,
        now: Instant,
        max_level: LogLevel,
    ) -> usize {
        let mut line = [0u8; LINE_LEN];
        let mut consumed = 0;

        for stream in streams {
            while let Some(entry) = stream.drain() {
                consumed += 1;
                if entry.level > max_level {
                    continue;
                }
                let len = format_log_entry(&entry, &mut line);
                // Nothing to fall back to if the log port itself times out
                let _ = out.transmit(&line[..len]);
            }
        }

        if now.as_micros() - self.last_report.as_micros() >= DROP_REPORT_INTERVAL_US {
            self.report_drops(streams, out, now);
            self.last_report = now;
        }

        consumed
    }

    fn report_drops<W: SerialPort, const N: usize>(
        &mut self,
        streams: &[&LogStream<N>],
        out: &mut W,
        now: Instant,
    ) {
        let mut line = [0u8; LINE_LEN];
        for (index, stream) in streams.iter().enumerate() {
            let dropped = stream.dropped();
            if dropped == 0 {
                continue;
            }
            let len = format_to_buffer(
                &mut line,
                format_args!(
                    "[{:10}] WARN: log stream {} dropped {} entries\r\n",
                    now.as_micros(),
                    index,
                    dropped
                ),
            );
            let _ = out.transmit(&line[..len]);
            stream.reset_dropped();
        }
    }
}

impl Default for LogDrain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::SerialTimeout;

    #[derive(Default)]
    struct Capture(Vec<u8>);

    impl SerialPort for Capture {
        fn transmit(&mut self, bytes: &[u8]) -> Result<(), SerialTimeout> {
            self.0.extend_from_slice(bytes);
            Ok(())
        }

        fn receive_byte(&mut self, _deadline: Instant) -> Result<u8, SerialTimeout> {
            Err(SerialTimeout)
        }
    }

    fn entry(timestamp_us: i64, level: LogLevel, text: &[u8]) -> LogEntry {
        let mut entry = LogEntry::EMPTY;
        entry.timestamp_us = timestamp_us;
        entry.level = level;
        entry.len = text.len() as u8;
        entry.msg[..text.len()].copy_from_slice(text);
        entry
    }

    #[test]
    fn test_format_log_entry() {
        let mut buf = [0u8; 256];
        let len = format_log_entry(&entry(1234567, LogLevel::Info, b"modem ready"), &mut buf);

        let formatted = core::str::from_utf8(&buf[..len]).unwrap();
        assert_eq!(formatted, "[   1234567] INFO: modem ready\r\n");
    }

    #[test]
    fn test_pump_filters_by_level() {
        let first = LogStream::<8>::new();
        let second = LogStream::<8>::new();
        first.push(1, LogLevel::Debug, b"noisy");
        first.push(2, LogLevel::Warn, b"retry");
        second.push(3, LogLevel::Error, b"init failed");

        let mut drain = LogDrain::new();
        let mut out = Capture::default();
        let consumed = drain.pump_streams(&[&first, &second], &mut out, Instant::ZERO, LogLevel::Info);

        assert_eq!(consumed, 3);
        let text = String::from_utf8(out.0).unwrap();
        assert!(!text.contains("noisy"));
        assert!(text.find("retry").unwrap() < text.find("init failed").unwrap());
    }

    #[test]
    fn test_drop_report_resets_counter() {
        let stream = LogStream::<2>::new();
        for t in 0..3 {
            stream.push(t, LogLevel::Info, b"x");
        }
        assert_eq!(stream.dropped(), 1);

        let mut drain = LogDrain::new();
        let mut out = Capture::default();
        let now = Instant::from_micros(DROP_REPORT_INTERVAL_US);
        drain.pump_streams(&[&stream], &mut out, now, LogLevel::Info);

        let text = String::from_utf8(out.0).unwrap();
        assert!(text.contains("dropped 1 entries"));
        assert_eq!(stream.dropped(), 0);
    }
}
