//! Telemetry frames.
//!
//! A frame collects named readings and renders them as one line:
//!
//! ```text
//! {"data": {"temperature": 21.50, "pressure": 1013.25}, "units": {"temperature": "C", "pressure": "hPa"}, "status": {"sensor": "2000"}, "timestamp_ms": 120000}
//! ```
//!
//! Values that are not finite render as `null`. A frame that does not fit
//! the output buffer is reported, never silently cut.

use core::fmt::Write;

use heapless::{String, Vec};

use crate::hal::Instant;
use crate::status::StatusFlags;

/// Longest rendered frame; matches a multiplexer buffer.
pub const FRAME_LEN: usize = crate::mux::BUFFER_LEN;

/// Readings per frame.
pub const MAX_READINGS: usize = 8;

pub type FrameText = String<FRAME_LEN>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TelemetryError {
    #[error("frame already holds {MAX_READINGS} readings")]
    TooManyReadings,
    /// The output holds the part of the frame that fit.
    #[error("frame does not fit in {capacity} bytes")]
    Truncated { capacity: usize },
}

impl TelemetryError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TooManyReadings => "T01",
            Self::Truncated { .. } => "T02",
        }
    }
}

/// One decoded sensor value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    pub name: &'static str,
    pub value: f32,
    pub unit: &'static str,
    /// Digits after the decimal point.
    pub precision: u8,
}

/// Builder for one telemetry line.
#[derive(Clone, Debug, PartialEq)]
pub struct TelemetryFrame {
    readings: Vec<Reading, MAX_READINGS>,
    status: StatusFlags,
    timestamp: Instant,
}

impl TelemetryFrame {
    pub fn new(timestamp: Instant) -> Self {
        Self {
            readings: Vec::new(),
            status: StatusFlags::OK,
            timestamp,
        }
    }

    /// Add a reading with two decimals.
    pub fn reading(
        &mut self,
        name: &'static str,
        value: f32,
        unit: &'static str,
    ) -> Result<&mut Self, TelemetryError> {
        self.reading_with_precision(name, value, unit, 2)
    }

    pub fn reading_with_precision(
        &mut self,
        name: &'static str,
        value: f32,
        unit: &'static str,
        precision: u8,
    ) -> Result<&mut Self, TelemetryError> {
        self.readings
            .push(Reading {
                name,
                value,
                unit,
                precision,
            })
            .map_err(|_| TelemetryError::TooManyReadings)?;
        Ok(self)
    }

    pub fn status(&mut self, status: StatusFlags) -> &mut Self {
        self.status = status;
        self
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Render the frame, newline terminated.
    pub fn render(&self) -> Result<FrameText, TelemetryError> {
        let mut out = FrameText::new();
        self.render_into(&mut out)?;
        Ok(out)
    }

    /// Render into `out`, which is cleared first. On
    /// [`TelemetryError::Truncated`] it keeps the prefix that fit.
    pub fn render_into<const N: usize>(&self, out: &mut String<N>) -> Result<(), TelemetryError> {
        out.clear();
        let mut writer = Bounded { out, full: false };
        // Bounded never fails; overflow is tracked in `full`
        let _ = self.write_frame(&mut writer);

        if writer.full {
            Err(TelemetryError::Truncated { capacity: N })
        } else {
            Ok(())
        }
    }

    fn write_frame(&self, w: &mut impl Write) -> core::fmt::Result {
        w.write_str("{\"data\": {")?;
        for (i, r) in self.readings.iter().enumerate() {
            if i > 0 {
                w.write_str(", ")?;
            }
            write!(w, "\"{}\": ", r.name)?;
            if r.value.is_finite() {
                write!(w, "{:.*}", r.precision as usize, r.value)?;
            } else {
                w.write_str("null")?;
            }
        }

        w.write_str("}, \"units\": {")?;
        for (i, r) in self.readings.iter().enumerate() {
            if i > 0 {
                w.write_str(", ")?;
            }
            write!(w, "\"{}\": \"{}\"", r.name, r.unit)?;
        }

        write!(
            w,
            "}}, \"status\": {{\"sensor\": \"{:x}\"}}, \"timestamp_ms\": {}}}\n",
            self.status,
            self.timestamp.as_millis()
        )
    }
}

/// Appends what fits and remembers whether anything was cut.
struct Bounded<'a, const N: usize> {
    out: &'a mut String<N>,
    full: bool,
}

impl<const N: usize> Write for Bounded<'_, N> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        if self.full {
            return Ok(());
        }
        if self.out.push_str(s).is_ok() {
            return Ok(());
        }
        for c in s.chars() {
            if self.out.push(c).is_err() {
                break;
            }
        }
        self.full = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_frame() {
        let frame = TelemetryFrame::new(Instant::from_millis(5));
        assert_eq!(
            frame.render().unwrap().as_str(),
            "{\"data\": {}, \"units\": {}, \"status\": {\"sensor\": \"0\"}, \"timestamp_ms\": 5}\n"
        );
    }

    #[test]
    fn test_non_finite_is_null() {
        let mut frame = TelemetryFrame::new(Instant::ZERO);
        frame.reading("pm2_5", f32::NAN, "ug/m3").unwrap();
        let text = frame.render().unwrap();
        assert!(text.starts_with("{\"data\": {\"pm2_5\": null}"));
    }

    #[test]
    fn test_reading_limit() {
        let mut frame = TelemetryFrame::new(Instant::ZERO);
        for _ in 0..MAX_READINGS {
            frame.reading("x", 1.0, "u").unwrap();
        }
        assert_eq!(
            frame.reading("x", 1.0, "u").unwrap_err(),
            TelemetryError::TooManyReadings
        );
    }
}
