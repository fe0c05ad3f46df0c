//! Hardware Abstraction Layer for aq-node.
//!
//! The protocol engine and the output multiplexer only see these traits.
//! Board glue lives in [`esp`] and is compiled for ESP-IDF targets only.

use core::ops::Add;
use core::time::Duration;

#[cfg(target_os = "espidf")]
pub mod esp;

/// Monotonic timestamp in microseconds since boot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(i64);

impl Instant {
    /// Boot.
    pub const ZERO: Instant = Instant(0);

    pub const fn from_micros(us: i64) -> Self {
        Self(us)
    }

    pub const fn from_millis(ms: i64) -> Self {
        Self(ms.saturating_mul(1000))
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    pub const fn as_millis(self) -> i64 {
        self.0 / 1000
    }

    /// Time from `earlier` to `self`, zero if `earlier` is in the future.
    pub fn saturating_duration_since(self, earlier: Instant) -> Duration {
        let diff = self.0.saturating_sub(earlier.0);
        if diff <= 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(diff as u64)
        }
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        let us = i64::try_from(rhs.as_micros()).unwrap_or(i64::MAX);
        Instant(self.0.saturating_add(us))
    }
}

/// The serial link gave up before the deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("serial link timeout")]
pub struct SerialTimeout;

/// Byte-level serial link to the WiFi co-processor.
pub trait SerialPort {
    /// Write all bytes or time out.
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), SerialTimeout>;

    /// Block for one byte until `deadline`.
    fn receive_byte(&mut self, deadline: Instant) -> Result<u8, SerialTimeout>;

    /// Report (and clear) a line-level framing fault seen since the last call.
    ///
    /// Links that cannot detect framing errors never report one.
    fn take_framing_fault(&mut self) -> bool {
        false
    }

    /// Drop whatever is already waiting in the receive path, without blocking.
    ///
    /// Stops after [`DISCARD_LIMIT`] bytes so a chattering link cannot stall
    /// the caller. Returns the number of bytes dropped.
    fn discard_input(&mut self) -> usize {
        let mut dropped = 0;
        while dropped < DISCARD_LIMIT && self.receive_byte(Instant::ZERO).is_ok() {
            dropped += 1;
        }
        dropped
    }
}

/// Most bytes a single [`SerialPort::discard_input`] call drops.
pub const DISCARD_LIMIT: usize = 4096;

/// Reset and enable lines of the co-processor.
///
/// `active == true` means asserted: held in reset, or powered.
pub trait ControlPins {
    fn set_reset_line(&mut self, active: bool);
    fn set_enable_line(&mut self, active: bool);
}

/// Monotonic clock plus busy and idle waits.
pub trait Clock {
    fn now(&self) -> Instant;

    /// Short busy wait.
    fn delay_us(&self, us: u32);

    /// Back off while another context holds a shared resource.
    fn relax(&self) {
        core::hint::spin_loop();
    }

    /// Idle until `deadline`. Returns immediately if it already passed.
    fn sleep_until(&self, deadline: Instant) {
        loop {
            let remaining = deadline.saturating_duration_since(self.now());
            if remaining.is_zero() {
                return;
            }
            let chunk = remaining.as_micros().min(u32::MAX as u128) as u32;
            self.delay_us(chunk);
        }
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn delay_us(&self, us: u32) {
        (**self).delay_us(us)
    }

    fn relax(&self) {
        (**self).relax()
    }

    fn sleep_until(&self, deadline: Instant) {
        (**self).sleep_until(deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_add_and_since() {
        let t0 = Instant::from_millis(5);
        let t1 = t0 + Duration::from_millis(20);
        assert_eq!(t1.as_micros(), 25_000);
        assert_eq!(t1.saturating_duration_since(t0), Duration::from_millis(20));
        assert_eq!(t0.saturating_duration_since(t1), Duration::ZERO);
    }

    #[test]
    fn test_instant_add_saturates() {
        let t = Instant::from_micros(i64::MAX - 1) + Duration::from_secs(10);
        assert_eq!(t.as_micros(), i64::MAX);
    }
}
