//! ESP-IDF implementations of the HAL traits.
//!
//! # Wiring
//!
//! ```text
//! ESP32 UART1 TX ──────▶ ESP-AT RX
//! ESP32 UART1 RX ◀────── ESP-AT TX
//! GPIO (reset)   ──────▶ ESP-AT EN/RST (active low)
//! GPIO (enable)  ──────▶ ESP-AT CH_PD  (active high)
//! ```

use esp_idf_svc::hal::delay::{Ets, FreeRtos};
use esp_idf_svc::hal::gpio::{Output, OutputPin, PinDriver};
use esp_idf_svc::hal::uart::UartDriver;
use esp_idf_svc::sys;

use super::{Clock, ControlPins, Instant, SerialPort, SerialTimeout};
use crate::logging::current_log_stream;

/// UART link to the co-processor.
pub struct EspSerial<'d> {
    uart: UartDriver<'d>,
    framing_fault: bool,
}

impl<'d> EspSerial<'d> {
    pub fn new(uart: UartDriver<'d>) -> Self {
        Self {
            uart,
            framing_fault: false,
        }
    }

    fn ticks_until(deadline: Instant) -> sys::TickType_t {
        let remaining_us = deadline.as_micros() - now_us();
        if remaining_us <= 0 {
            return 0;
        }
        let ticks = (remaining_us as u64 * sys::configTICK_RATE_HZ as u64) / 1_000_000;
        ticks.clamp(1, sys::TickType_t::MAX as u64) as sys::TickType_t
    }
}

impl SerialPort for EspSerial<'_> {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), SerialTimeout> {
        let mut sent = 0;
        while sent < bytes.len() {
            match self.uart.write(&bytes[sent..]) {
                Ok(0) | Err(_) => return Err(SerialTimeout),
                Ok(n) => sent += n,
            }
        }
        Ok(())
    }

    fn receive_byte(&mut self, deadline: Instant) -> Result<u8, SerialTimeout> {
        let mut byte = [0u8; 1];
        loop {
            let ticks = Self::ticks_until(deadline);
            match self.uart.read(&mut byte, ticks) {
                Ok(1) => return Ok(byte[0]),
                Ok(_) if ticks == 0 => return Err(SerialTimeout),
                Ok(_) => continue,
                Err(_) => {
                    // Driver read errors on this link are line noise (bad stop bit, overrun)
                    self.framing_fault = true;
                    return Err(SerialTimeout);
                }
            }
        }
    }

    fn take_framing_fault(&mut self) -> bool {
        core::mem::take(&mut self.framing_fault)
    }
}

/// Reset (active low) and enable (active high) outputs.
pub struct EspControlPins<'d, R: OutputPin, E: OutputPin> {
    reset: PinDriver<'d, R, Output>,
    enable: PinDriver<'d, E, Output>,
}

impl<'d, R: OutputPin, E: OutputPin> EspControlPins<'d, R, E> {
    pub fn new(reset: PinDriver<'d, R, Output>, enable: PinDriver<'d, E, Output>) -> Self {
        Self { reset, enable }
    }
}

impl<R: OutputPin, E: OutputPin> ControlPins for EspControlPins<'_, R, E> {
    fn set_reset_line(&mut self, active: bool) {
        let result = if active {
            self.reset.set_low()
        } else {
            self.reset.set_high()
        };
        if let Err(e) = result {
            crate::node_warn!(current_log_stream(), now_us(), "reset line: {}", e);
        }
    }

    fn set_enable_line(&mut self, active: bool) {
        let result = if active {
            self.enable.set_high()
        } else {
            self.enable.set_low()
        };
        if let Err(e) = result {
            crate::node_warn!(current_log_stream(), now_us(), "enable line: {}", e);
        }
    }
}

/// `esp_timer` backed clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct EspClock;

impl Clock for EspClock {
    fn now(&self) -> Instant {
        Instant::from_micros(now_us())
    }

    fn delay_us(&self, us: u32) {
        // Yield to the scheduler for anything longer than a tick
        if us >= 10_000 {
            FreeRtos::delay_ms(us / 1000);
        } else {
            Ets::delay_us(us);
        }
    }

    fn relax(&self) {
        // One tick, so the idle task on this core can run
        FreeRtos::delay_ms(1);
    }
}

#[inline]
fn now_us() -> i64 {
    // SAFETY: esp_timer_get_time is always safe to call after boot
    unsafe { sys::esp_timer_get_time() }
}
