//! Test doubles for the HAL traits.
//!
//! Each double is a cheap handle over shared state, so a test keeps one
//! clone for inspection while the code under test owns the other.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use aq_node::hal::{Clock, ControlPins, Instant, SerialPort, SerialTimeout};

/// What the fake co-processor does after one transmit.
#[derive(Clone, Debug)]
pub enum Reply {
    Bytes(Vec<u8>),
    /// Say nothing; the read times out.
    Silence,
    /// Say nothing and flag a framing fault.
    Garbled,
}

impl Reply {
    pub fn ok(body: &str) -> Self {
        Reply::Bytes(format!("{body}\r\nOK\r\n").into_bytes())
    }

    pub fn error() -> Self {
        Reply::Bytes(b"ERROR\r\n".to_vec())
    }
}

#[derive(Default)]
struct SerialState {
    replies: VecDeque<Reply>,
    rx: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    framing_fault: bool,
}

/// Scripted serial link. Every transmit consumes the next [`Reply`];
/// with none left, the link stays silent.
#[derive(Clone, Default)]
pub struct MockSerial {
    state: Arc<Mutex<SerialState>>,
}

impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(replies: impl IntoIterator<Item = Reply>) -> Self {
        let serial = Self::new();
        serial.push_replies(replies);
        serial
    }

    pub fn push_replies(&self, replies: impl IntoIterator<Item = Reply>) {
        self.state.lock().unwrap().replies.extend(replies);
    }

    /// Bytes available to read without any transmit (console input).
    pub fn feed(&self, bytes: &[u8]) {
        self.state.lock().unwrap().rx.extend(bytes.iter().copied());
    }

    /// Every transmit so far, in order.
    /// Bytes received but not read yet.
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().rx.len()
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().written.clone()
    }

    /// Transmits as text.
    pub fn written_text(&self) -> Vec<String> {
        self.written()
            .into_iter()
            .map(|w| String::from_utf8_lossy(&w).into_owned())
            .collect()
    }

    /// All transmitted bytes concatenated.
    pub fn output(&self) -> String {
        self.written_text().concat()
    }
}

impl SerialPort for MockSerial {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), SerialTimeout> {
        let mut state = self.state.lock().unwrap();
        state.written.push(bytes.to_vec());
        match state.replies.pop_front() {
            Some(Reply::Bytes(reply)) => state.rx.extend(reply),
            Some(Reply::Garbled) => state.framing_fault = true,
            Some(Reply::Silence) | None => {}
        }
        Ok(())
    }

    fn receive_byte(&mut self, _deadline: Instant) -> Result<u8, SerialTimeout> {
        self.state.lock().unwrap().rx.pop_front().ok_or(SerialTimeout)
    }

    fn take_framing_fault(&mut self) -> bool {
        std::mem::take(&mut self.state.lock().unwrap().framing_fault)
    }
}

/// Serial port that only records, for console output.
#[derive(Clone, Default)]
pub struct CapturePort {
    out: Arc<Mutex<Vec<u8>>>,
}

impl CapturePort {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.out.lock().unwrap()).into_owned()
    }
}

impl SerialPort for CapturePort {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), SerialTimeout> {
        self.out.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    fn receive_byte(&mut self, _deadline: Instant) -> Result<u8, SerialTimeout> {
        Err(SerialTimeout)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinEvent {
    Reset(bool),
    Enable(bool),
}

/// Records every pin change.
#[derive(Clone, Default)]
pub struct MockPins {
    events: Arc<Mutex<Vec<PinEvent>>>,
}

impl MockPins {
    pub fn events(&self) -> Vec<PinEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of times reset was asserted.
    pub fn reset_pulses(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == PinEvent::Reset(true))
            .count()
    }
}

impl ControlPins for MockPins {
    fn set_reset_line(&mut self, active: bool) {
        self.events.lock().unwrap().push(PinEvent::Reset(active));
    }

    fn set_enable_line(&mut self, active: bool) {
        self.events.lock().unwrap().push(PinEvent::Enable(active));
    }
}

/// Manual clock; delays advance it instantly.
#[derive(Clone, Default)]
pub struct MockClock {
    now_us: Arc<AtomicI64>,
}

impl MockClock {
    pub fn advance_us(&self, us: i64) {
        self.now_us.fetch_add(us, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        Instant::from_micros(self.now_us.load(Ordering::SeqCst))
    }

    fn delay_us(&self, us: u32) {
        self.advance_us(us as i64);
    }

    fn relax(&self) {
        std::thread::yield_now();
    }
}
