//! Session with the ESP-AT WiFi co-processor.
//!
//! # Bring-up
//!
//! ```text
//! Uninitialized ──▶ GpioArmed ──▶ AwaitingEcho ──┬──▶ Ready
//!   enable on,        reset pulse,   probe "AT"   │
//!   reset released    boot delay     (retries,    └──▶ InitFailed
//!                                     re-reset on
//!                                     framing fault)
//! ```
//!
//! # Locking
//!
//! The serial link sits behind one lock. Every public operation takes it
//! once, including multi-step ones (length-prefixed send then payload), and
//! uses the lock-free [`CommandTransport`] calls underneath. The session is
//! shared by reference between the sampler and the I/O context.

mod state;

pub use state::{
    ClientRecord, LinkState, ModemFlags, ModemState, PowerState, Protocol, MAX_CLIENTS,
};

use core::fmt::Write as _;
use core::sync::atomic::{AtomicU8, Ordering};
use core::time::Duration;

use heapless::{String, Vec};

use crate::at::{CommError, CommandTransport, ResponseDocument, ResponseText};
use crate::hal::{Clock, ControlPins, SerialPort};
use crate::logging::current_log_stream;
use crate::sync::{SpinLock, SpinLockGuard};

/// Trivial command used to check the co-processor is alive.
pub const PROBE_COMMAND: &str = "AT";

/// Timing and retry policy of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModemTiming {
    /// Deadline for ordinary commands.
    pub command_timeout: Duration,
    /// Deadline for each bring-up probe.
    pub probe_timeout: Duration,
    /// Probes before giving up.
    pub init_attempts: u8,
    /// How long reset is held asserted.
    pub reset_hold_us: u32,
    /// Wait after releasing reset before the first probe.
    pub boot_delay_us: u32,
}

impl ModemTiming {
    pub const DEFAULT: ModemTiming = ModemTiming {
        command_timeout: Duration::from_secs(5),
        probe_timeout: Duration::from_secs(1),
        init_attempts: 5,
        reset_hold_us: 20_000,
        boot_delay_us: 500_000,
    };
}

impl Default for ModemTiming {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Session-level failure.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ModemError {
    #[error(transparent)]
    Comm(#[from] CommError),
    /// A required field was missing or out of range.
    #[error("malformed {0} response")]
    Malformed(&'static str),
    #[error("no answer after {attempts} probes")]
    InitFailed { attempts: u8 },
}

impl ModemError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Comm(e) => e.code(),
            Self::Malformed(_) => "M01",
            Self::InitFailed { .. } => "M02",
        }
    }
}

/// Outcome of a partially failed [`ModemSession::send_to_peers`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{unreached} peer(s) not reached: {cause}")]
pub struct SendFailure {
    /// Peers from the failing one onwards.
    pub unreached: usize,
    pub cause: ModemError,
}

/// Who receives a [`ModemSession::send_to_peers`] payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Peers {
    /// Every client from the last status refresh (possibly none).
    Known,
    /// Link 0 only, for sessions that never refreshed their client list.
    Default,
}

struct Link<S, P> {
    transport: CommandTransport<S>,
    pins: P,
}

/// A session with one co-processor.
pub struct ModemSession<S, P, K> {
    link: SpinLock<Link<S, P>>,
    state: SpinLock<ModemState>,
    phase: AtomicU8,
    clock: K,
    timing: ModemTiming,
}

impl<S, P, K> ModemSession<S, P, K>
where
    S: SerialPort,
    P: ControlPins,
    K: Clock,
{
    pub fn new(serial: S, pins: P, clock: K, timing: ModemTiming) -> Self {
        Self {
            link: SpinLock::new(Link {
                transport: CommandTransport::new(serial),
                pins,
            }),
            state: SpinLock::new(ModemState::default()),
            phase: AtomicU8::new(LinkState::Uninitialized as u8),
            clock,
            timing,
        }
    }

    pub fn link_state(&self) -> LinkState {
        LinkState::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Copy of the current session state.
    pub fn state(&self) -> ModemState {
        self.state.lock().clone()
    }

    pub fn flags(&self) -> ModemFlags {
        self.state.lock().flags
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    pub fn timing(&self) -> &ModemTiming {
        &self.timing
    }

    /// Power up, reset and probe the co-processor until it answers.
    pub fn init(&self) -> Result<(), ModemError> {
        let mut link = self.lock_link();

        link.pins.set_enable_line(true);
        link.pins.set_reset_line(false);
        self.set_phase(LinkState::GpioArmed);

        self.reset_pulse(&mut link.pins);
        self.set_phase(LinkState::AwaitingEcho);

        let attempts = self.timing.init_attempts.max(1);
        for attempt in 1..=attempts {
            let result =
                link.transport
                    .send_command(&self.clock, PROBE_COMMAND, self.timing.probe_timeout);

            match result {
                Ok(_) => {
                    self.set_phase(LinkState::Ready);
                    crate::node_info!(
                        current_log_stream(),
                        self.now_us(),
                        "modem ready after {} probe(s)",
                        attempt
                    );
                    return Ok(());
                }
                Err(CommError::Timeout) if link.transport.serial_mut().take_framing_fault() => {
                    crate::node_warn!(
                        current_log_stream(),
                        self.now_us(),
                        "probe {}: framing fault, resetting modem",
                        attempt
                    );
                    self.reset_pulse(&mut link.pins);
                }
                Err(e) => {
                    crate::node_warn!(
                        current_log_stream(),
                        self.now_us(),
                        "probe {}/{} failed: {}",
                        attempt,
                        attempts,
                        e
                    );
                }
            }
        }

        self.set_phase(LinkState::InitFailed);
        crate::node_error!(current_log_stream(), self.now_us(), "modem init failed");
        Err(ModemError::InitFailed { attempts })
    }

    /// Drive the co-processor's enable line.
    pub fn set_enabled(&self, on: bool) {
        self.lock_link().pins.set_enable_line(on);
        if !on {
            self.set_phase(LinkState::Uninitialized);
        }
    }

    /// Send one command verbatim.
    pub fn command(&self, cmd: &str) -> Result<ResponseText, CommError> {
        let result = self
            .lock_link()
            .transport
            .send_command(&self.clock, cmd, self.timing.command_timeout);

        if let Err(e) = &result {
            crate::node_debug!(current_log_stream(), self.now_us(), "{}: {}", cmd, e);
        }
        result
    }

    fn query(&self, cmd: &str) -> Result<ResponseDocument, ModemError> {
        let doc = self.command(cmd)?.tokenize();
        if doc.malformed_lines() > 0 || doc.dropped_lines() > 0 {
            crate::node_debug!(
                current_log_stream(),
                self.now_us(),
                "{}: {} malformed, {} dropped line(s)",
                cmd,
                doc.malformed_lines(),
                doc.dropped_lines()
            );
        }
        Ok(doc)
    }

    /// Station address, connection table and mux mode, merged into the state.
    ///
    /// The first failing query aborts; queries already merged keep their
    /// new values, the rest keep their previous ones.
    pub fn refresh_status(&self) -> Result<ModemFlags, ModemError> {
        let result = self.refresh_inner();
        if let Err(e) = &result {
            crate::node_warn!(current_log_stream(), self.now_us(), "status refresh: {}", e);
        }
        result
    }

    fn refresh_inner(&self) -> Result<ModemFlags, ModemError> {
        let station = self.query("AT+CIPSTA?")?;
        self.state.lock().apply_station(&station);

        let connections = self.query("AT+CIPSTATUS")?;
        self.state.lock().apply_connections(&connections)?;

        let mux = self.query("AT+CIPMUX?")?;
        self.state.lock().apply_mux(&mux)?;

        Ok(self.flags())
    }

    /// Query the station state and SSID. Returns whether it is connected.
    pub fn refresh_wifi_state(&self) -> Result<bool, ModemError> {
        let doc = self.query("AT+CWSTATE?")?;
        self.state.lock().apply_wifi_state(&doc)
    }

    /// Enable multiple connections and listen on `port`.
    pub fn start_server(&self, port: u16) -> Result<(), ModemError> {
        let mut cmd: String<32> = String::new();
        write!(cmd, "AT+CIPSERVER=1,{}", port).map_err(|_| CommError::CommandTooLong)?;

        {
            let mut link = self.lock_link();
            let timeout = self.timing.command_timeout;
            link.transport.send_command(&self.clock, "AT+CIPMUX=1", timeout)?;
            link.transport.send_command(&self.clock, &cmd, timeout)?;
        }

        let mut state = self.state.lock();
        state.flags.insert(ModemFlags::MUX_ON | ModemFlags::SERVER_ON);
        state.port = port;
        drop(state);

        crate::node_info!(current_log_stream(), self.now_us(), "server listening on {}", port);
        Ok(())
    }

    /// Send `payload` to each peer in turn.
    ///
    /// Returns the number of peers reached. Stops at the first failure and
    /// reports how many peers (the failing one included) were not reached.
    pub fn send_to_peers(&self, payload: &[u8], peers: Peers) -> Result<usize, SendFailure> {
        if payload.is_empty() {
            return Ok(0);
        }

        let (targets, mux) = {
            let state = self.state.lock();
            let mut targets: Vec<u8, MAX_CLIENTS> = Vec::new();
            match peers {
                Peers::Known => {
                    for client in &state.clients {
                        // Same capacity as the client list
                        let _ = targets.push(client.index);
                    }
                }
                Peers::Default => {
                    let _ = targets.push(0);
                }
            }
            (targets, state.flags.contains(ModemFlags::MUX_ON))
        };

        for (sent, &index) in targets.iter().enumerate() {
            if let Err(cause) = self.send_one(index, payload, mux) {
                crate::node_warn!(
                    current_log_stream(),
                    self.now_us(),
                    "send to link {} failed: {}",
                    index,
                    cause
                );
                return Err(SendFailure {
                    unreached: targets.len() - sent,
                    cause,
                });
            }
        }

        Ok(targets.len())
    }

    /// `AT+CIPSEND` then the payload, without releasing the link in between.
    fn send_one(&self, index: u8, payload: &[u8], mux: bool) -> Result<(), ModemError> {
        let mut cmd: String<32> = String::new();
        let formatted = if mux {
            write!(cmd, "AT+CIPSEND={},{}", index, payload.len())
        } else {
            write!(cmd, "AT+CIPSEND={}", payload.len())
        };
        formatted.map_err(|_| CommError::CommandTooLong)?;

        let timeout = self.timing.command_timeout;
        let mut link = self.lock_link();
        link.transport.send_command(&self.clock, &cmd, timeout)?;
        link.transport.send_raw(&self.clock, payload, timeout)?;
        Ok(())
    }

    /// Ask for light sleep. Success means the command was accepted.
    pub fn sleep(&self) -> Result<(), ModemError> {
        self.power_command("AT+SLEEP=1", PowerState::Sleep)
    }

    pub fn wake(&self) -> Result<(), ModemError> {
        self.power_command("AT+SLEEP=0", PowerState::Awake)
    }

    /// Deep sleep for `duration`; the co-processor reboots when it wakes.
    pub fn deep_sleep(&self, duration: Duration) -> Result<(), ModemError> {
        let ms = u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);
        let mut cmd: String<24> = String::new();
        write!(cmd, "AT+GSLP={}", ms).map_err(|_| CommError::CommandTooLong)?;
        self.power_command(&cmd, PowerState::DeepSleep)
    }

    fn power_command(&self, cmd: &str, next: PowerState) -> Result<(), ModemError> {
        self.command(cmd)?;
        self.state.lock().power = next;
        Ok(())
    }

    fn lock_link(&self) -> SpinLockGuard<'_, Link<S, P>> {
        self.link.lock_with(|| self.clock.relax())
    }

    fn reset_pulse(&self, pins: &mut P) {
        pins.set_reset_line(true);
        self.clock.delay_us(self.timing.reset_hold_us);
        pins.set_reset_line(false);
        self.clock.delay_us(self.timing.boot_delay_us);
    }

    fn set_phase(&self, phase: LinkState) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    fn now_us(&self) -> i64 {
        self.clock.now().as_micros()
    }
}
