//! Module: config
//!
//! Runtime configuration of the node. Every setting is an atomic so the
//! shell and the boot code can change it while both execution contexts
//! read it; nothing here takes a lock.
//!
//! Components never hold a reference to [`CONFIG`]: they get plain
//! snapshots ([`ModemTiming`], [`MuxSettings`]) at construction time.

use core::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, Ordering};
use core::time::Duration;

use crate::logging::LogLevel;
use crate::modem::ModemTiming;
use crate::mux::{Fairness, MuxSettings};

/// TCP port the co-processor's server listens on.
pub const DEFAULT_SERVER_PORT: u16 = 333;

/// Seconds between two `refresh_status` calls from the sampler.
pub const DEFAULT_REFRESH_INTERVAL_S: u32 = 10;

/// Milliseconds between telemetry frames.
pub const DEFAULT_SAMPLE_INTERVAL_MS: u32 = 2_000;

pub const DEFAULT_LOG_LEVEL: LogLevel = LogLevel::Info;

/// All node settings.
pub struct NodeConfig {
    pub command_timeout_ms: AtomicU32,
    pub probe_timeout_ms: AtomicU32,
    pub init_attempts: AtomicU8,
    pub reset_hold_us: AtomicU32,
    pub boot_delay_us: AtomicU32,

    pub console_priority: AtomicU8,
    pub wifi_priority: AtomicU8,
    pub sleep_priority: AtomicU8,
    /// Bypass limit; 0 for strict priority.
    pub fairness_limit: AtomicU8,

    pub server_port: AtomicU16,
    pub log_level: AtomicU8,
    pub refresh_interval_s: AtomicU32,
    pub sample_interval_ms: AtomicU32,
}

impl NodeConfig {
    pub const fn new() -> Self {
        let timing = ModemTiming::DEFAULT;
        let mux = MuxSettings::DEFAULT;
        let fairness_limit = match mux.fairness {
            Fairness::Strict => 0,
            Fairness::Bounded(n) => n,
        };

        Self {
            command_timeout_ms: AtomicU32::new(timing.command_timeout.as_millis() as u32),
            probe_timeout_ms: AtomicU32::new(timing.probe_timeout.as_millis() as u32),
            init_attempts: AtomicU8::new(timing.init_attempts),
            reset_hold_us: AtomicU32::new(timing.reset_hold_us),
            boot_delay_us: AtomicU32::new(timing.boot_delay_us),

            console_priority: AtomicU8::new(mux.console_priority),
            wifi_priority: AtomicU8::new(mux.wifi_priority),
            sleep_priority: AtomicU8::new(mux.sleep_priority),
            fairness_limit: AtomicU8::new(fairness_limit),

            server_port: AtomicU16::new(DEFAULT_SERVER_PORT),
            log_level: AtomicU8::new(DEFAULT_LOG_LEVEL as u8),
            refresh_interval_s: AtomicU32::new(DEFAULT_REFRESH_INTERVAL_S),
            sample_interval_ms: AtomicU32::new(DEFAULT_SAMPLE_INTERVAL_MS),
        }
    }

    pub fn modem_timing(&self) -> ModemTiming {
        ModemTiming {
            command_timeout: Duration::from_millis(
                self.command_timeout_ms.load(Ordering::Relaxed) as u64,
            ),
            probe_timeout: Duration::from_millis(
                self.probe_timeout_ms.load(Ordering::Relaxed) as u64,
            ),
            init_attempts: self.init_attempts.load(Ordering::Relaxed),
            reset_hold_us: self.reset_hold_us.load(Ordering::Relaxed),
            boot_delay_us: self.boot_delay_us.load(Ordering::Relaxed),
        }
    }

    pub fn mux_settings(&self) -> MuxSettings {
        MuxSettings {
            console_priority: self.console_priority.load(Ordering::Relaxed),
            wifi_priority: self.wifi_priority.load(Ordering::Relaxed),
            sleep_priority: self.sleep_priority.load(Ordering::Relaxed),
            fairness: Fairness::from_limit(self.fairness_limit.load(Ordering::Relaxed)),
        }
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_u8(self.log_level.load(Ordering::Relaxed))
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.log_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn server_port(&self) -> u16 {
        self.server_port.load(Ordering::Relaxed)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_s.load(Ordering::Relaxed) as u64)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.load(Ordering::Relaxed) as u64)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Node-wide configuration.
pub static CONFIG: NodeConfig = NodeConfig::new();
