//! # aq-node
//!
//! Air-quality sensor node firmware.
//!
//! ## Architecture
//!
//! ```text
//! core 0: sampler                               core 1: I/O
//! ───────────────                               ───────────
//! sensors ──▶ TelemetryFrame ──▶ OutputMux ───▶ ConsoleSink ──▶ console UART
//!                 ▲                   │    └──▶ WifiSink ─────▶ ModemSession
//! NodeStatus ─────┘                   │                            │
//!     ▲                               └──▶ sleep                   ▼
//!     └────────── refresh_status ◀─────────────────────────── ESP-AT co-processor
//! ```
//!
//! - [`at`]: AT response tokenizer and command transport.
//! - [`modem`]: bring-up, status queries, data send and power control.
//! - [`mux`]: buffer pool and priority scheduler fanning frames out to sinks.
//! - [`hal`]: serial, pin and clock traits, with an ESP-IDF implementation.

#![cfg_attr(not(test), no_std)]

pub mod at;
pub mod config;
pub mod console;
pub mod hal;
pub mod log_drain;
pub mod log_globals;
pub mod logging;
pub mod modem;
pub mod mux;
pub mod status;
pub mod sync;
pub mod telemetry;

pub use config::CONFIG;
pub use log_drain::LogDrain;
pub use log_globals::{IO_LOG, SAMPLER_LOG};
pub use modem::{ModemError, ModemFlags, ModemSession, ModemTiming, Peers};
pub use mux::{MuxError, MuxSettings, NodeOutput, OutputMux, Sink, SinkError};
pub use status::{NodeStatus, Severity, StatusFlags};
pub use telemetry::{TelemetryError, TelemetryFrame};
