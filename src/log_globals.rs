//! Global log streams, one per execution context.
//!
//! Each stream has a single producing context and the log drain as its
//! only consumer.

use crate::logging::LogStream;

/// Sampler context (core 0): sensor reads, status refresh, `emit`.
pub static SAMPLER_LOG: LogStream = LogStream::new();

/// I/O context (core 1): sink execution and the passthrough shell.
pub static IO_LOG: LogStream = LogStream::new();
