//! The node's two output sinks.

use crate::hal::{Clock, ControlPins, Instant, SerialPort};
use crate::modem::{ModemFlags, ModemSession, Peers};
use crate::status::{NodeStatus, StatusFlags};

use super::{Sink, SinkError};

/// Local serial console. Skips output while no terminal is attached.
///
/// A failed write marks the terminal detached by clearing
/// [`StatusFlags::I_CONSOLE_CONNECTED`]; a keypress attaches it again.
pub struct ConsoleSink<'a, W> {
    port: W,
    status: &'a NodeStatus,
}

impl<'a, W: SerialPort> ConsoleSink<'a, W> {
    pub fn new(port: W, status: &'a NodeStatus) -> Self {
        Self { port, status }
    }

    /// The console port, for the log drain and the passthrough shell.
    pub fn port_mut(&mut self) -> &mut W {
        &mut self.port
    }

    pub fn into_inner(self) -> W {
        self.port
    }

    /// Without blocking, re-attach a detached terminal once it sends a byte.
    ///
    /// Returns whether the console is attached afterwards.
    pub fn poll_attach(&mut self) -> bool {
        if self.status.contains(StatusFlags::I_CONSOLE_CONNECTED) {
            return true;
        }
        if self.port.receive_byte(Instant::ZERO).is_err() {
            return false;
        }
        self.port.discard_input();
        self.status.set(StatusFlags::I_CONSOLE_CONNECTED);
        true
    }
}

impl<W: SerialPort> Sink for ConsoleSink<'_, W> {
    fn send(&mut self, payload: &[u8]) -> Result<(), SinkError> {
        if !self.status.contains(StatusFlags::I_CONSOLE_CONNECTED) {
            return Err(SinkError::NotConnected);
        }
        if let Err(e) = self.port.transmit(payload) {
            self.status.unset(StatusFlags::I_CONSOLE_CONNECTED);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Every TCP client of the co-processor's server.
///
/// Reflects the outcome in [`StatusFlags::E_WIFI_FAIL`].
pub struct WifiSink<'a, S, P, K> {
    session: &'a ModemSession<S, P, K>,
    status: &'a NodeStatus,
}

impl<'a, S, P, K> WifiSink<'a, S, P, K> {
    pub fn new(session: &'a ModemSession<S, P, K>, status: &'a NodeStatus) -> Self {
        Self { session, status }
    }
}

impl<S, P, K> Sink for WifiSink<'_, S, P, K>
where
    S: SerialPort,
    P: ControlPins,
    K: Clock,
{
    fn send(&mut self, payload: &[u8]) -> Result<(), SinkError> {
        if !self.session.flags().contains(ModemFlags::CLIENT_CONNECTED) {
            return Err(SinkError::NotConnected);
        }

        match self.session.send_to_peers(payload, Peers::Known) {
            Ok(_) => {
                self.status.unset(StatusFlags::E_WIFI_FAIL);
                Ok(())
            }
            Err(failure) => {
                self.status.set(StatusFlags::E_WIFI_FAIL);
                Err(failure.into())
            }
        }
    }
}
