//! Session state derived from the co-processor's status queries.

use heapless::Vec;

use super::ModemError;
use crate::at::parse::{ResponseDocument, ResponseLine, TokenText};

/// Most connections the session tracks.
pub const MAX_CLIENTS: usize = 8;

/// Link flags recomputed on every refresh.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ModemFlags(u8);

impl ModemFlags {
    pub const WIFI_CONNECTED: Self = Self(0x01);
    pub const MUX_ON: Self = Self(0x02);
    pub const SERVER_ON: Self = Self(0x04);
    pub const CLIENT_CONNECTED: Self = Self(0x08);
    pub const AS_CLIENT: Self = Self(0x10);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: Self, on: bool) {
        if on {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }
}

impl core::ops::BitOr for ModemFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Transport of one connection as reported by `+CIPSTATUS`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    TcpV6,
    Udp,
    UdpV6,
    Ssl,
    SslV6,
    /// Anything the table below does not know.
    Unknown,
}

impl Protocol {
    pub fn from_token(token: &str) -> Self {
        match token {
            "TCP" => Protocol::Tcp,
            "TCPv6" => Protocol::TcpV6,
            "UDP" => Protocol::Udp,
            "UDPv6" => Protocol::UdpV6,
            "SSL" => Protocol::Ssl,
            "SSLv6" => Protocol::SslV6,
            _ => Protocol::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::TcpV6 => "TCPv6",
            Protocol::Udp => "UDP",
            Protocol::UdpV6 => "UDPv6",
            Protocol::Ssl => "SSL",
            Protocol::SslV6 => "SSLv6",
            Protocol::Unknown => "?",
        }
    }
}

/// One connected peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientRecord {
    /// Link id used by `AT+CIPSEND=<id>,<len>`.
    pub index: u8,
    pub protocol: Protocol,
    pub ip: TokenText,
    pub remote_port: u16,
    pub local_port: u16,
    /// Peer connected to our server (as opposed to us dialing out).
    pub passive: bool,
}

/// Power mode last accepted by the co-processor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PowerState {
    #[default]
    Awake,
    Sleep,
    DeepSleep,
}

/// Bring-up progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    Uninitialized = 0,
    /// Enable line driven, reset released.
    GpioArmed = 1,
    /// Reset pulsed, probing.
    AwaitingEcho = 2,
    Ready = 3,
    InitFailed = 4,
}

impl LinkState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => LinkState::GpioArmed,
            2 => LinkState::AwaitingEcho,
            3 => LinkState::Ready,
            4 => LinkState::InitFailed,
            _ => LinkState::Uninitialized,
        }
    }
}

/// Everything the session knows about the co-processor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModemState {
    pub flags: ModemFlags,
    pub ip: TokenText,
    pub gateway: TokenText,
    pub netmask: TokenText,
    pub ssid: TokenText,
    /// Listening port once the server is up.
    pub port: u16,
    pub power: PowerState,
    pub clients: Vec<ClientRecord, MAX_CLIENTS>,
}

impl ModemState {
    pub fn is_wifi_connected(&self) -> bool {
        self.flags.contains(ModemFlags::WIFI_CONNECTED)
    }

    /// Merge an `AT+CIPSTA?` answer.
    ///
    /// Missing `ip`/`gateway`, or the unspecified address, means the station
    /// is down: the flag and the address fields are cleared whatever they
    /// held before.
    pub(crate) fn apply_station(&mut self, doc: &ResponseDocument) {
        let ip = doc.get_property("ip").and_then(|l| l.text(0));
        let gateway = doc.get_property("gateway").and_then(|l| l.text(0));

        match (ip, gateway) {
            (Some(ip), Some(gateway)) if !ip.is_empty() && ip != "0.0.0.0" => {
                self.ip = text_of(ip);
                self.gateway = text_of(gateway);
                self.netmask = doc
                    .get_property("netmask")
                    .and_then(|l| l.text(0))
                    .map(text_of)
                    .unwrap_or_default();
                self.flags.insert(ModemFlags::WIFI_CONNECTED);
            }
            _ => {
                self.flags.remove(ModemFlags::WIFI_CONNECTED);
                self.ip.clear();
                self.gateway.clear();
                self.netmask.clear();
            }
        }
    }

    /// Merge an `AT+CIPSTATUS` answer. Leaves the state untouched on error.
    pub(crate) fn apply_connections(&mut self, doc: &ResponseDocument) -> Result<(), ModemError> {
        const QUERY: &str = "AT+CIPSTATUS";

        let code = doc
            .get_property("STATUS")
            .and_then(|l| l.int(0))
            .ok_or(ModemError::Malformed(QUERY))?;

        match code {
            // Station down
            0 | 1 | 5 => self
                .flags
                .remove(ModemFlags::SERVER_ON | ModemFlags::CLIENT_CONNECTED),
            // Station up, server reachable
            2..=4 => self.flags.insert(ModemFlags::SERVER_ON),
            _ => return Err(ModemError::Malformed(QUERY)),
        }

        self.clients.clear();
        self.flags
            .remove(ModemFlags::CLIENT_CONNECTED | ModemFlags::AS_CLIENT);

        for line in doc.lines_with("+CIPSTATUS") {
            let Some(client) = client_from_line(line) else {
                continue;
            };
            let flag = if client.passive {
                ModemFlags::CLIENT_CONNECTED
            } else {
                ModemFlags::AS_CLIENT
            };
            if self.clients.push(client).is_ok() {
                self.flags.insert(flag);
            }
        }

        Ok(())
    }

    /// Merge an `AT+CIPMUX?` answer.
    pub(crate) fn apply_mux(&mut self, doc: &ResponseDocument) -> Result<(), ModemError> {
        let mode = doc
            .get_property("+CIPMUX")
            .and_then(|l| l.int(0))
            .ok_or(ModemError::Malformed("AT+CIPMUX?"))?;
        self.flags.set(ModemFlags::MUX_ON, mode != 0);
        Ok(())
    }

    /// Merge an `AT+CWSTATE?` answer. Returns whether the station is connected.
    pub(crate) fn apply_wifi_state(&mut self, doc: &ResponseDocument) -> Result<bool, ModemError> {
        const QUERY: &str = "AT+CWSTATE?";

        let line = doc
            .get_property("+CWSTATE")
            .ok_or(ModemError::Malformed(QUERY))?;

        match line.int(0) {
            Some(2) => {
                self.ssid = line.text(1).map(text_of).unwrap_or_default();
                self.flags.insert(ModemFlags::WIFI_CONNECTED);
                Ok(true)
            }
            Some(0 | 1 | 3 | 4) => {
                self.ssid.clear();
                self.flags.remove(ModemFlags::WIFI_CONNECTED);
                Ok(false)
            }
            _ => Err(ModemError::Malformed(QUERY)),
        }
    }
}

/// `+CIPSTATUS:<id>,"<type>","<ip>",<rport>,<lport>,<passive>`
fn client_from_line(line: &ResponseLine) -> Option<ClientRecord> {
    Some(ClientRecord {
        index: u8::try_from(line.int(0)?).ok()?,
        protocol: Protocol::from_token(line.text(1)?),
        ip: text_of(line.text(2)?),
        remote_port: u16::try_from(line.int(3)?).ok()?,
        local_port: u16::try_from(line.int(4)?).ok()?,
        passive: line.int(5)? != 0,
    })
}

fn text_of(s: &str) -> TokenText {
    let mut text = TokenText::new();
    // Token content is already bounded to TokenText's capacity
    let _ = text.push_str(s);
    text
}
