//! Node status register.
//!
//! One 32-bit word shared by every context. Bits are grouped by region so a
//! glance at the hex value in a telemetry frame tells which part is unhappy:
//!
//! ```text
//! 0xWW BB GG PB
//!   │  │  │  │└ board (battery, user requests, console)
//!   │  │  │  └─ PM2.5 sensor
//!   │  │  └──── BME680 gas sensor
//!   │  └─────── BME280 climate sensor
//!   └────────── WiFi
//! ```
//!
//! Letters in the flag names give the severity class: `E_` error, `W_`
//! warning, `U_` waiting on the user, `I_` informational.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::modem::ModemFlags;

/// A set of status bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StatusFlags(u32);

impl StatusFlags {
    pub const OK: Self = Self(0);

    // Board
    pub const W_BATT_LOW: Self = Self(0x0000_0001);
    pub const U_REQ_USB: Self = Self(0x0000_0002);
    pub const U_REQ_USER_INPUT: Self = Self(0x0000_0004);
    pub const I_CONSOLE_CONNECTED: Self = Self(0x0000_0008);

    // WiFi
    pub const W_WIFI_DISCONNECTED: Self = Self(0x0100_0000);
    pub const I_CLIENT_CONNECTED: Self = Self(0x0200_0000);
    pub const E_WIFI_FAIL: Self = Self(0x0400_0000);

    // BME280 temperature / humidity / pressure
    pub const E_BME280_COMM_FAIL: Self = Self(0x0001_0000);
    pub const E_BME280_SLEEP_FAIL: Self = Self(0x0002_0000);
    pub const E_BME280_NVM_FAIL: Self = Self(0x0004_0000);
    pub const E_BME280_NOT_FOUND: Self = Self(0x0008_0000);
    pub const E_BME280_GENERAL_FAIL: Self = Self(0x0010_0000);
    pub const W_BME280_OSR_INVALID: Self = Self(0x0020_0000);
    pub const I_BME280_READING: Self = Self(0x0040_0000);

    // BME680 gas
    pub const E_BME680_SELFTEST_FAIL: Self = Self(0x0000_0100);
    pub const E_BME680_COMM_FAIL: Self = Self(0x0000_0200);
    pub const E_BME680_GENERAL_FAIL: Self = Self(0x0000_0400);
    pub const W_BME680_GAS_INVALID: Self = Self(0x0000_0800);
    pub const W_BME680_GAS_UNSTABLE: Self = Self(0x0000_1000);
    pub const I_BME680_READING: Self = Self(0x0000_2000);

    // PM2.5 particulate
    pub const E_PM2_5_COMM_FAIL: Self = Self(0x0000_0010);
    pub const E_PM2_5_GENERAL_FAIL: Self = Self(0x0000_0020);
    pub const W_PM2_5_NO_DATA: Self = Self(0x0000_0040);
    pub const I_PM2_5_READING: Self = Self(0x0000_0080);

    // Regions
    pub const REGION_BOARD: Self = Self(0x0000_000f);
    pub const REGION_PM2_5: Self = Self(0x0000_00f0);
    pub const REGION_BME680: Self = Self(0x0000_ff00);
    pub const REGION_BME280: Self = Self(0x00ff_0000);
    pub const REGION_WIFI: Self = Self(0xff00_0000);

    // Severity classes
    pub const MASK_WAIT: Self = Self(Self::U_REQ_USB.0 | Self::U_REQ_USER_INPUT.0);
    pub const MASK_INFO: Self = Self(
        Self::I_CONSOLE_CONNECTED.0
            | Self::I_CLIENT_CONNECTED.0
            | Self::I_BME280_READING.0
            | Self::I_BME680_READING.0
            | Self::I_PM2_5_READING.0,
    );
    pub const MASK_WARNING: Self = Self(
        Self::W_BATT_LOW.0
            | Self::W_WIFI_DISCONNECTED.0
            | Self::W_BME280_OSR_INVALID.0
            | Self::W_BME680_GAS_INVALID.0
            | Self::W_BME680_GAS_UNSTABLE.0
            | Self::W_PM2_5_NO_DATA.0,
    );
    /// Everything not classed as wait, info or warning.
    pub const MASK_ERROR: Self =
        Self(!(Self::MASK_WAIT.0 | Self::MASK_INFO.0 | Self::MASK_WARNING.0));

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// All bits of `other` are set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Any bit of `other` is set.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Most severe class present.
    pub fn severity(self) -> Severity {
        if self.intersects(Self::MASK_ERROR) {
            Severity::Error
        } else if self.intersects(Self::MASK_WARNING) {
            Severity::Warning
        } else if self.intersects(Self::MASK_WAIT) {
            Severity::Wait
        } else if self.intersects(Self::MASK_INFO) {
            Severity::Info
        } else {
            Severity::Ok
        }
    }
}

impl core::ops::BitOr for StatusFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl core::fmt::LowerHex for StatusFlags {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Severity class, ordered from benign to fatal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Ok,
    Info,
    Wait,
    Warning,
    Error,
}

/// Shared status register.
///
/// ```ignore
/// static STATUS: NodeStatus = NodeStatus::new();
///
/// // I/O context, after a failed WiFi write:
/// STATUS.set(StatusFlags::E_WIFI_FAIL);
///
/// // sampler, when building the next frame:
/// frame.status(STATUS.snapshot());
/// ```
pub struct NodeStatus {
    bits: AtomicU32,
}

impl NodeStatus {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn set(&self, flags: StatusFlags) {
        self.bits.fetch_or(flags.0, Ordering::AcqRel);
    }

    /// Clear `flags`. Clearing an already clear flag is a no-op.
    #[inline]
    pub fn unset(&self, flags: StatusFlags) {
        self.bits.fetch_and(!flags.0, Ordering::AcqRel);
    }

    /// Set or clear `flags` depending on `on`.
    #[inline]
    pub fn assign(&self, flags: StatusFlags, on: bool) {
        if on {
            self.set(flags);
        } else {
            self.unset(flags);
        }
    }

    /// Clear every bit.
    #[inline]
    pub fn clear(&self) {
        self.bits.store(0, Ordering::Release);
    }

    #[inline]
    pub fn contains(&self, flags: StatusFlags) -> bool {
        self.snapshot().contains(flags)
    }

    #[inline]
    pub fn snapshot(&self) -> StatusFlags {
        StatusFlags(self.bits.load(Ordering::Acquire))
    }

    #[inline]
    pub fn severity(&self) -> Severity {
        self.snapshot().severity()
    }

    /// Mirror the modem's link flags into the WiFi region.
    pub fn apply_modem_flags(&self, modem: ModemFlags) {
        self.assign(
            StatusFlags::W_WIFI_DISCONNECTED,
            !modem.contains(ModemFlags::WIFI_CONNECTED),
        );
        self.assign(
            StatusFlags::I_CLIENT_CONNECTED,
            modem.contains(ModemFlags::CLIENT_CONNECTED),
        );
    }
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_set_unset() {
        let status = NodeStatus::new();
        assert!(status.snapshot().is_ok());

        status.set(StatusFlags::E_WIFI_FAIL | StatusFlags::W_BATT_LOW);
        assert!(status.contains(StatusFlags::E_WIFI_FAIL));
        assert_eq!(status.snapshot().bits(), 0x0400_0001);

        status.unset(StatusFlags::E_WIFI_FAIL);
        assert_eq!(status.snapshot(), StatusFlags::W_BATT_LOW);
    }

    #[test]
    fn test_severity_precedence() {
        assert_eq!(StatusFlags::OK.severity(), Severity::Ok);
        assert_eq!(StatusFlags::I_PM2_5_READING.severity(), Severity::Info);
        assert_eq!(
            (StatusFlags::U_REQ_USB | StatusFlags::I_PM2_5_READING).severity(),
            Severity::Wait
        );
        assert_eq!(
            (StatusFlags::W_WIFI_DISCONNECTED | StatusFlags::U_REQ_USB).severity(),
            Severity::Warning
        );
        assert_eq!(
            (StatusFlags::E_BME280_NOT_FOUND | StatusFlags::W_BATT_LOW).severity(),
            Severity::Error
        );
    }

    #[test]
    fn test_regions_partition_known_flags() {
        let regions = [
            StatusFlags::REGION_BOARD,
            StatusFlags::REGION_PM2_5,
            StatusFlags::REGION_BME680,
            StatusFlags::REGION_BME280,
            StatusFlags::REGION_WIFI,
        ];
        for (i, a) in regions.iter().enumerate() {
            for b in &regions[i + 1..] {
                assert!(!a.intersects(*b));
            }
        }
        assert!(StatusFlags::REGION_WIFI.contains(StatusFlags::E_WIFI_FAIL));
        assert!(StatusFlags::REGION_BOARD.contains(StatusFlags::I_CONSOLE_CONNECTED));
    }
}
