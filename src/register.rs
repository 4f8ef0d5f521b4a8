//! Known EtherCAT slave controller (ESC) register addresses.
//!
//! Ground truth for the addresses below is ETG1000.4 Table 31 (general), Table 34 (DL status/
//! error counters) and Table 59/60 (sync manager / distributed clock). A handful of named fields
//! occupy fewer than 8 bits at a byte address; for those the high 16 bits of the enum's `u32`
//! wire value encode a bit offset within that byte (see [`RegisterAddress::bit_offset`]).

/// A named ESC register. `From<RegisterAddress> for u16` gives the byte address; multi-byte
/// registers occupy `address..address + byte_len()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RegisterAddress {
    /// Slave type, `u8`.
    Type = 0x0000,
    /// EtherCAT revision, `u8`.
    Revision = 0x0001,
    /// Slave build, `u16`.
    Build = 0x0002,
    /// Number of supported FMMU entities, `u8`.
    FmmuCount = 0x0004,
    /// Number of supported sync manager channels, `u8`.
    SyncManagerChannels = 0x0005,
    /// RAM size in kilo-octets (1024 octets), `u8`.
    RamSize = 0x0006,
    /// EtherCAT port descriptors 0-3, `u8`.
    PortDescriptors = 0x0007,
    /// Supported feature flags, `u16`.
    SupportFlags = 0x0008,
    /// Configured station address, `u16`.
    ConfiguredStationAddress = 0x0010,
    /// Configured station alias, `u16`.
    ConfiguredStationAlias = 0x0012,
    /// DL status, `u16`. Defined in ETG1000.4 Table 34.
    DlStatus = 0x0110,

    /// RX error counter, port 0, `u8`. ETG1000.4 Table 34.
    RxErrorCounterPort0 = 0x0300,
    /// Forwarded RX error counter, port 0, `u8`.
    ForwardedRxErrorCounterPort0 = 0x0301,
    /// Frame error counter, port 1, `u8`.
    FrameErrorCounterPort1 = 0x0302,
    /// RX error counter, port 1, `u8`.
    RxErrorCounterPort1 = 0x0303,
    /// Forwarded RX error counter, port 1, `u8`.
    ForwardedRxErrorCounterPort1 = 0x0304,
    /// Frame error counter, port 2, `u8`.
    FrameErrorCounterPort2 = 0x0305,
    /// RX error counter, port 2, `u8`.
    RxErrorCounterPort2 = 0x0306,
    /// Forwarded RX error counter, port 2, `u8`.
    ForwardedRxErrorCounterPort2 = 0x0307,
    /// Frame error counter, port 3, `u8`.
    FrameErrorCounterPort3 = 0x0308,
    /// RX error counter, port 3, `u8`.
    RxErrorCounterPort3 = 0x0309,
    /// Forwarded RX error counter, port 3, `u8`.
    ForwardedRxErrorCounterPort3 = 0x030A,
    /// ECAT processing unit error counter, `u8`.
    EcatProcessingUnitErrorCounter = 0x030C,
    /// PDI error counter, `u8`.
    PdiErrorCounter = 0x030D,
    /// Lost link counter, port 0, `u8`.
    LostLinkCounterPort0 = 0x0310,
    /// Lost link counter, port 1, `u8`.
    LostLinkCounterPort1 = 0x0311,
    /// Lost link counter, port 2, `u8`.
    LostLinkCounterPort2 = 0x0312,
    /// Lost link counter, port 3, `u8`.
    LostLinkCounterPort3 = 0x0313,

    /// Application Layer (AL) control register, `u8`. ETG1000.4 Table 35.
    AlControl = 0x0120,
    /// Application Layer (AL) status register, `u8`.
    AlStatus = 0x0130,
    /// Application Layer (AL) status code register, `u16`.
    AlStatusCode = 0x0134,

    /// Watchdog divider, `u16`.
    WatchdogDivider = 0x0400,
    /// PDI watchdog timeout, `u16`.
    PdiWatchdog = 0x0410,
    /// Sync manager watchdog timeout, `u16`.
    SyncManagerWatchdog = 0x0420,
    /// Sync manager watchdog status, `u16`.
    SyncManagerWatchdogStatus = 0x0440,
    /// Sync manager watchdog counter, `u8`.
    SyncManagerWatchdogCounter = 0x0442,
    /// PDI watchdog counter, `u8`.
    PdiWatchdogCounter = 0x0443,

    /// EEPROM (SII) config register, `u16`.
    SiiConfig = 0x0500,
    /// EEPROM (SII) control register, `u16`.
    SiiControl = 0x0502,
    /// EEPROM (SII) control address, `u32`.
    SiiAddress = 0x0504,
    /// EEPROM (SII) read/write data window, 4 bytes (read) or 2 bytes (write).
    SiiData = 0x0508,

    /// Fieldbus Memory Management Unit 0 configuration block, 16 bytes.
    Fmmu0 = 0x0600,
    /// Sync manager 0 configuration block, 8 bytes.
    Sm0 = 0x0800,

    /// Distributed clock port 0 receive time, `u32`.
    DcTimePort0 = 0x0900,
    /// Distributed clock system time, `u64`.
    DcSystemTime = 0x0910,
    /// Distributed clock system time offset, `u64`.
    DcSystemTimeOffset = 0x0920,
    /// Distributed clock transmission delay, `u32`.
    DcSystemTimeTransmissionDelay = 0x0928,
}

impl From<RegisterAddress> for u16 {
    fn from(reg: RegisterAddress) -> Self {
        reg as u16
    }
}

/// Error returned when a byte address does not name a register this crate knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{0:#06x} is not a known register address")]
pub struct UnknownRegister(pub u16);

impl TryFrom<u16> for RegisterAddress {
    type Error = UnknownRegister;

    /// Recover a [`RegisterAddress`] from its wire byte address, the inverse of
    /// `u16::from(RegisterAddress)`, used by the log codec to decode a register-sample record's
    /// tag (spec §4.9 "register sample").
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0x0000 => Self::Type,
            0x0001 => Self::Revision,
            0x0002 => Self::Build,
            0x0004 => Self::FmmuCount,
            0x0005 => Self::SyncManagerChannels,
            0x0006 => Self::RamSize,
            0x0007 => Self::PortDescriptors,
            0x0008 => Self::SupportFlags,
            0x0010 => Self::ConfiguredStationAddress,
            0x0012 => Self::ConfiguredStationAlias,
            0x0110 => Self::DlStatus,
            0x0300 => Self::RxErrorCounterPort0,
            0x0301 => Self::ForwardedRxErrorCounterPort0,
            0x0302 => Self::FrameErrorCounterPort1,
            0x0303 => Self::RxErrorCounterPort1,
            0x0304 => Self::ForwardedRxErrorCounterPort1,
            0x0305 => Self::FrameErrorCounterPort2,
            0x0306 => Self::RxErrorCounterPort2,
            0x0307 => Self::ForwardedRxErrorCounterPort2,
            0x0308 => Self::FrameErrorCounterPort3,
            0x0309 => Self::RxErrorCounterPort3,
            0x030A => Self::ForwardedRxErrorCounterPort3,
            0x030C => Self::EcatProcessingUnitErrorCounter,
            0x030D => Self::PdiErrorCounter,
            0x0310 => Self::LostLinkCounterPort0,
            0x0311 => Self::LostLinkCounterPort1,
            0x0312 => Self::LostLinkCounterPort2,
            0x0313 => Self::LostLinkCounterPort3,
            0x0120 => Self::AlControl,
            0x0130 => Self::AlStatus,
            0x0134 => Self::AlStatusCode,
            0x0400 => Self::WatchdogDivider,
            0x0410 => Self::PdiWatchdog,
            0x0420 => Self::SyncManagerWatchdog,
            0x0440 => Self::SyncManagerWatchdogStatus,
            0x0442 => Self::SyncManagerWatchdogCounter,
            0x0443 => Self::PdiWatchdogCounter,
            0x0500 => Self::SiiConfig,
            0x0502 => Self::SiiControl,
            0x0504 => Self::SiiAddress,
            0x0508 => Self::SiiData,
            0x0600 => Self::Fmmu0,
            0x0800 => Self::Sm0,
            0x0900 => Self::DcTimePort0,
            0x0910 => Self::DcSystemTime,
            0x0920 => Self::DcSystemTimeOffset,
            0x0928 => Self::DcSystemTimeTransmissionDelay,
            other => return Err(UnknownRegister(other)),
        })
    }
}

impl RegisterAddress {
    /// FMMU configuration block `index` (0..=15), each 16 bytes wide.
    pub fn fmmu(index: u8) -> u16 {
        u16::from(Self::Fmmu0) + u16::from(index) * 16
    }

    /// Sync manager configuration block `index` (0..=15), each 8 bytes wide.
    pub fn sync_manager(index: u8) -> u16 {
        u16::from(Self::Sm0) + u16::from(index) * 8
    }

    /// The byte width of this register's value.
    pub fn byte_len(self) -> usize {
        match self {
            Self::Type
            | Self::Revision
            | Self::FmmuCount
            | Self::SyncManagerChannels
            | Self::RamSize
            | Self::PortDescriptors
            | Self::RxErrorCounterPort0
            | Self::ForwardedRxErrorCounterPort0
            | Self::FrameErrorCounterPort1
            | Self::RxErrorCounterPort1
            | Self::ForwardedRxErrorCounterPort1
            | Self::FrameErrorCounterPort2
            | Self::RxErrorCounterPort2
            | Self::ForwardedRxErrorCounterPort2
            | Self::FrameErrorCounterPort3
            | Self::RxErrorCounterPort3
            | Self::ForwardedRxErrorCounterPort3
            | Self::EcatProcessingUnitErrorCounter
            | Self::PdiErrorCounter
            | Self::LostLinkCounterPort0
            | Self::LostLinkCounterPort1
            | Self::LostLinkCounterPort2
            | Self::LostLinkCounterPort3
            | Self::AlControl
            | Self::AlStatus
            | Self::SyncManagerWatchdogCounter
            | Self::PdiWatchdogCounter => 1,
            Self::Build
            | Self::SupportFlags
            | Self::ConfiguredStationAddress
            | Self::ConfiguredStationAlias
            | Self::DlStatus
            | Self::AlStatusCode
            | Self::WatchdogDivider
            | Self::PdiWatchdog
            | Self::SyncManagerWatchdog
            | Self::SyncManagerWatchdogStatus
            | Self::SiiConfig
            | Self::SiiControl => 2,
            Self::SiiAddress | Self::SiiData | Self::DcTimePort0 | Self::DcSystemTimeTransmissionDelay => 4,
            Self::DcSystemTime | Self::DcSystemTimeOffset => 8,
            Self::Fmmu0 => 16,
            Self::Sm0 => 8,
        }
    }

    /// Every byte address this register occupies, used by the register scheduler to coalesce
    /// adjacent reads (spec §4.3 step 1).
    pub fn byte_addresses(self) -> impl Iterator<Item = u16> {
        let start = u16::from(self);
        let len = self.byte_len() as u16;

        (start..start + len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_is_two_bytes_at_0x0002() {
        assert_eq!(u16::from(RegisterAddress::Build), 0x0002);
        assert_eq!(RegisterAddress::Build.byte_len(), 2);
    }

    #[test]
    fn ram_size_is_one_byte_at_0x0006() {
        assert_eq!(u16::from(RegisterAddress::RamSize), 0x0006);
        assert_eq!(RegisterAddress::RamSize.byte_len(), 1);
    }

    #[test]
    fn frame_error_counter_port_1_is_one_byte_at_0x0302() {
        assert_eq!(u16::from(RegisterAddress::FrameErrorCounterPort1), 0x0302);
        assert_eq!(RegisterAddress::FrameErrorCounterPort1.byte_len(), 1);
    }

    #[test]
    fn byte_addresses_covers_full_width() {
        let addrs: Vec<u16> = RegisterAddress::Build.byte_addresses().collect();

        assert_eq!(addrs, vec![0x0002, 0x0003]);
    }

    #[test]
    fn try_from_u16_round_trips_every_register() {
        let registers = [
            RegisterAddress::Type,
            RegisterAddress::Build,
            RegisterAddress::RamSize,
            RegisterAddress::FrameErrorCounterPort1,
            RegisterAddress::LostLinkCounterPort3,
            RegisterAddress::AlStatus,
            RegisterAddress::DcSystemTime,
        ];

        for register in registers {
            let addr = u16::from(register);
            assert_eq!(RegisterAddress::try_from(addr), Ok(register));
        }
    }

    #[test]
    fn try_from_u16_rejects_unknown_address() {
        assert!(RegisterAddress::try_from(0xBEEF).is_err());
    }
}
