//! CANopen-over-EtherCAT mailbox headers: the SDO request/response/information framing a real
//! mailbox-speaking [`crate::link_layer::LinkLayer`] implementation packs onto the wire to service
//! client CoE read/write requests at runtime (spec §4.6/§4.8) and, via the SDO Information service
//! (`CoeService::SdoInformation`), to walk a slave's object dictionary during enumeration (spec
//! §4.4 step 4; see `LinkLayer::read_od_list`/`read_od_subentries`). This crate's `MockLinkLayer`
//! answers those calls from in-memory fixtures rather than building these frames, since raw wire
//! I/O is out of scope here (spec §1) — the header types still live here as the shared framing
//! vocabulary a `LinkLayer` implementation talking to real hardware would use.
//!
//! These headers are bit-packed, not byte-aligned, so they get a manual [`EtherCatWire`] impl in
//! the same style as the frame/PDU header fields rather than going through a derive macro.

use etherkitten_wire::{EtherCatWire, EtherCatWireSized, WireError};

use crate::data_object::CoEAccess;
use crate::data_types::EtherCATDataType;
use crate::slave_info::CoEObjectCode;

/// CoE service type, ETG1000.6 Table 29.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoeService {
    Emergency = 0x01,
    SdoRequest = 0x02,
    SdoResponse = 0x03,
    TxPdo = 0x04,
    RxPdo = 0x05,
    TxPdoRemoteRequest = 0x06,
    RxPdoRemoteRequest = 0x07,
    SdoInformation = 0x08,
}

impl TryFrom<u8> for CoeService {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => Self::Emergency,
            0x02 => Self::SdoRequest,
            0x03 => Self::SdoResponse,
            0x04 => Self::TxPdo,
            0x05 => Self::RxPdo,
            0x06 => Self::TxPdoRemoteRequest,
            0x07 => Self::RxPdoRemoteRequest,
            0x08 => Self::SdoInformation,
            _ => return Err(WireError::InvalidValue),
        })
    }
}

/// The 2-byte CoE mailbox header: a 12-bit reserved/number field followed by a 4-bit service tag,
/// ETG1000.6 Section 5.6.1 Table 29.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoeHeader {
    /// Which CoE service this mailbox message carries.
    pub service: CoeService,
}

impl<'a> EtherCatWire<'a> for CoeHeader {
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        let word = (self.service as u16) << 12;
        buf[0..2].copy_from_slice(&word.to_le_bytes());
        &buf[0..2]
    }

    fn unpack_from_slice(buf: &'a [u8]) -> Result<Self, WireError> {
        let raw = buf.get(0..2).ok_or(WireError::ReadBufferTooShort { expected: 2, got: buf.len() })?;
        let word = u16::from_le_bytes([raw[0], raw[1]]);
        let service = CoeService::try_from(((word >> 12) & 0x0F) as u8)?;

        Ok(Self { service })
    }

    fn packed_len(&self) -> usize {
        2
    }
}

impl<'a> EtherCatWireSized<'a> for CoeHeader {
    const BYTES: usize = 2;
    type Arr = [u8; 2];

    fn pack(&self) -> Self::Arr {
        let mut buf = [0u8; 2];
        self.pack_to_slice_unchecked(&mut buf);
        buf
    }

    fn buffer() -> Self::Arr {
        [0u8; 2]
    }
}

/// The "Command specifier" field shared by SDO expedited/segmented transfers, ETG1000.6 Table 39.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoeCommand {
    Download = 0x01,
    Upload = 0x02,
    Abort = 0x04,
    UploadSegment = 0x03,
}

impl TryFrom<u8> for CoeCommand {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => Self::Download,
            0x02 => Self::Upload,
            0x04 => Self::Abort,
            0x03 => Self::UploadSegment,
            _ => return Err(WireError::InvalidValue),
        })
    }
}

/// The 4-byte SDO request/response header, ETG1000.6 Section 5.6.2.1.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdoHeader {
    /// Set when `size` carries the number of unused trailing bytes in an expedited transfer.
    pub size_indicator: bool,
    /// Whether the data fits inline in this header (≤4 bytes) rather than a segmented transfer.
    pub expedited_transfer: bool,
    /// Number of unused bytes at the end of the 4-byte data field, when `expedited_transfer`.
    pub size: u8,
    /// Whether this transfer addresses the complete object (all sub-indices at once).
    pub complete_access: bool,
    /// Download, Upload or Abort.
    pub command: CoeCommand,
    /// CoE dictionary index.
    pub index: u16,
    /// CoE dictionary sub-index.
    pub sub_index: u8,
}

impl<'a> EtherCatWire<'a> for SdoHeader {
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        let mut byte0 = 0u8;
        byte0 |= u8::from(self.size_indicator);
        byte0 |= u8::from(self.expedited_transfer) << 1;
        byte0 |= (self.size & 0b11) << 2;
        byte0 |= u8::from(self.complete_access) << 4;
        byte0 |= (self.command as u8) << 5;

        buf[0] = byte0;
        buf[1..3].copy_from_slice(&self.index.to_le_bytes());
        buf[3] = self.sub_index;

        &buf[0..4]
    }

    fn unpack_from_slice(buf: &'a [u8]) -> Result<Self, WireError> {
        let raw = buf.get(0..4).ok_or(WireError::ReadBufferTooShort { expected: 4, got: buf.len() })?;
        let byte0 = raw[0];

        Ok(Self {
            size_indicator: byte0 & 0b1 != 0,
            expedited_transfer: (byte0 >> 1) & 0b1 != 0,
            size: (byte0 >> 2) & 0b11,
            complete_access: (byte0 >> 4) & 0b1 != 0,
            command: CoeCommand::try_from((byte0 >> 5) & 0b111)?,
            index: u16::from_le_bytes([raw[1], raw[2]]),
            sub_index: raw[3],
        })
    }

    fn packed_len(&self) -> usize {
        4
    }
}

impl<'a> EtherCatWireSized<'a> for SdoHeader {
    const BYTES: usize = 4;
    type Arr = [u8; 4];

    fn pack(&self) -> Self::Arr {
        let mut buf = [0u8; 4];
        self.pack_to_slice_unchecked(&mut buf);
        buf
    }

    fn buffer() -> Self::Arr {
        [0u8; 4]
    }
}

/// Decode an `ec_readOE`-style `ObjAccess` bitmask (ETG1000.6 Table 67) into the
/// SafeOp/Op read/write mask [`CoEObject::access`](crate::data_object::CoEObject::access) carries.
/// Bits this crate doesn't distinguish (PreOp access, PDO-mappable, backup, settings) are dropped.
pub(crate) fn access_from_obj_access(raw: u16) -> CoEAccess {
    let mut access = CoEAccess::empty();
    if raw & 0x0002 != 0 {
        access |= CoEAccess::READ_SAFE_OP;
    }
    if raw & 0x0010 != 0 {
        access |= CoEAccess::WRITE_SAFE_OP;
    }
    if raw & 0x0004 != 0 {
        access |= CoEAccess::READ_OP;
    }
    if raw & 0x0020 != 0 {
        access |= CoEAccess::WRITE_OP;
    }
    access
}

/// Decode a CANopen standard data type code (ETG1000.6 Table 20) into an [`EtherCATDataType`].
/// Falls back to [`EtherCATDataType::Bitset`] for bit-width codes and anything unrecognised, the
/// same fallback `pdo_data_type` in `slave_informant.rs` uses for odd PDO entry widths.
pub(crate) fn data_type_from_canopen_code(code: u16, bit_length: u16) -> EtherCATDataType {
    match code {
        0x0001 => EtherCATDataType::Boolean,
        0x0002 => EtherCATDataType::Integer(8),
        0x0003 => EtherCATDataType::Integer(16),
        0x0004 => EtherCATDataType::Integer(32),
        0x0005 => EtherCATDataType::Unsigned(8),
        0x0006 => EtherCATDataType::Unsigned(16),
        0x0007 => EtherCATDataType::Unsigned(32),
        0x0008 => EtherCATDataType::Float,
        0x0009 => EtherCATDataType::VisibleString,
        0x000A => EtherCATDataType::OctetString,
        0x000B => EtherCATDataType::UnicodeString,
        0x000C => EtherCATDataType::TimeOfDay,
        0x0011 => EtherCATDataType::Double,
        0x0010 => EtherCATDataType::Integer(24),
        0x0012 => EtherCATDataType::Integer(40),
        0x0013 => EtherCATDataType::Integer(48),
        0x0016 => EtherCATDataType::Unsigned(24),
        0x0018 => EtherCATDataType::Unsigned(40),
        0x0019 => EtherCATDataType::Unsigned(48),
        _ => EtherCATDataType::Bitset(bit_length.min(255) as u8),
    }
}

/// Decode a raw CANopen object code (ETG1000.6 Table 5: 7 = Var, 8 = Array, 9 = Record) into a
/// [`CoEObjectCode`], defaulting to `Record` for anything else since a record's per-sub-index
/// typing is the safest assumption for an object dictionary entry this crate doesn't recognise.
pub(crate) fn object_code_from_raw(raw: u8) -> CoEObjectCode {
    match raw {
        7 => CoEObjectCode::Var,
        8 => CoEObjectCode::Array,
        _ => CoEObjectCode::Record,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coe_header_round_trips() {
        let header = CoeHeader {
            service: CoeService::SdoRequest,
        };

        let packed = header.pack();
        let parsed = CoeHeader::unpack_from_slice(&packed).unwrap();

        assert_eq!(parsed, header);
    }

    #[test]
    fn sdo_header_round_trips_upload_of_index_0x6000() {
        let header = SdoHeader {
            size_indicator: true,
            expedited_transfer: true,
            size: 2,
            complete_access: false,
            command: CoeCommand::Upload,
            index: 0x6000,
            sub_index: 1,
        };

        let packed = header.pack();
        let parsed = SdoHeader::unpack_from_slice(&packed).unwrap();

        assert_eq!(parsed, header);
        assert_eq!(parsed.index, 0x6000);
    }

    #[test]
    fn unpack_short_buffer_errors() {
        assert!(matches!(
            SdoHeader::unpack_from_slice(&[0x00, 0x01]),
            Err(WireError::ReadBufferTooShort { expected: 4, got: 2 })
        ));
    }

    #[test]
    fn obj_access_decodes_safe_op_and_op_read_write() {
        let access = access_from_obj_access(0b0011_0110);
        assert!(access.contains(CoEAccess::READ_SAFE_OP));
        assert!(access.contains(CoEAccess::WRITE_SAFE_OP));
        assert!(access.contains(CoEAccess::READ_OP));
        assert!(!access.contains(CoEAccess::WRITE_OP));
    }

    #[test]
    fn canopen_code_decodes_common_types() {
        assert_eq!(data_type_from_canopen_code(0x0006, 16), EtherCATDataType::Unsigned(16));
        assert_eq!(data_type_from_canopen_code(0x0008, 32), EtherCATDataType::Float);
        assert_eq!(data_type_from_canopen_code(0x0030, 1), EtherCATDataType::Bitset(1));
    }

    #[test]
    fn object_code_decodes_var_array_record() {
        assert_eq!(object_code_from_raw(7), CoEObjectCode::Var);
        assert_eq!(object_code_from_raw(8), CoEObjectCode::Array);
        assert_eq!(object_code_from_raw(9), CoEObjectCode::Record);
    }
}
