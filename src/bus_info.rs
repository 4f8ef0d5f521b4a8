//! The master's view of the whole bus once enumeration has finished: the process image layout
//! and where every PDO/CoE object lands within it.

use std::collections::HashMap;

use crate::{
    data_object::{AbstractDataPoint, CoEObject},
    data_types::EtherCATDataType,
    time::TimeStamp,
};

/// A bit range: `(bit_offset, bit_length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BitRange {
    /// Offset in bits from the start of the IO map.
    pub bit_offset: u32,
    /// Length in bits.
    pub bit_length: u32,
}

/// Which state the bus settled into once enumeration finished driving it toward Op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialBusMode {
    /// The bus reached Op.
    Op,
    /// Op was unreachable, but SafeOp was.
    SafeOp,
}

/// The master's process image and the offsets of every PDO/CoE object within it (spec §3
/// `BusInfo`).
#[derive(Debug, Clone)]
pub struct BusInfo {
    /// The master's process image, sized to `io_map_used_size`.
    pub io_map: Vec<u8>,
    /// The portion of `io_map` actually used by the current slave configuration.
    pub io_map_used_size: usize,
    /// Bit offset and length of every PDO, relative to the start of its slave's input or output
    /// region within `io_map`.
    pub pdo_offsets: HashMap<crate::data_object::Pdo, BitRange>,
    /// Bit length of every readable CoE object (offsets are not fixed for CoE — they are read on
    /// demand via SDO, not sampled from the process image).
    pub coe_lengths: HashMap<CoEObject, u32>,
    /// Whether enumeration left the bus in Op or SafeOp.
    pub status_after_init: InitialBusMode,
    /// The timestamp the reader considers time zero for this session.
    pub start_time: TimeStamp,
}

impl BusInfo {
    /// Extract the raw bytes for `range` out of a captured IO map snapshot.
    ///
    /// Returns `None` if the range does not fit inside `image`, e.g. because a stale `BusInfo`
    /// is being used against a frame captured before the process image shrank.
    pub fn extract<'a>(image: &'a [u8], range: BitRange) -> Option<&'a [u8]> {
        let byte_offset = (range.bit_offset / 8) as usize;
        let byte_len = (range.bit_length as usize).div_ceil(8);

        image.get(byte_offset..byte_offset + byte_len)
    }

    /// Extract `range` out of a captured IO map snapshot and decode it into the
    /// [`AbstractDataPoint`] a PDO's [`EtherCATDataType`] calls for, gathering bit by bit so a
    /// `range` that starts mid-byte (e.g. a single-bit boolean PDO) still decodes correctly.
    /// `None` if `range` does not fit inside `image`.
    pub fn extract_pdo(image: &[u8], range: BitRange, data_type: EtherCATDataType, time: TimeStamp) -> Option<AbstractDataPoint> {
        match data_type {
            EtherCATDataType::Half | EtherCATDataType::Float | EtherCATDataType::Double => {
                let bytes = Self::extract(image, range)?;
                let value = match data_type {
                    EtherCATDataType::Half => half_bits_to_f64(u16::from_le_bytes(bytes[0..2].try_into().ok()?)),
                    EtherCATDataType::Float => f32::from_le_bytes(bytes[0..4].try_into().ok()?) as f64,
                    EtherCATDataType::Double => f64::from_le_bytes(bytes[0..8].try_into().ok()?),
                    _ => unreachable!(),
                };
                Some(AbstractDataPoint::Float { value, time })
            }
            other => Some(AbstractDataPoint::Unsigned {
                value: extract_bits(image, range)?,
                data_type: other,
                time,
            }),
        }
    }
}

/// Gather `range.bit_length` bits starting at `range.bit_offset` (counting from the LSB of byte 0)
/// into a little-endian `u64`, the same bit order a slave's PDI packs sub-byte PDOs in.
fn extract_bits(image: &[u8], range: BitRange) -> Option<u64> {
    if range.bit_length > 64 {
        return None;
    }

    let mut value: u64 = 0;
    for i in 0..range.bit_length {
        let bit_pos = range.bit_offset + i;
        let byte = *image.get((bit_pos / 8) as usize)?;
        let bit = u64::from((byte >> (bit_pos % 8)) & 1);
        value |= bit << i;
    }
    Some(value)
}

/// IEEE 754 binary16 -> `f64`, used to decode `EtherCATDataType::Half` PDOs/CoE objects. No
/// half-precision crate is pulled in for this one conversion; the bit manipulation is small and
/// self-contained.
fn half_bits_to_f64(bits: u16) -> f64 {
    let sign = (bits >> 15) & 1;
    let exponent = (bits >> 10) & 0x1F;
    let mantissa = bits & 0x3FF;

    let magnitude = if exponent == 0 {
        (mantissa as f64) * 2f64.powi(-24)
    } else if exponent == 0x1F {
        if mantissa == 0 {
            f64::INFINITY
        } else {
            f64::NAN
        }
    } else {
        (1.0 + f64::from(mantissa) / 1024.0) * 2f64.powi(i32::from(exponent) - 15)
    };

    if sign == 1 {
        -magnitude
    } else {
        magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_returns_none_when_out_of_bounds() {
        let image = [0u8; 4];
        let range = BitRange {
            bit_offset: 16,
            bit_length: 32,
        };

        assert!(BusInfo::extract(&image, range).is_none());
    }

    #[test]
    fn extract_returns_matching_slice() {
        let image = [0xAA, 0xBB, 0xCC, 0xDD];
        let range = BitRange {
            bit_offset: 8,
            bit_length: 16,
        };

        assert_eq!(BusInfo::extract(&image, range), Some(&image[1..3]));
    }

    #[test]
    fn extract_pdo_decodes_a_sub_byte_boolean_mid_byte() {
        // bit 3 of byte 0 set, everything else clear.
        let image = [0b0000_1000u8];
        let range = BitRange {
            bit_offset: 3,
            bit_length: 1,
        };

        let point = BusInfo::extract_pdo(&image, range, EtherCATDataType::Boolean, TimeStamp::from_nanos(0)).unwrap();
        match point {
            AbstractDataPoint::Unsigned { value, .. } => assert_eq!(value, 1),
            other => panic!("expected Unsigned, got {other:?}"),
        }
    }

    #[test]
    fn extract_pdo_decodes_a_16_bit_unsigned_value() {
        let image = [0x34, 0x12];
        let range = BitRange {
            bit_offset: 0,
            bit_length: 16,
        };

        let point = BusInfo::extract_pdo(&image, range, EtherCATDataType::Unsigned(16), TimeStamp::from_nanos(5)).unwrap();
        match point {
            AbstractDataPoint::Unsigned { value, time, .. } => {
                assert_eq!(value, 0x1234);
                assert_eq!(time, TimeStamp::from_nanos(5));
            }
            other => panic!("expected Unsigned, got {other:?}"),
        }
    }

    #[test]
    fn extract_pdo_decodes_a_float() {
        let value: f32 = 1.5;
        let image = value.to_le_bytes();
        let range = BitRange {
            bit_offset: 0,
            bit_length: 32,
        };

        let point = BusInfo::extract_pdo(&image, range, EtherCATDataType::Float, TimeStamp::from_nanos(0)).unwrap();
        match point {
            AbstractDataPoint::Float { value: decoded, .. } => assert!((decoded - 1.5).abs() < 1e-6),
            other => panic!("expected Float, got {other:?}"),
        }
    }

    #[test]
    fn extract_pdo_returns_none_out_of_bounds() {
        let image = [0u8; 1];
        let range = BitRange {
            bit_offset: 0,
            bit_length: 32,
        };

        assert!(BusInfo::extract_pdo(&image, range, EtherCATDataType::Unsigned(32), TimeStamp::from_nanos(0)).is_none());
    }
}
