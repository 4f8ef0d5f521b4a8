//! The EtherCAT data type tag carried by every [`crate::data_object::DataObject`], and the
//! string formatting/parsing used to round-trip values for display.

use core::fmt;

/// One of the primitive wire types an EtherCAT object dictionary entry, PDO or register can hold.
///
/// Widths follow ETG1000.6: booleans, signed/unsigned integers of widths 1..64 plus the odd 24-
/// and 48-bit sizes used by a handful of registers, IEEE floats, bitsets and the three string
/// encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EtherCATDataType {
    /// Single bit boolean.
    Boolean,
    /// Signed integer of the given bit width (1..=64).
    Integer(u8),
    /// Unsigned integer of the given bit width (1..=64, plus 24/48).
    Unsigned(u8),
    /// IEEE 754 half precision float.
    Half,
    /// IEEE 754 single precision float.
    Float,
    /// IEEE 754 double precision float.
    Double,
    /// A bitset of the given width in bits.
    Bitset(u8),
    /// A length-prefixed sequence of raw bytes.
    OctetString,
    /// A NUL-terminated ASCII string.
    VisibleString,
    /// A NUL-terminated string of 16-bit code units.
    UnicodeString,
    /// A time-of-day value (EtherCAT epoch, ms resolution), stored as `u32`.
    TimeOfDay,
}

impl EtherCATDataType {
    /// The number of bytes this type occupies in a process image or register, rounded up.
    ///
    /// For [`EtherCATDataType::OctetString`]/`VisibleString`/`UnicodeString` this is the *fixed*
    /// in-memory representation used by fixed-width PDOs/registers; the variable-length forms are
    /// only meaningful in the CoE/log-codec path and are sized dynamically there.
    pub fn byte_len(self) -> usize {
        match self {
            Self::Boolean => 1,
            Self::Integer(bits) | Self::Unsigned(bits) | Self::Bitset(bits) => {
                usize::from(bits).div_ceil(8)
            }
            Self::Half => 2,
            Self::Float => 4,
            Self::Double => 8,
            Self::OctetString | Self::VisibleString | Self::UnicodeString => 0,
            Self::TimeOfDay => 4,
        }
    }

    /// Whether this type is an integer or bitset (exact round-trip is required by spec.md §8).
    pub fn is_exact(self) -> bool {
        matches!(
            self,
            Self::Boolean | Self::Integer(_) | Self::Unsigned(_) | Self::Bitset(_)
        )
    }
}

/// How an [`crate::data_object::AbstractDataPoint`] should be stringified for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberFormat {
    /// Base-10, e.g. `"42"`.
    Decimal,
    /// Base-16 with a `0x` prefix, e.g. `"0x2a"`.
    Hexadecimal,
    /// Base-2 with a `0b` prefix, e.g. `"0b101010"`.
    Binary,
}

/// Error returned when formatting or parsing a value fails, e.g. asking for a
/// [`NumberFormat::Hexadecimal`] rendering of a floating point value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// The requested `NumberFormat` does not apply to the value's [`EtherCATDataType`].
    #[error("{0:?} formatting is only defined for integer and bitset types")]
    UnsupportedFormat(NumberFormat),
    /// The text could not be parsed as a value of the expected type.
    #[error("could not parse {text:?} as {ty:?}")]
    Unparseable {
        /// The offending text.
        text: String,
        /// The type it was supposed to parse as.
        ty: EtherCATDataType,
    },
}

/// Format an unsigned 64-bit value (the common representation for integers, bitsets and booleans)
/// according to `format`.
pub fn format_unsigned(value: u64, ty: EtherCATDataType, format: NumberFormat) -> Result<String, FormatError> {
    if !ty.is_exact() {
        return Err(FormatError::UnsupportedFormat(format));
    }

    Ok(match format {
        NumberFormat::Decimal => format!("{value}"),
        NumberFormat::Hexadecimal => format!("{value:#x}"),
        NumberFormat::Binary => format!("{value:#b}"),
    })
}

/// Parse a value previously produced by [`format_unsigned`] back into a `u64`.
pub fn parse_unsigned(text: &str, ty: EtherCATDataType) -> Result<u64, FormatError> {
    let unparseable = || FormatError::Unparseable {
        text: text.to_owned(),
        ty,
    };

    if let Some(hex) = text.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).map_err(|_| unparseable())
    } else if let Some(bin) = text.strip_prefix("0b") {
        u64::from_str_radix(bin, 2).map_err(|_| unparseable())
    } else {
        text.parse().map_err(|_| unparseable())
    }
}

/// Format a double-precision value. Only [`NumberFormat::Decimal`] is valid for floating point
/// types; bit-pattern rendering of a float is deliberately unsupported (see
/// `EtherCATTypeStringFormattertest.cpp` in the original implementation, which never exercises
/// hex/binary formatting of floats).
pub fn format_float(value: f64, format: NumberFormat) -> Result<String, FormatError> {
    if format != NumberFormat::Decimal {
        return Err(FormatError::UnsupportedFormat(format));
    }

    Ok(format!("{value}"))
}

/// Parse a value previously produced by [`format_float`].
pub fn parse_float(text: &str) -> Result<f64, FormatError> {
    text.parse().map_err(|_| FormatError::Unparseable {
        text: text.to_owned(),
        ty: EtherCATDataType::Double,
    })
}

impl fmt::Display for EtherCATDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Integer(bits) => write!(f, "INTEGER{bits}"),
            Self::Unsigned(bits) => write!(f, "UNSIGNED{bits}"),
            Self::Half => write!(f, "HALF"),
            Self::Float => write!(f, "REAL32"),
            Self::Double => write!(f, "REAL64"),
            Self::Bitset(bits) => write!(f, "BIT{bits}"),
            Self::OctetString => write!(f, "OCTET_STRING"),
            Self::VisibleString => write!(f, "VISIBLE_STRING"),
            Self::UnicodeString => write!(f, "UNICODE_STRING"),
            Self::TimeOfDay => write!(f, "TIME_OF_DAY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_round_trips_every_format() {
        for format in [NumberFormat::Decimal, NumberFormat::Hexadecimal, NumberFormat::Binary] {
            let formatted = format_unsigned(42, EtherCATDataType::Unsigned(16), format).unwrap();
            let parsed = parse_unsigned(&formatted, EtherCATDataType::Unsigned(16)).unwrap();

            assert_eq!(parsed, 42, "format {format:?} round trip");
        }
    }

    #[test]
    fn float_rejects_hex_and_binary() {
        assert!(matches!(
            format_float(1.5, NumberFormat::Hexadecimal),
            Err(FormatError::UnsupportedFormat(NumberFormat::Hexadecimal))
        ));
    }

    #[test]
    fn float_decimal_round_trips_within_tolerance() {
        let value = 123.456_f64;
        let formatted = format_float(value, NumberFormat::Decimal).unwrap();
        let parsed = parse_float(&formatted).unwrap();

        assert!((value - parsed).abs() <= value.abs() * 1e-6);
    }

    #[test]
    fn byte_len_rounds_up() {
        assert_eq!(EtherCATDataType::Unsigned(1).byte_len(), 1);
        assert_eq!(EtherCATDataType::Unsigned(24).byte_len(), 3);
        assert_eq!(EtherCATDataType::Unsigned(48).byte_len(), 6);
        assert_eq!(EtherCATDataType::Unsigned(64).byte_len(), 8);
    }
}
