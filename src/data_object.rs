//! Polymorphic data object identities and the samples recorded against them.
//!
//! The original implementation dispatches on an inheritance hierarchy via a visitor; this crate
//! uses a tagged enum and an `accept` method that calls one of four closures (spec §9
//! "Polymorphic `DataObject` / visitor"), which keeps the same "exactly one concrete visitor sees
//! each variant" contract without needing dynamic dispatch.

use crate::{data_types::EtherCATDataType, register::RegisterAddress, time::TimeStamp};

/// Direction of a [`Pdo`] relative to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PdoDirection {
    /// Data flows from slave to master.
    Input,
    /// Data flows from master to slave.
    Output,
}

/// A process data object: one named field inside a slave's cyclic I/O image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pdo {
    /// Owning slave id (1-indexed; 0 is reserved for the master).
    pub slave: u32,
    /// Internal index distinguishing PDOs within the same slave and direction.
    pub index: u32,
    /// Whether this PDO is a slave input or output.
    pub direction: PdoDirection,
    /// The wire type of the PDO's value.
    pub data_type: EtherCATDataType,
}

bitflags::bitflags! {
    /// Whether a CoE object may be read and/or written in SafeOp and Op, ETG1000.6 object
    /// dictionary access rules.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CoEAccess: u8 {
        /// Readable while the slave is in SafeOp.
        const READ_SAFE_OP = 0b0000_0001;
        /// Writable while the slave is in SafeOp.
        const WRITE_SAFE_OP = 0b0000_0010;
        /// Readable while the slave is in Op.
        const READ_OP = 0b0000_0100;
        /// Writable while the slave is in Op.
        const WRITE_OP = 0b0000_1000;
    }
}

/// A CANopen-over-EtherCAT object dictionary entry: one `(index, sub-index)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoEObject {
    /// Owning slave id.
    pub slave: u32,
    /// CoE dictionary index.
    pub index: u16,
    /// CoE dictionary sub-index.
    pub sub_index: u8,
    /// Readable/writable mask in each of SafeOp/Op.
    pub access: CoEAccess,
    /// The wire type of the object's value.
    pub data_type: EtherCATDataType,
}

/// A register sample identity: a named ESC register on a given slave (0 = master-side register
/// space, used only for registers that make sense without a specific slave).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    /// Owning slave id.
    pub slave: u32,
    /// The register address.
    pub register: RegisterAddress,
}

/// Which rolling statistic an [`ErrorStatistic`] tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorStatisticType {
    /// Cumulative event count since the reader started, across all slaves.
    TotalGlobal,
    /// Events per second, across all slaves, as a decaying moving average.
    FreqGlobal,
    /// Cumulative event count since the reader started, for one slave.
    TotalSlave,
    /// Events per second for one slave, as a decaying moving average.
    FreqSlave,
}

/// Sentinel slave id meaning "this statistic is global, not slave-specific".
pub const GLOBAL_SLAVE: u32 = 0xFFFF_FFFF;

/// A derived error statistic: total count or frequency, global or per slave, for one kind of
/// underlying register-counter error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorStatistic {
    /// Which statistic this is.
    pub stat_type: ErrorStatisticType,
    /// The underlying register this statistic is derived from.
    pub source: RegisterAddress,
    /// The slave this statistic covers, or [`GLOBAL_SLAVE`] for a `*Global` statistic.
    pub slave: u32,
}

/// Visitor callbacks for [`DataObject::accept`]. Exactly one is invoked per call.
pub trait DataObjectVisitor {
    /// Result type produced by every visit method.
    type Output;

    /// Visit a [`Pdo`].
    fn visit_pdo(&mut self, pdo: &Pdo) -> Self::Output;
    /// Visit a [`CoEObject`].
    fn visit_coe(&mut self, coe: &CoEObject) -> Self::Output;
    /// Visit a [`Register`].
    fn visit_register(&mut self, register: &Register) -> Self::Output;
    /// Visit an [`ErrorStatistic`].
    fn visit_error_statistic(&mut self, stat: &ErrorStatistic) -> Self::Output;
}

/// The polymorphic identity of a data point (spec §3 `DataObject`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataObject {
    /// A PDO.
    Pdo(Pdo),
    /// A CoE object dictionary entry.
    CoE(CoEObject),
    /// An ESC register.
    Register(Register),
    /// A derived error statistic.
    ErrorStatistic(ErrorStatistic),
}

impl DataObject {
    /// Dispatch to the matching visitor method.
    pub fn accept<V: DataObjectVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            Self::Pdo(pdo) => visitor.visit_pdo(pdo),
            Self::CoE(coe) => visitor.visit_coe(coe),
            Self::Register(register) => visitor.visit_register(register),
            Self::ErrorStatistic(stat) => visitor.visit_error_statistic(stat),
        }
    }

    /// The owning slave id (or [`GLOBAL_SLAVE`] for a global error statistic).
    pub fn slave(&self) -> u32 {
        match self {
            Self::Pdo(pdo) => pdo.slave,
            Self::CoE(coe) => coe.slave,
            Self::Register(register) => register.slave,
            Self::ErrorStatistic(stat) => stat.slave,
        }
    }

    /// The wire type of this object's value, if it has a fixed one (error statistics are always
    /// `f64` and report `None` here since they have no EtherCAT wire representation).
    pub fn data_type(&self) -> Option<EtherCATDataType> {
        match self {
            Self::Pdo(pdo) => Some(pdo.data_type),
            Self::CoE(coe) => Some(coe.data_type),
            Self::Register(register) => Some(EtherCATDataType::Unsigned(
                (register.register.byte_len() * 8) as u8,
            )),
            Self::ErrorStatistic(_) => None,
        }
    }
}

/// A single observation: a value paired with the time it was recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPoint<T> {
    /// The observed value.
    pub value: T,
    /// When it was observed.
    pub time: TimeStamp,
}

impl<T> DataPoint<T> {
    /// Construct a new data point.
    pub fn new(value: T, time: TimeStamp) -> Self {
        Self { value, time }
    }
}

/// A type-erased [`DataPoint`] that can stringify itself in any [`crate::data_types::NumberFormat`].
///
/// This is the dynamic counterpart `views::NewestValueView` dereferences to; unlike `DataPoint<T>`
/// it carries enough type information at runtime to format/parse without the caller knowing `T`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AbstractDataPoint {
    /// An exact-width unsigned/bitset/boolean sample.
    Unsigned {
        /// The raw value, widened to `u64`.
        value: u64,
        /// Its wire type, used to pick formatting rules.
        data_type: EtherCATDataType,
        /// When it was observed.
        time: TimeStamp,
    },
    /// A floating point sample.
    Float {
        /// The value.
        value: f64,
        /// When it was observed.
        time: TimeStamp,
    },
}

impl AbstractDataPoint {
    /// The time this point was observed.
    pub fn time(&self) -> TimeStamp {
        match self {
            Self::Unsigned { time, .. } | Self::Float { time, .. } => *time,
        }
    }

    /// Render this point's value according to `format`.
    pub fn format(&self, format: crate::data_types::NumberFormat) -> Result<String, crate::data_types::FormatError> {
        match self {
            Self::Unsigned { value, data_type, .. } => crate::data_types::format_unsigned(*value, *data_type, format),
            Self::Float { value, .. } => crate::data_types::format_float(*value, format),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingVisitor {
        pdo_hits: u32,
        coe_hits: u32,
        register_hits: u32,
        stat_hits: u32,
    }

    impl DataObjectVisitor for CountingVisitor {
        type Output = ();

        fn visit_pdo(&mut self, _pdo: &Pdo) {
            self.pdo_hits += 1;
        }

        fn visit_coe(&mut self, _coe: &CoEObject) {
            self.coe_hits += 1;
        }

        fn visit_register(&mut self, _register: &Register) {
            self.register_hits += 1;
        }

        fn visit_error_statistic(&mut self, _stat: &ErrorStatistic) {
            self.stat_hits += 1;
        }
    }

    #[test]
    fn accept_dispatches_exactly_one_visitor_method() {
        let mut visitor = CountingVisitor {
            pdo_hits: 0,
            coe_hits: 0,
            register_hits: 0,
            stat_hits: 0,
        };

        let objects = [
            DataObject::Pdo(Pdo {
                slave: 1,
                index: 0,
                direction: PdoDirection::Input,
                data_type: EtherCATDataType::Boolean,
            }),
            DataObject::Register(Register {
                slave: 1,
                register: RegisterAddress::Build,
            }),
        ];

        for object in &objects {
            object.accept(&mut visitor);
        }

        assert_eq!(visitor.pdo_hits, 1);
        assert_eq!(visitor.register_hits, 1);
        assert_eq!(visitor.coe_hits, 0);
        assert_eq!(visitor.stat_hits, 0);
    }
}
