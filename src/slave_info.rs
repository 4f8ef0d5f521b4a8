//! Per-slave identity and object-dictionary metadata produced by enumeration (spec §3 `SlaveInfo`).

use crate::data_object::{CoEObject, Pdo};

/// Sentinel `neighbors` entry meaning "no link on this port".
pub const NO_LINK: u32 = 0xFFFF_FFFF;

/// The CANopen object code of a dictionary entry, ETG1000.6 Table 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoEObjectCode {
    /// A single value.
    Var,
    /// A homogeneous array of sub-indices, all sharing one data type.
    Array,
    /// A heterogeneous record of sub-indices, each with its own data type.
    Record,
}

/// A CoE dictionary entry: one index, grouping every sub-index defined under it.
///
/// Sub-index 0 of an `Array`/`Record` is conventionally the element count and is still surfaced
/// as an ordinary [`CoEObject`] in `subentries`, matching how the original implementation treats
/// it (no special-casing in the data model, only in the UI layer, which this crate does not own).
#[derive(Debug, Clone)]
pub struct CoEEntry {
    /// The CoE dictionary index this entry groups.
    pub index: u16,
    /// Human readable name of the object, from the CoE object description.
    pub name: String,
    /// VAR, ARRAY or RECORD.
    pub object_code: CoEObjectCode,
    /// Every sub-index defined under this object, in ascending order.
    pub subentries: Vec<CoEObject>,
}

/// Everything learned about one slave during enumeration (spec §3 `SlaveInfo`).
#[derive(Debug, Clone)]
pub struct SlaveInfo {
    /// 1-indexed slave id assigned by the master during enumeration.
    pub id: u32,
    /// The slave's name, taken from its ESI general-information string reference.
    pub name: String,
    /// Every PDO mapped into the process image for this slave.
    pub pdos: Vec<Pdo>,
    /// Every CoE dictionary entry discovered for this slave (empty if the slave is not
    /// CoE-capable).
    pub coe_entries: Vec<CoEEntry>,
    /// Parsed ESI general/FMMU/SyncManager/PDO sections.
    pub esi_data: crate::esi::EsiData,
    /// The raw ESI EEPROM image, kept verbatim for the log writer and for tooling that wants
    /// fields this crate does not parse.
    pub esi_binary: Vec<u8>,
    /// The slave id reached by following each of this slave's four ports outward, or [`NO_LINK`].
    pub neighbors: [u32; 4],
}

impl SlaveInfo {
    /// Look up a CoE dictionary entry by index.
    pub fn coe_entry(&self, index: u16) -> Option<&CoEEntry> {
        self.coe_entries.iter().find(|entry| entry.index == index)
    }

    /// Look up a single CoE object by `(index, sub_index)`.
    pub fn coe_object(&self, index: u16, sub_index: u8) -> Option<&CoEObject> {
        self.coe_entry(index)?
            .subentries
            .iter()
            .find(|object| object.sub_index == sub_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esi::EsiData;

    fn empty_slave(id: u32) -> SlaveInfo {
        SlaveInfo {
            id,
            name: format!("slave-{id}"),
            pdos: Vec::new(),
            coe_entries: Vec::new(),
            esi_data: EsiData::default(),
            esi_binary: Vec::new(),
            neighbors: [NO_LINK; 4],
        }
    }

    #[test]
    fn coe_object_looks_up_through_entry() {
        use crate::data_object::{CoEAccess, CoEObject};
        use crate::data_types::EtherCATDataType;

        let mut slave = empty_slave(1);
        slave.coe_entries.push(CoEEntry {
            index: 0x6000,
            name: "Inputs".into(),
            object_code: CoEObjectCode::Record,
            subentries: vec![CoEObject {
                slave: 1,
                index: 0x6000,
                sub_index: 1,
                access: CoEAccess::READ_OP,
                data_type: EtherCATDataType::Unsigned(16),
            }],
        });

        assert!(slave.coe_object(0x6000, 1).is_some());
        assert!(slave.coe_object(0x6000, 2).is_none());
        assert!(slave.coe_object(0x6001, 1).is_none());
    }

    #[test]
    fn unlinked_ports_default_to_no_link() {
        let slave = empty_slave(3);

        assert_eq!(slave.neighbors, [NO_LINK; 4]);
    }
}
