//! Drives the bus from power-up to an operational state and records everything learned about each
//! slave along the way (spec §4.4).
//!
//! Enumeration runs in five steps: bring up the link layer, read and parse every slave's ESI
//! EEPROM and derive its PDO mapping (walking the CoE object dictionary too, for slaves that
//! advertise it), request SafeOp and verify the bus got there, invert the discovered topology into
//! each slave's neighbor table, then attempt the SafeOp -> Op transition. Steps 2 onward accumulate
//! [`ErrorMessage`]s rather than aborting on the first problem; only a [`ErrorSeverity::Fatal`]
//! error aborts construction, surfaced as [`SlaveInformantError`].

use std::time::Duration;

use crate::bus_info::{BitRange, BusInfo, InitialBusMode};
use crate::coe::{access_from_obj_access, data_type_from_canopen_code, object_code_from_raw};
use crate::data_object::{CoEObject, Pdo, PdoDirection};
use crate::data_types::EtherCATDataType;
use crate::error::{ErrorMessage, ErrorSeverity, SlaveInformantError};
use crate::esi::{self, EsiData, MailboxProtocols};
use crate::link_layer::{EnumeratedSlave, LinkLayer, SlaveState};
use crate::slave_info::{CoEEntry, CoEObjectCode, SlaveInfo};
use crate::time::TimeStamp;

/// SafeOp -> Op is retried this many times before the bus is accepted in SafeOp instead and a
/// [`ErrorSeverity::Medium`] error is raised (spec REDESIGN FLAGS: bounded retries rather than
/// retrying forever).
const MAX_OP_ATTEMPTS: u32 = 3;

const STATE_POLL_TIMEOUT: Duration = Duration::from_millis(500);

fn pdo_data_type(bits: u16) -> EtherCATDataType {
    match bits {
        1 => EtherCATDataType::Boolean,
        8 => EtherCATDataType::Unsigned(8),
        16 => EtherCATDataType::Unsigned(16),
        32 => EtherCATDataType::Unsigned(32),
        64 => EtherCATDataType::Unsigned(64),
        other => EtherCATDataType::Bitset(other.min(255) as u8),
    }
}

/// Re-derive a slave's PDO list from its parsed ESI data. Exposed crate-wide so the log reader can
/// reconstruct accurate [`PdoDirection`]s from a stored ESI blob instead of the lossy guess the
/// on-disk slave-info block alone would allow (spec §4.9 "PDO direction is not persisted").
pub(crate) fn build_pdos(slave_id: u32, esi: &EsiData) -> Vec<Pdo> {
    let mut pdos = Vec::new();

    for descriptor in &esi.tx_pdos {
        for entry in &descriptor.entries {
            pdos.push(Pdo {
                slave: slave_id,
                index: u32::from(entry.index) << 8 | u32::from(entry.sub_index),
                direction: PdoDirection::Input,
                data_type: pdo_data_type(entry.data_length_bits),
            });
        }
    }

    for descriptor in &esi.rx_pdos {
        for entry in &descriptor.entries {
            pdos.push(Pdo {
                slave: slave_id,
                index: u32::from(entry.index) << 8 | u32::from(entry.sub_index),
                direction: PdoDirection::Output,
                data_type: pdo_data_type(entry.data_length_bits),
            });
        }
    }

    pdos
}

/// Walk a CoE-capable slave's full object dictionary, reading every index's description and
/// sub-entries (spec §4.4 step 4 "walk the full object dictionary", grounded on
/// `BusSlaveInformant-impl/coe.cpp`'s `readObjectDictionary`/`readSubObjects`). A per-index read
/// failure is recorded as a low-severity warning and that index is skipped, rather than aborting
/// the whole walk, matching the original's "this CoE index will not be available" handling.
fn read_coe_dictionary<L: LinkLayer>(link: &mut L, slave_id: u32) -> (Vec<CoEEntry>, Vec<ErrorMessage>) {
    let mut entries = Vec::new();
    let mut errors = Vec::new();

    let listing = match link.read_od_list(slave_id) {
        Ok(listing) => listing,
        Err(err) => {
            errors.push(ErrorMessage::for_slave(
                format!("failed to read this slave's object dictionary: {err}"),
                slave_id,
                ErrorSeverity::Medium,
            ));
            return (entries, errors);
        }
    };

    for listed in listing {
        let subentries = match link.read_od_subentries(slave_id, listed.index, listed.max_sub_index) {
            Ok(subentries) => subentries,
            Err(err) => {
                errors.push(ErrorMessage::for_slave(
                    format!(
                        "failed to read object description or entry for index {:#06x}: {err}",
                        listed.index
                    ),
                    slave_id,
                    ErrorSeverity::Low,
                ));
                continue;
            }
        };

        let subentries: Vec<CoEObject> = subentries
            .into_iter()
            .enumerate()
            .filter(|(_, sub)| sub.data_type != 0 && sub.bit_length != 0)
            .map(|(sub_index, sub)| CoEObject {
                slave: slave_id,
                index: listed.index,
                sub_index: sub_index as u8,
                access: access_from_obj_access(sub.access),
                data_type: data_type_from_canopen_code(sub.data_type, sub.bit_length),
            })
            .collect();

        entries.push(CoEEntry {
            index: listed.index,
            name: listed.name,
            object_code: object_code_from_raw(listed.object_code),
            subentries,
        });
    }

    (entries, errors)
}

/// Read a slave's complete ESI EEPROM image. Implementations of [`LinkLayer::read_eeprom`] used
/// with this crate are expected to return the whole remaining image from `word_address` in one
/// call (true for [`crate::link_layer::mock::MockLinkLayer`]); a raw-socket implementation would
/// instead page through the EEPROM a word at a time here.
fn read_eeprom_image<L: LinkLayer>(link: &mut L, slave: &EnumeratedSlave) -> Result<Vec<u8>, String> {
    link.read_eeprom(slave.configured_address, 0)
        .map_err(|err| err.to_string())
}

/// Everything produced by a successful enumeration: per-slave metadata, the process image layout,
/// and the errors (below [`ErrorSeverity::Fatal`]) observed while getting there.
pub struct EnumerationOutcome {
    pub slaves: Vec<SlaveInfo>,
    pub bus_info: BusInfo,
    pub warnings: Vec<ErrorMessage>,
}

/// Enumerate the bus reachable through `link`, bringing it up to Op (or SafeOp, if Op cannot be
/// reached) and returning everything learned about it.
pub fn enumerate<L: LinkLayer>(
    link: &mut L,
    interface: &str,
    start_time: TimeStamp,
) -> Result<EnumerationOutcome, SlaveInformantError> {
    let mut errors: Vec<ErrorMessage> = Vec::new();

    // Step 1: bring up the link layer.
    if let Err(err) = link.init(interface) {
        errors.push(ErrorMessage::new(
            format!("link layer initialisation failed: {err}"),
            ErrorSeverity::Fatal,
        ));
        return Err(SlaveInformantError(errors));
    }

    let enumerated = link.enumerated_slaves().to_vec();
    if enumerated.is_empty() {
        errors.push(ErrorMessage::new("no slaves were found on this interface", ErrorSeverity::Fatal));
        return Err(SlaveInformantError(errors));
    }

    // Step 2: per-slave ESI read and PDO mapping.
    let mut slave_infos = Vec::with_capacity(enumerated.len());
    let mut pdo_offsets = std::collections::HashMap::new();

    for (idx, slave) in enumerated.iter().enumerate() {
        let slave_id = (idx + 1) as u32;

        let esi_binary = match read_eeprom_image(link, slave) {
            Ok(image) => image,
            Err(reason) => {
                errors.push(ErrorMessage::for_slave(
                    format!("failed to read ESI EEPROM: {reason}"),
                    slave_id,
                    ErrorSeverity::Medium,
                ));
                Vec::new()
            }
        };

        let esi_data = match esi::parse(&esi_binary) {
            Ok(data) => data,
            Err(err) => {
                if !esi_binary.is_empty() {
                    errors.push(ErrorMessage::for_slave(
                        format!("failed to parse ESI EEPROM: {err}"),
                        slave_id,
                        ErrorSeverity::Medium,
                    ));
                }
                EsiData::default()
            }
        };

        let pdos = build_pdos(slave_id, &esi_data);

        let mut bit_cursor = 0u32;
        for pdo in &pdos {
            let bit_length = match pdo.data_type {
                EtherCATDataType::Boolean => 1,
                other => other.byte_len() as u32 * 8,
            };
            pdo_offsets.insert(
                *pdo,
                BitRange {
                    bit_offset: bit_cursor,
                    bit_length,
                },
            );
            bit_cursor += bit_length;
        }

        let name = if esi_data.general.name.is_empty() {
            format!("slave-{slave_id}")
        } else {
            esi_data.general.name.clone()
        };

        // Step 4: walk the object dictionary for every CoE-capable slave.
        let coe_entries = if MailboxProtocols::from_bits_truncate(slave.mailbox_protocols).contains(MailboxProtocols::COE) {
            let (entries, coe_errors) = read_coe_dictionary(link, slave_id);
            errors.extend(coe_errors);
            entries
        } else {
            Vec::new()
        };

        slave_infos.push(SlaveInfo {
            id: slave_id,
            name,
            pdos,
            coe_entries,
            esi_data,
            esi_binary,
            neighbors: [crate::slave_info::NO_LINK; 4],
        });
    }

    // Step 4 (topology): invert each slave's recorded parent/parent-port into the parent's
    // `neighbors[parent_port]` (spec §4.4 step 4 "invert to form neighbors[4]").
    for (idx, slave) in enumerated.iter().enumerate() {
        let slave_id = (idx + 1) as u32;
        if let Some(parent_id) = slave.parent {
            if let Some(parent_info) = slave_infos.iter_mut().find(|info| info.id == parent_id) {
                let port = usize::from(slave.parent_port.min(3));
                parent_info.neighbors[port] = slave_id;
            }
            if let Some(child_info) = slave_infos.iter_mut().find(|info| info.id == slave_id) {
                let entry_port = usize::from(slave.entry_port.min(3));
                child_info.neighbors[entry_port] = parent_id;
            }
        }
    }

    // Step 3: configure the process image and request SafeOp.
    let io_map_size = pdo_offsets
        .values()
        .map(|range| (range.bit_offset + range.bit_length).div_ceil(8) as usize)
        .max()
        .unwrap_or(0);
    let mut io_map = vec![0u8; io_map_size];
    let used_size = link.configure_iomap(&mut io_map).unwrap_or(io_map_size);

    for slave_id in 1..=(enumerated.len() as u32) {
        if let Err(err) = link.set_state(slave_id, SlaveState::SafeOp) {
            errors.push(ErrorMessage::for_slave(
                format!("failed to request SafeOp: {err}"),
                slave_id,
                ErrorSeverity::Medium,
            ));
        }
    }

    let mut reached_safe_op = true;
    for slave_id in 1..=(enumerated.len() as u32) {
        match link.check_state(slave_id, SlaveState::SafeOp, STATE_POLL_TIMEOUT) {
            Ok(SlaveState::SafeOp) | Ok(SlaveState::Op) => {}
            Ok(_) | Err(_) => {
                reached_safe_op = false;
                errors.push(ErrorMessage::for_slave("slave did not reach SafeOp", slave_id, ErrorSeverity::Medium));
            }
        }
    }

    if !reached_safe_op {
        errors.push(ErrorMessage::new("bus did not reach SafeOp state", ErrorSeverity::Fatal));
        return Err(SlaveInformantError(errors));
    }

    // Step 4/5: attempt the SafeOp -> Op transition, bounded by MAX_OP_ATTEMPTS.
    let mut reached_op = false;
    for _ in 0..MAX_OP_ATTEMPTS {
        let mut all_op = true;
        for slave_id in 1..=(enumerated.len() as u32) {
            if link.set_state(slave_id, SlaveState::Op).is_err() {
                all_op = false;
                continue;
            }
            match link.check_state(slave_id, SlaveState::Op, STATE_POLL_TIMEOUT) {
                Ok(SlaveState::Op) => {}
                _ => all_op = false,
            }
        }
        if all_op {
            reached_op = true;
            break;
        }
    }

    let status_after_init = if reached_op {
        InitialBusMode::Op
    } else {
        errors.push(ErrorMessage::new(
            format!("bus could not reach Op after {MAX_OP_ATTEMPTS} attempts, continuing in SafeOp"),
            ErrorSeverity::Medium,
        ));
        InitialBusMode::SafeOp
    };

    let bus_info = BusInfo {
        io_map,
        io_map_used_size: used_size,
        pdo_offsets,
        coe_lengths: std::collections::HashMap::new(),
        status_after_init,
        start_time,
    };

    Ok(EnumerationOutcome {
        slaves: slave_infos,
        bus_info,
        warnings: errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link_layer::mock::MockLinkLayer;

    fn slave(address: u16) -> EnumeratedSlave {
        EnumeratedSlave {
            configured_address: address,
            input_offset: 0,
            output_offset: 0,
            input_start_bit: 0,
            output_start_bit: 0,
            parent: None,
            parent_port: 0,
            entry_port: 0,
            mailbox_protocols: 0x0004,
            eeprom_byte_width: 4,
        }
    }

    #[test]
    fn empty_bus_reports_fatal_error() {
        let mut link = MockLinkLayer::new(Vec::new());
        let result = enumerate(&mut link, "mock0", TimeStamp::from_nanos(0));

        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.0.iter().any(|e| e.severity() == ErrorSeverity::Fatal));
    }

    #[test]
    fn single_slave_with_no_esi_still_reaches_op() {
        let mut link = MockLinkLayer::new(vec![slave(0x1001)]);
        link.states.insert(1, SlaveState::Op);

        let outcome = enumerate(&mut link, "mock0", TimeStamp::from_nanos(0)).expect("enumeration succeeds");

        assert_eq!(outcome.slaves.len(), 1);
        assert_eq!(outcome.bus_info.status_after_init, InitialBusMode::Op);
    }

    #[test]
    fn coe_capable_slave_gets_its_object_dictionary_walked_during_enumeration() {
        use crate::data_object::CoEAccess;
        use crate::link_layer::{OdEntryDescription, OdSubEntry};

        let mut link = MockLinkLayer::new(vec![slave(0x1001)]);
        link.states.insert(1, SlaveState::Op);

        link.od_list.insert(
            1,
            vec![OdEntryDescription {
                index: 0x6000,
                object_code: 9,
                name: "Inputs".into(),
                max_sub_index: 1,
            }],
        );
        link.od_subentries.insert(
            (1, 0x6000),
            vec![OdSubEntry {
                name: "Value".into(),
                data_type: 0x0006,
                bit_length: 16,
                access: 0b0000_0110,
            }],
        );

        let outcome = enumerate(&mut link, "mock0", TimeStamp::from_nanos(0)).expect("enumeration succeeds");

        assert_eq!(outcome.slaves.len(), 1);
        let coe_entries = &outcome.slaves[0].coe_entries;
        assert_eq!(coe_entries.len(), 1);
        assert_eq!(coe_entries[0].index, 0x6000);
        assert_eq!(coe_entries[0].subentries.len(), 1);
        assert_eq!(coe_entries[0].subentries[0].access, CoEAccess::READ_SAFE_OP | CoEAccess::READ_OP);
    }

    #[test]
    fn slave_without_coe_mailbox_protocol_skips_the_object_dictionary_walk() {
        let mut non_coe_slave = slave(0x1002);
        non_coe_slave.mailbox_protocols = 0x0001;

        let mut link = MockLinkLayer::new(vec![non_coe_slave]);
        link.states.insert(1, SlaveState::Op);
        link.od_list.insert(
            1,
            vec![crate::link_layer::OdEntryDescription {
                index: 0x6000,
                object_code: 9,
                name: "Inputs".into(),
                max_sub_index: 1,
            }],
        );

        let outcome = enumerate(&mut link, "mock0", TimeStamp::from_nanos(0)).expect("enumeration succeeds");

        assert!(outcome.slaves[0].coe_entries.is_empty());
    }
}
