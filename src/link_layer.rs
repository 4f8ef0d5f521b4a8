//! The physical link-layer collaborator this crate expects from below (spec §6.1):
//! raw-socket send/receive, SDO transfers, EEPROM reads and slave-state transitions. This crate
//! never talks to a NIC directly — it is written entirely against this trait, with
//! [`MockLinkLayer`] standing in for tests and [`RawSocketLinkLayer`] the production collaborator.

use std::time::Duration;

/// A slave's AL (application layer) state, ETG1000.6 Table 9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    Init,
    PreOp,
    Bootstrap,
    SafeOp,
    Op,
}

/// One row of the link-layer's enumerated slave table (spec §6.1 "Enumerated slave table").
#[derive(Debug, Clone)]
pub struct EnumeratedSlave {
    /// Configured station address assigned during enumeration.
    pub configured_address: u16,
    /// Byte offset into the IO map of this slave's input region.
    pub input_offset: usize,
    /// Byte offset into the IO map of this slave's output region.
    pub output_offset: usize,
    /// Bit offset within the first input byte.
    pub input_start_bit: u8,
    /// Bit offset within the first output byte.
    pub output_start_bit: u8,
    /// Slave id of this slave's parent in the discovered topology, or `None` at the root.
    pub parent: Option<u32>,
    /// Which of the parent's ports this slave is attached to.
    pub parent_port: u8,
    /// Which of this slave's own ports leads back toward the parent.
    pub entry_port: u8,
    /// Mailbox protocols this slave advertises (AoE/EoE/CoE/FoE/SoE/VoE bitmask).
    pub mailbox_protocols: u16,
    /// EEPROM access word width in bytes (4 or 8).
    pub eeprom_byte_width: u8,
}

/// One index in a slave's CoE object dictionary, as reported by an OD-list walk (SOEM's
/// `ec_readODlist` combined with `ec_readODdescription`, spec §4.4 step 4).
#[derive(Debug, Clone)]
pub struct OdEntryDescription {
    /// The CoE dictionary index.
    pub index: u16,
    /// Raw CANopen object code (ETG1000.6 Table 5: 7 = Var, 8 = Array, 9 = Record).
    pub object_code: u8,
    /// Human-readable name of the object.
    pub name: String,
    /// Highest sub-index defined under this object.
    pub max_sub_index: u8,
}

/// One sub-index's object entry under an [`OdEntryDescription`] (SOEM's `ec_readOE`). A padding
/// sub-index (no data behind it) is reported with `data_type == 0` or `bit_length == 0` and should
/// be skipped by the caller, the same way the original discards it.
#[derive(Debug, Clone)]
pub struct OdSubEntry {
    pub name: String,
    /// Raw CANopen data type code (ETG1000.6 Table 20).
    pub data_type: u16,
    pub bit_length: u16,
    /// Raw `ObjAccess` bitmask (ETG1000.6 Table 67).
    pub access: u16,
}

/// Errors a [`LinkLayer`] implementation can report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LinkLayerError {
    #[error("link layer initialisation failed: {0}")]
    Init(String),
    #[error("link-layer timed out after {0:?}")]
    Timeout(Duration),
    #[error("slave {slave} rejected SDO access to {index:#06x}:{sub_index:#04x}")]
    SdoAbort { slave: u32, index: u16, sub_index: u8 },
}

/// The minimal contract the bus subsystem expects from the physical link layer (spec §6.1).
pub trait LinkLayer {
    /// Open the Ethernet channel on the given interface (or pre-opened socket fd, see
    /// spec §6.4 `--raw-socket`).
    fn init(&mut self, interface: &str) -> Result<(), LinkLayerError>;

    /// Allocate the process image; returns the size actually used.
    fn configure_iomap(&mut self, buffer: &mut [u8]) -> Result<usize, LinkLayerError>;

    /// Send one cycle's process data.
    fn send_process_data(&mut self) -> Result<(), LinkLayerError>;

    /// Receive the process data sent by the last [`Self::send_process_data`] call.
    fn receive_process_data(&mut self, timeout: Duration) -> Result<u16, LinkLayerError>;

    /// Send a pre-built frame and receive the reply, returning the working counter and a handle
    /// identifying which receive buffer holds the reply bytes.
    fn send_and_receive_frame(&mut self, frame: &[u8], timeout: Duration) -> Result<(u16, Vec<u8>), LinkLayerError>;

    /// Read a CoE object via SDO upload.
    fn sdo_read(&mut self, slave: u32, index: u16, sub_index: u8, buf: &mut [u8]) -> Result<usize, LinkLayerError>;

    /// Write a CoE object via SDO download.
    fn sdo_write(&mut self, slave: u32, index: u16, sub_index: u8, data: &[u8]) -> Result<(), LinkLayerError>;

    /// Read one EEPROM (SII) word at `word_address`, 4 or 8 bytes depending on slave capability.
    fn read_eeprom(&mut self, configured_address: u16, word_address: u16) -> Result<Vec<u8>, LinkLayerError>;

    /// List every index in `slave`'s CoE object dictionary (spec §4.4 step 4 "walk the full
    /// object dictionary").
    fn read_od_list(&mut self, slave: u32) -> Result<Vec<OdEntryDescription>, LinkLayerError>;

    /// Read every sub-index's object entry under `index`, given the `max_sub_index` an
    /// [`OdEntryDescription`] already reported for it.
    fn read_od_subentries(&mut self, slave: u32, index: u16, max_sub_index: u8) -> Result<Vec<OdSubEntry>, LinkLayerError>;

    /// Request a slave-state transition.
    fn set_state(&mut self, slave: u32, state: SlaveState) -> Result<(), LinkLayerError>;

    /// Poll a slave's AL state, waiting up to `timeout` for it to reach `state`.
    fn check_state(&mut self, slave: u32, state: SlaveState, timeout: Duration) -> Result<SlaveState, LinkLayerError>;

    /// The enumerated slave table, valid after a successful [`Self::init`].
    fn enumerated_slaves(&self) -> &[EnumeratedSlave];
}

/// Production collaborator: a raw Ethernet socket, per spec §6.4 `--raw-socket`/physical NIC use.
///
/// This crate's scope ends at the [`LinkLayer`] trait boundary (spec §1 "Out of scope: Physical
/// link-layer send/receive"); this type exists only so the bus reader has a concrete production
/// type to be generic over, not to implement raw-socket I/O itself.
pub struct RawSocketLinkLayer {
    slaves: Vec<EnumeratedSlave>,
}

impl RawSocketLinkLayer {
    /// Construct an unopened raw-socket link layer.
    pub fn new() -> Self {
        Self { slaves: Vec::new() }
    }
}

impl Default for RawSocketLinkLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkLayer for RawSocketLinkLayer {
    fn init(&mut self, _interface: &str) -> Result<(), LinkLayerError> {
        Err(LinkLayerError::Init(
            "raw-socket transport is provided by the platform packet-socket collaborator, not this crate".into(),
        ))
    }

    fn configure_iomap(&mut self, _buffer: &mut [u8]) -> Result<usize, LinkLayerError> {
        unimplemented!("raw-socket I/O is a collaborator outside this crate's scope")
    }

    fn send_process_data(&mut self) -> Result<(), LinkLayerError> {
        unimplemented!("raw-socket I/O is a collaborator outside this crate's scope")
    }

    fn receive_process_data(&mut self, _timeout: Duration) -> Result<u16, LinkLayerError> {
        unimplemented!("raw-socket I/O is a collaborator outside this crate's scope")
    }

    fn send_and_receive_frame(&mut self, _frame: &[u8], _timeout: Duration) -> Result<(u16, Vec<u8>), LinkLayerError> {
        unimplemented!("raw-socket I/O is a collaborator outside this crate's scope")
    }

    fn sdo_read(&mut self, _slave: u32, _index: u16, _sub_index: u8, _buf: &mut [u8]) -> Result<usize, LinkLayerError> {
        unimplemented!("raw-socket I/O is a collaborator outside this crate's scope")
    }

    fn sdo_write(&mut self, _slave: u32, _index: u16, _sub_index: u8, _data: &[u8]) -> Result<(), LinkLayerError> {
        unimplemented!("raw-socket I/O is a collaborator outside this crate's scope")
    }

    fn read_eeprom(&mut self, _configured_address: u16, _word_address: u16) -> Result<Vec<u8>, LinkLayerError> {
        unimplemented!("raw-socket I/O is a collaborator outside this crate's scope")
    }

    fn read_od_list(&mut self, _slave: u32) -> Result<Vec<OdEntryDescription>, LinkLayerError> {
        unimplemented!("raw-socket I/O is a collaborator outside this crate's scope")
    }

    fn read_od_subentries(&mut self, _slave: u32, _index: u16, _max_sub_index: u8) -> Result<Vec<OdSubEntry>, LinkLayerError> {
        unimplemented!("raw-socket I/O is a collaborator outside this crate's scope")
    }

    fn set_state(&mut self, _slave: u32, _state: SlaveState) -> Result<(), LinkLayerError> {
        unimplemented!("raw-socket I/O is a collaborator outside this crate's scope")
    }

    fn check_state(&mut self, _slave: u32, _state: SlaveState, _timeout: Duration) -> Result<SlaveState, LinkLayerError> {
        unimplemented!("raw-socket I/O is a collaborator outside this crate's scope")
    }

    fn enumerated_slaves(&self) -> &[EnumeratedSlave] {
        &self.slaves
    }
}

#[cfg(any(test, feature = "mock"))]
pub mod mock {
    //! A fully in-memory [`LinkLayer`] used by the test suite and by `--bus-mock` (spec §6.4).

    use super::*;
    use std::collections::HashMap;

    /// An in-memory link layer backed by plain buffers, standing in for a real bus.
    pub struct MockLinkLayer {
        pub slaves: Vec<EnumeratedSlave>,
        pub iomap: Vec<u8>,
        pub eeprom: HashMap<u16, Vec<u8>>,
        pub coe: HashMap<(u32, u16, u8), Vec<u8>>,
        pub states: HashMap<u32, SlaveState>,
        pub frames_sent: Vec<Vec<u8>>,
        pub next_reply: Vec<u8>,
        pub next_wkc: u16,
        /// Object-dictionary listing a test fixture can populate per slave, returned verbatim by
        /// [`LinkLayer::read_od_list`].
        pub od_list: HashMap<u32, Vec<OdEntryDescription>>,
        /// Per-`(slave, index)` sub-entries, returned verbatim by [`LinkLayer::read_od_subentries`].
        pub od_subentries: HashMap<(u32, u16), Vec<OdSubEntry>>,
    }

    impl MockLinkLayer {
        pub fn new(slaves: Vec<EnumeratedSlave>) -> Self {
            Self {
                slaves,
                iomap: Vec::new(),
                eeprom: HashMap::new(),
                coe: HashMap::new(),
                states: HashMap::new(),
                frames_sent: Vec::new(),
                next_reply: Vec::new(),
                next_wkc: 1,
                od_list: HashMap::new(),
                od_subentries: HashMap::new(),
            }
        }
    }

    impl LinkLayer for MockLinkLayer {
        fn init(&mut self, _interface: &str) -> Result<(), LinkLayerError> {
            if self.slaves.is_empty() {
                return Err(LinkLayerError::Init("no slaves found".into()));
            }
            Ok(())
        }

        fn configure_iomap(&mut self, buffer: &mut [u8]) -> Result<usize, LinkLayerError> {
            self.iomap = buffer.to_vec();
            Ok(self.iomap.len())
        }

        fn send_process_data(&mut self) -> Result<(), LinkLayerError> {
            Ok(())
        }

        fn receive_process_data(&mut self, _timeout: Duration) -> Result<u16, LinkLayerError> {
            Ok(self.slaves.len() as u16)
        }

        fn send_and_receive_frame(&mut self, frame: &[u8], _timeout: Duration) -> Result<(u16, Vec<u8>), LinkLayerError> {
            self.frames_sent.push(frame.to_vec());
            Ok((self.next_wkc, self.next_reply.clone()))
        }

        fn sdo_read(&mut self, slave: u32, index: u16, sub_index: u8, buf: &mut [u8]) -> Result<usize, LinkLayerError> {
            let value = self
                .coe
                .get(&(slave, index, sub_index))
                .ok_or(LinkLayerError::SdoAbort { slave, index, sub_index })?;
            let len = value.len().min(buf.len());
            buf[..len].copy_from_slice(&value[..len]);
            Ok(len)
        }

        fn sdo_write(&mut self, slave: u32, index: u16, sub_index: u8, data: &[u8]) -> Result<(), LinkLayerError> {
            self.coe.insert((slave, index, sub_index), data.to_vec());
            Ok(())
        }

        fn read_eeprom(&mut self, configured_address: u16, word_address: u16) -> Result<Vec<u8>, LinkLayerError> {
            Ok(self
                .eeprom
                .get(&configured_address)
                .and_then(|image| image.get(usize::from(word_address) * 2..).map(|s| s.to_vec()))
                .unwrap_or_default())
        }

        fn read_od_list(&mut self, slave: u32) -> Result<Vec<OdEntryDescription>, LinkLayerError> {
            Ok(self.od_list.get(&slave).cloned().unwrap_or_default())
        }

        fn read_od_subentries(&mut self, slave: u32, index: u16, _max_sub_index: u8) -> Result<Vec<OdSubEntry>, LinkLayerError> {
            Ok(self.od_subentries.get(&(slave, index)).cloned().unwrap_or_default())
        }

        fn set_state(&mut self, slave: u32, state: SlaveState) -> Result<(), LinkLayerError> {
            self.states.insert(slave, state);
            Ok(())
        }

        fn check_state(&mut self, slave: u32, _state: SlaveState, _timeout: Duration) -> Result<SlaveState, LinkLayerError> {
            Ok(*self.states.get(&slave).unwrap_or(&SlaveState::Init))
        }

        fn enumerated_slaves(&self) -> &[EnumeratedSlave] {
            &self.slaves
        }
    }

    #[test]
    fn empty_slave_table_fails_init() {
        let mut mock = MockLinkLayer::new(Vec::new());
        assert!(mock.init("mock0").is_err());
    }

    #[test]
    fn sdo_round_trips_through_mock() {
        let mut mock = MockLinkLayer::new(vec![EnumeratedSlave {
            configured_address: 0x1001,
            input_offset: 0,
            output_offset: 0,
            input_start_bit: 0,
            output_start_bit: 0,
            parent: None,
            parent_port: 0,
            entry_port: 0,
            mailbox_protocols: 0x0004,
            eeprom_byte_width: 4,
        }]);

        mock.sdo_write(1, 0x6000, 1, &[42]).unwrap();

        let mut buf = [0u8; 1];
        let len = mock.sdo_read(1, 0x6000, 1, &mut buf).unwrap();

        assert_eq!(len, 1);
        assert_eq!(buf[0], 42);
    }

    #[test]
    fn od_list_and_subentries_round_trip_through_mock() {
        let mut mock = MockLinkLayer::new(vec![EnumeratedSlave {
            configured_address: 0x1001,
            input_offset: 0,
            output_offset: 0,
            input_start_bit: 0,
            output_start_bit: 0,
            parent: None,
            parent_port: 0,
            entry_port: 0,
            mailbox_protocols: 0x0004,
            eeprom_byte_width: 4,
        }]);

        mock.od_list.insert(
            1,
            vec![OdEntryDescription {
                index: 0x6000,
                object_code: 9,
                name: "Inputs".into(),
                max_sub_index: 1,
            }],
        );
        mock.od_subentries.insert(
            (1, 0x6000),
            vec![OdSubEntry {
                name: "Value".into(),
                data_type: 0x0006,
                bit_length: 16,
                access: 0b0000_0110,
            }],
        );

        let entries = mock.read_od_list(1).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].index, 0x6000);

        let subentries = mock.read_od_subentries(1, 0x6000, entries[0].max_sub_index).unwrap();
        assert_eq!(subentries.len(), 1);
        assert_eq!(subentries[0].bit_length, 16);
    }
}
