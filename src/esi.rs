//! Parsing of a slave's ESI (EtherCAT Slave Information) EEPROM image.
//!
//! The EEPROM is organised as a fixed header followed by a sequence of category blocks, each
//! tagged with a [`CategoryType`] and a word count, terminated by an `End` category (ETG1000.6
//! Table 17-23). This module turns that byte stream into [`EsiData`]; it never talks to the bus
//! itself, it only parses whatever bytes the slave informant already read out of EEPROM.

use bitflags::bitflags;

/// Category tags found in the ESI EEPROM, ETG1000.6 Table 19.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryType {
    Strings,
    DataTypes,
    General,
    Fmmu,
    SyncManager,
    FmmuExtended,
    SyncUnit,
    TxPdo,
    RxPdo,
    DistributedClock,
    /// A category this parser does not interpret; its bytes are skipped.
    Other(u16),
    /// Terminates the category list.
    End,
}

impl From<u16> for CategoryType {
    fn from(value: u16) -> Self {
        match value {
            10 => Self::Strings,
            20 => Self::DataTypes,
            30 => Self::General,
            40 => Self::Fmmu,
            41 => Self::SyncManager,
            42 => Self::FmmuExtended,
            43 => Self::SyncUnit,
            50 => Self::TxPdo,
            51 => Self::RxPdo,
            60 => Self::DistributedClock,
            0xFFFF => Self::End,
            other => Self::Other(other),
        }
    }
}

bitflags! {
    /// ETG1000.6 Table 21, "General" category, CoE details byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CoeDetails: u8 {
        const ENABLE_SDO = 0x01;
        const ENABLE_SDO_INFO = 0x02;
        const ENABLE_PDO_ASSIGN = 0x04;
        const ENABLE_PDO_CONFIG = 0x08;
        const ENABLE_STARTUP_UPLOAD = 0x10;
        const ENABLE_COMPLETE_ACCESS = 0x20;
    }
}

bitflags! {
    /// ETG1000.6 Table 21, "General" category, flags byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GeneralFlags: u8 {
        const ENABLE_SAFE_OP = 0x01;
        const ENABLE_NOT_LRW = 0x02;
        const MAILBOX_DLL = 0x04;
        const IDENT_AL_STATUS = 0x08;
        const IDENT_PHY_M = 0x10;
    }
}

bitflags! {
    /// ETG1000.6 Table 18, mailbox protocols supported flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MailboxProtocols: u16 {
        const AOE = 0x0001;
        const EOE = 0x0002;
        const COE = 0x0004;
        const FOE = 0x0008;
        const SOE = 0x0010;
        const VOE = 0x0020;
    }
}

/// Which process image direction an FMMU channel is wired to, ETG1000.6 Table 23.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmmuUsage {
    Unused,
    Outputs,
    Inputs,
    SyncManagerStatus,
}

impl From<u8> for FmmuUsage {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::Outputs,
            0x02 => Self::Inputs,
            0x03 => Self::SyncManagerStatus,
            _ => Self::Unused,
        }
    }
}

/// SyncManager channel purpose, ETG1000.6 Table 23.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncManagerKind {
    MailboxOut,
    MailboxIn,
    ProcessOutput,
    ProcessInput,
    Unknown(u8),
}

impl From<u8> for SyncManagerKind {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::MailboxOut,
            1 => Self::MailboxIn,
            2 => Self::ProcessOutput,
            3 => Self::ProcessInput,
            other => Self::Unknown(other),
        }
    }
}

/// One SyncManager channel descriptor from the `SyncManager` category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncManagerDescriptor {
    pub start_addr: u16,
    pub length: u16,
    pub control: u8,
    pub enable: bool,
    pub usage: SyncManagerKind,
}

/// One entry within a TxPDO/RxPDO mapping object, pre-join with the CoE dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsiPdoEntry {
    pub index: u16,
    pub sub_index: u8,
    pub name: String,
    pub data_length_bits: u8,
}

/// One TxPDO/RxPDO description from the ESI `TxPdo`/`RxPdo` category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsiPdoDescriptor {
    pub index: u16,
    pub sync_manager: u8,
    pub name: String,
    pub entries: Vec<EsiPdoEntry>,
}

/// The ESI `General` category (ETG1000.6 Table 21), resolved against the strings table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EsiGeneral {
    pub group: String,
    pub image: String,
    pub order_number: String,
    pub name: String,
    pub coe_details: CoeDetails,
    pub foe_enabled: bool,
    pub eoe_enabled: bool,
    pub flags: GeneralFlags,
    /// EBus current consumption in mA; negative means this slave feeds current into the bus.
    pub ebus_current: i16,
}

/// Vendor/product identity, read from the fixed EEPROM header preceding the category list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EsiHeader {
    pub vendor_id: u32,
    pub product_code: u32,
    pub revision_number: u32,
    pub serial_number: u32,
}

/// Everything this crate parses out of one slave's ESI EEPROM image.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EsiData {
    pub header: EsiHeader,
    pub strings: Vec<String>,
    pub general: EsiGeneral,
    pub fmmu: Vec<FmmuUsage>,
    pub sync_managers: Vec<SyncManagerDescriptor>,
    pub tx_pdos: Vec<EsiPdoDescriptor>,
    pub rx_pdos: Vec<EsiPdoDescriptor>,
    pub mailbox_protocols: MailboxProtocols,
}

/// Errors raised while parsing an ESI EEPROM image.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EsiError {
    /// The image ended before the `End` category marker was found.
    #[error("EEPROM image truncated while reading category header at word {word_offset}")]
    Truncated {
        /// Word offset at which truncation was detected.
        word_offset: usize,
    },
    /// A category's declared length ran past the end of the image.
    #[error("category {category:?} declares {declared} words but only {available} remain")]
    CategoryOverrun {
        /// The category whose length overran the buffer.
        category: CategoryType,
        /// The number of words the category header declared.
        declared: usize,
        /// The number of words actually remaining.
        available: usize,
    },
    /// A string index referenced a slot past the end of the `Strings` table.
    #[error("string index {0} has no entry in the strings table")]
    BadStringIndex(u8),
}

fn le_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    bytes.get(offset..offset + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn le_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Resolve a 1-based string table index to its string, or `""` for index 0 (ETG1000.6 convention:
/// index 0 always means "no string").
fn resolve_string(strings: &[String], idx: u8) -> Result<String, EsiError> {
    if idx == 0 {
        return Ok(String::new());
    }

    strings
        .get(usize::from(idx) - 1)
        .cloned()
        .ok_or(EsiError::BadStringIndex(idx))
}

fn parse_strings_category(body: &[u8]) -> Vec<String> {
    let Some(&count) = body.first() else {
        return Vec::new();
    };

    let mut strings = Vec::with_capacity(usize::from(count));
    let mut offset = 1;

    for _ in 0..count {
        let Some(&len) = body.get(offset) else { break };
        let start = offset + 1;
        let end = start + usize::from(len);

        let Some(slice) = body.get(start..end) else { break };

        strings.push(String::from_utf8_lossy(slice).into_owned());
        offset = end;
    }

    strings
}

fn parse_general_category(body: &[u8], strings: &[String]) -> Result<EsiGeneral, EsiError> {
    let group_idx = *body.first().unwrap_or(&0);
    let image_idx = *body.get(1).unwrap_or(&0);
    let order_idx = *body.get(2).unwrap_or(&0);
    let name_idx = *body.get(3).unwrap_or(&0);
    let coe_details = CoeDetails::from_bits_truncate(*body.get(5).unwrap_or(&0));
    let foe_enabled = body.get(6).unwrap_or(&0) & 0x01 != 0;
    let eoe_enabled = body.get(6).unwrap_or(&0) & 0x02 != 0;
    let flags = GeneralFlags::from_bits_truncate(*body.get(10).unwrap_or(&0));
    let ebus_current = body
        .get(11..13)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .unwrap_or(0);

    Ok(EsiGeneral {
        group: resolve_string(strings, group_idx)?,
        image: resolve_string(strings, image_idx)?,
        order_number: resolve_string(strings, order_idx)?,
        name: resolve_string(strings, name_idx)?,
        coe_details,
        foe_enabled,
        eoe_enabled,
        flags,
        ebus_current,
    })
}

fn parse_fmmu_category(body: &[u8]) -> Vec<FmmuUsage> {
    body.iter().copied().map(FmmuUsage::from).collect()
}

fn parse_sync_manager_category(body: &[u8]) -> Vec<SyncManagerDescriptor> {
    body.chunks_exact(8)
        .map(|chunk| SyncManagerDescriptor {
            start_addr: u16::from_le_bytes([chunk[0], chunk[1]]),
            length: u16::from_le_bytes([chunk[2], chunk[3]]),
            control: chunk[4],
            enable: chunk[6] & 0x01 != 0,
            usage: SyncManagerKind::from(chunk[7]),
        })
        .collect()
}

fn parse_pdo_category(body: &[u8], strings: &[String]) -> Result<Vec<EsiPdoDescriptor>, EsiError> {
    let mut pdos = Vec::new();
    let mut offset = 0;

    while offset + 8 <= body.len() {
        let index = le_u16(body, offset).unwrap_or(0);
        let num_entries = body[offset + 2];
        let sync_manager = body[offset + 3];
        let name_idx = body[offset + 5];

        offset += 8;

        let name = resolve_string(strings, name_idx)?;
        let mut entries = Vec::with_capacity(usize::from(num_entries));

        for _ in 0..num_entries {
            let Some(entry_chunk) = body.get(offset..offset + 8) else { break };

            entries.push(EsiPdoEntry {
                index: u16::from_le_bytes([entry_chunk[0], entry_chunk[1]]),
                sub_index: entry_chunk[2],
                name: resolve_string(strings, entry_chunk[3])?,
                data_length_bits: entry_chunk[5],
            });

            offset += 8;
        }

        pdos.push(EsiPdoDescriptor {
            index,
            sync_manager,
            name,
            entries,
        });
    }

    Ok(pdos)
}

/// Parse a complete ESI EEPROM image: a 16-byte header followed by category blocks ending in
/// `End` (spec §4.4 step 4, "Read ESI ... Parse ESI into header, strings, general info, FMMU
/// list, SyncManager list, TxPDO/RxPDO objects").
pub fn parse(image: &[u8]) -> Result<EsiData, EsiError> {
    let header = EsiHeader {
        vendor_id: le_u32(image, 8).ok_or(EsiError::Truncated { word_offset: 4 })?,
        product_code: le_u32(image, 12).ok_or(EsiError::Truncated { word_offset: 6 })?,
        revision_number: le_u32(image, 16).ok_or(EsiError::Truncated { word_offset: 8 })?,
        serial_number: le_u32(image, 20).ok_or(EsiError::Truncated { word_offset: 10 })?,
    };

    let mut data = EsiData {
        header,
        ..Default::default()
    };

    let mut offset = 0x80;

    loop {
        let Some(category_raw) = le_u16(image, offset) else {
            return Err(EsiError::Truncated {
                word_offset: offset / 2,
            });
        };
        let category = CategoryType::from(category_raw);

        if matches!(category, CategoryType::End) {
            break;
        }

        let Some(word_len) = le_u16(image, offset + 2) else {
            return Err(EsiError::Truncated {
                word_offset: offset / 2 + 1,
            });
        };
        let byte_len = usize::from(word_len) * 2;
        let body_start = offset + 4;

        let Some(body) = image.get(body_start..body_start + byte_len) else {
            return Err(EsiError::CategoryOverrun {
                category,
                declared: byte_len,
                available: image.len().saturating_sub(body_start),
            });
        };

        match category {
            CategoryType::Strings => data.strings = parse_strings_category(body),
            CategoryType::General => data.general = parse_general_category(body, &data.strings)?,
            CategoryType::Fmmu => data.fmmu = parse_fmmu_category(body),
            CategoryType::SyncManager => data.sync_managers = parse_sync_manager_category(body),
            CategoryType::TxPdo => data.tx_pdos = parse_pdo_category(body, &data.strings)?,
            CategoryType::RxPdo => data.rx_pdos = parse_pdo_category(body, &data.strings)?,
            _ => {}
        }

        offset = body_start + byte_len;
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_image(categories: &[(u16, &[u8])]) -> Vec<u8> {
        let mut image = vec![0u8; 0x80];
        image[8..12].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        image[12..16].copy_from_slice(&1u32.to_le_bytes());

        for (tag, body) in categories {
            image.extend_from_slice(&tag.to_le_bytes());
            let word_len = (body.len() / 2) as u16;
            image.extend_from_slice(&word_len.to_le_bytes());
            image.extend_from_slice(body);
        }

        image.extend_from_slice(&0xFFFFu16.to_le_bytes());
        image
    }

    #[test]
    fn parses_vendor_and_product_from_header() {
        let image = build_image(&[]);
        let data = parse(&image).unwrap();

        assert_eq!(data.header.vendor_id, 0x1234_5678);
        assert_eq!(data.header.product_code, 1);
    }

    #[test]
    fn strings_category_resolves_general_name() {
        let strings_body: &[u8] = &[1, 4, b'T', b'e', b's', b't'];
        let general_body: &[u8] = &[0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0];

        let image = build_image(&[(10, strings_body), (30, general_body)]);
        let data = parse(&image).unwrap();

        assert_eq!(data.general.name, "Test");
    }

    #[test]
    fn unknown_category_is_skipped_without_error() {
        let image = build_image(&[(1000, &[1, 2, 3, 4])]);

        assert!(parse(&image).is_ok());
    }

    #[test]
    fn truncated_image_is_reported() {
        let mut image = vec![0u8; 0x84];
        image[0x80..0x82].copy_from_slice(&30u16.to_le_bytes());
        image[0x82..0x84].copy_from_slice(&100u16.to_le_bytes());

        assert!(matches!(parse(&image), Err(EsiError::CategoryOverrun { .. })));
    }
}
