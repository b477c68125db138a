//! NTFS on-disk structures the search engine consumes
//!
//! Record walkers decode MFT records themselves; the engine only needs the
//! attribute type vocabulary, file references, `$STANDARD_INFORMATION`,
//! `$FILE_NAME` and the `$I30` index entries used in recovery mode.

use std::fmt;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

// ============================================================================
// NTFS Constants
// ============================================================================

/// Segment number of `$BadClus`
pub const BAD_CLUSTERS_SEGMENT: u64 = 8;

/// Name of the `$BadClus` stream mapping every bad cluster of the volume
pub const BAD_CLUSTERS_STREAM: &str = "$Bad";

/// Stream holding the content of WOF compressed files
pub const WOF_COMPRESSED_STREAM: &str = "WofCompressedData";

/// Size of the fixed part of a `$FILE_NAME` attribute
const FILE_NAME_HEADER_SIZE: usize = 66;

/// Size of the fixed part of an index entry, before its key
const INDEX_ENTRY_HEADER_SIZE: usize = 16;

// Index entry flags
pub const INDEX_ENTRY_SUBNODE: u16 = 0x0001;
pub const INDEX_ENTRY_LAST: u16 = 0x0002;

// ============================================================================
// Attribute Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    StandardInformation,
    AttributeList,
    FileName,
    ObjectId,
    SecurityDescriptor,
    VolumeName,
    VolumeInformation,
    Data,
    IndexRoot,
    IndexAllocation,
    Bitmap,
    ReparsePoint,
    EaInformation,
    Ea,
    LoggedUtilityStream,
    FirstUserDefined,
    Custom(u32),
}

/// Attribute type codes and their `$NAME` spelling
const ATTRIBUTE_NAMES: &[(AttributeType, u32, &str)] = &[
    (AttributeType::StandardInformation, 0x10, "$STANDARD_INFORMATION"),
    (AttributeType::AttributeList, 0x20, "$ATTRIBUTE_LIST"),
    (AttributeType::FileName, 0x30, "$FILE_NAME"),
    (AttributeType::ObjectId, 0x40, "$OBJECT_ID"),
    (AttributeType::SecurityDescriptor, 0x50, "$SECURITY_DESCRIPTOR"),
    (AttributeType::VolumeName, 0x60, "$VOLUME_NAME"),
    (AttributeType::VolumeInformation, 0x70, "$VOLUME_INFORMATION"),
    (AttributeType::Data, 0x80, "$DATA"),
    (AttributeType::IndexRoot, 0x90, "$INDEX_ROOT"),
    (AttributeType::IndexAllocation, 0xA0, "$INDEX_ALLOCATION"),
    (AttributeType::Bitmap, 0xB0, "$BITMAP"),
    (AttributeType::ReparsePoint, 0xC0, "$REPARSE_POINT"),
    (AttributeType::EaInformation, 0xD0, "$EA_INFORMATION"),
    (AttributeType::Ea, 0xE0, "$EA"),
    (AttributeType::LoggedUtilityStream, 0x100, "$LOGGED_UTILITY_STREAM"),
    (AttributeType::FirstUserDefined, 0x1000, "$FIRST_USER_DEFINED_ATTRIBUTE"),
];

impl AttributeType {
    pub fn from_u32(value: u32) -> Self {
        ATTRIBUTE_NAMES
            .iter()
            .find(|(_, code, _)| *code == value)
            .map(|(ty, _, _)| *ty)
            .unwrap_or(Self::Custom(value))
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Custom(code) => code,
            known => ATTRIBUTE_NAMES
                .iter()
                .find(|(ty, _, _)| *ty == known)
                .map(|(_, code, _)| *code)
                .unwrap_or_default(),
        }
    }

    /// Parse `$DATA`-style names (case-insensitive) or a numeric code
    /// (decimal or `0x` hex). Zero is not a valid attribute type.
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        if let Some((ty, _, _)) = ATTRIBUTE_NAMES
            .iter()
            .find(|(_, _, name)| name.eq_ignore_ascii_case(spec))
        {
            return Some(*ty);
        }

        let code = match spec.strip_prefix("0x").or_else(|| spec.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => spec.parse::<u32>().ok()?,
        };
        (code != 0).then(|| Self::from_u32(code))
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(code) => write!(f, "Custom({})", code),
            known => {
                let name = ATTRIBUTE_NAMES
                    .iter()
                    .find(|(ty, _, _)| ty == known)
                    .map(|(_, _, name)| *name)
                    .unwrap_or("$UNKNOWN");
                f.write_str(name)
            }
        }
    }
}

// ============================================================================
// File Reference
// ============================================================================

/// NTFS file reference number: 48 bit segment + 16 bit sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FileReference {
    pub segment: u64,
    pub sequence: u16,
}

impl FileReference {
    pub fn new(segment: u64, sequence: u16) -> Self {
        Self {
            segment: segment & 0x0000_FFFF_FFFF_FFFF,
            sequence,
        }
    }

    pub fn from_u64(value: u64) -> Self {
        Self::new(value, (value >> 48) as u16)
    }

    pub fn to_u64(self) -> u64 {
        ((self.sequence as u64) << 48) | self.segment
    }
}

impl fmt::Display for FileReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.to_u64())
    }
}

// ============================================================================
// Filename Namespace
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FilenameNamespace {
    Posix = 0,
    Win32 = 1,
    Dos = 2,
    Win32AndDos = 3,
}

impl FilenameNamespace {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Posix),
            1 => Some(Self::Win32),
            2 => Some(Self::Dos),
            3 => Some(Self::Win32AndDos),
            _ => None,
        }
    }
}

// ============================================================================
// Standard Information Attribute
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StandardInformation {
    pub creation_time: u64,
    pub modification_time: u64,
    pub mft_modification_time: u64,
    pub access_time: u64,
    pub file_attributes: u32,
    pub owner_id: u32,
    pub security_id: u32,
    pub usn: u64,
}

impl StandardInformation {
    /// Parse from resident attribute content
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 48 {
            return None;
        }

        let mut cursor = Cursor::new(data);

        let mut info = Self {
            creation_time: cursor.read_u64::<LittleEndian>().ok()?,
            modification_time: cursor.read_u64::<LittleEndian>().ok()?,
            mft_modification_time: cursor.read_u64::<LittleEndian>().ok()?,
            access_time: cursor.read_u64::<LittleEndian>().ok()?,
            file_attributes: cursor.read_u32::<LittleEndian>().ok()?,
            ..Default::default()
        };

        // NTFS 3.0+ layout carries owner, security id and usn
        if data.len() >= 72 {
            cursor.set_position(48);
            info.owner_id = cursor.read_u32::<LittleEndian>().ok()?;
            info.security_id = cursor.read_u32::<LittleEndian>().ok()?;
            let _quota_charged = cursor.read_u64::<LittleEndian>().ok()?;
            info.usn = cursor.read_u64::<LittleEndian>().ok()?;
        }

        Some(info)
    }
}

// ============================================================================
// File Name Attribute
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameAttribute {
    pub parent: FileReference,
    pub creation_time: u64,
    pub modification_time: u64,
    pub mft_modification_time: u64,
    pub access_time: u64,
    pub allocated_size: u64,
    pub data_size: u64,
    pub file_attributes: u32,
    pub namespace: FilenameNamespace,
    pub name: String,
}

impl FileNameAttribute {
    /// Build a Win32 name entry without timestamps, as walkers that do not
    /// decode `$FILE_NAME` produce.
    pub fn named(parent: FileReference, name: impl Into<String>) -> Self {
        Self {
            parent,
            creation_time: 0,
            modification_time: 0,
            mft_modification_time: 0,
            access_time: 0,
            allocated_size: 0,
            data_size: 0,
            file_attributes: 0,
            namespace: FilenameNamespace::Win32,
            name: name.into(),
        }
    }

    /// Parse from resident attribute content or an `$I30` index key
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < FILE_NAME_HEADER_SIZE {
            return None;
        }

        let mut cursor = Cursor::new(data);

        let parent = FileReference::from_u64(cursor.read_u64::<LittleEndian>().ok()?);
        let creation_time = cursor.read_u64::<LittleEndian>().ok()?;
        let modification_time = cursor.read_u64::<LittleEndian>().ok()?;
        let mft_modification_time = cursor.read_u64::<LittleEndian>().ok()?;
        let access_time = cursor.read_u64::<LittleEndian>().ok()?;
        let allocated_size = cursor.read_u64::<LittleEndian>().ok()?;
        let data_size = cursor.read_u64::<LittleEndian>().ok()?;
        let file_attributes = cursor.read_u32::<LittleEndian>().ok()?;
        let _reparse_value = cursor.read_u32::<LittleEndian>().ok()?;
        let name_length = cursor.read_u8().ok()? as usize;
        let namespace = FilenameNamespace::from_u8(cursor.read_u8().ok()?)?;

        // Read filename (UTF-16LE)
        let name_end = FILE_NAME_HEADER_SIZE + name_length * 2;
        if data.len() < name_end {
            return None;
        }
        let name_u16: Vec<u16> = data[FILE_NAME_HEADER_SIZE..name_end]
            .chunks_exact(2)
            .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
            .collect();

        Some(Self {
            parent,
            creation_time,
            modification_time,
            mft_modification_time,
            access_time,
            allocated_size,
            data_size,
            file_attributes,
            namespace,
            name: String::from_utf16_lossy(&name_u16),
        })
    }

    pub fn is_directory(&self) -> bool {
        self.file_attributes & file_attributes::DUP_FILE_NAME_INDEX_PRESENT != 0
    }
}

// ============================================================================
// $I30 Index Entries
// ============================================================================

/// One entry of a directory `$I30` index, keyed by a `$FILE_NAME`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntryHeader {
    pub file_reference: FileReference,
    pub entry_length: u16,
    pub key_length: u16,
    pub flags: u16,
}

impl IndexEntryHeader {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < INDEX_ENTRY_HEADER_SIZE {
            return None;
        }

        let mut cursor = Cursor::new(data);
        Some(Self {
            file_reference: FileReference::from_u64(cursor.read_u64::<LittleEndian>().ok()?),
            entry_length: cursor.read_u16::<LittleEndian>().ok()?,
            key_length: cursor.read_u16::<LittleEndian>().ok()?,
            flags: cursor.read_u16::<LittleEndian>().ok()?,
        })
    }

    pub fn is_last(&self) -> bool {
        self.flags & INDEX_ENTRY_LAST != 0
    }
}

/// Parse the entries of an index node (the bytes following the node header)
/// until the terminating entry or the first malformed one.
pub fn parse_index_entries(data: &[u8]) -> Vec<(FileReference, FileNameAttribute)> {
    let mut entries = Vec::new();
    let mut offset = 0;

    while offset + INDEX_ENTRY_HEADER_SIZE <= data.len() {
        let Some(header) = IndexEntryHeader::from_bytes(&data[offset..]) else {
            break;
        };
        if header.is_last() || (header.entry_length as usize) < INDEX_ENTRY_HEADER_SIZE {
            break;
        }

        let key_start = offset + INDEX_ENTRY_HEADER_SIZE;
        let key_end = key_start + header.key_length as usize;
        if key_end > data.len() {
            break;
        }
        if let Some(name) = FileNameAttribute::from_bytes(&data[key_start..key_end]) {
            entries.push((header.file_reference, name));
        }

        offset += header.entry_length as usize;
    }

    entries
}

// ============================================================================
// FILETIME conversion utilities
// ============================================================================

/// Convert Windows FILETIME (100-nanosecond intervals since 1601) to Unix timestamp
pub fn filetime_to_unix(filetime: u64) -> i64 {
    // Difference between 1601 and 1970 in 100-nanosecond intervals
    const EPOCH_DIFF: u64 = 116444736000000000;

    if filetime < EPOCH_DIFF {
        return 0;
    }

    ((filetime - EPOCH_DIFF) / 10_000_000) as i64
}

/// Convert Windows FILETIME to chrono DateTime
pub fn filetime_to_datetime(filetime: u64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(filetime_to_unix(filetime), 0).unwrap_or_default()
}

// ============================================================================
// File Attributes
// ============================================================================

pub mod file_attributes {
    pub const READONLY: u32 = 0x00000001;
    pub const HIDDEN: u32 = 0x00000002;
    pub const SYSTEM: u32 = 0x00000004;
    pub const DIRECTORY: u32 = 0x00000010;
    pub const ARCHIVE: u32 = 0x00000020;
    pub const SPARSE_FILE: u32 = 0x00000200;
    pub const REPARSE_POINT: u32 = 0x00000400;
    pub const COMPRESSED: u32 = 0x00000800;
    pub const ENCRYPTED: u32 = 0x00004000;
    /// Set in `$FILE_NAME` for directories
    pub const DUP_FILE_NAME_INDEX_PRESENT: u32 = 0x10000000;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_name_bytes(parent: u64, name: &str, attributes: u32) -> Vec<u8> {
        let utf16: Vec<u16> = name.encode_utf16().collect();
        let mut data = Vec::new();
        data.extend_from_slice(&parent.to_le_bytes());
        for time in [1u64, 2, 3, 4] {
            data.extend_from_slice(&time.to_le_bytes());
        }
        data.extend_from_slice(&4096u64.to_le_bytes());
        data.extend_from_slice(&1234u64.to_le_bytes());
        data.extend_from_slice(&attributes.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.push(utf16.len() as u8);
        data.push(FilenameNamespace::Win32 as u8);
        for unit in utf16 {
            data.extend_from_slice(&unit.to_le_bytes());
        }
        data
    }

    fn index_entry_bytes(frn: u64, key: &[u8], flags: u16) -> Vec<u8> {
        let length = (INDEX_ENTRY_HEADER_SIZE + key.len() + 7) & !7;
        let mut data = Vec::new();
        data.extend_from_slice(&frn.to_le_bytes());
        data.extend_from_slice(&(length as u16).to_le_bytes());
        data.extend_from_slice(&(key.len() as u16).to_le_bytes());
        data.extend_from_slice(&flags.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(key);
        data.resize(length, 0);
        data
    }

    #[test]
    fn attribute_type_names_and_codes() {
        assert_eq!(AttributeType::parse("$data"), Some(AttributeType::Data));
        assert_eq!(AttributeType::parse("0xE0"), Some(AttributeType::Ea));
        assert_eq!(AttributeType::parse("128"), Some(AttributeType::Data));
        assert_eq!(AttributeType::parse("0"), None);
        assert_eq!(AttributeType::parse("$NOPE"), None);
        assert_eq!(AttributeType::from_u32(0x2000), AttributeType::Custom(0x2000));
        assert_eq!(AttributeType::Custom(0x2000).to_string(), "Custom(8192)");
        assert_eq!(AttributeType::IndexRoot.code(), 0x90);
        assert_eq!(AttributeType::Data.to_string(), "$DATA");
    }

    #[test]
    fn file_reference_splits_segment_and_sequence() {
        let frn = FileReference::from_u64(0x0005_0000_0000_0123);
        assert_eq!(frn.segment, 0x123);
        assert_eq!(frn.sequence, 5);
        assert_eq!(frn.to_u64(), 0x0005_0000_0000_0123);
        assert_eq!(frn.to_string(), "0x0005000000000123");
    }

    #[test]
    fn parses_file_name_attribute() {
        let data = file_name_bytes(0x0001_0000_0000_0005, "report.docx", 0x20);
        let parsed = FileNameAttribute::from_bytes(&data).unwrap();
        assert_eq!(parsed.name, "report.docx");
        assert_eq!(parsed.parent, FileReference::new(5, 1));
        assert_eq!(parsed.data_size, 1234);
        assert!(!parsed.is_directory());
        assert!(FileNameAttribute::from_bytes(&data[..70]).is_none());
    }

    #[test]
    fn parses_index_entries_until_last() {
        let mut node = index_entry_bytes(0x0002_0000_0000_0040, &file_name_bytes(5, "a.txt", 0), 0);
        node.extend(index_entry_bytes(
            0x0001_0000_0000_0041,
            &file_name_bytes(5, "Sub", file_attributes::DUP_FILE_NAME_INDEX_PRESENT),
            0,
        ));
        node.extend(index_entry_bytes(0, &[], INDEX_ENTRY_LAST));
        node.extend(index_entry_bytes(0x42, &file_name_bytes(5, "ghost", 0), 0));

        let entries = parse_index_entries(&node);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, FileReference::new(0x40, 2));
        assert_eq!(entries[0].1.name, "a.txt");
        assert!(entries[1].1.is_directory());
    }

    #[test]
    fn standard_information_short_and_long_layouts() {
        let mut data = vec![0u8; 72];
        data[32..36].copy_from_slice(&file_attributes::HIDDEN.to_le_bytes());
        data[52..56].copy_from_slice(&0x101u32.to_le_bytes());
        let long = StandardInformation::from_bytes(&data).unwrap();
        assert_eq!(long.file_attributes, file_attributes::HIDDEN);
        assert_eq!(long.security_id, 0x101);

        let short = StandardInformation::from_bytes(&data[..48]).unwrap();
        assert_eq!(short.security_id, 0);
        assert!(StandardInformation::from_bytes(&data[..40]).is_none());
    }

    #[test]
    fn filetime_conversion() {
        assert_eq!(filetime_to_unix(116444736000000000), 0);
        assert_eq!(filetime_to_unix(116444736000000000 + 10_000_000), 1);
        assert_eq!(filetime_to_unix(0), 0);
        assert_eq!(filetime_to_datetime(0).timestamp(), 0);
    }
}
