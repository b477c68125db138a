//! Decoded MFT records as delivered by a walker
//!
//! A record carries its names (with resolved full paths), the
//! `$STANDARD_INFORMATION` snapshot and its attribute list. Attribute
//! content is not loaded up front: each attribute that has content exposes a
//! [`StreamSource`] the engine opens only when a term needs the bytes.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek};
use std::path::PathBuf;
use std::sync::Arc;

use super::structs::{
    AttributeType, FileNameAttribute, FileReference, StandardInformation, BAD_CLUSTERS_SEGMENT,
    BAD_CLUSTERS_STREAM, WOF_COMPRESSED_STREAM,
};

// ============================================================================
// Attribute content streams
// ============================================================================

/// Seekable byte stream over attribute content
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// Source of an attribute's content. Every `open` yields an independent
/// cursor positioned at offset zero.
pub trait StreamSource: Send + Sync + fmt::Debug {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn open(&self) -> io::Result<Box<dyn ReadSeek>>;
}

/// Content held in memory
#[derive(Clone)]
pub struct MemoryStream {
    data: Arc<[u8]>,
}

impl MemoryStream {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl fmt::Debug for MemoryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStream")
            .field("len", &self.data.len())
            .finish()
    }
}

impl StreamSource for MemoryStream {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn open(&self) -> io::Result<Box<dyn ReadSeek>> {
        Ok(Box::new(Cursor::new(ArcBytes(self.data.clone()))))
    }
}

/// Owned view used as a `Cursor` backing store
struct ArcBytes(Arc<[u8]>);

impl AsRef<[u8]> for ArcBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Content of a file reachable through the regular filesystem, used by
/// walkers that resolve data streams to paths (raw device images, mounted
/// snapshots)
#[derive(Debug, Clone)]
pub struct FileStream {
    path: PathBuf,
    len: u64,
}

impl FileStream {
    pub fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let len = std::fs::metadata(&path)?.len();
        Ok(Self { path, len })
    }
}

impl StreamSource for FileStream {
    fn len(&self) -> u64 {
        self.len
    }

    fn open(&self) -> io::Result<Box<dyn ReadSeek>> {
        Ok(Box::new(File::open(&self.path)?))
    }
}

// ============================================================================
// Record model
// ============================================================================

/// One `$FILE_NAME` of a record with its resolved full path
#[derive(Debug, Clone)]
pub struct RecordName {
    pub file_name: FileNameAttribute,
    /// Full path including the volume prefix, e.g. `C:\Windows\notepad.exe`
    pub full_path: String,
}

impl RecordName {
    pub fn new(file_name: FileNameAttribute, full_path: impl Into<String>) -> Self {
        Self {
            file_name,
            full_path: full_path.into(),
        }
    }
}

/// One attribute of a record
#[derive(Debug, Clone)]
pub struct RecordAttribute {
    pub attr_type: AttributeType,
    /// Attribute name, empty for the unnamed (default) stream
    pub name: String,
    pub instance: u16,
    /// Content, when the walker can provide it
    pub stream: Option<Arc<dyn StreamSource>>,
    /// Names of the extended attributes, for `$EA` attributes
    pub ea_names: Vec<String>,
}

impl RecordAttribute {
    pub fn new(attr_type: AttributeType, name: impl Into<String>, instance: u16) -> Self {
        Self {
            attr_type,
            name: name.into(),
            instance,
            stream: None,
            ea_names: Vec::new(),
        }
    }

    /// `$DATA` attribute backed by `stream`
    pub fn data(name: impl Into<String>, instance: u16, stream: Arc<dyn StreamSource>) -> Self {
        Self {
            stream: Some(stream),
            ..Self::new(AttributeType::Data, name, instance)
        }
    }

    /// `$EA` attribute carrying the given extended attribute names
    pub fn extended_attributes(instance: u16, names: Vec<String>) -> Self {
        Self {
            ea_names: names,
            ..Self::new(AttributeType::Ea, "", instance)
        }
    }

    pub fn with_stream(mut self, stream: Arc<dyn StreamSource>) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn is_data(&self) -> bool {
        self.attr_type == AttributeType::Data
    }

    /// Content size, unknown when the walker provides no stream
    pub fn data_size(&self) -> Option<u64> {
        self.stream.as_ref().map(|s| s.len())
    }
}

/// A decoded MFT record
#[derive(Debug, Clone, Default)]
pub struct MftRecord {
    pub frn: FileReference,
    pub in_use: bool,
    pub is_directory: bool,
    /// Content lives in a WOF overlay stream
    pub is_overlay: bool,
    pub names: Vec<RecordName>,
    pub standard_information: Option<StandardInformation>,
    pub attributes: Vec<RecordAttribute>,
}

impl MftRecord {
    pub fn new(frn: FileReference) -> Self {
        Self {
            frn,
            in_use: true,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, file_name: FileNameAttribute, full_path: impl Into<String>) -> Self {
        self.names.push(RecordName::new(file_name, full_path));
        self
    }

    pub fn with_attribute(mut self, attribute: RecordAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// `$DATA` attributes with their position among the record's data
    /// attributes. That position keys the per-record caches.
    pub fn data_attributes(&self) -> impl Iterator<Item = (usize, &RecordAttribute)> {
        self.attributes.iter().filter(|a| a.is_data()).enumerate()
    }

    pub fn data_attribute(&self, index: usize) -> Option<&RecordAttribute> {
        self.data_attributes()
            .find(|(i, _)| *i == index)
            .map(|(_, attribute)| attribute)
    }

    /// Data attributes of `$BadClus` span the whole volume and are never read
    pub fn is_excluded_data(&self, attribute: &RecordAttribute) -> bool {
        self.frn.segment == BAD_CLUSTERS_SEGMENT
            && self.names.iter().any(|n| n.file_name.name == "$BadClus")
            && (attribute.name.is_empty() || attribute.name == BAD_CLUSTERS_STREAM)
    }

    /// On overlay files the WOF backing stream is only visible when asked for
    pub fn is_hidden_overlay_stream(&self, attribute: &RecordAttribute) -> bool {
        self.is_overlay && attribute.name.eq_ignore_ascii_case(WOF_COMPRESSED_STREAM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn memory_stream_opens_independent_cursors() {
        let stream = MemoryStream::new(b"abcdef".to_vec());
        let mut first = stream.open().unwrap();
        let mut buf = [0u8; 3];
        first.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");

        let mut second = stream.open().unwrap();
        second.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        assert_eq!(stream.len(), 6);
    }

    #[test]
    fn data_attribute_indices_skip_other_types() {
        let record = MftRecord::new(FileReference::new(40, 1))
            .with_attribute(RecordAttribute::extended_attributes(1, vec!["$KERNEL.PURGE".into()]))
            .with_attribute(RecordAttribute::data("", 2, Arc::new(MemoryStream::new(vec![0u8; 4]))))
            .with_attribute(RecordAttribute::data("zone", 3, Arc::new(MemoryStream::new(vec![1u8]))));

        let indices: Vec<(usize, &str)> = record
            .data_attributes()
            .map(|(i, a)| (i, a.name.as_str()))
            .collect();
        assert_eq!(indices, vec![(0, ""), (1, "zone")]);
        assert_eq!(record.data_attribute(1).and_then(|a| a.data_size()), Some(1));
    }

    #[test]
    fn bad_clusters_data_is_excluded() {
        let record = MftRecord::new(FileReference::new(BAD_CLUSTERS_SEGMENT, 8))
            .with_name(FileNameAttribute::named(FileReference::new(5, 5), "$BadClus"), "C:\\$BadClus");
        let bad = RecordAttribute::data("$Bad", 1, Arc::new(MemoryStream::new(Vec::new())));
        let other = RecordAttribute::data("other", 2, Arc::new(MemoryStream::new(Vec::new())));
        assert!(record.is_excluded_data(&bad));
        assert!(!record.is_excluded_data(&other));
    }
}
