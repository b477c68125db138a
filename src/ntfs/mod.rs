//! NTFS record model and walking interface
//!
//! - On-disk structures the engine decodes itself (`$FILE_NAME`, `$I30`
//!   index entries, `$STANDARD_INFORMATION`)
//! - Decoded records with lazily opened attribute streams
//! - The walker trait and an in-memory walker

pub mod record;
pub mod structs;
pub mod walker;

// Re-export commonly used types
pub use record::{
    FileStream, MemoryStream, MftRecord, ReadSeek, RecordAttribute, RecordName, StreamSource,
};
pub use structs::{
    AttributeType, FileNameAttribute, FileReference, FilenameNamespace, StandardInformation,
};
pub use walker::{
    IndexEntry, Location, LocationSet, MemoryWalker, MftWalker, RecordVisitor, ShadowPolicy,
    WalkOptions, WalkStats,
};
