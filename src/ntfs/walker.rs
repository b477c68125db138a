//! Record walking interface
//!
//! A walker enumerates the MFT records of one location and hands them to a
//! [`RecordVisitor`]. In `$I30` mode it also hands over directory index
//! entries, including entries carved from index slack when recovering
//! deleted items. Visitors stop a walk by returning `ControlFlow::Break`.

use std::collections::HashMap;
use std::ops::ControlFlow;

use serde::Deserialize;

use super::record::MftRecord;
use super::structs::{parse_index_entries, FileNameAttribute, FileReference};
use crate::error::{FindError, Result};

/// Strip a leading `X:` drive prefix
pub fn strip_drive(path: &str) -> &str {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        &path[2..]
    } else {
        path
    }
}

// ============================================================================
// Locations
// ============================================================================

/// Which volume views a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowPolicy {
    /// Live volumes only
    #[default]
    LiveOnly,
    /// Live volumes and their shadow copies
    WithShadows,
    /// Shadow copies only
    ShadowsOnly,
}

impl ShadowPolicy {
    /// Resolve the tri-state configuration value: unset means live only
    pub fn resolve(include_shadows: Option<bool>, shadows_only: bool) -> Self {
        match (include_shadows, shadows_only) {
            (_, true) => Self::ShadowsOnly,
            (Some(true), false) => Self::WithShadows,
            (Some(false) | None, false) => Self::LiveOnly,
        }
    }

    pub fn accepts(self, location: &Location) -> bool {
        match self {
            Self::LiveOnly => location.snapshot.is_none(),
            Self::WithShadows => true,
            Self::ShadowsOnly => location.snapshot.is_some(),
        }
    }
}

/// One place to walk: a volume (or one of its snapshots), optionally
/// restricted to a subdirectory
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Location {
    /// Volume name, e.g. `C:`
    pub volume: String,
    /// Shadow copy identifier
    #[serde(default)]
    pub snapshot: Option<String>,
    /// Only names under this directory are in the location
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default = "default_parse")]
    pub parse: bool,
}

fn default_parse() -> bool {
    true
}

impl Location {
    pub fn volume(volume: impl Into<String>) -> Self {
        Self {
            volume: volume.into(),
            snapshot: None,
            root: None,
            parse: true,
        }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn with_snapshot(mut self, snapshot: impl Into<String>) -> Self {
        self.snapshot = Some(snapshot.into());
        self
    }

    /// Key identifying the walked view
    pub fn key(&self) -> String {
        match &self.snapshot {
            Some(snapshot) => format!("{}@{}", self.volume, snapshot),
            None => self.volume.clone(),
        }
    }

    /// Is `path` under this location's root?
    pub fn contains(&self, path: &str) -> bool {
        let Some(root) = &self.root else {
            return true;
        };
        let root = strip_drive(root).trim_end_matches('\\');
        if root.is_empty() {
            return true;
        }

        let path = strip_drive(path);
        match path.get(..root.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(root) => {
                path.len() == root.len() || path.as_bytes()[root.len()] == b'\\'
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())?;
        if let Some(root) = &self.root {
            write!(f, " ({})", root)?;
        }
        Ok(())
    }
}

/// The locations of a run with the shadow policy already resolved
#[derive(Debug, Clone, Default)]
pub struct LocationSet {
    pub locations: Vec<Location>,
    pub shadows: ShadowPolicy,
}

impl LocationSet {
    pub fn new(locations: Vec<Location>, shadows: ShadowPolicy) -> Self {
        Self { locations, shadows }
    }

    /// Locations to walk, in declaration order
    pub fn selected(&self) -> impl Iterator<Item = &Location> {
        self.locations
            .iter()
            .filter(|location| location.parse && self.shadows.accepts(location))
    }
}

// ============================================================================
// Walking
// ============================================================================

/// A `$I30` directory index entry
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub frn: FileReference,
    pub file_name: FileNameAttribute,
    /// Full path of the entry, built from the indexing directory's path
    pub full_path: String,
    /// Recovered from index slack rather than live entries
    pub carved: bool,
}

impl IndexEntry {
    /// Decode the entries of one `$I30` index node of `directory`
    pub fn from_index_node(directory: &str, node: &[u8], carved: bool) -> Vec<IndexEntry> {
        let directory = directory.trim_end_matches('\\');
        parse_index_entries(node)
            .into_iter()
            .map(|(frn, file_name)| IndexEntry {
                frn,
                full_path: format!("{}\\{}", directory, file_name.name),
                file_name,
                carved,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WalkOptions {
    /// Deliver `$I30` index entries
    pub parse_i30: bool,
    /// Deliver records not in use and carved index entries
    pub recovery: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub records: u64,
    pub index_entries: u64,
}

/// Receives what a walker enumerates
pub trait RecordVisitor {
    fn visit_record(&mut self, record: &MftRecord) -> ControlFlow<()>;

    fn visit_index_entry(&mut self, _entry: &IndexEntry) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

/// Enumerates MFT records of a location
pub trait MftWalker {
    fn walk(
        &mut self,
        location: &Location,
        options: &WalkOptions,
        visitor: &mut dyn RecordVisitor,
    ) -> Result<WalkStats>;
}

/// Records and index entries of one volume view
#[derive(Debug, Default, Clone)]
pub struct MemoryVolume {
    pub records: Vec<MftRecord>,
    pub index_entries: Vec<IndexEntry>,
}

/// Walker over records held in memory, keyed by [`Location::key`]
#[derive(Debug, Default, Clone)]
pub struct MemoryWalker {
    volumes: HashMap<String, MemoryVolume>,
}

impl MemoryWalker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&mut self, location: &Location, record: MftRecord) {
        self.volumes
            .entry(location.key())
            .or_default()
            .records
            .push(record);
    }

    pub fn add_index_entry(&mut self, location: &Location, entry: IndexEntry) {
        self.volumes
            .entry(location.key())
            .or_default()
            .index_entries
            .push(entry);
    }

    /// Add every entry of a raw `$I30` index node
    pub fn add_index_node(&mut self, location: &Location, directory: &str, node: &[u8], carved: bool) -> usize {
        let entries = IndexEntry::from_index_node(directory, node, carved);
        let count = entries.len();
        self.volumes
            .entry(location.key())
            .or_default()
            .index_entries
            .extend(entries);
        count
    }
}

impl MftWalker for MemoryWalker {
    fn walk(
        &mut self,
        location: &Location,
        options: &WalkOptions,
        visitor: &mut dyn RecordVisitor,
    ) -> Result<WalkStats> {
        let volume = self
            .volumes
            .get(&location.key())
            .ok_or_else(|| FindError::Walk(location.to_string(), "volume not found".into()))?;

        let mut stats = WalkStats::default();

        for record in volume.records.iter().filter(|r| r.in_use || options.recovery) {
            stats.records += 1;
            if visitor.visit_record(record).is_break() {
                return Ok(stats);
            }
        }

        if options.parse_i30 {
            for entry in volume
                .index_entries
                .iter()
                .filter(|e| !e.carved || options.recovery)
            {
                stats.index_entries += 1;
                if visitor.visit_index_entry(entry).is_break() {
                    break;
                }
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, "C:\\anything\\at\\all", true)]
    #[case(Some("C:\\Windows"), "C:\\Windows\\System32\\cmd.exe", true)]
    #[case(Some("\\windows\\"), "C:\\WINDOWS\\notepad.exe", true)]
    #[case(Some("C:\\Windows"), "C:\\Windows", true)]
    #[case(Some("C:\\Windows"), "C:\\WindowsApps\\app.exe", false)]
    #[case(Some("C:\\Windows"), "C:\\Users\\a.txt", false)]
    fn location_contains(#[case] root: Option<&str>, #[case] path: &str, #[case] expected: bool) {
        let mut location = Location::volume("C:");
        location.root = root.map(str::to_string);
        assert_eq!(location.contains(path), expected);
    }

    #[rstest]
    #[case(None, false, ShadowPolicy::LiveOnly)]
    #[case(Some(false), false, ShadowPolicy::LiveOnly)]
    #[case(Some(true), false, ShadowPolicy::WithShadows)]
    #[case(None, true, ShadowPolicy::ShadowsOnly)]
    fn shadow_policy_resolution(
        #[case] include: Option<bool>,
        #[case] only: bool,
        #[case] expected: ShadowPolicy,
    ) {
        assert_eq!(ShadowPolicy::resolve(include, only), expected);
    }

    #[test]
    fn location_set_filters_snapshots() {
        let live = Location::volume("C:");
        let shadow = Location::volume("C:").with_snapshot("{1234}");
        let mut skipped = Location::volume("D:");
        skipped.parse = false;

        let set = LocationSet::new(vec![live.clone(), shadow.clone(), skipped], ShadowPolicy::LiveOnly);
        assert_eq!(set.selected().collect::<Vec<_>>(), vec![&live]);

        let set = LocationSet::new(vec![live.clone(), shadow.clone()], ShadowPolicy::ShadowsOnly);
        assert_eq!(set.selected().collect::<Vec<_>>(), vec![&shadow]);
    }

    struct CountingVisitor {
        records: usize,
        entries: usize,
        stop_after: usize,
    }

    impl RecordVisitor for CountingVisitor {
        fn visit_record(&mut self, _record: &MftRecord) -> ControlFlow<()> {
            self.records += 1;
            if self.records >= self.stop_after {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }

        fn visit_index_entry(&mut self, _entry: &IndexEntry) -> ControlFlow<()> {
            self.entries += 1;
            ControlFlow::Continue(())
        }
    }

    #[test]
    fn memory_walker_honours_recovery_and_stop() {
        let location = Location::volume("C:");
        let mut walker = MemoryWalker::new();
        for segment in 0..4 {
            let mut record = MftRecord::new(FileReference::new(segment, 1));
            record.in_use = segment != 2;
            walker.add_record(&location, record);
        }
        walker.add_index_entry(
            &location,
            IndexEntry {
                frn: FileReference::new(9, 1),
                file_name: FileNameAttribute::named(FileReference::new(5, 5), "gone.txt"),
                full_path: "C:\\gone.txt".into(),
                carved: true,
            },
        );

        let mut visitor = CountingVisitor { records: 0, entries: 0, stop_after: usize::MAX };
        let options = WalkOptions { parse_i30: true, recovery: false };
        walker.walk(&location, &options, &mut visitor).unwrap();
        assert_eq!((visitor.records, visitor.entries), (3, 0));

        let mut visitor = CountingVisitor { records: 0, entries: 0, stop_after: usize::MAX };
        let options = WalkOptions { parse_i30: true, recovery: true };
        walker.walk(&location, &options, &mut visitor).unwrap();
        assert_eq!((visitor.records, visitor.entries), (4, 1));

        let mut visitor = CountingVisitor { records: 0, entries: 0, stop_after: 2 };
        let stats = walker.walk(&location, &options, &mut visitor).unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(visitor.entries, 0);
    }

    fn raw_entry(frn: u64, name: &str) -> Vec<u8> {
        let utf16: Vec<u16> = name.encode_utf16().collect();
        let mut key = vec![0u8; 64];
        key[..8].copy_from_slice(&0x0005_0000_0000_0005u64.to_le_bytes());
        key.push(utf16.len() as u8);
        key.push(1);
        for unit in utf16 {
            key.extend_from_slice(&unit.to_le_bytes());
        }

        let length = (16 + key.len() + 7) & !7;
        let mut entry = Vec::new();
        entry.extend_from_slice(&frn.to_le_bytes());
        entry.extend_from_slice(&(length as u16).to_le_bytes());
        entry.extend_from_slice(&(key.len() as u16).to_le_bytes());
        entry.extend_from_slice(&[0u8; 4]);
        entry.extend_from_slice(&key);
        entry.resize(length, 0);
        entry
    }

    #[test]
    fn index_nodes_are_decoded_with_paths() {
        let mut node = raw_entry(0x0003_0000_0000_0050, "notes.txt");
        node.extend(raw_entry(0x0001_0000_0000_0051, "dropper.exe"));

        let location = Location::volume("C:");
        let mut walker = MemoryWalker::new();
        assert_eq!(walker.add_index_node(&location, "C:\\Temp\\", &node, true), 2);

        let entries = IndexEntry::from_index_node("C:\\Temp", &node, false);
        assert_eq!(entries[1].full_path, "C:\\Temp\\dropper.exe");
        assert_eq!(entries[1].frn, FileReference::new(0x51, 1));
        assert!(!entries[0].carved);
    }

    #[test]
    fn unknown_volume_fails() {
        let mut walker = MemoryWalker::new();
        let mut visitor = CountingVisitor { records: 0, entries: 0, stop_after: 1 };
        let err = walker
            .walk(&Location::volume("Z:"), &WalkOptions::default(), &mut visitor)
            .unwrap_err();
        assert!(matches!(err, FindError::Walk(_, _)));
    }
}
