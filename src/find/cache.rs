//! Per-record caches
//!
//! Work done on a data attribute (Yara scans, digests) is kept for as long
//! as the engine stays on the same record, so several terms asking about the
//! same attribute share one read. Entries are keyed by the attribute's
//! position among the record's `$DATA` attributes and dropped as soon as
//! the engine moves to another FRN.

use std::collections::HashMap;

use super::hash::AttributeHashes;
use crate::error::{FindError, Result};
use crate::ntfs::FileReference;

/// Results keyed by data attribute index, valid for one FRN
#[derive(Debug)]
pub struct RecordCache<T> {
    frn: Option<FileReference>,
    entries: HashMap<usize, T>,
}

impl<T> Default for RecordCache<T> {
    fn default() -> Self {
        Self {
            frn: None,
            entries: HashMap::new(),
        }
    }
}

impl<T> RecordCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope the cache to `frn`, dropping entries of any other record
    pub fn scope(&mut self, frn: FileReference) {
        if self.frn != Some(frn) {
            self.entries.clear();
            self.frn = Some(frn);
        }
    }

    pub fn frn(&self) -> Option<FileReference> {
        self.frn
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check(&self, frn: FileReference) -> Result<()> {
        match self.frn {
            Some(scoped) if scoped == frn => Ok(()),
            scoped => Err(FindError::CacheInvariantViolation {
                scoped: scoped.map(|f| f.to_string()).unwrap_or_else(|| "no record".into()),
                requested: frn.to_string(),
            }),
        }
    }

    pub fn get(&self, frn: FileReference, index: usize) -> Result<Option<&T>> {
        self.check(frn)?;
        Ok(self.entries.get(&index))
    }

    pub fn get_mut(&mut self, frn: FileReference, index: usize) -> Result<Option<&mut T>> {
        self.check(frn)?;
        Ok(self.entries.get_mut(&index))
    }

    pub fn insert(&mut self, frn: FileReference, index: usize, value: T) -> Result<&mut T> {
        self.check(frn)?;
        let slot = self.entries.entry(index).or_insert(value);
        Ok(slot)
    }

    /// Cached value for `index`, computing it on first request
    pub fn get_or_insert_with(
        &mut self,
        frn: FileReference,
        index: usize,
        compute: impl FnOnce() -> T,
    ) -> Result<&T> {
        self.check(frn)?;
        Ok(self.entries.entry(index).or_insert_with(compute))
    }
}

/// Yara rule matches per data attribute. `None` records a failed scan.
pub type YaraMatchCache = RecordCache<Option<Vec<String>>>;

/// Digests per data attribute
pub type HashCache = RecordCache<AttributeHashes>;

/// Everything the engine caches while it stays on one record
#[derive(Debug, Default)]
pub struct RecordScope {
    pub yara: YaraMatchCache,
    pub hashes: HashCache,
}

impl RecordScope {
    pub fn enter(&mut self, frn: FileReference) {
        self.yara.scope(frn);
        self.hashes.scope(frn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_once_per_attribute() {
        let frn = FileReference::new(42, 1);
        let mut cache = YaraMatchCache::new();
        cache.scope(frn);

        let mut scans = 0;
        for _ in 0..3 {
            let hits = cache
                .get_or_insert_with(frn, 0, || {
                    scans += 1;
                    Some(vec!["apt_backdoor".to_string()])
                })
                .unwrap();
            assert_eq!(hits.as_deref(), Some(&["apt_backdoor".to_string()][..]));
        }
        assert_eq!(scans, 1);

        cache.get_or_insert_with(frn, 1, || None).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn resets_when_the_record_changes() {
        let first = FileReference::new(42, 1);
        let second = FileReference::new(43, 1);
        let mut cache = YaraMatchCache::new();

        cache.scope(first);
        cache.get_or_insert_with(first, 0, || None).unwrap();
        cache.scope(first);
        assert_eq!(cache.len(), 1);

        cache.scope(second);
        assert!(cache.is_empty());
        assert_eq!(cache.frn(), Some(second));
    }

    #[test]
    fn queries_for_another_record_are_rejected() {
        let mut cache = HashCache::new();
        let err = cache.get(FileReference::new(1, 1), 0).unwrap_err();
        assert!(matches!(err, FindError::CacheInvariantViolation { .. }));

        cache.scope(FileReference::new(1, 1));
        assert!(cache.get(FileReference::new(1, 2), 0).is_err());
        assert!(cache.get(FileReference::new(1, 1), 0).unwrap().is_none());
    }
}
