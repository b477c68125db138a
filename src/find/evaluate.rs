//! Staged term evaluation
//!
//! A term is checked one criteria group at a time, cheapest group first,
//! and evaluation stops at the first required group that fails. Each group
//! has two stages: one against a record (inclusion) and one against an
//! already built [`Match`] (exclusion). Both sets live in tables keyed by
//! [`CriteriaGroup`] so the cost order is stated in one place.
//!
//! Stages narrow a [`Selection`]: the names and attributes that satisfied
//! every group so far. Content checks read streams lazily and share the
//! per-record digest and Yara caches.

use std::io::{self, Read};
use std::sync::Arc;

use memchr::memmem::Finder;

use super::cache::RecordScope;
use super::criteria::{Criteria, CriteriaGroup};
use super::hash::{hash_stream, AttributeHashes, HashAlgorithms};
use super::matches::{AttributeMatch, Match, NameMatch};
use super::term::SearchTerm;
use super::yara::YaraEngine;
use crate::logging;
use crate::ntfs::{FileReference, FilenameNamespace, Location, MftRecord, ReadSeek, RecordAttribute};

/// Chunk size for substring searches
pub const CONTAINS_CHUNK_SIZE: usize = 4 * 1024 * 1024;

// ============================================================================
// Record view
// ============================================================================

/// A record as seen from one location
pub struct RecordView<'r> {
    pub record: &'r MftRecord,
    /// Indices of the names inside the location
    pub in_location: Vec<usize>,
    /// Position among the `$DATA` attributes, per attribute
    data_index: Vec<Option<usize>>,
}

impl<'r> RecordView<'r> {
    pub fn new(record: &'r MftRecord, location: &Location) -> Self {
        let in_location = record
            .names
            .iter()
            .enumerate()
            .filter(|(_, name)| location.contains(&name.full_path))
            .map(|(i, _)| i)
            .collect();

        let mut next_data = 0;
        let data_index = record
            .attributes
            .iter()
            .map(|attribute| {
                attribute.is_data().then(|| {
                    next_data += 1;
                    next_data - 1
                })
            })
            .collect();

        Self {
            record,
            in_location,
            data_index,
        }
    }

    pub fn data_index(&self, attribute: usize) -> Option<usize> {
        self.data_index.get(attribute).copied().flatten()
    }

    /// Data attributes that may be read: `$BadClus` content never is
    fn readable_data(&self) -> impl Iterator<Item = usize> + '_ {
        self.record
            .attributes
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_data() && !self.record.is_excluded_data(a))
            .map(|(i, _)| i)
    }

    /// Name reported when a term matched without looking at names
    fn default_name(&self) -> Option<usize> {
        self.in_location
            .iter()
            .copied()
            .find(|&i| self.record.names[i].file_name.namespace != FilenameNamespace::Dos)
            .or_else(|| self.in_location.first().copied())
    }
}

/// Names and attributes that satisfied every group evaluated so far
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Name indices, `None` until a name or path group ran
    pub names: Option<Vec<usize>>,
    /// Attribute indices, `None` until an attribute group ran
    pub attributes: Option<Vec<usize>>,
    /// Yara hits per attribute index
    pub yara_rules: Vec<(usize, Vec<String>)>,
}

// ============================================================================
// Evaluator
// ============================================================================

/// Record stage: narrows the selection, false when the group fails
type RecordStage = fn(&mut Evaluator<'_>, &RecordView<'_>, &SearchTerm, &mut Selection) -> bool;

/// Match stage: true when the group is satisfied by the match
type MatchStage = fn(&mut Evaluator<'_>, &Match, Option<&MftRecord>, &SearchTerm) -> bool;

const RECORD_STAGES: [(CriteriaGroup, RecordStage); 5] = [
    (CriteriaGroup::Name, record_name),
    (CriteriaGroup::Path, record_path),
    (CriteriaGroup::DataNameOrSize, record_data_name_or_size),
    (CriteriaGroup::Attribute, record_attribute),
    (CriteriaGroup::Data, record_data),
];

const MATCH_STAGES: [(CriteriaGroup, MatchStage); 5] = [
    (CriteriaGroup::Name, match_name),
    (CriteriaGroup::Path, match_path),
    (CriteriaGroup::DataNameOrSize, match_data_name_or_size),
    (CriteriaGroup::Attribute, match_attribute),
    (CriteriaGroup::Data, match_data),
];

/// Evaluation state for the walk of one location
pub struct Evaluator<'a> {
    pub location: &'a Location,
    pub yara: &'a YaraEngine,
    /// Digests computed whenever an attribute gets hashed
    pub needed_hashes: HashAlgorithms,
    pub provide_stream: bool,
    pub scope: RecordScope,
    pub stream_errors: u64,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        location: &'a Location,
        yara: &'a YaraEngine,
        needed_hashes: HashAlgorithms,
        provide_stream: bool,
    ) -> Self {
        Self {
            location,
            yara,
            needed_hashes,
            provide_stream,
            scope: RecordScope::default(),
            stream_errors: 0,
        }
    }

    /// Run every required group of `term` against a record
    pub fn evaluate_record(&mut self, view: &RecordView<'_>, term: &SearchTerm) -> Option<Selection> {
        let required = term.required();
        let mut selection = Selection::default();
        for (group, stage) in RECORD_STAGES {
            if required.intersects(group.mask()) && !stage(self, view, term, &mut selection) {
                return None;
            }
        }
        Some(selection)
    }

    /// Run every required group of `term` against a built match
    pub fn evaluate_match(&mut self, m: &Match, record: Option<&MftRecord>, term: &SearchTerm) -> bool {
        let required = term.required();
        MATCH_STAGES
            .iter()
            .filter(|(group, _)| required.intersects(group.mask()))
            .all(|(_, stage)| stage(self, m, record, term))
    }

    /// Assemble the match for a satisfied term
    pub fn build_match(&mut self, view: &RecordView<'_>, term: &Arc<SearchTerm>, selection: Selection) -> Match {
        let record = view.record;
        let mut m = Match::new(record.frn, self.location.key(), term.clone());
        m.deleted = !record.in_use;
        m.standard_information = record.standard_information.clone();

        let names = match selection.names {
            Some(names) => names,
            None => view.default_name().into_iter().collect(),
        };
        for i in names {
            let name = &record.names[i];
            m.add_name(NameMatch {
                file_name: name.file_name.clone(),
                full_path: name.full_path.clone(),
            });
        }

        let attributes = match selection.attributes {
            Some(attributes) => attributes,
            None => record
                .attributes
                .iter()
                .position(|a| a.is_data() && a.name.is_empty())
                .into_iter()
                .collect(),
        };
        for i in attributes {
            let mut attribute =
                AttributeMatch::from_attribute(&record.attributes[i], view.data_index(i), self.provide_stream);
            if let Some((_, rules)) = selection.yara_rules.iter().find(|(at, _)| *at == i) {
                attribute.yara_rules = Some(rules.clone());
            }
            if let Some(index) = attribute.data_index {
                if let Ok(Some(hashes)) = self.scope.hashes.get(record.frn, index) {
                    attribute.hashes = hashes.clone();
                }
            }
            m.add_attribute(attribute);
        }

        m
    }

    /// Fill in the digests requested for reporting
    pub fn add_report_hashes(&mut self, m: &mut Match, record: &MftRecord, algorithms: HashAlgorithms) {
        if algorithms.is_empty() {
            return;
        }
        for attribute in m.attributes.iter_mut() {
            let Some(index) = attribute.data_index else {
                continue;
            };
            if attribute.hashes.covers(algorithms) {
                continue;
            }
            let Some(source) = record.data_attribute(index) else {
                continue;
            };
            if record.is_excluded_data(source) {
                continue;
            }
            if let Some(hashes) = self.hashes(record, index, source, algorithms, None) {
                attribute.hashes.merge(hashes);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Content access
    // ------------------------------------------------------------------------

    fn stream_failed(&mut self, frn: FileReference, attribute: &RecordAttribute, error: &io::Error) {
        self.stream_errors += 1;
        logging::warn(
            "FIND",
            &format!(
                "Failed to read {} stream '{}' of {}: {}",
                attribute.attr_type, attribute.name, frn, error
            ),
        );
    }

    fn open(&mut self, record: &MftRecord, attribute: &RecordAttribute) -> Option<(Box<dyn ReadSeek>, u64)> {
        let stream = attribute.stream.as_ref()?;
        match stream.open() {
            Ok(reader) => Some((reader, stream.len())),
            Err(e) => {
                self.stream_failed(record.frn, attribute, &e);
                None
            }
        }
    }

    /// Digests of a data attribute, covering at least `algorithms`. All
    /// digests the run needs are computed in the same pass and cached.
    fn hashes(
        &mut self,
        record: &MftRecord,
        data_index: usize,
        attribute: &RecordAttribute,
        algorithms: HashAlgorithms,
        term: Option<&SearchTerm>,
    ) -> Option<AttributeHashes> {
        let frn = record.frn;
        match self.scope.hashes.get(frn, data_index) {
            Ok(Some(cached)) if cached.covers(algorithms) => return Some(cached.clone()),
            Ok(_) => {}
            Err(e) => {
                logging::error("HASH", &e.to_string());
                return None;
            }
        }

        let missing = match self.scope.hashes.get(frn, data_index) {
            Ok(Some(cached)) => (self.needed_hashes | algorithms).difference(cached.algorithms()),
            _ => self.needed_hashes | algorithms,
        };

        let (reader, _) = self.open(record, attribute)?;
        let (hashes, read) = match hash_stream(reader, missing) {
            Ok(result) => result,
            Err(e) => {
                self.stream_failed(frn, attribute, &e);
                return None;
            }
        };
        if let Some(term) = term {
            term.stats().add_bytes_read(read);
        }

        match self.scope.hashes.get_mut(frn, data_index) {
            Ok(Some(cached)) => {
                cached.merge(hashes);
                Some(cached.clone())
            }
            Ok(None) => self
                .scope
                .hashes
                .insert(frn, data_index, hashes)
                .ok()
                .map(|cached| cached.clone()),
            Err(e) => {
                logging::error("HASH", &e.to_string());
                None
            }
        }
    }

    /// Yara rules matched by a data attribute, scanned at most once per
    /// record. `None` when the scan failed.
    fn yara_rules(
        &mut self,
        record: &MftRecord,
        data_index: usize,
        attribute: &RecordAttribute,
        term: &SearchTerm,
    ) -> Option<Vec<String>> {
        match self.scope.yara.get(record.frn, data_index) {
            Ok(Some(cached)) => return cached.clone(),
            Ok(None) => {}
            Err(e) => {
                logging::error("YARA", &e.to_string());
                return None;
            }
        }

        let result = match self.open(record, attribute) {
            Some((mut reader, _)) => match self.yara.scan_stream(&mut reader) {
                Ok((rules, read)) => {
                    term.stats().add_bytes_read(read);
                    Some(rules)
                }
                Err(e) => {
                    self.stream_errors += 1;
                    logging::warn(
                        "YARA",
                        &format!("Scan of '{}' in {} failed: {}", attribute.name, record.frn, e),
                    );
                    None
                }
            },
            None => None,
        };

        match self.scope.yara.insert(record.frn, data_index, result) {
            Ok(cached) => cached.clone(),
            Err(e) => {
                logging::error("YARA", &e.to_string());
                None
            }
        }
    }

    /// Content checks of one data attribute, cheapest first. On success
    /// returns the Yara rules that matched, if the term asked for Yara.
    fn data_matches(
        &mut self,
        record: &MftRecord,
        data_index: usize,
        attribute: &RecordAttribute,
        term: &SearchTerm,
    ) -> Option<Option<Vec<String>>> {
        let required = term.required();

        if let Some(header) = term.header() {
            let (reader, _) = self.open(record, attribute)?;
            let mut buffer = Vec::with_capacity(header.len);
            if let Err(e) = reader.take(header.len as u64).read_to_end(&mut buffer) {
                self.stream_failed(record.frn, attribute, &e);
                return None;
            }
            term.stats().add_bytes_read(buffer.len() as u64);

            if !header.bytes.is_empty() && !buffer.starts_with(&header.bytes) {
                return None;
            }
            if let Some(regex) = &header.regex {
                if !regex.is_match(&buffer) {
                    return None;
                }
            }
        }

        if required.intersects(Criteria::HASH_MASK) {
            let algorithms = HashAlgorithms::from_criteria(required);
            let hashes = self.hashes(record, data_index, attribute, algorithms, Some(term))?;
            let equal = term.md5().map_or(true, |md5| hashes.md5.as_ref() == Some(md5))
                && term.sha1().map_or(true, |sha1| hashes.sha1.as_ref() == Some(sha1))
                && term.sha256().map_or(true, |sha256| hashes.sha256.as_ref() == Some(sha256));
            if !equal {
                return None;
            }
        }

        if let Some(contains) = term.contains() {
            let (reader, _) = self.open(record, attribute)?;
            match stream_contains(reader, contains.finder(), CONTAINS_CHUNK_SIZE) {
                Ok((found, read)) => {
                    term.stats().add_bytes_read(read);
                    if !found {
                        return None;
                    }
                }
                Err(e) => {
                    self.stream_failed(record.frn, attribute, &e);
                    return None;
                }
            }
        }

        if required.contains(Criteria::YARA) {
            let rules = self.yara_rules(record, data_index, attribute, term)?;
            let accepted: Vec<String> = rules
                .into_iter()
                .filter(|rule| term.accepts_rule(rule))
                .collect();
            if accepted.is_empty() {
                return None;
            }
            return Some(Some(accepted));
        }

        Some(None)
    }
}

/// Search a stream for a needle in chunks, carrying the tail of each chunk
/// so that occurrences across chunk boundaries are found. Returns whether
/// the needle was found and the number of bytes read.
pub fn stream_contains<R: Read>(mut reader: R, finder: &Finder<'_>, chunk_size: usize) -> io::Result<(bool, u64)> {
    let carry_len = finder.needle().len().saturating_sub(1);
    let mut buffer = vec![0u8; chunk_size.max(1) + carry_len];
    let mut carried = 0;
    let mut total = 0u64;

    loop {
        let read = match reader.read(&mut buffer[carried..]) {
            Ok(0) => return Ok((false, total)),
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        total += read as u64;

        let window = carried + read;
        if finder.find(&buffer[..window]).is_some() {
            return Ok((true, total));
        }

        carried = carry_len.min(window);
        buffer.copy_within(window - carried..window, 0);
    }
}

// ============================================================================
// Record stages
// ============================================================================

fn narrow_names(view: &RecordView<'_>, selection: &mut Selection, keep: impl Fn(usize) -> bool) -> bool {
    let names: Vec<usize> = selection
        .names
        .take()
        .unwrap_or_else(|| view.in_location.clone())
        .into_iter()
        .filter(|&i| keep(i))
        .collect();
    let satisfied = !names.is_empty();
    selection.names = Some(names);
    satisfied
}

fn record_name(_: &mut Evaluator<'_>, view: &RecordView<'_>, term: &SearchTerm, selection: &mut Selection) -> bool {
    let Some(pattern) = term.file_name() else {
        return false;
    };
    let satisfied = narrow_names(view, selection, |i| {
        pattern.is_match(&view.record.names[i].file_name.name)
    });
    if let Some(first) = view.record.names.first() {
        logging::trace_record("FIND", &first.file_name.name, &format!("name stage of '{}': {}", term, satisfied));
    }
    satisfied
}

fn record_path(_: &mut Evaluator<'_>, view: &RecordView<'_>, term: &SearchTerm, selection: &mut Selection) -> bool {
    let Some(pattern) = term.path() else {
        return false;
    };
    narrow_names(view, selection, |i| {
        pattern.is_path_match(&view.record.names[i].full_path)
    })
}

/// ADS name and size checks of one data attribute
fn data_name_or_size_matches(term: &SearchTerm, record: &MftRecord, attribute: &RecordAttribute, size: Option<u64>) -> bool {
    let required = term.required();

    if required.intersects(Criteria::ADS_MASK) {
        match term.ads_name() {
            Some(pattern) if !attribute.name.is_empty() && pattern.is_match(&attribute.name) => {}
            _ => return false,
        }
    } else if record.is_hidden_overlay_stream(attribute) {
        return false;
    }

    if required.intersects(Criteria::SIZE_MASK) {
        match size {
            Some(size) if term.size_matches(size) => {}
            _ => return false,
        }
    }
    true
}

fn record_data_name_or_size(
    _: &mut Evaluator<'_>,
    view: &RecordView<'_>,
    term: &SearchTerm,
    selection: &mut Selection,
) -> bool {
    let record = view.record;
    let attributes: Vec<usize> = view
        .readable_data()
        .filter(|&i| {
            let attribute = &record.attributes[i];
            data_name_or_size_matches(term, record, attribute, attribute.data_size())
        })
        .collect();
    let satisfied = !attributes.is_empty();
    selection.attributes = Some(attributes);
    satisfied
}

/// Attribute type and attribute name checks of one attribute
fn attribute_matches(term: &SearchTerm, attr_type: crate::ntfs::AttributeType, name: &str) -> bool {
    if let Some(expected) = term.attr_type() {
        if attr_type != expected {
            return false;
        }
    }
    if term.required().intersects(Criteria::ATTR_NAME_MASK) {
        match term.attr_name() {
            Some(pattern) if pattern.is_match(name) => {}
            _ => return false,
        }
    }
    true
}

fn ea_matches(term: &SearchTerm, ea_names: &[String]) -> bool {
    term.ea_name()
        .is_some_and(|pattern| ea_names.iter().any(|ea| pattern.is_match(ea)))
}

/// EA names belong to the record, so they are checked against every `$EA`
/// attribute. Type and name criteria narrow the selected attributes.
fn record_attribute(_: &mut Evaluator<'_>, view: &RecordView<'_>, term: &SearchTerm, selection: &mut Selection) -> bool {
    let record = view.record;
    let required = term.required();

    let mut ea_hits = Vec::new();
    if required.intersects(Criteria::EA_MASK) {
        ea_hits = (0..record.attributes.len())
            .filter(|&i| ea_matches(term, &record.attributes[i].ea_names))
            .collect();
        if ea_hits.is_empty() {
            return false;
        }
    }

    if required.intersects(Criteria::ATTR_TYPE | Criteria::ATTR_NAME_MASK) {
        let candidates = selection
            .attributes
            .take()
            .unwrap_or_else(|| (0..record.attributes.len()).collect());
        let attributes: Vec<usize> = candidates
            .into_iter()
            .filter(|&i| attribute_matches(term, record.attributes[i].attr_type, &record.attributes[i].name))
            .collect();
        let satisfied = !attributes.is_empty();
        selection.attributes = Some(attributes);
        return satisfied;
    }

    if selection.attributes.is_none() && !required.intersects(Criteria::DATA_MASK) {
        selection.attributes = Some(ea_hits);
    }
    true
}

fn record_data(evaluator: &mut Evaluator<'_>, view: &RecordView<'_>, term: &SearchTerm, selection: &mut Selection) -> bool {
    let record = view.record;
    let candidates: Vec<usize> = match selection.attributes.take() {
        Some(attributes) => attributes
            .into_iter()
            .filter(|&i| record.attributes[i].is_data() && !record.is_excluded_data(&record.attributes[i]))
            .collect(),
        None => view
            .readable_data()
            .filter(|&i| !record.is_hidden_overlay_stream(&record.attributes[i]))
            .collect(),
    };

    let mut attributes = Vec::new();
    for i in candidates {
        let Some(data_index) = view.data_index(i) else {
            continue;
        };
        if let Some(rules) = evaluator.data_matches(record, data_index, &record.attributes[i], term) {
            if let Some(rules) = rules {
                selection.yara_rules.push((i, rules));
            }
            attributes.push(i);
        }
    }

    let satisfied = !attributes.is_empty();
    selection.attributes = Some(attributes);
    satisfied
}

// ============================================================================
// Match stages (exclusion)
// ============================================================================

fn match_name(_: &mut Evaluator<'_>, m: &Match, _: Option<&MftRecord>, term: &SearchTerm) -> bool {
    term.file_name()
        .is_some_and(|pattern| m.names.iter().any(|n| pattern.is_match(&n.file_name.name)))
}

fn match_path(_: &mut Evaluator<'_>, m: &Match, _: Option<&MftRecord>, term: &SearchTerm) -> bool {
    term.path()
        .is_some_and(|pattern| m.names.iter().any(|n| pattern.is_path_match(&n.full_path)))
}

fn match_data_name_or_size(_: &mut Evaluator<'_>, m: &Match, record: Option<&MftRecord>, term: &SearchTerm) -> bool {
    m.attributes.iter().filter(|a| a.is_data()).any(|a| {
        let source = a.data_index.and_then(|i| record.and_then(|r| r.data_attribute(i)));
        match (record, source) {
            (Some(record), Some(source)) => data_name_or_size_matches(term, record, source, Some(a.data_size)),
            _ => {
                let required = term.required();
                let ads = !required.intersects(Criteria::ADS_MASK)
                    || term.ads_name().is_some_and(|p| !a.name.is_empty() && p.is_match(&a.name));
                let size = !required.intersects(Criteria::SIZE_MASK) || term.size_matches(a.data_size);
                ads && size
            }
        }
    })
}

fn match_attribute(_: &mut Evaluator<'_>, m: &Match, record: Option<&MftRecord>, term: &SearchTerm) -> bool {
    let required = term.required();

    if required.intersects(Criteria::EA_MASK) {
        let in_match = m.attributes.iter().any(|a| ea_matches(term, &a.ea_names));
        let in_record = record.is_some_and(|r| r.attributes.iter().any(|a| ea_matches(term, &a.ea_names)));
        if !in_match && !in_record {
            return false;
        }
    }

    !required.intersects(Criteria::ATTR_TYPE | Criteria::ATTR_NAME_MASK)
        || m.attributes
            .iter()
            .any(|a| attribute_matches(term, a.attr_type, &a.name))
}

fn match_data(evaluator: &mut Evaluator<'_>, m: &Match, record: Option<&MftRecord>, term: &SearchTerm) -> bool {
    let Some(record) = record else {
        return false;
    };
    m.attributes
        .iter()
        .filter_map(|a| a.data_index)
        .any(|data_index| match record.data_attribute(data_index) {
            Some(attribute) if !record.is_excluded_data(attribute) => evaluator
                .data_matches(record, data_index, attribute, term)
                .is_some(),
            _ => false,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    #[rstest]
    #[case(b"hello world".to_vec(), "world", 4, true)]
    #[case(b"hello world".to_vec(), "o w", 5, true)]
    #[case(b"hello world".to_vec(), "lo wo", 4, true)]
    #[case(b"hello world".to_vec(), "word", 3, false)]
    #[case(Vec::new(), "x", 16, false)]
    #[case(b"abc".to_vec(), "abc", 1, true)]
    fn contains_across_chunks(
        #[case] data: Vec<u8>,
        #[case] needle: &str,
        #[case] chunk: usize,
        #[case] expected: bool,
    ) {
        let finder = Finder::new(needle.as_bytes());
        let (found, _) = stream_contains(Cursor::new(data), &finder, chunk).unwrap();
        assert_eq!(found, expected);
    }

    #[test]
    fn contains_reports_bytes_read() {
        let finder = Finder::new(b"zz");
        let (found, read) = stream_contains(Cursor::new(vec![b'a'; 1000]), &finder, 64).unwrap();
        assert!(!found);
        assert_eq!(read, 1000);
    }
}
