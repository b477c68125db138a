//! Match model
//!
//! A [`Match`] is the result for one (file, term) pair. It lists the names
//! under which the file matched (hard links show up as several names) and
//! the attributes that satisfied the term, with their digests and Yara hits.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::hash::AttributeHashes;
use super::term::SearchTerm;
use crate::ntfs::structs::filetime_to_datetime;
use crate::ntfs::{
    AttributeType, FileNameAttribute, FileReference, RecordAttribute, StandardInformation,
    StreamSource,
};

/// A name under which the matched file is reachable
#[derive(Debug, Clone)]
pub struct NameMatch {
    pub file_name: FileNameAttribute,
    pub full_path: String,
}

/// An attribute of the matched file
#[derive(Debug, Clone)]
pub struct AttributeMatch {
    pub attr_type: AttributeType,
    pub name: String,
    pub instance: u16,
    pub data_size: u64,
    /// Position among the record's `$DATA` attributes
    pub data_index: Option<usize>,
    /// Content, kept when the engine is configured to provide streams
    pub stream: Option<Arc<dyn StreamSource>>,
    pub hashes: AttributeHashes,
    /// Yara rules the content matched
    pub yara_rules: Option<Vec<String>>,
    pub ea_names: Vec<String>,
}

impl AttributeMatch {
    pub fn from_attribute(
        attribute: &RecordAttribute,
        data_index: Option<usize>,
        provide_stream: bool,
    ) -> Self {
        Self {
            attr_type: attribute.attr_type,
            name: attribute.name.clone(),
            instance: attribute.instance,
            data_size: attribute.data_size().unwrap_or_default(),
            data_index,
            stream: if provide_stream {
                attribute.stream.clone()
            } else {
                None
            },
            hashes: AttributeHashes::default(),
            yara_rules: None,
            ea_names: attribute.ea_names.clone(),
        }
    }

    pub fn is_data(&self) -> bool {
        self.attr_type == AttributeType::Data
    }

    /// Same attribute of the same record
    pub fn same_attribute(&self, other: &AttributeMatch) -> bool {
        self.attr_type == other.attr_type
            && self.instance == other.instance
            && self.name == other.name
    }
}

/// One match of a term against a file
#[derive(Debug, Clone)]
pub struct Match {
    pub frn: FileReference,
    /// Key of the walked location, e.g. `C:` or `C:@{snapshot}`
    pub volume: String,
    /// Record not in use or index entry carved from slack
    pub deleted: bool,
    /// Produced from a `$I30` index entry rather than an MFT record
    pub from_index: bool,
    pub term: Arc<SearchTerm>,
    pub names: Vec<NameMatch>,
    pub attributes: Vec<AttributeMatch>,
    pub standard_information: Option<StandardInformation>,
}

impl Match {
    pub fn new(frn: FileReference, volume: impl Into<String>, term: Arc<SearchTerm>) -> Self {
        Self {
            frn,
            volume: volume.into(),
            deleted: false,
            from_index: false,
            term,
            names: Vec::new(),
            attributes: Vec::new(),
            standard_information: None,
        }
    }

    /// Add a name, ignoring a path already present
    pub fn add_name(&mut self, name: NameMatch) {
        let known = self
            .names
            .iter()
            .any(|n| n.full_path.eq_ignore_ascii_case(&name.full_path));
        if !known {
            self.names.push(name);
        }
    }

    /// Add an attribute. When it is already present, its Yara hits are
    /// merged into the existing entry.
    pub fn add_attribute(&mut self, attribute: AttributeMatch) {
        match self.attributes.iter_mut().find(|a| a.same_attribute(&attribute)) {
            Some(existing) => {
                if let Some(rules) = attribute.yara_rules {
                    let merged = existing.yara_rules.get_or_insert_with(Vec::new);
                    for rule in rules {
                        if !merged.contains(&rule) {
                            merged.push(rule);
                        }
                    }
                }
                existing.hashes.merge(attribute.hashes);
            }
            None => self.attributes.push(attribute),
        }
    }

    /// Full name of each (name, attribute) pair: `path` for unnamed
    /// attributes, `path:stream` for named `$DATA`, `path#name` otherwise
    pub fn full_names(&self) -> Vec<String> {
        let mut full_names = Vec::new();
        for name in &self.names {
            if self.attributes.is_empty() {
                full_names.push(name.full_path.clone());
                continue;
            }
            for attribute in &self.attributes {
                let full = if attribute.name.is_empty() {
                    name.full_path.clone()
                } else if attribute.is_data() {
                    format!("{}:{}", name.full_path, attribute.name)
                } else {
                    format!("{}#{}", name.full_path, attribute.name)
                };
                if !full_names.contains(&full) {
                    full_names.push(full);
                }
            }
        }
        full_names
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.standard_information
            .as_ref()
            .map(|si| filetime_to_datetime(si.modification_time))
    }

    /// Yara rules matched by any attribute
    pub fn yara_rules(&self) -> Vec<&str> {
        let mut rules: Vec<&str> = Vec::new();
        for rule in self.attributes.iter().filter_map(|a| a.yara_rules.as_ref()).flatten() {
            if !rules.contains(&rule.as_str()) {
                rules.push(rule);
            }
        }
        rules
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.frn, self.full_names().join(" | "))?;
        if self.deleted {
            f.write_str(" (deleted)")?;
        }
        if let Some(modified) = self.last_modified() {
            write!(f, " modified {}", modified.format("%Y-%m-%d %H:%M:%S"))?;
        }
        write!(f, " matched '{}'", self.term)
    }
}
