//! Term index
//!
//! Terms with an exact name, exact path or exact size go into lookup maps;
//! everything else lands in a catch-all list evaluated for every record.
//! Candidate lookups return term ids in registration order.

use std::collections::HashMap;
use std::sync::Arc;

use super::criteria::Criteria;
use super::pattern::{fold_case, path_candidate};
use super::term::SearchTerm;

/// Where a term was filed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Name,
    Path,
    Size,
    CatchAll,
}

#[derive(Debug, Default)]
pub struct TermIndex {
    terms: Vec<Arc<SearchTerm>>,
    by_name: HashMap<String, Vec<usize>>,
    by_path: HashMap<String, Vec<usize>>,
    by_size: HashMap<u64, Vec<usize>>,
    catch_all: Vec<usize>,
}

impl TermIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// File `term` into the cheapest bucket it qualifies for
    pub fn insert(&mut self, term: Arc<SearchTerm>) -> Bucket {
        let id = self.terms.len();
        let required = term.required();

        let bucket = if required.contains(Criteria::NAME_EXACT) {
            let key = term.file_name().map(|p| p.key().to_string()).unwrap_or_default();
            self.by_name.entry(key).or_default().push(id);
            Bucket::Name
        } else if required.contains(Criteria::PATH_EXACT) {
            let key = term.path().map(|p| p.key().to_string()).unwrap_or_default();
            self.by_path.entry(key).or_default().push(id);
            Bucket::Path
        } else if let Some(size) = term.size_eq() {
            self.by_size.entry(size).or_default().push(id);
            Bucket::Size
        } else {
            self.catch_all.push(id);
            Bucket::CatchAll
        };

        self.terms.push(term);
        bucket
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Registered terms, in registration order
    pub fn terms(&self) -> &[Arc<SearchTerm>] {
        &self.terms
    }

    pub fn term(&self, id: usize) -> &Arc<SearchTerm> {
        &self.terms[id]
    }

    /// Union of the exact-name hits for `names`, exact-path hits for `paths`
    /// (full paths), exact-size hits for `sizes` and the catch-all list,
    /// without duplicates
    pub fn candidates<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
        paths: impl IntoIterator<Item = &'a str>,
        sizes: impl IntoIterator<Item = u64>,
    ) -> Vec<usize> {
        let mut ids = self.catch_all.clone();

        if !self.by_name.is_empty() {
            for name in names {
                if let Some(hits) = self.by_name.get(&fold_case(name)) {
                    ids.extend_from_slice(hits);
                }
            }
        }
        if !self.by_path.is_empty() {
            for path in paths.into_iter().filter_map(path_candidate) {
                if let Some(hits) = self.by_path.get(&fold_case(path)) {
                    ids.extend_from_slice(hits);
                }
            }
        }
        if !self.by_size.is_empty() {
            for size in sizes {
                if let Some(hits) = self.by_size.get(&size) {
                    ids.extend_from_slice(hits);
                }
            }
        }

        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Number of terms per bucket: name, path, size, catch-all
    pub fn bucket_sizes(&self) -> (usize, usize, usize, usize) {
        (
            self.by_name.values().map(Vec::len).sum(),
            self.by_path.values().map(Vec::len).sum(),
            self.by_size.values().map(Vec::len).sum(),
            self.catch_all.len(),
        )
    }
}
