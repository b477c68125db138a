//! File search over walked MFT records
//!
//! [`FileFind`] holds the registered inclusion and exclusion terms, drives a
//! [`MftWalker`] over each selected location and reports one [`Match`] per
//! (file, term) pair through a callback.
//!
//! ```no_run
//! use std::ops::ControlFlow;
//! use mftfind::{FileFind, FindOptions, FindSettings, SearchTerm};
//! use mftfind::ntfs::{Location, LocationSet, MemoryWalker, ShadowPolicy};
//!
//! fn main() -> mftfind::Result<()> {
//!     let mut find = FileFind::new(FindSettings::default());
//!     find.add_term(SearchTerm::builder().name_match("*.exe").size_gt(0).build()?)?;
//!
//!     let locations = LocationSet::new(vec![Location::volume("C:")], ShadowPolicy::LiveOnly);
//!     let mut walker = MemoryWalker::new();
//!     let stats = find.find(&mut walker, &locations, FindOptions::default(), |m| {
//!         println!("{}", m);
//!         ControlFlow::Continue(())
//!     })?;
//!     println!("{} match(es)", stats.matches);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod criteria;
pub mod evaluate;
pub mod hash;
pub mod index;
pub mod matches;
pub mod pattern;
pub mod term;
pub mod yara;

use std::ops::ControlFlow;
use std::sync::Arc;

use crate::config::FindSettings;
use crate::error::{FindError, Result};
use crate::logging;
use crate::ntfs::{IndexEntry, Location, LocationSet, MftRecord, MftWalker, RecordVisitor, WalkOptions};

use evaluate::{Evaluator, RecordView};
use index::TermIndex;

// Re-export commonly used types
pub use criteria::{Criteria, CriteriaGroup};
pub use hash::{AttributeHashes, HashAlgorithms};
pub use matches::{AttributeMatch, Match, NameMatch};
pub use pattern::{NamePattern, PatternKind};
pub use term::{SearchTerm, SearchTermBuilder, TermConfig, TermProfile};
pub use yara::{RuleCompiler, RuleScanner, RuleSource, ScanMethod, YaraConfig, YaraEngine, YaraSource};

// ============================================================================
// Run options and statistics
// ============================================================================

/// Per-run options
#[derive(Debug, Clone, Copy, Default)]
pub struct FindOptions {
    /// Also evaluate name and path terms against `$I30` index entries
    pub include_i30: bool,
    /// Visit records not in use and entries carved from index slack
    pub recovery: bool,
}

/// Counters of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindStats {
    pub records: u64,
    pub index_entries: u64,
    pub matches: u64,
    /// Matches dropped by an exclusion term
    pub excluded: u64,
    /// Streams that could not be read or scanned
    pub stream_errors: u64,
    pub failed_locations: u64,
}

// ============================================================================
// FileFind
// ============================================================================

/// Multi-criteria file search engine
pub struct FileFind {
    settings: FindSettings,
    terms: TermIndex,
    /// Inclusion terms that only look at names and paths
    i30_terms: TermIndex,
    excludes: TermIndex,
    yara: YaraEngine,
    compiler: Option<Box<dyn RuleCompiler>>,
    matches: Vec<Match>,
    walking: bool,
}

impl FileFind {
    pub fn new(settings: FindSettings) -> Self {
        Self {
            settings,
            terms: TermIndex::new(),
            i30_terms: TermIndex::new(),
            excludes: TermIndex::new(),
            yara: YaraEngine::new(),
            compiler: None,
            matches: Vec::new(),
            walking: false,
        }
    }

    /// Compile Yara rules with `compiler` instead of the built-in backend
    pub fn with_rule_compiler(mut self, compiler: impl RuleCompiler + 'static) -> Self {
        self.compiler = Some(Box::new(compiler));
        self
    }

    pub fn settings(&self) -> &FindSettings {
        &self.settings
    }

    fn check_registration(&self) -> Result<()> {
        if self.walking {
            return Err(FindError::configuration("terms cannot be added while walking"));
        }
        Ok(())
    }

    /// Register an inclusion term
    pub fn add_term(&mut self, term: SearchTerm) -> Result<Arc<SearchTerm>> {
        self.check_registration()?;
        let term = Arc::new(term);
        let bucket = self.terms.insert(term.clone());
        if term.required().depends_only_on_name_or_path() {
            self.i30_terms.insert(term.clone());
        }
        logging::debug("FIND", &format!("Added term '{}' ({:?})", term, bucket));
        Ok(term)
    }

    /// Register an exclusion term. Matches satisfying it are dropped.
    pub fn add_exclude_term(&mut self, term: SearchTerm) -> Result<Arc<SearchTerm>> {
        self.check_registration()?;
        let term = Arc::new(term);
        let bucket = self.excludes.insert(term.clone());
        logging::debug("FIND", &format!("Added exclusion '{}' ({:?})", term, bucket));
        Ok(term)
    }

    /// Compile and register configured inclusion terms. Stops at the first
    /// invalid one.
    pub fn add_terms_from_config(&mut self, configs: &[TermConfig]) -> Result<usize> {
        for config in configs {
            self.add_term(SearchTerm::from_config(config)?)?;
        }
        Ok(configs.len())
    }

    pub fn add_exclude_terms_from_config(&mut self, configs: &[TermConfig]) -> Result<usize> {
        for config in configs {
            self.add_exclude_term(SearchTerm::from_config(config)?)?;
        }
        Ok(configs.len())
    }

    /// Inclusion terms then exclusion terms, in registration order
    pub fn all_search_terms(&self) -> Vec<Arc<SearchTerm>> {
        self.terms
            .terms()
            .iter()
            .chain(self.excludes.terms())
            .cloned()
            .collect()
    }

    fn has_yara_terms(&self) -> bool {
        self.terms
            .terms()
            .iter()
            .chain(self.excludes.terms())
            .any(|term| term.required().contains(Criteria::YARA))
    }

    /// Compile the configured rule sources. Does nothing when no term asks
    /// for Yara.
    pub fn initialize_yara(&mut self) -> Result<()> {
        if !self.has_yara_terms() {
            return Ok(());
        }
        let config = self
            .settings
            .yara
            .clone()
            .ok_or_else(|| FindError::YaraCompile("yara terms are registered but yara is not configured".into()))?;

        if let Some(compiler) = &self.compiler {
            return self.yara.initialize(config, compiler.as_ref());
        }
        self.initialize_builtin_yara(config)
    }

    #[cfg(feature = "yara")]
    fn initialize_builtin_yara(&mut self, config: YaraConfig) -> Result<()> {
        self.yara.initialize(config, &yara::YaraXCompiler)
    }

    #[cfg(not(feature = "yara"))]
    fn initialize_builtin_yara(&mut self, _config: YaraConfig) -> Result<()> {
        Err(FindError::YaraCompile(
            "built without yara support and no rule compiler was given".into(),
        ))
    }

    /// Bind compiled rules to the registered terms
    pub fn check_yara(&mut self) -> Result<()> {
        if !self.has_yara_terms() {
            return Ok(());
        }
        let terms = self
            .terms
            .terms()
            .iter()
            .chain(self.excludes.terms())
            .map(|term| term.as_ref());
        self.yara.check(terms)
    }

    /// Digests computed whenever an attribute is hashed during a run
    pub fn needed_hashes(&self) -> HashAlgorithms {
        self.terms
            .terms()
            .iter()
            .chain(self.excludes.terms())
            .fold(self.settings.match_hash, |acc, term| {
                acc | HashAlgorithms::from_criteria(term.required())
            })
    }

    /// Walk every selected location and report matches to `callback`.
    ///
    /// Returning `ControlFlow::Break` from the callback stops the run once
    /// the current record is done. A location that fails to walk is logged
    /// and counted; the run fails only when every walked location failed.
    pub fn find<W, F>(
        &mut self,
        walker: &mut W,
        locations: &LocationSet,
        options: FindOptions,
        mut callback: F,
    ) -> Result<FindStats>
    where
        W: MftWalker + ?Sized,
        F: FnMut(&Match) -> ControlFlow<()>,
    {
        let mut stats = FindStats::default();
        if self.terms.is_empty() {
            logging::warn("FIND", "No search term registered, nothing to do");
            return Ok(stats);
        }

        if self.has_yara_terms() {
            if !self.yara.is_initialized() {
                self.initialize_yara()?;
            }
            self.check_yara()?;
        }

        let walk_options = WalkOptions {
            parse_i30: options.include_i30 && !self.i30_terms.is_empty(),
            recovery: options.recovery,
        };
        let needed_hashes = self.needed_hashes();
        let (name_terms, path_terms, size_terms, other_terms) = self.terms.bucket_sizes();
        logging::info(
            "FIND",
            &format!(
                "Searching {} term(s) ({} by name, {} by path, {} by size, {} other), {} exclusion(s)",
                self.terms.len(),
                name_terms,
                path_terms,
                size_terms,
                other_terms,
                self.excludes.len()
            ),
        );

        self.walking = true;
        let mut walked = 0;
        let mut failures = Vec::new();

        for location in locations.selected() {
            logging::separator(&format!("FIND {}", location));
            walked += 1;

            let mut visitor = FindVisitor {
                evaluator: Evaluator::new(location, &self.yara, needed_hashes, self.settings.provide_stream),
                terms: &self.terms,
                i30_terms: &self.i30_terms,
                excludes: &self.excludes,
                settings: &self.settings,
                stored: &mut self.matches,
                callback: &mut callback,
                matches: 0,
                excluded: 0,
                stopped: false,
            };

            let result = walker.walk(location, &walk_options, &mut visitor);

            stats.matches += visitor.matches;
            stats.excluded += visitor.excluded;
            stats.stream_errors += visitor.evaluator.stream_errors;
            let stopped = visitor.stopped;

            match result {
                Ok(walk) => {
                    stats.records += walk.records;
                    stats.index_entries += walk.index_entries;
                }
                Err(e) => {
                    logging::error("FIND", &format!("Failed to walk {}: {}", location, e));
                    stats.failed_locations += 1;
                    failures.push(e);
                }
            }

            if stopped {
                logging::info("FIND", "Search stopped by caller");
                break;
            }
        }
        self.walking = false;

        logging::info(
            "FIND",
            &format!(
                "{} record(s), {} index entr(ies), {} match(es), {} excluded, {} stream error(s)",
                stats.records, stats.index_entries, stats.matches, stats.excluded, stats.stream_errors
            ),
        );

        if walked > 0 && failures.len() == walked {
            return Err(failures.swap_remove(0));
        }
        Ok(stats)
    }

    /// Matches kept by the last runs when `store_matches` is set
    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    pub fn take_matches(&mut self) -> Vec<Match> {
        std::mem::take(&mut self.matches)
    }

    /// Log the description of every registered term
    pub fn print_specs(&self) {
        for term in self.terms.terms() {
            logging::info("FIND", &format!("Search term: {}", term));
        }
        for term in self.excludes.terms() {
            logging::info("FIND", &format!("Exclusion term: {}", term));
        }
    }

    /// Log match counts, time and bytes read per term
    pub fn print_profiles(&self) {
        for term in self.all_search_terms() {
            logging::log_term_profile(&term);
        }
    }
}

impl std::fmt::Debug for FileFind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileFind")
            .field("terms", &self.terms.len())
            .field("excludes", &self.excludes.len())
            .field("yara", &self.yara)
            .field("matches", &self.matches.len())
            .finish()
    }
}

// ============================================================================
// Visitor
// ============================================================================

struct FindVisitor<'a, F> {
    evaluator: Evaluator<'a>,
    terms: &'a TermIndex,
    i30_terms: &'a TermIndex,
    excludes: &'a TermIndex,
    settings: &'a FindSettings,
    stored: &'a mut Vec<Match>,
    callback: &'a mut F,
    matches: u64,
    excluded: u64,
    stopped: bool,
}

impl<F> FindVisitor<'_, F>
where
    F: FnMut(&Match) -> ControlFlow<()>,
{
    /// Evaluate the candidate terms of `index` against a record view
    fn evaluate(&mut self, index: &TermIndex, view: &RecordView<'_>, sizes: Vec<u64>, from_index: bool) {
        let record = view.record;
        let names = view.in_location.iter().map(|&i| record.names[i].file_name.name.as_str());
        let paths = view.in_location.iter().map(|&i| record.names[i].full_path.as_str());

        for id in index.candidates(names, paths, sizes) {
            let term = index.term(id);
            let selection = {
                let _profile = term.stats().scope();
                self.evaluator.evaluate_record(view, term)
            };
            let Some(selection) = selection else {
                term.stats().record_miss();
                continue;
            };
            term.stats().record_match();

            let mut m = self.evaluator.build_match(view, term, selection);
            m.from_index = from_index;
            let data = (!from_index).then_some(record);
            // The other candidates of this record are still delivered.
            if self.deliver(m, data).is_break() {
                self.stopped = true;
            }
        }
    }

    fn is_excluded(&mut self, m: &Match, record: Option<&MftRecord>) -> bool {
        let excludes = self.excludes;
        if excludes.is_empty() {
            return false;
        }
        let names = m.names.iter().map(|n| n.file_name.name.as_str());
        let paths = m.names.iter().map(|n| n.full_path.as_str());
        let sizes = m.attributes.iter().filter(|a| a.is_data()).map(|a| a.data_size);

        excludes
            .candidates(names, paths, sizes)
            .into_iter()
            .any(|id| self.evaluator.evaluate_match(m, record, excludes.term(id)))
    }

    fn deliver(&mut self, mut m: Match, record: Option<&MftRecord>) -> ControlFlow<()> {
        if self.is_excluded(&m, record) {
            self.excluded += 1;
            if let Some(name) = m.names.first() {
                logging::trace_record("FIND", &name.file_name.name, "excluded");
            }
            return ControlFlow::Continue(());
        }

        if let Some(record) = record {
            self.evaluator.add_report_hashes(&mut m, record, self.settings.match_hash);
        }
        self.matches += 1;
        logging::log_match(&m);

        let flow = (self.callback)(&m);
        if self.settings.store_matches {
            self.stored.push(m);
        }
        flow
    }
}

impl<F> RecordVisitor for FindVisitor<'_, F>
where
    F: FnMut(&Match) -> ControlFlow<()>,
{
    fn visit_record(&mut self, record: &MftRecord) -> ControlFlow<()> {
        let view = RecordView::new(record, self.evaluator.location);
        if view.in_location.is_empty() {
            return ControlFlow::Continue(());
        }

        self.evaluator.scope.enter(record.frn);
        let sizes = record
            .data_attributes()
            .filter_map(|(_, attribute)| attribute.data_size())
            .collect();
        let terms = self.terms;
        self.evaluate(terms, &view, sizes, false);

        if self.stopped {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    fn visit_index_entry(&mut self, entry: &IndexEntry) -> ControlFlow<()> {
        let i30_terms = self.i30_terms;
        if i30_terms.is_empty() {
            return ControlFlow::Continue(());
        }

        let mut record = MftRecord::new(entry.frn)
            .with_name(entry.file_name.clone(), entry.full_path.clone());
        record.in_use = !entry.carved;
        record.is_directory = entry.file_name.is_directory();

        let location: &Location = self.evaluator.location;
        let view = RecordView::new(&record, location);
        if view.in_location.is_empty() {
            return ControlFlow::Continue(());
        }
        self.evaluate(i30_terms, &view, Vec::new(), true);

        if self.stopped {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntfs::{FileNameAttribute, FileReference, MemoryWalker, ShadowPolicy};

    fn record(segment: u64, path: &str) -> MftRecord {
        let name = path.rsplit('\\').next().unwrap_or(path);
        MftRecord::new(FileReference::new(segment, 1))
            .with_name(FileNameAttribute::named(FileReference::new(5, 5), name), path)
    }

    fn setup(records: Vec<MftRecord>) -> (MemoryWalker, LocationSet) {
        let location = Location::volume("C:");
        let mut walker = MemoryWalker::new();
        for r in records {
            walker.add_record(&location, r);
        }
        (walker, LocationSet::new(vec![location], ShadowPolicy::LiveOnly))
    }

    #[test]
    fn no_terms_is_a_no_op() {
        let (mut walker, locations) = setup(vec![record(40, "C:\\a.txt")]);
        let mut find = FileFind::new(FindSettings::default());
        let stats = find
            .find(&mut walker, &locations, FindOptions::default(), |_| ControlFlow::Continue(()))
            .unwrap();
        assert_eq!(stats, FindStats::default());
    }

    #[test]
    fn all_search_terms_lists_inclusions_first() {
        let mut find = FileFind::new(FindSettings::default());
        find.add_exclude_term(SearchTerm::builder().name("b").build().unwrap()).unwrap();
        find.add_term(SearchTerm::builder().name("a").build().unwrap()).unwrap();
        let names: Vec<String> = find.all_search_terms().iter().map(|t| t.to_string()).collect();
        assert_eq!(names, vec!["Name is a", "Name is b"]);
    }

    #[test]
    fn yara_terms_need_a_configuration() {
        let mut find = FileFind::new(FindSettings::default());
        find.add_term(SearchTerm::builder().yara_rule("any").build().unwrap()).unwrap();
        let err = find.initialize_yara().unwrap_err();
        assert!(matches!(err, FindError::YaraCompile(_)));
    }

    #[test]
    fn needed_hashes_cover_terms_and_reporting() {
        let settings = FindSettings {
            match_hash: HashAlgorithms::SHA1,
            ..FindSettings::default()
        };
        let mut find = FileFind::new(settings);
        find.add_term(
            SearchTerm::builder()
                .md5("d41d8cd98f00b204e9800998ecf8427e")
                .build()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(find.needed_hashes(), HashAlgorithms::MD5 | HashAlgorithms::SHA1);
    }

    #[test]
    fn unknown_location_fails_the_run() {
        let (mut walker, _) = setup(vec![record(40, "C:\\a.txt")]);
        let locations = LocationSet::new(vec![Location::volume("Z:")], ShadowPolicy::LiveOnly);
        let mut find = FileFind::new(FindSettings::default());
        find.add_term(SearchTerm::builder().name("a.txt").build().unwrap()).unwrap();
        let err = find
            .find(&mut walker, &locations, FindOptions::default(), |_| ControlFlow::Continue(()))
            .unwrap_err();
        assert!(matches!(err, FindError::Walk(..)));
    }

    #[test]
    fn one_failing_location_is_counted() {
        let (mut walker, _) = setup(vec![record(40, "C:\\a.txt")]);
        let locations = LocationSet::new(
            vec![Location::volume("Z:"), Location::volume("C:")],
            ShadowPolicy::LiveOnly,
        );
        let mut find = FileFind::new(FindSettings::default());
        find.add_term(SearchTerm::builder().name("a.txt").build().unwrap()).unwrap();
        let stats = find
            .find(&mut walker, &locations, FindOptions::default(), |_| ControlFlow::Continue(()))
            .unwrap();
        assert_eq!(stats.failed_locations, 1);
        assert_eq!(stats.matches, 1);
    }
}
