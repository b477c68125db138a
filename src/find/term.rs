//! Search terms
//!
//! A [`SearchTerm`] is built once from a [`TermConfig`] (directly, or through
//! [`SearchTermBuilder`]). Building validates the combination of criteria,
//! resolves generic `file:ads` / `file#ea` specs and compiles every pattern.
//! The result is immutable; only its profiling counters move.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use memchr::memmem::Finder;
use regex::bytes::{Regex as BytesRegex, RegexBuilder as BytesRegexBuilder};
use serde::{Deserialize, Serialize};

use super::criteria::Criteria;
use super::hash::{BYTES_IN_MD5_HASH, BYTES_IN_SHA1_HASH, BYTES_IN_SHA256_HASH};
use super::pattern::{NamePattern, PatternKind};
use crate::error::{FindError, Result};
use crate::ntfs::AttributeType;

/// Window a header regex looks at when no length is configured
pub const MAX_BYTES_IN_HEADER: usize = 128;

// ============================================================================
// Raw term configuration
// ============================================================================

/// A search term as written in a configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TermConfig {
    /// Generic `file[:ads]` or `file[#ea]` spec, each part classified as
    /// exact, wildcard or regex from its characters
    pub spec: Option<String>,

    pub name: Option<String>,
    pub name_match: Option<String>,
    pub name_regex: Option<String>,

    pub path: Option<String>,
    pub path_match: Option<String>,
    pub path_regex: Option<String>,

    pub ads: Option<String>,
    pub ads_match: Option<String>,
    pub ads_regex: Option<String>,

    pub ea: Option<String>,
    pub ea_match: Option<String>,
    pub ea_regex: Option<String>,

    pub attr_type: Option<String>,
    pub attr_name: Option<String>,
    pub attr_match: Option<String>,
    pub attr_regex: Option<String>,

    pub size: Option<u64>,
    pub size_gt: Option<u64>,
    pub size_ge: Option<u64>,
    pub size_lt: Option<u64>,
    pub size_le: Option<u64>,

    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub sha256: Option<String>,

    pub header: Option<String>,
    pub header_hex: Option<String>,
    pub header_regex: Option<String>,
    pub header_len: Option<usize>,

    pub contains: Option<String>,
    pub contains_hex: Option<String>,

    /// Yara rule names or wildcards, separated by `;` or `,`. Empty means
    /// any rule.
    pub yara_rule: Option<String>,
}

// ============================================================================
// Profiling
// ============================================================================

/// Per-term counters, updated while walking
#[derive(Debug, Default)]
pub struct TermStats {
    matches: AtomicU64,
    misses: AtomicU64,
    elapsed_nanos: AtomicU64,
    bytes_read: AtomicU64,
}

/// Snapshot of [`TermStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TermProfile {
    pub matches: u64,
    pub misses: u64,
    pub elapsed: Duration,
    pub bytes_read: u64,
}

impl TermStats {
    pub fn record_match(&self) {
        self.matches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Time spent until the returned guard drops is charged to this term
    pub fn scope(&self) -> ProfileScope<'_> {
        ProfileScope {
            stats: self,
            started: Instant::now(),
        }
    }

    pub fn profile(&self) -> TermProfile {
        TermProfile {
            matches: self.matches.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            elapsed: Duration::from_nanos(self.elapsed_nanos.load(Ordering::Relaxed)),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }
}

pub struct ProfileScope<'a> {
    stats: &'a TermStats,
    started: Instant,
}

impl Drop for ProfileScope<'_> {
    fn drop(&mut self) {
        let nanos = self.started.elapsed().as_nanos().min(u64::MAX as u128) as u64;
        self.stats.elapsed_nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}

// ============================================================================
// Search term
// ============================================================================

/// Header byte criteria
#[derive(Debug)]
pub struct HeaderSpec {
    /// Literal prefix (`HEADER` / `HEADER_HEX`)
    pub bytes: Vec<u8>,
    pub regex: Option<BytesRegex>,
    pub regex_source: String,
    /// Bytes read from the start of the stream
    pub len: usize,
}

/// Substring searched for in `$DATA` content, with its searcher built once
#[derive(Debug)]
pub struct ContainsSpec {
    finder: Finder<'static>,
    pub is_hex: bool,
}

impl ContainsSpec {
    fn new(needle: &[u8], is_hex: bool) -> Result<Self> {
        if needle.is_empty() {
            return Err(FindError::configuration("empty contains pattern"));
        }
        Ok(Self {
            finder: Finder::new(needle).into_owned(),
            is_hex,
        })
    }

    pub fn needle(&self) -> &[u8] {
        self.finder.needle()
    }

    pub fn finder(&self) -> &Finder<'static> {
        &self.finder
    }
}

/// One compiled search term
#[derive(Debug)]
pub struct SearchTerm {
    required: Criteria,
    config: TermConfig,

    file_name: Option<NamePattern>,
    path: Option<NamePattern>,
    ads_name: Option<NamePattern>,
    ea_name: Option<NamePattern>,
    attr_name: Option<NamePattern>,
    attr_type: Option<AttributeType>,

    size_eq: u64,
    size_g: u64,
    size_l: u64,

    md5: Option<[u8; BYTES_IN_MD5_HASH]>,
    sha1: Option<[u8; BYTES_IN_SHA1_HASH]>,
    sha256: Option<[u8; BYTES_IN_SHA256_HASH]>,

    header: Option<HeaderSpec>,
    contains: Option<ContainsSpec>,

    yara_rules: Vec<NamePattern>,
    yara_spec: String,

    stats: TermStats,
}

/// Pick the single pattern given for one criteria family
fn pick_pattern(
    family: &str,
    candidates: [(Criteria, &Option<String>, PatternKind); 3],
    is_path: bool,
) -> Result<Option<(Criteria, NamePattern)>> {
    let mut given = candidates.into_iter().filter(|(_, value, _)| value.is_some());
    let Some((criteria, value, kind)) = given.next() else {
        return Ok(None);
    };
    if given.next().is_some() {
        return Err(FindError::configuration(format!(
            "only one {} criteria can be given",
            family
        )));
    }

    let source = value.as_deref().unwrap_or_default();
    let pattern = if is_path {
        NamePattern::path(kind, source)?
    } else {
        NamePattern::new(kind, source)?
    };
    Ok(Some((criteria, pattern)))
}

fn criteria_for(kind: PatternKind, exact: Criteria, wildcard: Criteria, regex: Criteria) -> Criteria {
    match kind {
        PatternKind::Exact => exact,
        PatternKind::Wildcard => wildcard,
        PatternKind::Regex => regex,
    }
}

fn decode_hex(what: &str, value: &str) -> Result<Vec<u8>> {
    let value = value.trim();
    let value = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    hex::decode(value)
        .map_err(|e| FindError::configuration(format!("invalid hex string for {} '{}': {}", what, value, e)))
}

fn decode_hash<const N: usize>(what: &str, value: &str) -> Result<[u8; N]> {
    decode_hex(what, value)?.try_into().map_err(|bytes: Vec<u8>| {
        FindError::configuration(format!(
            "{} must be {} bytes, got {}",
            what,
            N,
            bytes.len()
        ))
    })
}

/// Split a Yara rule spec on `;` and `,`
pub fn split_rule_spec(spec: &str) -> Vec<String> {
    spec.split([';', ','])
        .map(str::trim)
        .filter(|rule| !rule.is_empty())
        .map(str::to_string)
        .collect()
}

impl SearchTerm {
    pub fn builder() -> SearchTermBuilder {
        SearchTermBuilder::default()
    }

    /// Validate and compile a configured term
    pub fn from_config(config: &TermConfig) -> Result<Self> {
        let mut required = Criteria::empty();

        let mut file_name = pick_pattern(
            "name",
            [
                (Criteria::NAME_EXACT, &config.name, PatternKind::Exact),
                (Criteria::NAME_MATCH, &config.name_match, PatternKind::Wildcard),
                (Criteria::NAME_REGEX, &config.name_regex, PatternKind::Regex),
            ],
            false,
        )?;
        let path = pick_pattern(
            "path",
            [
                (Criteria::PATH_EXACT, &config.path, PatternKind::Exact),
                (Criteria::PATH_MATCH, &config.path_match, PatternKind::Wildcard),
                (Criteria::PATH_REGEX, &config.path_regex, PatternKind::Regex),
            ],
            true,
        )?;
        let mut ads_name = pick_pattern(
            "ADS name",
            [
                (Criteria::ADS_EXACT, &config.ads, PatternKind::Exact),
                (Criteria::ADS_MATCH, &config.ads_match, PatternKind::Wildcard),
                (Criteria::ADS_REGEX, &config.ads_regex, PatternKind::Regex),
            ],
            false,
        )?;
        let mut ea_name = pick_pattern(
            "EA name",
            [
                (Criteria::EA_EXACT, &config.ea, PatternKind::Exact),
                (Criteria::EA_MATCH, &config.ea_match, PatternKind::Wildcard),
                (Criteria::EA_REGEX, &config.ea_regex, PatternKind::Regex),
            ],
            false,
        )?;
        let attr_name = pick_pattern(
            "attribute name",
            [
                (Criteria::ATTR_NAME_EXACT, &config.attr_name, PatternKind::Exact),
                (Criteria::ATTR_NAME_MATCH, &config.attr_match, PatternKind::Wildcard),
                (Criteria::ATTR_NAME_REGEX, &config.attr_regex, PatternKind::Regex),
            ],
            false,
        )?;

        if let Some(spec) = &config.spec {
            if file_name.is_some() || path.is_some() || ads_name.is_some() || ea_name.is_some() {
                return Err(FindError::configuration(
                    "a name spec cannot be combined with name, path, ADS or EA criteria",
                ));
            }
            let (file, ads, ea) = split_name_spec(spec)?;
            if let Some(file) = file {
                let pattern = NamePattern::discriminate(file)?;
                let criteria = criteria_for(
                    pattern.kind(),
                    Criteria::NAME_EXACT,
                    Criteria::NAME_MATCH,
                    Criteria::NAME_REGEX,
                );
                file_name = Some((criteria, pattern));
            }
            if let Some(ads) = ads {
                let pattern = NamePattern::discriminate(ads)?;
                let criteria = criteria_for(
                    pattern.kind(),
                    Criteria::ADS_EXACT,
                    Criteria::ADS_MATCH,
                    Criteria::ADS_REGEX,
                );
                ads_name = Some((criteria, pattern));
            }
            if let Some(ea) = ea {
                let pattern = NamePattern::discriminate(ea)?;
                let criteria = criteria_for(
                    pattern.kind(),
                    Criteria::EA_EXACT,
                    Criteria::EA_MATCH,
                    Criteria::EA_REGEX,
                );
                ea_name = Some((criteria, pattern));
            }
        }

        let mut take = |pattern: Option<(Criteria, NamePattern)>| {
            pattern.map(|(criteria, pattern)| {
                required |= criteria;
                pattern
            })
        };
        let file_name = take(file_name);
        let path = take(path);
        let ads_name = take(ads_name);
        let ea_name = take(ea_name);
        let attr_name = take(attr_name);

        let attr_type = match &config.attr_type {
            Some(spec) => {
                required |= Criteria::ATTR_TYPE;
                Some(AttributeType::parse(spec).ok_or_else(|| {
                    FindError::configuration(format!("invalid attribute type '{}'", spec))
                })?)
            }
            None => None,
        };

        // Sizes
        let mut size_eq = 0;
        let mut size_g = 0;
        let mut size_l = 0;
        if let Some(size) = config.size {
            size_eq = size;
            required |= Criteria::SIZE_EQ;
        }
        if let Some(size) = config.size_gt {
            size_g = size;
            required |= Criteria::SIZE_GT;
        }
        if let Some(size) = config.size_ge {
            size_g = size;
            required |= Criteria::SIZE_GE;
        }
        if let Some(size) = config.size_lt {
            size_l = size;
            required |= Criteria::SIZE_LT;
        }
        if let Some(size) = config.size_le {
            size_l = size;
            required |= Criteria::SIZE_LE;
        }

        // Hashes
        let md5 = match &config.md5 {
            Some(value) => {
                required |= Criteria::DATA_MD5;
                Some(decode_hash::<BYTES_IN_MD5_HASH>("md5", value)?)
            }
            None => None,
        };
        let sha1 = match &config.sha1 {
            Some(value) => {
                required |= Criteria::DATA_SHA1;
                Some(decode_hash::<BYTES_IN_SHA1_HASH>("sha1", value)?)
            }
            None => None,
        };
        let sha256 = match &config.sha256 {
            Some(value) => {
                required |= Criteria::DATA_SHA256;
                Some(decode_hash::<BYTES_IN_SHA256_HASH>("sha256", value)?)
            }
            None => None,
        };

        let header = build_header(config, &mut required)?;
        let contains = build_contains(config, &mut required)?;

        let (yara_rules, yara_spec) = match &config.yara_rule {
            Some(spec) => {
                required |= Criteria::YARA;
                let rules = split_rule_spec(spec)
                    .iter()
                    .map(|rule| NamePattern::rule(rule))
                    .collect::<Result<Vec<_>>>()?;
                (rules, spec.clone())
            }
            None => (Vec::new(), String::new()),
        };

        validate(required)?;

        Ok(Self {
            required,
            config: config.clone(),
            file_name,
            path,
            ads_name,
            ea_name,
            attr_name,
            attr_type,
            size_eq,
            size_g,
            size_l,
            md5,
            sha1,
            sha256,
            header,
            contains,
            yara_rules,
            yara_spec,
            stats: TermStats::default(),
        })
    }

    pub fn required(&self) -> Criteria {
        self.required
    }

    /// Configuration the term was built from
    pub fn config(&self) -> &TermConfig {
        &self.config
    }

    pub fn file_name(&self) -> Option<&NamePattern> {
        self.file_name.as_ref()
    }

    pub fn path(&self) -> Option<&NamePattern> {
        self.path.as_ref()
    }

    pub fn ads_name(&self) -> Option<&NamePattern> {
        self.ads_name.as_ref()
    }

    pub fn ea_name(&self) -> Option<&NamePattern> {
        self.ea_name.as_ref()
    }

    pub fn attr_name(&self) -> Option<&NamePattern> {
        self.attr_name.as_ref()
    }

    pub fn attr_type(&self) -> Option<AttributeType> {
        self.attr_type
    }

    pub fn size_eq(&self) -> Option<u64> {
        self.required.contains(Criteria::SIZE_EQ).then_some(self.size_eq)
    }

    pub fn md5(&self) -> Option<&[u8; BYTES_IN_MD5_HASH]> {
        self.md5.as_ref()
    }

    pub fn sha1(&self) -> Option<&[u8; BYTES_IN_SHA1_HASH]> {
        self.sha1.as_ref()
    }

    pub fn sha256(&self) -> Option<&[u8; BYTES_IN_SHA256_HASH]> {
        self.sha256.as_ref()
    }

    pub fn header(&self) -> Option<&HeaderSpec> {
        self.header.as_ref()
    }

    pub fn contains(&self) -> Option<&ContainsSpec> {
        self.contains.as_ref()
    }

    /// Compiled rule specs; empty means any rule
    pub fn yara_rules(&self) -> &[NamePattern] {
        &self.yara_rules
    }

    pub fn stats(&self) -> &TermStats {
        &self.stats
    }

    /// Size comparisons. `=` stands alone, otherwise the lower and upper
    /// bounds both apply.
    pub fn size_matches(&self, size: u64) -> bool {
        let required = self.required;
        if required.contains(Criteria::SIZE_EQ) {
            return size == self.size_eq;
        }

        let lower = if required.contains(Criteria::SIZE_GT) {
            size > self.size_g
        } else if required.contains(Criteria::SIZE_GE) {
            size >= self.size_g
        } else {
            true
        };
        let upper = if required.contains(Criteria::SIZE_LT) {
            size < self.size_l
        } else if required.contains(Criteria::SIZE_LE) {
            size <= self.size_l
        } else {
            true
        };
        lower && upper
    }

    /// Does a matched Yara rule satisfy this term's rule specs?
    pub fn accepts_rule(&self, rule: &str) -> bool {
        self.yara_rules.is_empty()
            || self
                .yara_rules
                .iter()
                .any(|spec| spec.is_match(rule))
    }
}

/// Split `file[:ads]` / `file[#ea]` at the first separator
fn split_name_spec(spec: &str) -> Result<(Option<&str>, Option<&str>, Option<&str>)> {
    fn non_empty(s: &str) -> Option<&str> {
        (!s.is_empty()).then_some(s)
    }

    let parts = match spec.find([':', '#']) {
        Some(at) => {
            let (file, rest) = spec.split_at(at);
            let (separator, name) = rest.split_at(1);
            if separator == ":" {
                (non_empty(file), non_empty(name), None)
            } else {
                (non_empty(file), None, non_empty(name))
            }
        }
        None => (non_empty(spec), None, None),
    };
    if parts == (None, None, None) {
        return Err(FindError::configuration(format!("empty name spec '{}'", spec)));
    }
    Ok(parts)
}

fn build_header(config: &TermConfig, required: &mut Criteria) -> Result<Option<HeaderSpec>> {
    let bytes = match (&config.header, &config.header_hex) {
        (Some(_), Some(_)) => {
            return Err(FindError::configuration(
                "header and header_hex cannot both be given",
            ))
        }
        (Some(text), None) => {
            *required |= Criteria::HEADER;
            text.as_bytes().to_vec()
        }
        (None, Some(hex)) => {
            *required |= Criteria::HEADER_HEX;
            decode_hex("header", hex)?
        }
        (None, None) => Vec::new(),
    };

    let regex = match &config.header_regex {
        Some(source) => {
            *required |= Criteria::HEADER_REGEX;
            let compiled = BytesRegexBuilder::new(&format!("^(?:{})", source))
                .case_insensitive(true)
                .unicode(false)
                .build()
                .map_err(|e| {
                    FindError::configuration(format!("invalid header regex '{}': {}", source, e))
                })?;
            Some(compiled)
        }
        None => None,
    };

    if bytes.is_empty() && regex.is_none() {
        if required.intersects(Criteria::HEADER | Criteria::HEADER_HEX) {
            return Err(FindError::configuration("empty header"));
        }
        return Ok(None);
    }

    let len = match (config.header_len, regex.is_some()) {
        (Some(0), _) => return Err(FindError::configuration("header length cannot be zero")),
        (Some(len), true) => len.max(bytes.len()),
        (_, true) => MAX_BYTES_IN_HEADER.max(bytes.len()),
        (_, false) => bytes.len(),
    };

    Ok(Some(HeaderSpec {
        bytes,
        regex,
        regex_source: config.header_regex.clone().unwrap_or_default(),
        len,
    }))
}

fn build_contains(config: &TermConfig, required: &mut Criteria) -> Result<Option<ContainsSpec>> {
    let spec = match (&config.contains, &config.contains_hex) {
        (Some(_), Some(_)) => {
            return Err(FindError::configuration(
                "contains and contains_hex cannot both be given",
            ))
        }
        (Some(text), None) => ContainsSpec::new(text.as_bytes(), false)?,
        (None, Some(hex)) => ContainsSpec::new(&decode_hex("contains", hex)?, true)?,
        (None, None) => return Ok(None),
    };
    *required |= Criteria::CONTAINS;
    Ok(Some(spec))
}

/// Reject criteria combinations that can never be satisfied or that the
/// evaluator cannot express
fn validate(required: Criteria) -> Result<()> {
    if required.is_empty() {
        return Err(FindError::configuration("term requires no criteria"));
    }
    if required.intersects(Criteria::EA_MASK) && required.intersects(Criteria::ADS_MASK) {
        return Err(FindError::configuration(
            "EA name and ADS name criteria cannot be combined",
        ));
    }
    if required.intersects(Criteria::ATTR_TYPE | Criteria::ATTR_NAME_MASK)
        && required.intersects(Criteria::EA_MASK | Criteria::ADS_MASK)
    {
        return Err(FindError::configuration(
            "attribute criteria cannot be combined with EA or ADS criteria",
        ));
    }
    if required.contains(Criteria::SIZE_EQ)
        && required.intersects(Criteria::SIZE_MASK.difference(Criteria::SIZE_EQ))
    {
        return Err(FindError::configuration(
            "size equality cannot be combined with other size criteria",
        ));
    }
    if required.contains(Criteria::SIZE_GT | Criteria::SIZE_GE) {
        return Err(FindError::configuration(
            "size greater than and greater or equal cannot be combined",
        ));
    }
    if required.contains(Criteria::SIZE_LT | Criteria::SIZE_LE) {
        return Err(FindError::configuration(
            "size less than and less or equal cannot be combined",
        ));
    }
    Ok(())
}

impl fmt::Display for SearchTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        let required = self.required;
        let has = |criteria: Criteria| required.contains(criteria);

        let mut describe = |pattern: Option<&NamePattern>, label: &str, criteria: [Criteria; 3]| {
            if let Some(pattern) = pattern {
                let verb = if has(criteria[0]) {
                    "is"
                } else if has(criteria[1]) {
                    "matches"
                } else {
                    "matches regex"
                };
                parts.push(format!("{} {} {}", label, verb, pattern));
            }
        };

        describe(
            self.file_name(),
            "Name",
            [Criteria::NAME_EXACT, Criteria::NAME_MATCH, Criteria::NAME_REGEX],
        );
        describe(
            self.path(),
            "Path",
            [Criteria::PATH_EXACT, Criteria::PATH_MATCH, Criteria::PATH_REGEX],
        );
        describe(
            self.ads_name(),
            "ADS name",
            [Criteria::ADS_EXACT, Criteria::ADS_MATCH, Criteria::ADS_REGEX],
        );
        describe(
            self.ea_name(),
            "EA name",
            [Criteria::EA_EXACT, Criteria::EA_MATCH, Criteria::EA_REGEX],
        );
        describe(
            self.attr_name(),
            "Attribute name",
            [
                Criteria::ATTR_NAME_EXACT,
                Criteria::ATTR_NAME_MATCH,
                Criteria::ATTR_NAME_REGEX,
            ],
        );

        if let Some(attr_type) = self.attr_type {
            parts.push(format!("Attribute type is {}", attr_type));
        }
        if has(Criteria::SIZE_EQ) {
            parts.push(format!("Size={}", self.size_eq));
        }
        if has(Criteria::SIZE_GT) {
            parts.push(format!("Size>{}", self.size_g));
        }
        if has(Criteria::SIZE_LT) {
            parts.push(format!("Size<{}", self.size_l));
        }
        if has(Criteria::SIZE_GE) {
            parts.push(format!("Size>={}", self.size_g));
        }
        if has(Criteria::SIZE_LE) {
            parts.push(format!("Size<={}", self.size_l));
        }
        if let Some(md5) = &self.md5 {
            parts.push(format!("MD5={}", hex::encode_upper(md5)));
        }
        if let Some(sha1) = &self.sha1 {
            parts.push(format!("SHA1={}", hex::encode_upper(sha1)));
        }
        if let Some(sha256) = &self.sha256 {
            parts.push(format!("SHA256={}", hex::encode_upper(sha256)));
        }
        if let Some(contains) = &self.contains {
            if contains.is_hex {
                parts.push(format!("Contains=0x{}", hex::encode_upper(contains.needle())));
            } else {
                parts.push(format!("Contains={}", String::from_utf8_lossy(contains.needle())));
            }
        }
        if let Some(header) = &self.header {
            if !header.bytes.is_empty() {
                parts.push(format!("Header=0x{}", hex::encode_upper(&header.bytes)));
            }
            if header.regex.is_some() {
                parts.push(format!(
                    "Header matches regex {} (within first {} bytes)",
                    header.regex_source, header.len
                ));
            }
        }
        if has(Criteria::YARA) {
            if self.yara_rules.is_empty() {
                parts.push("Content matches any yara rule".to_string());
            } else {
                parts.push(format!("Content matches yara rule(s): {}", self.yara_spec));
            }
        }

        f.write_str(&parts.join(", "))
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Fluent construction of a [`SearchTerm`]
#[derive(Debug, Clone, Default)]
pub struct SearchTermBuilder {
    config: TermConfig,
}

macro_rules! string_setters {
    ($($(#[$doc:meta])* $method:ident => $field:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $method(mut self, value: impl Into<String>) -> Self {
                self.config.$field = Some(value.into());
                self
            }
        )*
    };
}

macro_rules! size_setters {
    ($($method:ident => $field:ident;)*) => {
        $(
            pub fn $method(mut self, value: u64) -> Self {
                self.config.$field = Some(value);
                self
            }
        )*
    };
}

impl SearchTermBuilder {
    string_setters! {
        /// Generic `file[:ads]` / `file[#ea]` spec
        spec => spec;
        /// Exact file name
        name => name;
        name_match => name_match;
        name_regex => name_regex;
        path => path;
        path_match => path_match;
        path_regex => path_regex;
        ads => ads;
        ads_match => ads_match;
        ads_regex => ads_regex;
        ea => ea;
        ea_match => ea_match;
        ea_regex => ea_regex;
        /// `$DATA`-style attribute type name or numeric code
        attr_type => attr_type;
        attr_name => attr_name;
        attr_match => attr_match;
        attr_regex => attr_regex;
        md5 => md5;
        sha1 => sha1;
        sha256 => sha256;
        header => header;
        header_hex => header_hex;
        header_regex => header_regex;
        contains => contains;
        contains_hex => contains_hex;
        yara_rule => yara_rule;
    }

    size_setters! {
        size_eq => size;
        size_gt => size_gt;
        size_ge => size_ge;
        size_lt => size_lt;
        size_le => size_le;
    }

    pub fn header_len(mut self, len: usize) -> Self {
        self.config.header_len = Some(len);
        self
    }

    pub fn build(&self) -> Result<SearchTerm> {
        SearchTerm::from_config(&self.config)
    }
}
