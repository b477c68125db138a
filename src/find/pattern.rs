//! Name patterns: exact, wildcard and regex
//!
//! All three are case-insensitive and match the whole candidate. Patterns
//! are compiled once when a term is built.

use std::fmt;

use regex::{Regex, RegexBuilder};

use crate::error::{FindError, Result};
use crate::ntfs::walker::strip_drive;

/// Characters that only make sense in a regex
const REGEX_ONLY: &[char] = &[':', '+', '{', '}', '[', ']', '(', ')'];

/// Wildcard characters
const WILDCARDS: &[char] = &['*', '?'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Exact,
    Wildcard,
    Regex,
}

impl PatternKind {
    /// Guess the kind of a user supplied spec. Empty specs have no kind.
    pub fn discriminate(spec: &str) -> Option<Self> {
        if spec.is_empty() {
            None
        } else if spec.contains(REGEX_ONLY) {
            Some(PatternKind::Regex)
        } else if spec.contains(WILDCARDS) {
            Some(PatternKind::Wildcard)
        } else {
            Some(PatternKind::Exact)
        }
    }
}

/// Case folding used for exact comparisons and index keys
pub fn fold_case(value: &str) -> String {
    value.to_lowercase()
}

fn eq_ignore_case(candidate: &str, folded: &str) -> bool {
    if candidate.is_ascii() && folded.is_ascii() {
        candidate.eq_ignore_ascii_case(folded)
    } else {
        fold_case(candidate) == folded
    }
}

/// A compiled name pattern
#[derive(Debug)]
pub struct NamePattern {
    kind: PatternKind,
    source: String,
    folded: String,
    regex: Option<Regex>,
}

impl NamePattern {
    pub fn new(kind: PatternKind, source: &str) -> Result<Self> {
        if source.is_empty() {
            return Err(FindError::configuration("empty name pattern"));
        }

        let regex = match kind {
            PatternKind::Exact => None,
            PatternKind::Wildcard => Some(compile(&wildcard_to_regex(source), source)?),
            PatternKind::Regex => Some(compile(&format!("^(?:{})$", source), source)?),
        };

        Ok(Self {
            kind,
            source: source.to_string(),
            folded: fold_case(source),
            regex,
        })
    }

    pub fn exact(source: &str) -> Result<Self> {
        Self::new(PatternKind::Exact, source)
    }

    pub fn wildcard(source: &str) -> Result<Self> {
        Self::new(PatternKind::Wildcard, source)
    }

    pub fn regex(source: &str) -> Result<Self> {
        Self::new(PatternKind::Regex, source)
    }

    /// Compile with the kind guessed from the spec
    pub fn discriminate(source: &str) -> Result<Self> {
        let kind = PatternKind::discriminate(source)
            .ok_or_else(|| FindError::configuration("empty name pattern"))?;
        Self::new(kind, source)
    }

    /// Yara rule spec: a wildcard when it has `*` or `?`, otherwise a
    /// case-insensitive rule name
    pub fn rule(source: &str) -> Result<Self> {
        if source.contains(WILDCARDS) {
            Self::new(PatternKind::Wildcard, source)
        } else {
            Self::new(PatternKind::Exact, source)
        }
    }

    /// Path pattern: exact and wildcard paths lose their drive prefix so
    /// that they compare against volume relative paths
    pub fn path(kind: PatternKind, source: &str) -> Result<Self> {
        match kind {
            PatternKind::Regex => Self::new(kind, source),
            _ => Self::new(kind, strip_drive(source)),
        }
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Case-folded source, the key of exact-match indexes
    pub fn key(&self) -> &str {
        &self.folded
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        match &self.regex {
            None => eq_ignore_case(candidate, &self.folded),
            Some(regex) => regex.is_match(candidate),
        }
    }

    /// Match a full path: the drive prefix is dropped and the remainder
    /// must be rooted
    pub fn is_path_match(&self, full_path: &str) -> bool {
        match path_candidate(full_path) {
            Some(path) => self.is_match(path),
            None => false,
        }
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Volume relative form of a full path, `None` if it is not rooted
pub fn path_candidate(full_path: &str) -> Option<&str> {
    let path = strip_drive(full_path);
    path.starts_with('\\').then_some(path)
}

fn compile(pattern: &str, source: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| FindError::configuration(format!("invalid pattern '{}': {}", source, e)))
}

/// Translate `*`/`?` wildcards into an anchored regex. `;` separates
/// alternative specs.
fn wildcard_to_regex(spec: &str) -> String {
    let alternatives: Vec<String> = spec
        .split(';')
        .filter(|alternative| !alternative.is_empty())
        .map(|alternative| {
            let mut out = String::with_capacity(alternative.len() * 2);
            for c in alternative.chars() {
                match c {
                    '*' => out.push_str(".*"),
                    '?' => out.push('.'),
                    c => out.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
                }
            }
            out
        })
        .collect();
    format!("(?s)^(?:{})$", alternatives.join("|"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", None)]
    #[case("secret.exe", Some(PatternKind::Exact))]
    #[case("*.exe", Some(PatternKind::Wildcard))]
    #[case("file?.txt", Some(PatternKind::Wildcard))]
    #[case("^evil.*\\.dll$", Some(PatternKind::Wildcard))]
    #[case("evil(\\d+)\\.dll", Some(PatternKind::Regex))]
    #[case("[a-z]+.bin", Some(PatternKind::Regex))]
    fn discriminates_spec_kind(#[case] spec: &str, #[case] expected: Option<PatternKind>) {
        assert_eq!(PatternKind::discriminate(spec), expected);
    }

    #[rstest]
    #[case("secret.exe", "SECRET.EXE", true)]
    #[case("secret.exe", "secret.exe.bak", false)]
    #[case("Ünïcode.txt", "üNÏCODE.TXT", true)]
    fn exact_is_case_insensitive(#[case] spec: &str, #[case] candidate: &str, #[case] expected: bool) {
        assert_eq!(NamePattern::exact(spec).unwrap().is_match(candidate), expected);
    }

    #[rstest]
    #[case("*.exe", "NOTEPAD.EXE", true)]
    #[case("*.exe", "notepad.exe.txt", false)]
    #[case("file?.log", "file1.log", true)]
    #[case("file?.log", "file12.log", false)]
    #[case("*.dll;*.sys", "driver.SYS", true)]
    #[case("a+b.txt", "a+b.txt", true)]
    #[case("\\Windows\\*", "\\Windows\\System32\\evil123.dll", true)]
    fn wildcard_matching(#[case] spec: &str, #[case] candidate: &str, #[case] expected: bool) {
        assert_eq!(NamePattern::wildcard(spec).unwrap().is_match(candidate), expected);
    }

    #[test]
    fn regex_is_full_match_and_case_insensitive() {
        let pattern = NamePattern::regex("evil.*\\.dll").unwrap();
        assert!(pattern.is_match("EVIL123.DLL"));
        assert!(!pattern.is_match("notevil123.dll"));
        assert!(!pattern.is_match("evil123.dll.bak"));
    }

    #[test]
    fn bad_regex_is_a_configuration_error() {
        let err = NamePattern::regex("evil(").unwrap_err();
        assert!(matches!(err, FindError::Configuration(_)));
        assert!(NamePattern::exact("").is_err());
    }

    #[test]
    fn paths_compare_without_drive() {
        let pattern = NamePattern::path(PatternKind::Wildcard, "C:\\Windows\\*").unwrap();
        assert!(pattern.is_path_match("C:\\Windows\\System32\\evil123.dll"));
        assert!(pattern.is_path_match("D:\\windows\\notepad.exe"));
        assert!(!pattern.is_path_match("C:\\Users\\evil.dll"));

        let exact = NamePattern::path(PatternKind::Exact, "c:\\boot.ini").unwrap();
        assert_eq!(exact.key(), "\\boot.ini");
        assert!(exact.is_path_match("C:\\BOOT.INI"));
        assert!(!exact.is_path_match("boot.ini"));
    }

    #[test]
    fn rule_spec_wildcards() {
        let wildcard = NamePattern::rule("apt_*").unwrap();
        assert_eq!(wildcard.kind(), PatternKind::Wildcard);
        assert!(wildcard.is_match("APT_Backdoor"));
        assert!(!wildcard.is_match("crime_loader"));

        let name = NamePattern::rule("Mimi[katz]").unwrap();
        assert_eq!(name.kind(), PatternKind::Exact);
        assert!(name.is_match("mimi[KATZ]"));
        assert!(NamePattern::rule("").is_err());
    }
}
