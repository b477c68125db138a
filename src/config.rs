//! Run configuration
//!
//! [`FindConfig`] is what a configuration file holds. It is finalized once
//! into [`FindSettings`], where optional and tri-state values are resolved.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::Result;
use crate::find::{FileFind, HashAlgorithms, TermConfig, YaraConfig};
use crate::ntfs::{Location, LocationSet, ShadowPolicy};

/// A search as written in a JSON configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FindConfig {
    /// Keep every match in memory for later retrieval
    pub store_matches: bool,
    /// Attach attribute streams to matches
    pub provide_stream: bool,
    /// Digests reported for matches, e.g. `md5,sha256`
    pub match_hash: Option<String>,
    /// Unset means live volumes only
    pub include_shadows: Option<bool>,
    pub shadows_only: bool,
    pub yara: Option<YaraConfig>,
    pub locations: Vec<Location>,
    pub terms: Vec<TermConfig>,
    pub excludes: Vec<TermConfig>,
}

impl FindConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Resolve the configuration into run settings
    pub fn finalize(&self) -> Result<FindSettings> {
        let match_hash = match &self.match_hash {
            Some(spec) => HashAlgorithms::parse(spec)?,
            None => HashAlgorithms::empty(),
        };
        if let Some(yara) = &self.yara {
            yara.validate()?;
        }

        Ok(FindSettings {
            store_matches: self.store_matches,
            provide_stream: self.provide_stream,
            match_hash,
            shadows: ShadowPolicy::resolve(self.include_shadows, self.shadows_only),
            yara: self.yara.clone(),
        })
    }

    /// Build an engine with the configured terms and exclusions
    pub fn build(&self) -> Result<(FileFind, LocationSet)> {
        let settings = self.finalize()?;
        let locations = settings.location_set(self.locations.clone());

        let mut find = FileFind::new(settings);
        find.add_terms_from_config(&self.terms)?;
        find.add_exclude_terms_from_config(&self.excludes)?;
        Ok((find, locations))
    }
}

/// Resolved run settings
#[derive(Debug, Clone, Default)]
pub struct FindSettings {
    pub store_matches: bool,
    pub provide_stream: bool,
    pub match_hash: HashAlgorithms,
    pub shadows: ShadowPolicy,
    pub yara: Option<YaraConfig>,
}

impl FindSettings {
    pub fn with_store_matches(mut self, store: bool) -> Self {
        self.store_matches = store;
        self
    }

    pub fn with_provide_stream(mut self, provide: bool) -> Self {
        self.provide_stream = provide;
        self
    }

    pub fn with_match_hash(mut self, algorithms: HashAlgorithms) -> Self {
        self.match_hash = algorithms;
        self
    }

    pub fn with_shadows(mut self, shadows: ShadowPolicy) -> Self {
        self.shadows = shadows;
        self
    }

    pub fn with_yara(mut self, yara: YaraConfig) -> Self {
        self.yara = Some(yara);
        self
    }

    pub fn location_set(&self, locations: Vec<Location>) -> LocationSet {
        LocationSet::new(locations, self.shadows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FindError;
    use rstest::rstest;

    #[test]
    fn full_configuration() {
        let config = FindConfig::from_json(
            r#"{
                "store_matches": true,
                "match_hash": "md5,sha1",
                "include_shadows": true,
                "yara": { "sources": [ { "text": "rule a { condition: true }" } ] },
                "locations": [
                    { "volume": "C:" },
                    { "volume": "C:", "snapshot": "{1234}" }
                ],
                "terms": [ { "name_match": "*.exe", "size_gt": 0 } ],
                "excludes": [ { "path_match": "C:\\Windows\\*" } ]
            }"#,
        )
        .unwrap();

        let settings = config.finalize().unwrap();
        assert!(settings.store_matches);
        assert_eq!(settings.match_hash, HashAlgorithms::MD5 | HashAlgorithms::SHA1);
        assert_eq!(settings.shadows, ShadowPolicy::WithShadows);
        assert!(settings.yara.is_some());

        let (find, locations) = config.build().unwrap();
        assert_eq!(locations.selected().count(), 2);
        assert_eq!(find.all_search_terms().len(), 2);
    }

    #[rstest]
    #[case(r#"{}"#, ShadowPolicy::LiveOnly)]
    #[case(r#"{ "include_shadows": false }"#, ShadowPolicy::LiveOnly)]
    #[case(r#"{ "include_shadows": true }"#, ShadowPolicy::WithShadows)]
    #[case(r#"{ "shadows_only": true }"#, ShadowPolicy::ShadowsOnly)]
    fn shadow_option_is_resolved_once(#[case] json: &str, #[case] expected: ShadowPolicy) {
        let settings = FindConfig::from_json(json).unwrap().finalize().unwrap();
        assert_eq!(settings.shadows, expected);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = FindConfig::from_json(r#"{ "store_all": true }"#).unwrap_err();
        assert!(matches!(err, FindError::Json(_)));
    }

    #[test]
    fn invalid_terms_fail_the_build() {
        let config = FindConfig::from_json(r#"{ "terms": [ { "name": "a", "name_match": "b*" } ] }"#).unwrap();
        assert!(matches!(config.build().unwrap_err(), FindError::Configuration(_)));
    }

    #[test]
    fn invalid_match_hash() {
        let config = FindConfig::from_json(r#"{ "match_hash": "crc32" }"#).unwrap();
        assert!(config.finalize().is_err());
    }
}
