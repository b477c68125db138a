//! Yara integration
//!
//! Rules are compiled once through a [`RuleCompiler`] and scanned through
//! the resulting [`RuleScanner`]. The engine moves through
//! `Uninitialized -> Initialized -> Ready`; only a ready engine scans.
//!
//! Streams are scanned either in overlapping blocks or whole. Only rules
//! named by at least one search term are reported.

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::term::SearchTerm;
use crate::error::{FindError, Result};
use crate::logging;

// ============================================================================
// Configuration
// ============================================================================

pub const DEFAULT_BLOCK_SIZE: u32 = 20 * 1024 * 1024;
pub const DEFAULT_OVERLAP: u32 = 1024 * 1024;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Block sizes and overlaps are multiples of this
const BLOCK_ALIGNMENT: u32 = 4096;

fn align_up(value: u32) -> u32 {
    value
        .div_ceil(BLOCK_ALIGNMENT)
        .saturating_mul(BLOCK_ALIGNMENT)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMethod {
    /// Read the stream in overlapping blocks
    #[default]
    Blocks,
    /// Load the whole stream and scan it once
    FileMapping,
}

/// Where rule text comes from
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YaraSource {
    File(PathBuf),
    Text(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct YaraConfig {
    pub block_size: Option<u32>,
    pub overlap: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub scan_method: ScanMethod,
    pub sources: Vec<YaraSource>,
}

impl YaraConfig {
    pub fn with_source_text(mut self, text: impl Into<String>) -> Self {
        self.sources.push(YaraSource::Text(text.into()));
        self
    }

    pub fn with_source_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.sources.push(YaraSource::File(path.into()));
        self
    }

    /// Block size, rounded up to 4 KiB
    pub fn block_size(&self) -> u32 {
        align_up(self.block_size.unwrap_or(DEFAULT_BLOCK_SIZE))
    }

    /// Overlap between blocks, rounded up to 4 KiB
    pub fn overlap(&self) -> u32 {
        align_up(self.overlap.unwrap_or(DEFAULT_OVERLAP))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(FindError::YaraCompile("no rule source configured".into()));
        }
        if self.block_size() == 0 {
            return Err(FindError::configuration("yara block size cannot be zero"));
        }
        if self.scan_method == ScanMethod::Blocks && self.overlap() >= self.block_size() {
            return Err(FindError::configuration(format!(
                "yara overlap ({}) must be smaller than the block size ({})",
                self.overlap(),
                self.block_size()
            )));
        }
        if self.timeout().is_zero() || self.timeout() > MAX_TIMEOUT {
            return Err(FindError::configuration(format!(
                "yara timeout must be between 1s and {}s",
                MAX_TIMEOUT.as_secs()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Rule engine seams
// ============================================================================

/// Rule text with where it came from, for error messages
#[derive(Debug, Clone)]
pub struct RuleSource {
    pub origin: String,
    pub text: String,
}

/// Compiled rules
pub trait RuleScanner: Send + Sync {
    /// Identifiers of every compiled rule
    fn rules(&self) -> Vec<String>;

    /// Identifiers of the rules matching `data`
    fn scan(&self, data: &[u8]) -> Result<Vec<String>>;
}

/// Compiles rule sources into a scanner
pub trait RuleCompiler {
    fn compile(&self, sources: &[RuleSource], timeout: Duration) -> Result<Box<dyn RuleScanner>>;
}

fn load_sources(config: &YaraConfig) -> Result<Vec<RuleSource>> {
    config
        .sources
        .iter()
        .enumerate()
        .map(|(i, source)| match source {
            YaraSource::Text(text) => Ok(RuleSource {
                origin: format!("inline source #{}", i + 1),
                text: text.clone(),
            }),
            YaraSource::File(path) => fs::read_to_string(path)
                .map(|text| RuleSource {
                    origin: path.display().to_string(),
                    text,
                })
                .map_err(|e| {
                    FindError::YaraCompile(format!("cannot read {}: {}", path.display(), e))
                }),
        })
        .collect()
}

// ============================================================================
// Engine
// ============================================================================

struct YaraRuntime {
    scanner: Box<dyn RuleScanner>,
    config: YaraConfig,
    /// Rules reported by scans, all rules when `None`
    enabled: Option<Vec<String>>,
}

enum YaraState {
    Uninitialized,
    Initialized(YaraRuntime),
    Ready(YaraRuntime),
}

/// Compiled rules plus scan settings
pub struct YaraEngine {
    state: YaraState,
}

impl Default for YaraEngine {
    fn default() -> Self {
        Self {
            state: YaraState::Uninitialized,
        }
    }
}

impl std::fmt::Debug for YaraEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            YaraState::Uninitialized => "Uninitialized",
            YaraState::Initialized(_) => "Initialized",
            YaraState::Ready(_) => "Ready",
        };
        f.debug_struct("YaraEngine").field("state", &state).finish()
    }
}

impl YaraEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        !matches!(self.state, YaraState::Uninitialized)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, YaraState::Ready(_))
    }

    /// Load and compile the configured sources. Any failure is fatal.
    pub fn initialize(&mut self, config: YaraConfig, compiler: &dyn RuleCompiler) -> Result<()> {
        config.validate()?;
        let sources = load_sources(&config)?;
        let scanner = compiler.compile(&sources, config.timeout())?;

        logging::info(
            "YARA",
            &format!(
                "Compiled {} rule(s) from {} source(s)",
                scanner.rules().len(),
                sources.len()
            ),
        );

        self.state = YaraState::Initialized(YaraRuntime {
            scanner,
            config,
            enabled: None,
        });
        Ok(())
    }

    /// Bind the compiled rules to the terms that use them. Rule specs that
    /// name no compiled rule are reported but do not fail the run.
    pub fn check<'a>(&mut self, terms: impl IntoIterator<Item = &'a SearchTerm>) -> Result<()> {
        let runtime = match std::mem::replace(&mut self.state, YaraState::Uninitialized) {
            YaraState::Uninitialized => {
                return Err(FindError::YaraCompile(
                    "yara terms are registered but no rules were compiled".into(),
                ))
            }
            YaraState::Initialized(runtime) | YaraState::Ready(runtime) => runtime,
        };

        let rules = runtime.scanner.rules();
        let mut enabled: Vec<String> = Vec::new();
        let mut any_rule = false;

        for term in terms {
            if term.yara_rules().is_empty() {
                any_rule = true;
                continue;
            }
            for spec in term.yara_rules() {
                let matching: Vec<&String> = rules.iter().filter(|rule| spec.is_match(rule)).collect();
                if matching.is_empty() {
                    logging::error("YARA", &format!("Rule spec '{}' matches no compiled rule", spec));
                }
                for rule in matching {
                    if !enabled.contains(rule) {
                        enabled.push(rule.clone());
                    }
                }
            }
        }

        self.state = YaraState::Ready(YaraRuntime {
            enabled: (!any_rule).then_some(enabled),
            ..runtime
        });
        Ok(())
    }

    fn runtime(&self) -> Result<&YaraRuntime> {
        match &self.state {
            YaraState::Ready(runtime) => Ok(runtime),
            _ => Err(FindError::YaraScan("yara engine is not ready".into())),
        }
    }

    fn scan_buffer(&self, runtime: &YaraRuntime, data: &[u8], hits: &mut Vec<String>) -> Result<()> {
        for rule in runtime.scanner.scan(data)? {
            let enabled = runtime
                .enabled
                .as_ref()
                .map_or(true, |enabled| enabled.contains(&rule));
            if enabled && !hits.contains(&rule) {
                hits.push(rule);
            }
        }
        Ok(())
    }

    /// Scan a whole stream. Returns the matching enabled rules and the
    /// number of bytes read.
    pub fn scan_stream(&self, reader: &mut dyn Read) -> Result<(Vec<String>, u64)> {
        let runtime = self.runtime()?;
        let mut hits = Vec::new();

        match runtime.config.scan_method {
            ScanMethod::FileMapping => {
                let mut data = Vec::new();
                let read = reader
                    .read_to_end(&mut data)
                    .map_err(|e| FindError::stream("yara scan", e))?;
                self.scan_buffer(runtime, &data, &mut hits)?;
                Ok((hits, read as u64))
            }
            ScanMethod::Blocks => {
                let block_size = runtime.config.block_size() as usize;
                let overlap = runtime.config.overlap() as usize;
                let mut block: Vec<u8> = Vec::new();
                let mut total = 0u64;
                let mut first = true;

                loop {
                    let carried = block.len();
                    let fresh = fill_block(reader, &mut block, block_size)?;
                    total += fresh as u64;

                    if fresh == 0 && !first {
                        break;
                    }
                    self.scan_buffer(runtime, &block, &mut hits)?;
                    first = false;

                    if block.len() < block_size || carried + fresh == 0 {
                        break;
                    }
                    let keep_from = block.len().saturating_sub(overlap);
                    block.drain(..keep_from);
                }
                Ok((hits, total))
            }
        }
    }
}

/// Read into `block` until it holds `block_size` bytes or the stream ends.
/// Returns the number of bytes read.
fn fill_block(reader: &mut dyn Read, block: &mut Vec<u8>, block_size: usize) -> Result<usize> {
    let start = block.len();
    block.resize(block_size, 0);
    let mut filled = start;
    while filled < block_size {
        match reader.read(&mut block[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                block.truncate(filled);
                return Err(FindError::stream("yara scan", e));
            }
        }
    }
    block.truncate(filled);
    Ok(filled - start)
}

// ============================================================================
// yara-x backend
// ============================================================================

#[cfg(feature = "yara")]
pub use yarax::YaraXCompiler;

#[cfg(feature = "yara")]
mod yarax {
    use std::time::Duration;

    use super::{RuleCompiler, RuleScanner, RuleSource};
    use crate::error::{FindError, Result};

    /// Compiles rules with `yara-x`
    #[derive(Debug, Default, Clone, Copy)]
    pub struct YaraXCompiler;

    struct YaraXScanner {
        rules: yara_x::Rules,
        timeout: Duration,
    }

    impl RuleCompiler for YaraXCompiler {
        fn compile(&self, sources: &[RuleSource], timeout: Duration) -> Result<Box<dyn RuleScanner>> {
            let mut compiler = yara_x::Compiler::new();
            for source in sources {
                compiler
                    .add_source(source.text.as_str())
                    .map_err(|e| FindError::YaraCompile(format!("{}: {}", source.origin, e)))?;
            }
            Ok(Box::new(YaraXScanner {
                rules: compiler.build(),
                timeout,
            }))
        }
    }

    impl RuleScanner for YaraXScanner {
        fn rules(&self) -> Vec<String> {
            self.rules
                .iter()
                .map(|rule| rule.identifier().to_string())
                .collect()
        }

        fn scan(&self, data: &[u8]) -> Result<Vec<String>> {
            let mut scanner = yara_x::Scanner::new(&self.rules);
            scanner.set_timeout(self.timeout);
            let results = scanner
                .scan(data)
                .map_err(|e| FindError::YaraScan(e.to_string()))?;
            Ok(results
                .matching_rules()
                .map(|rule| rule.identifier().to_string())
                .collect())
        }
    }
}
