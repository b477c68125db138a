//! Logging for mftfind
//!
//! Installs a `log` backend that writes timestamped lines to a log file
//! and/or stderr. Engine code logs through the `log` macros with a module
//! tag as target (`FIND`, `YARA`, `HASH`, ...).
//!
//! Per-record diagnostics are noisy on a full volume, so they go through
//! [`trace_record`], which only emits for names containing the trace filter.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;

use log::{LevelFilter, Metadata, Record};
use parking_lot::{Mutex, RwLock};

use crate::find::{Match, SearchTerm};

/// Global logger instance
static LOGGER: OnceLock<FindLogger> = OnceLock::new();

/// Name filter for per-record tracing
static TRACE_FILTER: OnceLock<RwLock<Option<String>>> = OnceLock::new();

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log file, truncated on init
    pub path: Option<PathBuf>,
    /// Mirror every line to stderr
    pub stderr: bool,
    pub level: LevelFilter,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: None,
            stderr: true,
            level: LevelFilter::Info,
        }
    }
}

/// `log` backend writing to a file and/or stderr
pub struct FindLogger {
    file: Option<Mutex<File>>,
    stderr: bool,
    level: LevelFilter,
}

impl FindLogger {
    fn new(config: &LogConfig) -> Self {
        let file = config.path.as_ref().and_then(|path| {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)
                .ok()
        });

        if let (Some(path), Some(_)) = (&config.path, &file) {
            eprintln!("[mftfind] Logging to: {}", path.display());
        }

        Self {
            file: file.map(Mutex::new),
            stderr: config.stderr,
            level: config.level,
        }
    }
}

impl log::Log for FindLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let entry = format!(
            "[{}] [{:5}] [{}] {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        );

        if let Some(file) = &self.file {
            let _ = file.lock().write_all(entry.as_bytes());
        }
        if self.stderr {
            eprint!("{}", entry);
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            let _ = file.lock().flush();
        }
    }
}

/// Initialize the global logger. Later calls are ignored.
pub fn init(config: LogConfig) {
    let logger = LOGGER.get_or_init(|| FindLogger::new(&config));
    if log::set_logger(logger).is_ok() {
        log::set_max_level(config.level);
    }
}

/// Log debug message
pub fn debug(module: &str, message: &str) {
    log::debug!(target: module, "{}", message);
}

/// Log info message
pub fn info(module: &str, message: &str) {
    log::info!(target: module, "{}", message);
}

/// Log warning message
pub fn warn(module: &str, message: &str) {
    log::warn!(target: module, "{}", message);
}

/// Log error message
pub fn error(module: &str, message: &str) {
    log::error!(target: module, "{}", message);
}

/// Flush the log file
pub fn flush() {
    log::logger().flush();
}

/// Write a separator line for readability
pub fn separator(label: &str) {
    info("---", &format!("========== {} ==========", label));
}

// ============================================================================
// Per-record tracing
// ============================================================================

/// Set the name filter for per-record tracing. `None` disables tracing.
pub fn set_filter(pattern: Option<String>) {
    let filter = TRACE_FILTER.get_or_init(|| RwLock::new(None));
    *filter.write() = pattern.map(|p| p.to_lowercase());
}

/// Check if a name matches the trace filter
#[inline]
fn matches_filter(name: &str) -> bool {
    TRACE_FILTER
        .get()
        .and_then(|filter| {
            filter
                .read()
                .as_ref()
                .map(|pattern| name.to_lowercase().contains(pattern.as_str()))
        })
        .unwrap_or(false)
}

/// Log a per-record diagnostic - FILTERED by name
pub fn trace_record(module: &str, name: &str, message: &str) {
    if !matches_filter(name) {
        return;
    }
    debug(module, &format!("'{}': {}", name, message));
}

// ============================================================================
// Reporting helpers
// ============================================================================

/// Log one emitted match
pub fn log_match(m: &Match) {
    let names = m.full_names().join(", ");
    info(
        "MATCH",
        &format!("{} [{}] matched '{}'", m.frn, names, m.term),
    );
}

/// Log the profile of one term after a run
pub fn log_term_profile(term: &SearchTerm) {
    let profile = term.stats().profile();
    info(
        "PROFILE",
        &format!(
            "'{}': {} match(es), {} miss(es), {:.3}s, {} read",
            term,
            profile.matches,
            profile.misses,
            profile.elapsed.as_secs_f64(),
            crate::format_size(profile.bytes_read)
        ),
    );
}
