//! mftfind - Multi-criteria NTFS file search
//!
//! Matches the records of an NTFS Master File Table (and optionally the
//! entries of `$I30` directory indexes) against a set of search terms, and
//! reports one match per (file, term) pair.
//!
//! # Features
//!
//! - **Names and paths**: exact, wildcard and regex, case-insensitive
//! - **Streams**: ADS names, extended attribute names, attribute types
//! - **Sizes**: exact value or bounded range over `$DATA` attributes
//! - **Content**: MD5/SHA1/SHA256 in a single read, header bytes, substrings
//! - **Yara**: rule scanning with each stream scanned at most once
//! - **Exclusions**: terms that drop matching results
//! - **Recovery**: deleted records and carved `$I30` entries
//!
//! Walking a volume is the job of an [`ntfs::MftWalker`]; the engine only
//! evaluates what the walker delivers.
//!
//! # Example
//!
//! ```no_run
//! use std::ops::ControlFlow;
//! use mftfind::{FindConfig, FindOptions};
//! use mftfind::ntfs::MemoryWalker;
//!
//! fn main() -> mftfind::Result<()> {
//!     let config = FindConfig::from_file("find.json")?;
//!     let (mut find, locations) = config.build()?;
//!
//!     let mut walker = MemoryWalker::new();
//!     find.find(&mut walker, &locations, FindOptions::default(), |m| {
//!         println!("{}", m);
//!         ControlFlow::Continue(())
//!     })?;
//!     find.print_profiles();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod find;
pub mod logging;
pub mod ntfs;

// Re-export main types
pub use config::{FindConfig, FindSettings};
pub use error::{FindError, Result};
pub use find::{
    FileFind, FindOptions, FindStats, HashAlgorithms, Match, SearchTerm, SearchTermBuilder,
    TermConfig, YaraConfig,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Format bytes as human-readable string
pub fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Format a Windows FILETIME as a human-readable date string
pub fn format_filetime(filetime: u64) -> String {
    ntfs::structs::filetime_to_datetime(filetime)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_binary() {
        assert!(format_size(2048).ends_with("KiB"));
        assert!(format_size(3 * 1024 * 1024).ends_with("MiB"));
    }

    #[test]
    fn filetime_epoch() {
        assert_eq!(format_filetime(116444736000000000), "1970-01-01 00:00:00");
    }
}
