//! Content hashing
//!
//! [`HashingReader`] decorates an attribute stream and feeds every byte read
//! through it to the requested digests, so one read pass yields MD5, SHA1
//! and SHA256 together.

use std::fmt;
use std::io::{self, Read};

use bitflags::bitflags;
use md5::Md5;
use sha1::{Digest, Sha1};
use sha2::Sha256;

use super::criteria::Criteria;
use crate::error::{FindError, Result};

pub const BYTES_IN_MD5_HASH: usize = 16;
pub const BYTES_IN_SHA1_HASH: usize = 20;
pub const BYTES_IN_SHA256_HASH: usize = 32;

bitflags! {
    /// Digest algorithms
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HashAlgorithms: u8 {
        const MD5 = 1 << 0;
        const SHA1 = 1 << 1;
        const SHA256 = 1 << 2;
    }
}

impl HashAlgorithms {
    /// Digests a term's `DATA_*` criteria require
    pub fn from_criteria(criteria: Criteria) -> Self {
        let mut algorithms = Self::empty();
        algorithms.set(Self::MD5, criteria.contains(Criteria::DATA_MD5));
        algorithms.set(Self::SHA1, criteria.contains(Criteria::DATA_SHA1));
        algorithms.set(Self::SHA256, criteria.contains(Criteria::DATA_SHA256));
        algorithms
    }

    /// Parse a `,`/`;`/`|` separated list such as `md5,sha256`
    pub fn parse(spec: &str) -> Result<Self> {
        spec.split([',', ';', '|'])
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .try_fold(Self::empty(), |acc, name| {
                let algorithm = match name.to_ascii_lowercase().as_str() {
                    "md5" => Self::MD5,
                    "sha1" => Self::SHA1,
                    "sha256" => Self::SHA256,
                    _ => {
                        return Err(FindError::configuration(format!(
                            "unknown hash algorithm '{}'",
                            name
                        )))
                    }
                };
                Ok(acc | algorithm)
            })
    }
}

impl fmt::Display for HashAlgorithms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::MD5, "MD5"),
            (Self::SHA1, "SHA1"),
            (Self::SHA256, "SHA256"),
        ]
        .into_iter()
        .filter(|(algorithm, _)| self.contains(*algorithm))
        .map(|(_, name)| name)
        .collect();
        f.write_str(&names.join(","))
    }
}

/// Digests of one attribute's content
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeHashes {
    pub md5: Option<[u8; BYTES_IN_MD5_HASH]>,
    pub sha1: Option<[u8; BYTES_IN_SHA1_HASH]>,
    pub sha256: Option<[u8; BYTES_IN_SHA256_HASH]>,
}

impl AttributeHashes {
    /// Algorithms with a computed digest
    pub fn algorithms(&self) -> HashAlgorithms {
        let mut algorithms = HashAlgorithms::empty();
        algorithms.set(HashAlgorithms::MD5, self.md5.is_some());
        algorithms.set(HashAlgorithms::SHA1, self.sha1.is_some());
        algorithms.set(HashAlgorithms::SHA256, self.sha256.is_some());
        algorithms
    }

    pub fn covers(&self, needed: HashAlgorithms) -> bool {
        self.algorithms().contains(needed)
    }

    /// Keep existing digests, take the missing ones from `other`
    pub fn merge(&mut self, other: AttributeHashes) {
        self.md5 = self.md5.or(other.md5);
        self.sha1 = self.sha1.or(other.sha1);
        self.sha256 = self.sha256.or(other.sha256);
    }

    pub fn md5_hex(&self) -> Option<String> {
        self.md5.map(hex::encode_upper)
    }

    pub fn sha1_hex(&self) -> Option<String> {
        self.sha1.map(hex::encode_upper)
    }

    pub fn sha256_hex(&self) -> Option<String> {
        self.sha256.map(hex::encode_upper)
    }
}

/// Reader decorator computing digests over everything read through it
pub struct HashingReader<R> {
    inner: R,
    md5: Option<Md5>,
    sha1: Option<Sha1>,
    sha256: Option<Sha256>,
    bytes_read: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R, algorithms: HashAlgorithms) -> Self {
        Self {
            inner,
            md5: algorithms.contains(HashAlgorithms::MD5).then(Md5::new),
            sha1: algorithms.contains(HashAlgorithms::SHA1).then(Sha1::new),
            sha256: algorithms.contains(HashAlgorithms::SHA256).then(Sha256::new),
            bytes_read: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Drain the rest of the stream and finalize the digests
    pub fn finish(mut self) -> io::Result<AttributeHashes> {
        io::copy(&mut self, &mut io::sink())?;
        Ok(AttributeHashes {
            md5: self.md5.map(|h| h.finalize().into()),
            sha1: self.sha1.map(|h| h.finalize().into()),
            sha256: self.sha256.map(|h| h.finalize().into()),
        })
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        let chunk = &buf[..read];
        if let Some(h) = self.md5.as_mut() {
            h.update(chunk);
        }
        if let Some(h) = self.sha1.as_mut() {
            h.update(chunk);
        }
        if let Some(h) = self.sha256.as_mut() {
            h.update(chunk);
        }
        self.bytes_read += read as u64;
        Ok(read)
    }
}

/// Hash a whole stream in one pass. Returns the digests and the number of
/// bytes read.
pub fn hash_stream<R: Read>(reader: R, algorithms: HashAlgorithms) -> io::Result<(AttributeHashes, u64)> {
    let mut hashing = HashingReader::new(reader, algorithms);
    io::copy(&mut hashing, &mut io::sink())?;
    let bytes_read = hashing.bytes_read();
    Ok((hashing.finish()?, bytes_read))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const EMPTY_MD5: &str = "D41D8CD98F00B204E9800998ECF8427E";
    const ABC_SHA1: &str = "A9993E364706816ABA3E25717850C26C9CD0D89D";
    const ABC_SHA256: &str = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";

    #[test]
    fn computes_requested_digests_only() {
        let (hashes, read) = hash_stream(Cursor::new(b"abc"), HashAlgorithms::SHA1 | HashAlgorithms::SHA256).unwrap();
        assert_eq!(read, 3);
        assert_eq!(hashes.md5, None);
        assert_eq!(hashes.sha1_hex().as_deref(), Some(ABC_SHA1));
        assert_eq!(hashes.sha256_hex().as_deref(), Some(ABC_SHA256));
        assert!(hashes.covers(HashAlgorithms::SHA1));
        assert!(!hashes.covers(HashAlgorithms::MD5 | HashAlgorithms::SHA1));
    }

    #[test]
    fn empty_stream_md5() {
        let (hashes, read) = hash_stream(Cursor::new(Vec::<u8>::new()), HashAlgorithms::MD5).unwrap();
        assert_eq!(read, 0);
        assert_eq!(hashes.md5_hex().as_deref(), Some(EMPTY_MD5));
    }

    #[test]
    fn parses_algorithm_lists() {
        assert_eq!(
            HashAlgorithms::parse("md5, SHA256").unwrap(),
            HashAlgorithms::MD5 | HashAlgorithms::SHA256
        );
        assert_eq!(HashAlgorithms::parse("").unwrap(), HashAlgorithms::empty());
        assert!(HashAlgorithms::parse("crc32").is_err());
        assert_eq!((HashAlgorithms::MD5 | HashAlgorithms::SHA1).to_string(), "MD5,SHA1");
    }

    #[test]
    fn criteria_to_algorithms() {
        let criteria = Criteria::SIZE_GT | Criteria::DATA_MD5 | Criteria::DATA_SHA256;
        assert_eq!(
            HashAlgorithms::from_criteria(criteria),
            HashAlgorithms::MD5 | HashAlgorithms::SHA256
        );
    }

    #[test]
    fn merge_keeps_existing_digests() {
        let mut left = AttributeHashes { md5: Some([1; 16]), ..Default::default() };
        let right = AttributeHashes { md5: Some([2; 16]), sha1: Some([3; 20]), ..Default::default() };
        left.merge(right);
        assert_eq!(left.md5, Some([1; 16]));
        assert_eq!(left.sha1, Some([3; 20]));
    }
}
