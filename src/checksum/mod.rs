//! Checksum registry: one algorithm per bag, named in the manifest file names.
//!
//! # Identity rules
//! The algorithm token (`md5`, `sha256`, ...) is the only place the
//! algorithm is recorded on disk: `manifest-<token>.txt` and
//! `tagmanifest-<token>.txt`.  Every entry of both manifests uses it.
//! A bag carrying manifests for more than one token is rejected rather
//! than resolved by picking one.
//!
//! Digests are always rendered as lower-case hex.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::error::{BagError, BagResult};

const READ_BUF_SIZE: usize = 64 * 1024;

// ── ChecksumAlgorithm ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Md5,
    Sha256,
    Sha512,
    Blake3,
}

impl ChecksumAlgorithm {
    pub const ALL: [ChecksumAlgorithm; 4] = [
        ChecksumAlgorithm::Md5,
        ChecksumAlgorithm::Sha256,
        ChecksumAlgorithm::Sha512,
        ChecksumAlgorithm::Blake3,
    ];

    /// Token used in manifest file names.
    pub fn name(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5    => "md5",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
            ChecksumAlgorithm::Blake3 => "blake3",
        }
    }

    pub fn from_name(s: &str) -> BagResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5"    => Ok(ChecksumAlgorithm::Md5),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            "blake3" => Ok(ChecksumAlgorithm::Blake3),
            _        => Err(BagError::UnknownAlgorithm(s.to_owned())),
        }
    }

    /// Length in hex characters of a digest produced by this algorithm.
    pub fn hex_len(self) -> usize {
        match self {
            ChecksumAlgorithm::Md5    => 32,
            ChecksumAlgorithm::Sha256 => 64,
            ChecksumAlgorithm::Sha512 => 128,
            ChecksumAlgorithm::Blake3 => 64,
        }
    }

    pub fn manifest_name(self) -> String {
        format!("{MANIFEST_PREFIX}{}{MANIFEST_SUFFIX}", self.name())
    }

    pub fn tagmanifest_name(self) -> String {
        format!("{TAGMANIFEST_PREFIX}{}{MANIFEST_SUFFIX}", self.name())
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub const MANIFEST_PREFIX:    &str = "manifest-";
pub const TAGMANIFEST_PREFIX: &str = "tagmanifest-";
pub const MANIFEST_SUFFIX:    &str = ".txt";

// ── Checksum trait ───────────────────────────────────────────────────────────

/// A rolling digest fed incrementally and consumed once.
pub trait Checksum: Send {
    fn algorithm(&self) -> ChecksumAlgorithm;
    fn update(&mut self, data: &[u8]);
    fn finalize_hex(self: Box<Self>) -> String;
}

/// Any RustCrypto [`Digest`] implementation.
pub struct RustCryptoChecksum<D> {
    algorithm: ChecksumAlgorithm,
    inner:     D,
}

impl<D: Digest + Send> Checksum for RustCryptoChecksum<D> {
    fn algorithm(&self) -> ChecksumAlgorithm { self.algorithm }
    fn update(&mut self, data: &[u8]) { Digest::update(&mut self.inner, data) }
    fn finalize_hex(self: Box<Self>) -> String { hex::encode(self.inner.finalize()) }
}

pub struct Blake3Checksum(blake3::Hasher);

impl Checksum for Blake3Checksum {
    fn algorithm(&self) -> ChecksumAlgorithm { ChecksumAlgorithm::Blake3 }
    fn update(&mut self, data: &[u8]) { self.0.update(data); }
    fn finalize_hex(self: Box<Self>) -> String { self.0.finalize().to_hex().to_string() }
}

// ── Factory ──────────────────────────────────────────────────────────────────

pub fn get_checksum(algorithm: ChecksumAlgorithm) -> Box<dyn Checksum> {
    match algorithm {
        ChecksumAlgorithm::Md5 => Box::new(RustCryptoChecksum { algorithm, inner: Md5::new() }),
        ChecksumAlgorithm::Sha256 => Box::new(RustCryptoChecksum { algorithm, inner: Sha256::new() }),
        ChecksumAlgorithm::Sha512 => Box::new(RustCryptoChecksum { algorithm, inner: Sha512::new() }),
        ChecksumAlgorithm::Blake3 => Box::new(Blake3Checksum(blake3::Hasher::new())),
    }
}

/// Digest everything `reader` yields in a single streaming pass.
pub fn digest_reader<R: Read>(algorithm: ChecksumAlgorithm, mut reader: R) -> io::Result<String> {
    let mut checksum = get_checksum(algorithm);
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        checksum.update(&buf[..n]);
    }
    Ok(checksum.finalize_hex())
}

pub fn digest_file(algorithm: ChecksumAlgorithm, path: &Path) -> io::Result<String> {
    digest_reader(algorithm, BufReader::new(File::open(path)?))
}

pub fn digest_bytes(algorithm: ChecksumAlgorithm, data: &[u8]) -> String {
    let mut checksum = get_checksum(algorithm);
    checksum.update(data);
    checksum.finalize_hex()
}

// ── Sniffing ─────────────────────────────────────────────────────────────────

/// Find the algorithm named by the `manifest-<algo>.txt` file in `dir`.
///
/// Returns `Ok(None)` when no payload manifest exists.  More than one
/// payload manifest is a configuration error.
pub fn sniff_algorithm(dir: &Path) -> BagResult<Option<ChecksumAlgorithm>> {
    let mut found: Vec<String> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() { continue; }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(token) = name
            .strip_prefix(MANIFEST_PREFIX)
            .and_then(|rest| rest.strip_suffix(MANIFEST_SUFFIX))
        {
            found.push(token.to_owned());
        }
    }
    found.sort();
    match found.len() {
        0 => Ok(None),
        1 => ChecksumAlgorithm::from_name(&found[0]).map(Some),
        _ => Err(BagError::AmbiguousAlgorithm(found)),
    }
}
