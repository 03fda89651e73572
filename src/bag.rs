//! [`Bag`]: read-only view over a finished bag directory.
//!
//! Nothing here mutates the directory.  Manifests are re-read on every
//! call; metadata files are parsed once per path and cached.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::checksum::{digest_file, sniff_algorithm, ChecksumAlgorithm, TAGMANIFEST_PREFIX};
use crate::error::{BagError, BagResult};
use crate::fetch::read_fetch;
use crate::manifest::read_manifest;
use crate::metadata::PropertyCache;
use crate::paths::{self, BAGIT_TXT, BAG_INFO_TXT, DATA_DIR, DATA_PREFIX, FETCH_TXT};

// ── ValidationReport ─────────────────────────────────────────────────────────

/// Findings of one verification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Missing declaration/data directory/manifests, or a leftover `fetch.txt`.
    pub structural:     Vec<String>,
    /// Manifest entries with no file behind them.
    pub missing:        Vec<String>,
    /// Files present in the bag but absent from the manifests.
    pub unmanifested:   Vec<String>,
    /// Entries whose recomputed digest differs from the recorded one.
    pub mismatched:     Vec<String>,
    pub digests_checked: bool,
}

impl ValidationReport {
    pub fn is_complete(&self) -> bool {
        self.structural.is_empty() && self.missing.is_empty() && self.unmanifested.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        self.is_complete() && self.digests_checked && self.mismatched.is_empty()
    }
}

// ── Bag ──────────────────────────────────────────────────────────────────────

pub struct Bag {
    root:       PathBuf,
    sealed:     bool,
    algorithm:  OnceCell<ChecksumAlgorithm>,
    properties: PropertyCache,
}

impl Bag {
    /// Adopt a finished bag directory as an unsealed view.
    pub fn open<P: Into<PathBuf>>(root: P) -> Self {
        Self::with_seal(root.into(), false)
    }

    pub(crate) fn with_seal(root: PathBuf, sealed: bool) -> Self {
        Self { root, sealed, algorithm: OnceCell::new(), properties: PropertyCache::default() }
    }

    pub fn root(&self) -> &Path { &self.root }

    /// Folder name of the bag.
    pub fn name(&self) -> Option<&str> {
        self.root.file_name().and_then(|n| n.to_str())
    }

    pub fn is_sealed(&self) -> bool { self.sealed }

    /// Algorithm named by the single `manifest-<alg>.txt`.
    pub fn cs_algorithm(&self) -> BagResult<ChecksumAlgorithm> {
        self.algorithm
            .get_or_try_init(|| {
                sniff_algorithm(&self.root)?.ok_or_else(|| BagError::MissingManifest(self.root.clone()))
            })
            .copied()
    }

    pub fn payload_manifest(&self) -> BagResult<BTreeMap<String, String>> {
        let alg = self.cs_algorithm()?;
        Ok(read_manifest(&self.root.join(alg.manifest_name()))?)
    }

    pub fn tag_manifest(&self) -> BagResult<BTreeMap<String, String>> {
        let alg = self.cs_algorithm()?;
        Ok(read_manifest(&self.root.join(alg.tagmanifest_name()))?)
    }

    /// Unresolved payload references: payload path → URL.
    pub fn payload_refs(&self) -> BagResult<BTreeMap<String, String>> {
        let path = self.root.join(FETCH_TXT);
        if !path.is_file() {
            return Ok(BTreeMap::new());
        }
        Ok(read_fetch(&path)?.into_iter().map(|r| (r.path, r.url)).collect())
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    /// Values of `name` in `bag-info.txt`, in file order.
    pub fn metadata(&self, name: &str) -> BagResult<Vec<String>> {
        self.property(BAG_INFO_TXT, name)
    }

    /// Values of `name` in the tag file at `rel`.
    pub fn property(&self, rel: &str, name: &str) -> BagResult<Vec<String>> {
        let rel = paths::normalize(rel)?;
        let props = self.properties.get_or_parse(&paths::to_fs(&self.root, &rel))?;
        Ok(props.get(name).to_vec())
    }

    // ── Completeness / validity ──────────────────────────────────────────────

    pub fn is_complete(&self) -> BagResult<bool> {
        Ok(self.check(false)?.is_complete())
    }

    pub fn is_valid(&self) -> BagResult<bool> {
        Ok(self.check(true)?.is_valid())
    }

    /// Full verification pass, digests included.
    pub fn verify(&self) -> BagResult<ValidationReport> {
        self.check(true)
    }

    fn check(&self, digests: bool) -> BagResult<ValidationReport> {
        let mut report = ValidationReport::default();
        if !self.root.join(BAGIT_TXT).is_file() {
            report.structural.push(format!("{BAGIT_TXT} is missing"));
        }
        if !self.root.join(DATA_DIR).is_dir() {
            report.structural.push(format!("{DATA_PREFIX} is missing"));
        }
        if self.root.join(FETCH_TXT).exists() {
            report.structural.push(format!("{FETCH_TXT} lists unresolved payload"));
        }

        let alg = match self.algorithm.get() {
            Some(alg) => *alg,
            None => match sniff_algorithm(&self.root)? {
                Some(alg) => *self.algorithm.get_or_init(|| alg),
                None => {
                    report.structural.push("payload manifest is missing".to_owned());
                    return Ok(report);
                }
            },
        };

        let payload = read_manifest(&self.root.join(alg.manifest_name()))?;
        let tag_path = self.root.join(alg.tagmanifest_name());
        let tags = if tag_path.is_file() {
            read_manifest(&tag_path)?
        } else {
            report.structural.push(format!("{} is missing", alg.tagmanifest_name()));
            BTreeMap::new()
        };

        self.compare(&payload, &self.payload_files()?, &mut report);
        self.compare(&tags, &self.tag_files()?, &mut report);

        if digests && report.is_complete() {
            for (rel, expected) in payload.iter().chain(tags.iter()) {
                let actual = digest_file(alg, &paths::to_fs(&self.root, rel))?;
                if !actual.eq_ignore_ascii_case(expected) {
                    warn!(path = %rel, %expected, %actual, "checksum mismatch");
                    report.mismatched.push(rel.clone());
                }
            }
            report.digests_checked = true;
        }
        debug!(
            root = %self.root.display(),
            complete = report.is_complete(),
            valid = report.is_valid(),
            "bag checked"
        );
        Ok(report)
    }

    fn compare(
        &self,
        manifest: &BTreeMap<String, String>,
        present:  &BTreeSet<String>,
        report:   &mut ValidationReport,
    ) {
        for rel in manifest.keys() {
            if !present.contains(rel) {
                warn!(path = %rel, "manifest entry has no file");
                report.missing.push(rel.clone());
            }
        }
        for rel in present {
            if !manifest.contains_key(rel) {
                warn!(path = %rel, "file is not in any manifest");
                report.unmanifested.push(rel.clone());
            }
        }
    }

    fn walk_files(&self, start: &Path, out: &mut BTreeSet<String>) -> BagResult<()> {
        for entry in WalkDir::new(start) {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file() {
                let rel = paths::to_rel(&self.root, entry.path()).ok_or_else(|| {
                    BagError::invalid_path(&entry.path().to_string_lossy(), "not valid UTF-8")
                })?;
                out.insert(rel);
            }
        }
        Ok(())
    }

    /// Every file under `data/`.
    fn payload_files(&self) -> BagResult<BTreeSet<String>> {
        let mut out = BTreeSet::new();
        let data = self.root.join(DATA_DIR);
        if data.is_dir() {
            self.walk_files(&data, &mut out)?;
        }
        Ok(out)
    }

    /// Every file outside `data/`, except the tag manifests.
    fn tag_files(&self) -> BagResult<BTreeSet<String>> {
        let mut out = BTreeSet::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == DATA_DIR || name.starts_with(TAGMANIFEST_PREFIX) {
                continue;
            }
            self.walk_files(&entry.path(), &mut out)?;
        }
        Ok(out)
    }

    // ── File access ──────────────────────────────────────────────────────────

    fn resolve(&self, bag_rel: String) -> BagResult<PathBuf> {
        let path = paths::to_fs(&self.root, &bag_rel);
        if !path.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such bag file: {bag_rel}"),
            )
            .into());
        }
        Ok(path)
    }

    /// Filesystem path of a payload file.  Refused on a sealed bag.
    pub fn payload_path(&self, rel: &str) -> BagResult<PathBuf> {
        let bag_rel = format!("{DATA_PREFIX}{}", paths::normalize(rel)?);
        if self.sealed {
            return Err(BagError::Sealed(bag_rel));
        }
        self.resolve(bag_rel)
    }

    /// Filesystem path of a tag file.  Refused on a sealed bag.
    pub fn tag_path(&self, rel: &str) -> BagResult<PathBuf> {
        let bag_rel = paths::normalize(rel)?;
        if self.sealed {
            return Err(BagError::Sealed(bag_rel));
        }
        self.resolve(bag_rel)
    }

    /// Read-only stream over a payload file, allowed even when sealed.
    pub fn payload_stream(&self, rel: &str) -> BagResult<File> {
        let bag_rel = format!("{DATA_PREFIX}{}", paths::normalize(rel)?);
        Ok(File::open(self.resolve(bag_rel)?)?)
    }

    pub fn tag_stream(&self, rel: &str) -> BagResult<File> {
        let bag_rel = paths::normalize(rel)?;
        Ok(File::open(self.resolve(bag_rel)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_directory_is_structurally_incomplete() {
        let tmp = tempfile::tempdir().unwrap();
        let bag = Bag::open(tmp.path());
        let report = bag.verify().unwrap();
        assert!(!report.is_complete());
        assert!(!report.digests_checked);
        assert!(matches!(bag.cs_algorithm(), Err(BagError::MissingManifest(_))));
    }

    #[test]
    fn paths_are_normalized_before_lookup() {
        let tmp = tempfile::tempdir().unwrap();
        let bag = Bag::open(tmp.path());
        assert!(matches!(bag.payload_path("../escape"), Err(BagError::InvalidPath { .. })));
        assert!(bag.metadata("Contact-Name").unwrap().is_empty());
    }

    #[test]
    fn report_validity_needs_digests() {
        let report = ValidationReport::default();
        assert!(report.is_complete());
        assert!(!report.is_valid());
    }
}
