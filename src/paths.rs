//! Bag-relative path rules and the fixed file names of the bag layout.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::checksum::{MANIFEST_PREFIX, MANIFEST_SUFFIX, TAGMANIFEST_PREFIX};
use crate::error::{BagError, BagResult};

pub const DATA_DIR:      &str = "data";
pub const DATA_PREFIX:   &str = "data/";
pub const BAGIT_TXT:     &str = "bagit.txt";
pub const BAG_INFO_TXT:  &str = "bag-info.txt";
pub const FETCH_TXT:     &str = "fetch.txt";

/// Normalise a caller-supplied relative path to the `/`-separated form
/// recorded in manifests.
///
/// Rejects empty, absolute and parent-escaping paths, and anything with a
/// CR or LF (those would split a manifest line).
pub fn normalize(rel: &str) -> BagResult<String> {
    if rel.contains(['\r', '\n']) {
        return Err(BagError::invalid_path(rel, "contains a line break"));
    }
    let unified = rel.replace('\\', "/");
    if unified.starts_with('/') || Path::new(rel).is_absolute() {
        return Err(BagError::invalid_path(rel, "must be relative"));
    }
    let mut parts: Vec<&str> = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => {}
            ".." => return Err(BagError::invalid_path(rel, "escapes the bag root")),
            p => parts.push(p),
        }
    }
    if parts.is_empty() {
        return Err(BagError::invalid_path(rel, "is empty"));
    }
    Ok(parts.join("/"))
}

/// Join a normalised `/`-separated path onto `root`.
pub fn to_fs(root: &Path, rel: &str) -> PathBuf {
    rel.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part))
}

/// Render `path` relative to `root` with `/` separators.
pub fn to_rel(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    parts.map(|p| p.join("/"))
}

/// Create `rel` under `root` for writing, creating parents on demand.
///
/// Bags are write-once: an existing target fails with
/// [`BagError::AlreadyExists`].
pub fn create_new(root: &Path, rel: &str) -> BagResult<File> {
    let path = to_fs(root, rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| BagError::from_create(e, rel))
}

/// True for the top-level files the bag itself owns, and for anything
/// under a top-level name that completeness checks skip as a tag manifest.
pub fn is_reserved_tag(rel: &str) -> bool {
    if rel == BAGIT_TXT || rel == BAG_INFO_TXT || rel == FETCH_TXT {
        return true;
    }
    if rel.split('/').next().is_some_and(|first| first.starts_with(TAGMANIFEST_PREFIX)) {
        return true;
    }
    (rel.starts_with(MANIFEST_PREFIX) || rel.starts_with(TAGMANIFEST_PREFIX))
        && rel.ends_with(MANIFEST_SUFFIX)
        && !rel.contains('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_cleans_separators() {
        assert_eq!(normalize("a/./b//c.txt").unwrap(), "a/b/c.txt");
        assert_eq!(normalize("dir\\file.bin").unwrap(), "dir/file.bin");
        assert_eq!(normalize("with space.txt").unwrap(), "with space.txt");
    }

    #[test]
    fn normalize_rejects_escapes() {
        for bad in ["", "/etc/passwd", "../x", "a/../../b", "line\nbreak", "./"] {
            assert!(matches!(normalize(bad), Err(BagError::InvalidPath { .. })), "{bad:?}");
        }
    }

    #[test]
    fn reserved_names() {
        assert!(is_reserved_tag("bagit.txt"));
        assert!(is_reserved_tag("manifest-sha512.txt"));
        assert!(is_reserved_tag("tagmanifest-md5.txt"));
        assert!(is_reserved_tag("tagmanifest-x.bin"));
        assert!(is_reserved_tag("tagmanifest-notes/readme.txt"));
        assert!(!is_reserved_tag("notes/manifest-md5.txt"));
        assert!(!is_reserved_tag("notes/tagmanifest-md5.txt"));
        assert!(!is_reserved_tag("readme.txt"));
    }
}
