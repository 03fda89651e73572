//! Line-oriented checksum manifests.
//!
//! One entry per line: `<lower-hex-checksum> <bag-relative-path>\n`.
//! Decoding splits on the first space only, so the path keeps any spaces
//! it contains.  Blank lines are ignored.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use crate::error::{BagError, BagResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path:     String,
    pub checksum: String,
}

pub fn encode_line(checksum: &str, path: &str) -> String {
    format!("{checksum} {path}\n")
}

/// Parse one manifest line.  Returns `None` for blank or malformed lines.
pub fn parse_line(line: &str) -> Option<ManifestEntry> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (checksum, path) = line.split_once(' ')?;
    if checksum.is_empty() || path.is_empty() {
        return None;
    }
    Some(ManifestEntry { path: path.to_owned(), checksum: checksum.to_ascii_lowercase() })
}

pub fn parse<R: BufRead>(reader: R) -> io::Result<Vec<ManifestEntry>> {
    let mut entries = Vec::new();
    for line in reader.lines() {
        if let Some(entry) = parse_line(&line?) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Read a manifest file into a path → checksum map.
pub fn read_manifest(path: &Path) -> io::Result<BTreeMap<String, String>> {
    let entries = parse(BufReader::new(File::open(path)?))?;
    Ok(entries.into_iter().map(|e| (e.path, e.checksum)).collect())
}

// ── ManifestWriter ───────────────────────────────────────────────────────────

/// Terminal manifest sink: writes lines without digesting them.
///
/// Used for the tag manifest (the one bag file never itself checksummed) and
/// for payload manifests reopened in append mode during hole resolution.
pub struct ManifestWriter<W: Write> {
    writer:  W,
    entries: usize,
}

impl<W: Write> ManifestWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, entries: 0 }
    }

    pub fn append(&mut self, checksum: &str, path: &str) -> BagResult<()> {
        if path.contains(['\r', '\n']) {
            return Err(BagError::invalid_path(path, "contains a line break"));
        }
        self.writer.write_all(encode_line(checksum, path).as_bytes())?;
        self.entries += 1;
        Ok(())
    }

    pub fn entries(&self) -> usize { self.entries }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn close(mut self) -> io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}
