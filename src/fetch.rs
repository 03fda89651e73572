//! `fetch.txt` references: payload declared by the bag but not yet present.
//!
//! Line format: `<url> <size|-> data/<relpath>\n`, where `-` marks an
//! unknown size.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::paths::DATA_PREFIX;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRef {
    /// Payload path relative to `data/`.
    pub path: String,
    pub url:  String,
    pub size: Option<u64>,
}

impl FetchRef {
    pub fn bag_path(&self) -> String {
        format!("{DATA_PREFIX}{}", self.path)
    }

    pub fn encode_line(&self) -> String {
        let size = self.size.map_or_else(|| "-".to_owned(), |s| s.to_string());
        format!("{} {} {}\n", self.url, size, self.bag_path())
    }

    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.splitn(3, ' ');
        let url  = parts.next().filter(|u| !u.is_empty())?;
        let size = parts.next()?;
        let path = parts.next()?;
        let size = match size {
            "-" => None,
            s   => Some(s.parse().ok()?),
        };
        let path = path.strip_prefix(DATA_PREFIX).unwrap_or(path);
        if path.is_empty() {
            return None;
        }
        Some(FetchRef { path: path.to_owned(), url: url.to_owned(), size })
    }
}

pub fn parse<R: BufRead>(reader: R) -> io::Result<Vec<FetchRef>> {
    let mut refs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        match FetchRef::parse_line(&line) {
            Some(r) => refs.push(r),
            None if line.trim().is_empty() => {}
            None => tracing::warn!(line = %line, "skipping malformed fetch.txt line"),
        }
    }
    Ok(refs)
}

pub fn read_fetch(path: &Path) -> io::Result<Vec<FetchRef>> {
    parse(BufReader::new(File::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_known_and_unknown_size() {
        let known = FetchRef { path: "x/y.bin".into(), url: "http://h/y".into(), size: Some(12) };
        assert_eq!(known.encode_line(), "http://h/y 12 data/x/y.bin\n");
        let unknown = FetchRef { size: None, ..known };
        assert_eq!(unknown.encode_line(), "http://h/y - data/x/y.bin\n");
    }

    #[test]
    fn parse_keeps_spaces_in_path() {
        let r = FetchRef::parse_line("urn:x 5 data/a b.txt").unwrap();
        assert_eq!(r.path, "a b.txt");
        assert_eq!(r.size, Some(5));
        assert!(FetchRef::parse_line("urn:x notanumber data/a").is_none());
    }

    #[test]
    fn parse_skips_blank_lines() {
        let text = "u1 - data/a\n\nu2 3 data/b\n";
        let refs = parse(text.as_bytes()).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].url, "u2");
    }
}
