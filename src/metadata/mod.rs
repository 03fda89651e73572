//! Folded `Name: value` metadata files (`bag-info.txt` and friends).
//!
//! Encoding: `<Name>: <value>`, folded so that no line exceeds
//! [`FOLD_WIDTH`] characters; every continuation line starts with exactly
//! [`CONTINUATION`].
//!
//! Decoding: a line that does not start with the continuation prefix opens a
//! new property (name = text before the first colon).  Continuation lines
//! append their content after the prefix verbatim, with no inserted
//! whitespace.  The finished value is trimmed and appended to the name's
//! value list, so repeated names accumulate in file order.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::error::{BagError, BagResult};

pub const FOLD_WIDTH:   usize = 80;
pub const CONTINUATION: &str  = "  ";

/// Reserved property names.  The vocabulary is fixed but not exclusive:
/// any other well-formed name may be written too.
pub mod names {
    pub const SOURCE_ORGANIZATION:         &str = "Source-Organization";
    pub const ORGANIZATION_ADDRESS:        &str = "Organization-Address";
    pub const CONTACT_NAME:                &str = "Contact-Name";
    pub const CONTACT_PHONE:               &str = "Contact-Phone";
    pub const CONTACT_EMAIL:               &str = "Contact-Email";
    pub const EXTERNAL_DESCRIPTION:        &str = "External-Description";
    pub const EXTERNAL_IDENTIFIER:         &str = "External-Identifier";
    pub const BAGGING_DATE:                &str = "Bagging-Date";
    pub const BAG_SIZE:                    &str = "Bag-Size";
    pub const PAYLOAD_OXNUM:               &str = "Payload-Oxnum";
    pub const BAG_GROUP_IDENTIFIER:        &str = "Bag-Group-Identifier";
    pub const BAG_COUNT:                   &str = "Bag-Count";
    pub const INTERNAL_SENDER_IDENTIFIER:  &str = "Internal-Sender-Identifier";
    pub const INTERNAL_SENDER_DESCRIPTION: &str = "Internal-Sender-Description";
    pub const BAG_SOFTWARE_AGENT:          &str = "Bag-Software-Agent";

    pub const RESERVED: [&str; 14] = [
        SOURCE_ORGANIZATION, ORGANIZATION_ADDRESS, CONTACT_NAME, CONTACT_PHONE,
        CONTACT_EMAIL, EXTERNAL_DESCRIPTION, EXTERNAL_IDENTIFIER, BAGGING_DATE,
        BAG_SIZE, PAYLOAD_OXNUM, BAG_GROUP_IDENTIFIER, BAG_COUNT,
        INTERNAL_SENDER_IDENTIFIER, INTERNAL_SENDER_DESCRIPTION,
    ];
}

// ── Properties ───────────────────────────────────────────────────────────────

/// Ordered multimap of property name → values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String, Vec<String>)>,
}

impl Properties {
    pub fn push(&mut self, name: &str, value: String) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((name.to_owned(), vec![value])),
        }
    }

    /// Values recorded for `name`, in file order.  Empty if absent.
    pub fn get(&self, name: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map_or(&[][..], |(_, v)| v.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

// ── Codec ────────────────────────────────────────────────────────────────────

fn validate(name: &str, value: &str) -> BagResult<()> {
    if name.is_empty() {
        return Err(BagError::invalid_metadata(name, "name is empty"));
    }
    if name.contains([':', '\r', '\n']) {
        return Err(BagError::invalid_metadata(name, "name contains ':' or a line break"));
    }
    if name.starts_with(char::is_whitespace) || name.ends_with(char::is_whitespace) {
        return Err(BagError::invalid_metadata(name, "name has leading or trailing whitespace"));
    }
    if value.contains(['\r', '\n']) {
        return Err(BagError::invalid_metadata(name, "value contains a line break"));
    }
    Ok(())
}

/// Encode one property as folded lines, each terminated by `\n`.
pub fn encode_property(name: &str, value: &str) -> BagResult<String> {
    validate(name, value)?;
    let head = format!("{name}: ");
    let chars: Vec<char> = value.chars().collect();

    let first_room = FOLD_WIDTH.saturating_sub(head.chars().count());
    let first_len = first_room.min(chars.len());
    let mut out = head;
    out.extend(&chars[..first_len]);
    out.push('\n');

    let room = FOLD_WIDTH - CONTINUATION.len();
    for chunk in chars[first_len..].chunks(room) {
        out.push_str(CONTINUATION);
        out.extend(chunk);
        out.push('\n');
    }
    Ok(out)
}

pub fn decode<R: BufRead>(reader: R) -> io::Result<Properties> {
    let mut props = Properties::default();
    let mut pending: Option<(String, String)> = None;

    for line in reader.lines() {
        let line = line?;
        if let Some(rest) = line.strip_prefix(CONTINUATION) {
            match pending.as_mut() {
                Some((_, value)) => value.push_str(rest),
                None => tracing::warn!(line = %line, "continuation line without a property"),
            }
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        if let Some((name, value)) = pending.take() {
            props.push(&name, value.trim().to_owned());
        }
        match line.split_once(':') {
            Some((name, seed)) => {
                pending = Some((name.trim().to_owned(), seed.trim_start().to_owned()));
            }
            None => tracing::warn!(line = %line, "metadata line without a colon"),
        }
    }
    if let Some((name, value)) = pending {
        props.push(&name, value.trim().to_owned());
    }
    Ok(props)
}

/// Parse a metadata file; a missing file yields no properties.
pub fn read_properties(path: &Path) -> io::Result<Properties> {
    match File::open(path) {
        Ok(f) => decode(BufReader::new(f)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Properties::default()),
        Err(e) => Err(e),
    }
}

// ── PropertyCache ────────────────────────────────────────────────────────────

/// Memoized parses keyed by file path.
///
/// Concurrent first reads of the same file block on a single parse.
#[derive(Default)]
pub struct PropertyCache {
    cells:  Mutex<HashMap<PathBuf, Arc<OnceCell<Arc<Properties>>>>>,
    parses: AtomicUsize,
}

impl PropertyCache {
    pub fn get_or_parse(&self, path: &Path) -> io::Result<Arc<Properties>> {
        let cell = {
            let mut cells = self.cells.lock();
            Arc::clone(cells.entry(path.to_path_buf()).or_default())
        };
        cell.get_or_try_init(|| {
            tracing::debug!(path = %path.display(), "parsing metadata file");
            self.parses.fetch_add(1, Ordering::SeqCst);
            read_properties(path).map(Arc::new)
        })
        .map(Arc::clone)
    }

    /// Number of file parses performed so far.
    pub fn parses(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_value_single_line() {
        assert_eq!(encode_property("Contact-Name", "Ada").unwrap(), "Contact-Name: Ada\n");
    }

    #[test]
    fn long_value_folds_at_width() {
        let value = "x".repeat(200);
        let text = encode_property("External-Description", &value).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| l.chars().count() <= FOLD_WIDTH));
        assert!(lines[1..].iter().all(|l| l.starts_with(CONTINUATION)));

        let props = decode(text.as_bytes()).unwrap();
        assert_eq!(props.get("External-Description"), &[value]);
    }

    #[test]
    fn repeated_names_accumulate_in_order() {
        let mut text = encode_property("Contact-Email", "a@x").unwrap();
        text.push_str(&encode_property("Bag-Count", "1 of 2").unwrap());
        text.push_str(&encode_property("Contact-Email", "b@x").unwrap());
        let props = decode(text.as_bytes()).unwrap();
        assert_eq!(props.get("Contact-Email"), &["a@x".to_owned(), "b@x".to_owned()]);
        assert_eq!(props.names().collect::<Vec<_>>(), ["Contact-Email", "Bag-Count"]);
        assert!(props.get("Missing").is_empty());
    }

    #[test]
    fn continuation_appends_without_whitespace() {
        let text = "Name: abc\n  def\n  ghi \nOther: 1\n";
        let props = decode(text.as_bytes()).unwrap();
        assert_eq!(props.get("Name"), &["abcdefghi".to_owned()]);
        assert_eq!(props.get("Other"), &["1".to_owned()]);
    }

    #[test]
    fn rejects_malformed_properties() {
        assert!(encode_property("", "v").is_err());
        assert!(encode_property("A:B", "v").is_err());
        assert!(encode_property("Name", "two\nlines").is_err());
        assert!(encode_property(" Contact-Name", "v").is_err());
        assert!(matches!(
            encode_property("Contact-Name ", "v"),
            Err(BagError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn cache_parses_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bag-info.txt");
        std::fs::write(&path, "Bag-Count: 1\n").unwrap();
        let cache = PropertyCache::default();
        let first = cache.get_or_parse(&path).unwrap();
        std::fs::write(&path, "Bag-Count: 2\n").unwrap();
        let second = cache.get_or_parse(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.get("Bag-Count"), &["1".to_owned()]);
        assert_eq!(cache.parses(), 1);
    }

    #[test]
    fn concurrent_first_reads_share_one_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bag-info.txt");
        std::fs::write(&path, "Contact-Name: Ada\nContact-Name: Grace\n").unwrap();
        let cache = PropertyCache::default();
        let barrier = std::sync::Barrier::new(8);

        let results: Vec<Arc<Properties>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        cache.get_or_parse(&path).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(cache.parses(), 1);
        assert!(results.iter().all(|p| Arc::ptr_eq(p, &results[0])));
        assert_eq!(results[0].get("Contact-Name"), &["Ada".to_owned(), "Grace".to_owned()]);
    }

    proptest! {
        #[test]
        fn fold_unfold_round_trips(value in "[a-zA-Z0-9][ -~]{0,300}[a-zA-Z0-9]") {
            let text = encode_property("External-Description", &value).unwrap();
            let props = decode(text.as_bytes()).unwrap();
            prop_assert_eq!(props.get("External-Description"), &[value][..]);
        }
    }
}
