//! Digesting write chain.
//!
//! A [`DigestWriter`] wraps a raw sink and a rolling checksum.  Every byte
//! accepted by the sink is also fed to the checksum, so a file's digest is
//! computed in the same pass that writes it.
//!
//! # Tail chaining
//! A writer may carry a *tail*: a callback invoked exactly once, on
//! [`DigestWriter::close`], with `(checksum, relative_path)`.  The tail is
//! normally another writer's `append`, which is how the bookkeeping nests:
//!
//! ```text
//! data/file ──close──▶ manifest-<alg>.txt ──close──▶ tagmanifest-<alg>.txt
//! ```
//!
//! The payload manifest is itself a `DigestWriter`, so the manifest lines it
//! receives are digested too and its own checksum lands in the tag manifest
//! when it is closed.
//!
//! # Ordering
//! `close` flushes and drops the sink before the tail runs: a line is only
//! ever recorded for fully written bytes.  A writer dropped without `close`
//! records nothing, which leaves the bag detectably incomplete.

use std::io::{self, Write};

use crate::checksum::{get_checksum, Checksum, ChecksumAlgorithm};
use crate::error::BagResult;
use crate::manifest::encode_line;

/// Records `(checksum, relative_path)` for a closed file.
pub type TailAppend<'a> = Box<dyn FnOnce(&str, &str) -> BagResult<()> + Send + 'a>;

pub struct DigestWriter<'a, W: Write> {
    sink:     W,
    checksum: Box<dyn Checksum>,
    rel_path: String,
    tail:     Option<TailAppend<'a>>,
    written:  u64,
}

impl<'a, W: Write> DigestWriter<'a, W> {
    pub fn new(sink: W, algorithm: ChecksumAlgorithm, rel_path: impl Into<String>) -> Self {
        Self {
            sink,
            checksum: get_checksum(algorithm),
            rel_path: rel_path.into(),
            tail:     None,
            written:  0,
        }
    }

    pub fn with_tail(
        sink:      W,
        algorithm: ChecksumAlgorithm,
        rel_path:  impl Into<String>,
        tail:      TailAppend<'a>,
    ) -> Self {
        let mut w = Self::new(sink, algorithm, rel_path);
        w.tail = Some(tail);
        w
    }

    pub fn rel_path(&self) -> &str { &self.rel_path }

    pub fn algorithm(&self) -> ChecksumAlgorithm { self.checksum.algorithm() }

    /// Bytes accepted so far.
    pub fn written(&self) -> u64 { self.written }

    /// Write one manifest line through this writer (and its digest).
    pub fn append(&mut self, checksum: &str, path: &str) -> BagResult<()> {
        self.write_all(encode_line(checksum, path).as_bytes())?;
        Ok(())
    }

    /// Flush and close the sink, then hand the digest to the tail.
    ///
    /// Returns the lower-case hex checksum of everything written.
    pub fn close(self) -> BagResult<String> {
        let DigestWriter { mut sink, checksum, rel_path, tail, .. } = self;
        sink.flush()?;
        drop(sink);
        let hex = checksum.finalize_hex();
        if let Some(tail) = tail {
            tail(&hex, &rel_path)?;
        }
        Ok(hex)
    }
}

impl<W: Write> Write for DigestWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.sink.write(buf)?;
        self.checksum.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::digest_bytes;
    use crate::manifest::ManifestWriter;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn close_reports_checksum_of_written_bytes() {
        let mut w = DigestWriter::new(Vec::new(), ChecksumAlgorithm::Md5, "data/a.txt");
        w.write_all(b"h").unwrap();
        w.write_all(b"i").unwrap();
        assert_eq!(w.written(), 2);
        assert_eq!(w.close().unwrap(), digest_bytes(ChecksumAlgorithm::Md5, b"hi"));
    }

    #[test]
    fn tails_nest_file_manifest_tagmanifest() {
        let tags = Arc::new(Mutex::new(ManifestWriter::new(Vec::new())));
        let tag_tail = Arc::clone(&tags);
        let mut manifest = DigestWriter::with_tail(
            Vec::new(),
            ChecksumAlgorithm::Md5,
            "manifest-md5.txt",
            Box::new(move |cs, p| tag_tail.lock().append(cs, p)),
        );

        {
            let m = &mut manifest;
            let mut file = DigestWriter::with_tail(
                Vec::new(),
                ChecksumAlgorithm::Md5,
                "data/a.txt",
                Box::new(move |cs, p| m.append(cs, p)),
            );
            file.write_all(b"hi").unwrap();
            file.close().unwrap();
        }
        let manifest_cs = manifest.close().unwrap();

        let expected_manifest = format!("{} data/a.txt\n", digest_bytes(ChecksumAlgorithm::Md5, b"hi"));
        assert_eq!(manifest_cs, digest_bytes(ChecksumAlgorithm::Md5, expected_manifest.as_bytes()));

        let tags = Arc::try_unwrap(tags).ok().unwrap().into_inner().close().unwrap();
        assert_eq!(String::from_utf8(tags).unwrap(), format!("{manifest_cs} manifest-md5.txt\n"));
    }

    #[test]
    fn dropped_writer_records_nothing() {
        let mut lines = ManifestWriter::new(Vec::new());
        {
            let l = &mut lines;
            let mut file = DigestWriter::with_tail(
                Vec::new(),
                ChecksumAlgorithm::Sha256,
                "data/partial.bin",
                Box::new(move |cs, p| l.append(cs, p)),
            );
            file.write_all(b"partial").unwrap();
        }
        assert_eq!(lines.entries(), 0);
    }
}
