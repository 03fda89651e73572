//! [`Filler`]: builds a fresh bag.
//!
//! ```no_run
//! use holeybag::{BagOptions, Filler, PackageFormat};
//!
//! let mut filler = Filler::new(BagOptions::default())?;
//! filler.payload("readme.txt", &b"Hello, bag!"[..])?;
//! filler.payload_ref("later/big.bin", Some(1_000_000), "https://example.org/big.bin")?;
//! filler.metadata("Source-Organization", "Example Org")?;
//! let package = filler.to_package(PackageFormat::Zip)?;
//! # Ok::<(), holeybag::BagError>(())
//! ```
//!
//! # Lifecycle
//! Manifest writers are opened at construction.  `payload`, `payload_ref`,
//! `tag` and `metadata` accumulate content; the first terminal call
//! (`to_directory`, `to_package`, `to_stream`) finalizes the bag exactly
//! once.  Later additions fail with [`BagError::AlreadyBuilt`].
//!
//! # Finalize order
//! 1. auto metadata (Bagging-Date, Bag-Size, Payload-Oxnum, agent)
//! 2. close `bag-info.txt` and `fetch.txt` (tag-manifested)
//! 3. close the payload manifest (tag-manifested)
//! 4. write `bagit.txt` (tag-manifested)
//! 5. close the tag manifest, the one file never itself checksummed

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::archive::{self, PackageFormat};
use crate::bag::Bag;
use crate::chain::{DigestWriter, TailAppend};
use crate::config::BagOptions;
use crate::error::{BagError, BagResult};
use crate::fetch::FetchRef;
use crate::manifest::ManifestWriter;
use crate::metadata::{encode_property, names};
use crate::paths::{self, BAGIT_TXT, BAG_INFO_TXT, DATA_DIR, DATA_PREFIX, FETCH_TXT};

type FileSink = BufWriter<File>;
type SharedManifest = Arc<Mutex<ManifestWriter<FileSink>>>;

const SIZE_UNITS: [&str; 5] = ["bytes", "KB", "MB", "GB", "TB"];

/// Human-scaled size: divide by 1000 while the value is at least 1000.
pub fn human_size(bytes: u64) -> String {
    if bytes < 1000 {
        return format!("{bytes} {}", SIZE_UNITS[0]);
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1000.0 && unit < SIZE_UNITS.len() - 1 {
        size /= 1000.0;
        unit += 1;
    }
    format!("{size:.1} {}", SIZE_UNITS[unit])
}

// ── Filler ───────────────────────────────────────────────────────────────────

pub struct Filler {
    root:             PathBuf,
    options:          BagOptions,
    built:            bool,
    package:          Option<(PackageFormat, PathBuf)>,

    tag_manifest:     Option<SharedManifest>,
    payload_manifest: Option<DigestWriter<'static, FileSink>>,
    bag_info:         Option<DigestWriter<'static, FileSink>>,
    fetch:            Option<DigestWriter<'static, FileSink>>,

    /// Payload paths declared in `fetch.txt`.
    declared:         HashSet<String>,
    /// Property names written by the caller; auto metadata skips these.
    user_names:       HashSet<String>,
    payload_bytes:    u64,
    payload_files:    u64,
}

impl Filler {
    /// Start a bag in a fresh directory under the system temp dir.
    pub fn new(options: BagOptions) -> BagResult<Self> {
        let root = std::env::temp_dir().join(format!("bag-{}", Uuid::new_v4()));
        Self::in_dir(root, options)
    }

    /// Start a bag in `root`, which must be absent or empty.
    pub fn in_dir<P: AsRef<Path>>(root: P, options: BagOptions) -> BagResult<Self> {
        let root = root.as_ref().to_path_buf();
        if root.exists() && fs::read_dir(&root)?.next().is_some() {
            return Err(BagError::AlreadyExists(root.display().to_string()));
        }
        fs::create_dir_all(root.join(DATA_DIR))?;

        let alg = options.algorithm;
        let tag_file = paths::create_new(&root, &alg.tagmanifest_name())?;
        let tag_manifest = Arc::new(Mutex::new(ManifestWriter::new(BufWriter::new(tag_file))));

        let manifest_name = alg.manifest_name();
        let manifest_file = paths::create_new(&root, &manifest_name)?;
        let payload_manifest = DigestWriter::with_tail(
            BufWriter::new(manifest_file),
            alg,
            manifest_name,
            tail_into(&tag_manifest),
        );

        debug!(root = %root.display(), algorithm = %alg, "filler started");
        Ok(Self {
            root,
            options,
            built:            false,
            package:          None,
            tag_manifest:     Some(tag_manifest),
            payload_manifest: Some(payload_manifest),
            bag_info:         None,
            fetch:            None,
            declared:         HashSet::new(),
            user_names:       HashSet::new(),
            payload_bytes:    0,
            payload_files:    0,
        })
    }

    pub fn root(&self) -> &Path { &self.root }

    pub fn options(&self) -> &BagOptions { &self.options }

    pub fn is_built(&self) -> bool { self.built }

    /// Payload bytes and file count so far, including declared references.
    pub fn totals(&self) -> (u64, u64) { (self.payload_bytes, self.payload_files) }

    // ── Accumulate ───────────────────────────────────────────────────────────

    /// Stream `source` into `data/<rel>` and record it in the payload
    /// manifest.  Returns the file's checksum.
    pub fn payload<R: Read>(&mut self, rel: &str, mut source: R) -> BagResult<String> {
        self.ensure_unbuilt()?;
        let rel = paths::normalize(rel)?;
        let bag_path = format!("{DATA_PREFIX}{rel}");
        if self.declared.contains(&rel) {
            return Err(BagError::AlreadyExists(bag_path));
        }
        let file = paths::create_new(&self.root, &bag_path)?;

        let alg = self.options.algorithm;
        let manifest = self.payload_manifest.as_mut().ok_or(BagError::AlreadyBuilt)?;
        let mut writer = DigestWriter::with_tail(
            BufWriter::new(file),
            alg,
            bag_path.as_str(),
            Box::new(move |cs, p| manifest.append(cs, p)),
        );
        io::copy(&mut source, &mut writer)?;
        let written = writer.written();
        let checksum = writer.close()?;

        self.payload_bytes += written;
        self.payload_files += 1;
        debug!(path = %bag_path, bytes = written, "payload written");
        Ok(checksum)
    }

    pub fn payload_file<P: AsRef<Path>>(&mut self, rel: &str, path: P) -> BagResult<String> {
        self.payload(rel, File::open(path)?)
    }

    /// Declare payload that is not delivered yet.  Nothing is fetched; one
    /// line is appended to `fetch.txt`.
    pub fn payload_ref(&mut self, rel: &str, size: Option<u64>, url: &str) -> BagResult<()> {
        self.ensure_unbuilt()?;
        let rel = paths::normalize(rel)?;
        let reference = FetchRef { path: rel, url: url.to_owned(), size };
        let bag_path = reference.bag_path();
        if url.is_empty() || url.contains(char::is_whitespace) {
            return Err(BagError::invalid_path(url, "reference URL must be non-empty without whitespace"));
        }
        if self.declared.contains(&reference.path) || paths::to_fs(&self.root, &bag_path).exists() {
            return Err(BagError::AlreadyExists(bag_path));
        }

        if self.fetch.is_none() {
            let file = paths::create_new(&self.root, FETCH_TXT)?;
            let tail = self.tag_tail()?;
            self.fetch = Some(DigestWriter::with_tail(BufWriter::new(file), self.options.algorithm, FETCH_TXT, tail));
        }
        if let Some(fetch) = self.fetch.as_mut() {
            fetch.write_all(reference.encode_line().as_bytes())?;
        }

        self.payload_bytes += size.unwrap_or(0);
        self.payload_files += 1;
        debug!(path = %bag_path, url, "payload reference declared");
        self.declared.insert(reference.path);
        Ok(())
    }

    /// Stream `source` into a tag file at `<root>/<rel>`.  Tag files may not
    /// live under `data/` or shadow the bag's own files.
    pub fn tag<R: Read>(&mut self, rel: &str, mut source: R) -> BagResult<String> {
        self.ensure_unbuilt()?;
        let rel = paths::normalize(rel)?;
        if rel == DATA_DIR || rel.starts_with(DATA_PREFIX) {
            return Err(BagError::invalid_path(&rel, "tag files may not live under data/"));
        }
        if paths::is_reserved_tag(&rel) {
            return Err(BagError::ReservedPath(rel));
        }
        let file = paths::create_new(&self.root, &rel)?;
        let mut writer = DigestWriter::with_tail(BufWriter::new(file), self.options.algorithm, rel.as_str(), self.tag_tail()?);
        io::copy(&mut source, &mut writer)?;
        let checksum = writer.close()?;
        debug!(path = %rel, "tag file written");
        Ok(checksum)
    }

    /// Append one `Name: value` property to `bag-info.txt`.
    pub fn metadata(&mut self, name: &str, value: &str) -> BagResult<()> {
        self.ensure_unbuilt()?;
        self.write_property(name, value)?;
        self.user_names.insert(name.to_owned());
        Ok(())
    }

    fn write_property(&mut self, name: &str, value: &str) -> BagResult<()> {
        let text = encode_property(name, value)?;
        if self.bag_info.is_none() {
            let file = paths::create_new(&self.root, BAG_INFO_TXT)?;
            let tail = self.tag_tail()?;
            self.bag_info = Some(DigestWriter::with_tail(BufWriter::new(file), self.options.algorithm, BAG_INFO_TXT, tail));
        }
        if let Some(info) = self.bag_info.as_mut() {
            info.write_all(text.as_bytes())?;
        }
        Ok(())
    }

    // ── Finalize ─────────────────────────────────────────────────────────────

    fn ensure_unbuilt(&self) -> BagResult<()> {
        if self.built { Err(BagError::AlreadyBuilt) } else { Ok(()) }
    }

    fn tag_tail(&self) -> BagResult<TailAppend<'static>> {
        self.tag_manifest.as_ref().map(tail_into).ok_or(BagError::AlreadyBuilt)
    }

    fn write_auto_metadata(&mut self) -> BagResult<()> {
        let auto = [
            (names::BAGGING_DATE, chrono::Local::now().format("%Y-%m-%d").to_string()),
            (names::BAG_SIZE, human_size(self.payload_bytes)),
            (names::PAYLOAD_OXNUM, format!("{}.{}", self.payload_bytes, self.payload_files)),
            (names::BAG_SOFTWARE_AGENT, self.options.software_agent.clone()),
        ];
        for (name, value) in auto {
            if !self.user_names.contains(name) && !value.is_empty() {
                self.write_property(name, &value)?;
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> BagResult<()> {
        if self.built {
            return Ok(());
        }
        if self.options.auto_metadata {
            self.write_auto_metadata()?;
        }
        if let Some(info) = self.bag_info.take() {
            info.close()?;
        }
        if let Some(fetch) = self.fetch.take() {
            fetch.close()?;
        }
        if let Some(manifest) = self.payload_manifest.take() {
            manifest.close()?;
        }

        let declaration = format!(
            "BagIt-Version: {}\nTag-File-Character-Encoding: UTF-8\n",
            self.options.bagit_version
        );
        let file = paths::create_new(&self.root, BAGIT_TXT)?;
        let mut writer = DigestWriter::with_tail(BufWriter::new(file), self.options.algorithm, BAGIT_TXT, self.tag_tail()?);
        writer.write_all(declaration.as_bytes())?;
        writer.close()?;

        if let Some(shared) = self.tag_manifest.take() {
            match Arc::try_unwrap(shared) {
                Ok(manifest) => { manifest.into_inner().close()?; }
                Err(shared)  => shared.lock().flush()?,
            }
        }

        self.built = true;
        info!(
            root = %self.root.display(),
            bytes = self.payload_bytes,
            files = self.payload_files,
            holes = self.declared.len(),
            "bag finalized"
        );
        Ok(())
    }

    // ── Terminal calls ───────────────────────────────────────────────────────

    /// Finalize and return the loose bag directory.
    pub fn to_directory(&mut self) -> BagResult<PathBuf> {
        self.finalize()?;
        if self.package.is_some() {
            return Err(BagError::AlreadyBuilt);
        }
        Ok(self.root.clone())
    }

    /// Finalize, serialize to `<bagName>.<ext>` beside the bag directory and
    /// delete the loose directory.
    pub fn to_package(&mut self, format: PackageFormat) -> BagResult<PathBuf> {
        self.finalize()?;
        if let Some((packed, path)) = &self.package {
            return if *packed == format { Ok(path.clone()) } else { Err(BagError::AlreadyBuilt) };
        }
        let dest = format.package_path(&self.root);
        archive::pack(&self.root, format, &dest)?;
        fs::remove_dir_all(&self.root)?;
        info!(package = %dest.display(), ?format, "bag packaged");
        self.package = Some((format, dest.clone()));
        Ok(dest)
    }

    /// Finalize, package, and hand back a reader over the package.  The
    /// package file is removed when the stream is dropped.
    pub fn to_stream(mut self, format: PackageFormat) -> BagResult<PackageStream> {
        let path = self.to_package(format)?;
        Ok(PackageStream { file: File::open(&path)?, path, format })
    }

    /// Finalize and open the result as a [`Bag`].
    pub fn to_bag(&mut self) -> BagResult<Bag> {
        Ok(Bag::open(self.to_directory()?))
    }
}

fn tail_into(manifest: &SharedManifest) -> TailAppend<'static> {
    let manifest = Arc::clone(manifest);
    Box::new(move |cs, p| manifest.lock().append(cs, p))
}

// ── PackageStream ────────────────────────────────────────────────────────────

/// A serialized bag handed out as a byte stream.
pub struct PackageStream {
    file:   File,
    path:   PathBuf,
    format: PackageFormat,
}

impl PackageStream {
    pub fn format(&self) -> PackageFormat { self.format }
}

impl Read for PackageStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Drop for PackageStream {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "could not remove streamed package");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_size_scales_by_thousands() {
        assert_eq!(human_size(0), "0 bytes");
        assert_eq!(human_size(999), "999 bytes");
        assert_eq!(human_size(1_500), "1.5 KB");
        assert_eq!(human_size(2_000_000), "2.0 MB");
        assert_eq!(human_size(3_200_000_000_000_000), "3200.0 TB");
    }

    #[test]
    fn additions_after_build_fail() {
        let tmp = tempfile::tempdir().unwrap();
        let mut filler = Filler::in_dir(tmp.path().join("b"), BagOptions::default()).unwrap();
        filler.to_directory().unwrap();
        assert!(matches!(filler.payload("x", &b"1"[..]), Err(BagError::AlreadyBuilt)));
        assert!(matches!(filler.metadata("Bag-Count", "1"), Err(BagError::AlreadyBuilt)));
        assert_eq!(filler.to_directory().unwrap(), tmp.path().join("b"));
    }

    #[test]
    fn refuses_non_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("stray"), "x").unwrap();
        assert!(matches!(
            Filler::in_dir(tmp.path(), BagOptions::default()),
            Err(BagError::AlreadyExists(_))
        ));
    }

    #[test]
    fn tag_rules() {
        let tmp = tempfile::tempdir().unwrap();
        let mut filler = Filler::in_dir(tmp.path().join("b"), BagOptions::default()).unwrap();
        assert!(matches!(filler.tag("data/x.txt", &b""[..]), Err(BagError::InvalidPath { .. })));
        assert!(matches!(filler.tag("bagit.txt", &b""[..]), Err(BagError::ReservedPath(_))));
        filler.tag("notes/readme.txt", &b"n"[..]).unwrap();
        assert!(matches!(filler.tag("notes/readme.txt", &b"m"[..]), Err(BagError::AlreadyExists(_))));
    }

    #[test]
    fn tag_under_tagmanifest_name_is_reserved() {
        let tmp = tempfile::tempdir().unwrap();
        let mut filler = Filler::in_dir(tmp.path().join("b"), BagOptions::default()).unwrap();
        assert!(matches!(filler.tag("tagmanifest-notes/readme.txt", &b"n"[..]), Err(BagError::ReservedPath(_))));
        assert!(matches!(filler.tag("tagmanifest-x.bin", &b"n"[..]), Err(BagError::ReservedPath(_))));
        filler.tag("notes/tagmanifest-copy.txt", &b"n"[..]).unwrap();

        let bag = filler.to_bag().unwrap();
        assert!(!bag.root().join("tagmanifest-notes").exists());
        let report = bag.verify().unwrap();
        assert!(report.is_valid(), "{report:?}");
    }

    #[test]
    fn user_metadata_suppresses_auto_value() {
        let tmp = tempfile::tempdir().unwrap();
        let mut filler = Filler::in_dir(tmp.path().join("b"), BagOptions::default()).unwrap();
        filler.metadata("Bagging-Date", "1999-12-31").unwrap();
        let bag = filler.to_bag().unwrap();
        assert_eq!(bag.metadata("Bagging-Date").unwrap(), vec!["1999-12-31".to_owned()]);
        assert_eq!(bag.metadata("Payload-Oxnum").unwrap(), vec!["0.0".to_owned()]);
    }
}
