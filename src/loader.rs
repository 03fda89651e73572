//! [`Loader`]: adopts or inflates an existing bag and fills its holes.
//!
//! ```no_run
//! use holeybag::{BagOptions, Loader};
//! use std::fs::File;
//!
//! let loader = Loader::open("incoming/b1.zip", BagOptions::default())?;
//! for (path, url) in loader.payload_refs()? {
//!     // fetch `url` however the caller likes, then:
//!     loader.resolve_ref(&path, File::open(format!("cache/{path}"))?)?;
//! }
//! let bag = loader.load()?;
//! assert!(bag.is_complete()?);
//! # Ok::<(), holeybag::BagError>(())
//! ```
//!
//! # Concurrency
//! The unresolved-reference map is concurrent, so `resolve_ref` for
//! distinct paths may run from several threads.  Payload manifest appends
//! are serialized behind a mutex.
//!
//! # Patching
//! Resolution appends to the payload manifest and shrinks `fetch.txt`, which
//! invalidates their tag manifest checksums.  Rather than keep digests live
//! across a session that may span long gaps, `finish()` recomputes both
//! files' checksums once and rewrites just those tag manifest lines.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive::{self, PackageFormat};
use crate::bag::Bag;
use crate::chain::DigestWriter;
use crate::checksum::{digest_file, sniff_algorithm, ChecksumAlgorithm};
use crate::config::BagOptions;
use crate::error::{BagError, BagResult};
use crate::fetch::{read_fetch, FetchRef};
use crate::manifest::{encode_line, parse_line, ManifestWriter};
use crate::paths::{self, DATA_PREFIX, FETCH_TXT};

pub struct Loader {
    root:      PathBuf,
    options:   BagOptions,
    algorithm: ChecksumAlgorithm,
    refs:      OnceCell<DashMap<String, FetchRef>>,
    resolved:  AtomicUsize,
    manifest:  Mutex<Option<ManifestWriter<BufWriter<File>>>>,
}

impl Loader {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// Adopt a bag directory, or inflate a `.zip` / `.tgz` package into a
    /// sibling directory named after it and delete the package.
    pub fn open<P: AsRef<Path>>(path: P, options: BagOptions) -> BagResult<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            return Self::adopt(path.to_path_buf(), options);
        }
        if !path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no bag at {}", path.display()),
            )
            .into());
        }
        let (format, stem) = PackageFormat::detect(path)
            .ok_or_else(|| BagError::UnsupportedFormat(path.display().to_string()))?;
        if !options.accepts(format) {
            return Err(BagError::UnsupportedFormat(format.extension().to_owned()));
        }
        let dest = path.with_file_name(stem);
        if dest.exists() {
            return Err(BagError::AlreadyExists(dest.display().to_string()));
        }
        let files = archive::unpack_file(path, format, &dest)?;
        fs::remove_file(path)?;
        info!(package = %path.display(), dest = %dest.display(), files, "package inflated");
        Self::adopt(dest, options)
    }

    /// Inflate a package stream into `target`, or into a fresh directory
    /// under the system temp dir.
    pub fn from_stream<R: Read>(
        reader:  R,
        format:  PackageFormat,
        target:  Option<&Path>,
        options: BagOptions,
    ) -> BagResult<Self> {
        if !options.accepts(format) {
            return Err(BagError::UnsupportedFormat(format.extension().to_owned()));
        }
        let dest = match target {
            Some(t) => t.to_path_buf(),
            None    => std::env::temp_dir().join(format!("bag-{}", Uuid::new_v4())),
        };
        let files = archive::unpack_stream(reader, format, &dest)?;
        info!(dest = %dest.display(), files, ?format, "stream inflated");
        Self::adopt(dest, options)
    }

    fn adopt(root: PathBuf, options: BagOptions) -> BagResult<Self> {
        let algorithm = sniff_algorithm(&root)?.ok_or_else(|| BagError::MissingManifest(root.clone()))?;
        debug!(root = %root.display(), %algorithm, "bag adopted");
        Ok(Self {
            root,
            options,
            algorithm,
            refs:     OnceCell::new(),
            resolved: AtomicUsize::new(0),
            manifest: Mutex::new(None),
        })
    }

    pub fn root(&self) -> &Path { &self.root }

    pub fn algorithm(&self) -> ChecksumAlgorithm { self.algorithm }

    pub fn options(&self) -> &BagOptions { &self.options }

    // ── References ───────────────────────────────────────────────────────────

    fn refs(&self) -> BagResult<&DashMap<String, FetchRef>> {
        self.refs.get_or_try_init(|| {
            let map = DashMap::new();
            let path = self.root.join(FETCH_TXT);
            if path.is_file() {
                for reference in read_fetch(&path)? {
                    map.insert(reference.path.clone(), reference);
                }
            }
            debug!(count = map.len(), "payload references loaded");
            Ok::<_, BagError>(map)
        })
    }

    /// Unresolved references: payload path (relative to `data/`) → URL.
    pub fn payload_refs(&self) -> BagResult<BTreeMap<String, String>> {
        Ok(self
            .refs()?
            .iter()
            .map(|r| (r.key().clone(), r.value().url.clone()))
            .collect())
    }

    /// Materialize a declared reference from `source`.  Returns the file's
    /// checksum.
    pub fn resolve_ref<R: Read>(&self, rel: &str, mut source: R) -> BagResult<String> {
        let rel = paths::normalize(rel)?;
        let refs = self.refs()?;
        let declared_size = match refs.get(&rel) {
            Some(r) => r.size,
            None    => return Err(BagError::UnknownReference(rel)),
        };
        let bag_path = format!("{DATA_PREFIX}{rel}");
        let file = paths::create_new(&self.root, &bag_path)?;

        let mut writer = DigestWriter::with_tail(
            BufWriter::new(file),
            self.algorithm,
            bag_path.as_str(),
            Box::new(move |cs, p| self.append_manifest(cs, p)),
        );
        io::copy(&mut source, &mut writer)?;
        let written = writer.written();
        let checksum = writer.close()?;

        if let Some(expected) = declared_size {
            if expected != written {
                warn!(path = %bag_path, expected, written, "resolved size differs from declaration");
            }
        }
        refs.remove(&rel);
        self.resolved.fetch_add(1, Ordering::SeqCst);
        debug!(path = %bag_path, bytes = written, "reference resolved");
        Ok(checksum)
    }

    fn append_manifest(&self, checksum: &str, path: &str) -> BagResult<()> {
        let mut guard = self.manifest.lock();
        if guard.is_none() {
            let file = OpenOptions::new()
                .append(true)
                .open(self.root.join(self.algorithm.manifest_name()))?;
            *guard = Some(ManifestWriter::new(BufWriter::new(file)));
        }
        match guard.as_mut() {
            Some(manifest) => manifest.append(checksum, path),
            None => Ok(()),
        }
    }

    // ── Finish ───────────────────────────────────────────────────────────────

    fn finish(&self) -> BagResult<()> {
        if self.resolved.swap(0, Ordering::SeqCst) == 0 {
            return Ok(());
        }
        if let Some(manifest) = self.manifest.lock().take() {
            manifest.close()?;
        }

        let refs = self.refs()?;
        let fetch_path = self.root.join(FETCH_TXT);
        let kept: Vec<FetchRef> = if fetch_path.is_file() {
            read_fetch(&fetch_path)?
                .into_iter()
                .filter(|r| refs.contains_key(&r.path))
                .collect()
        } else {
            Vec::new()
        };
        if kept.is_empty() {
            if fetch_path.exists() {
                fs::remove_file(&fetch_path)?;
            }
        } else {
            let mut out = BufWriter::new(File::create(&fetch_path)?);
            for reference in &kept {
                out.write_all(reference.encode_line().as_bytes())?;
            }
            out.flush()?;
        }

        let manifest_name = self.algorithm.manifest_name();
        let mut updates: HashMap<String, Option<String>> = HashMap::new();
        updates.insert(
            manifest_name.clone(),
            Some(digest_file(self.algorithm, &self.root.join(&manifest_name))?),
        );
        updates.insert(
            FETCH_TXT.to_owned(),
            if kept.is_empty() { None } else { Some(digest_file(self.algorithm, &fetch_path)?) },
        );
        self.patch_tag_manifest(&updates)?;
        info!(root = %self.root.display(), remaining = kept.len(), "resolution session finished");
        Ok(())
    }

    /// Rewrite the tag manifest, replacing the checksums of the entries in
    /// `updates` (`None` drops the line).  Other lines are kept verbatim.
    fn patch_tag_manifest(&self, updates: &HashMap<String, Option<String>>) -> BagResult<()> {
        let path = self.root.join(self.algorithm.tagmanifest_name());
        let original = fs::read_to_string(&path)?;
        let mut patched = String::with_capacity(original.len());
        for line in original.lines() {
            match parse_line(line).and_then(|e| updates.get(&e.path).map(|u| (e.path, u))) {
                Some((entry_path, Some(checksum))) => patched.push_str(&encode_line(checksum, &entry_path)),
                Some((_, None)) => {}
                None => {
                    patched.push_str(line);
                    patched.push('\n');
                }
            }
        }
        let tmp = path.with_extension("txt.tmp");
        fs::write(&tmp, patched)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Finish the resolution session and open the bag.
    pub fn load(self) -> BagResult<Bag> {
        self.finish()?;
        Ok(Bag::with_seal(self.root, false))
    }

    /// As [`load`](Self::load), but the bag withholds direct file paths.
    pub fn seal(self) -> BagResult<Bag> {
        self.finish()?;
        Ok(Bag::with_seal(self.root, true))
    }
}
