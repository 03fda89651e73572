//! Archive codec: a whole bag directory to and from a single package file.
//!
//! ```no_run
//! use holeybag::archive::{pack, unpack_file, PackageFormat};
//! use std::path::Path;
//!
//! pack(Path::new("bags/b1"), PackageFormat::Tgz, Path::new("bags/b1.tgz"))?;
//! unpack_file(Path::new("bags/b1.tgz"), PackageFormat::Tgz, Path::new("restored/b1"))?;
//! # Ok::<(), holeybag::BagError>(())
//! ```
//!
//! # Layout
//! Every entry is prefixed with the bag's folder name (`<bagName>/data/...`).
//! Directories get their own entries so an empty `data/` survives.
//! Timestamps are pinned (tar mtime 0, zip's minimum DOS time) and entries
//! are written in sorted order, so packing the same tree twice yields the
//! same bytes.
//!
//! # Inflation
//! Unpacking strips the root folder, recreates relative paths, and copies
//! entry bytes verbatim.  Nothing is verified here; trust is deferred to
//! `Bag::is_valid()`.  Entries that would escape the target are refused.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use serde::{Deserialize, Serialize};
use tar::{EntryType, Header, HeaderMode};
use tracing::debug;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::error::{BagError, BagResult};
use crate::paths;

// ── PackageFormat ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageFormat {
    Zip,
    Tgz,
}

impl PackageFormat {
    pub const ALL: [PackageFormat; 2] = [PackageFormat::Zip, PackageFormat::Tgz];

    pub fn extension(self) -> &'static str {
        match self {
            PackageFormat::Zip => "zip",
            PackageFormat::Tgz => "tgz",
        }
    }

    pub fn from_name(s: &str) -> BagResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zip"           => Ok(PackageFormat::Zip),
            "tgz" | "tar.gz" => Ok(PackageFormat::Tgz),
            _               => Err(BagError::UnsupportedFormat(s.to_owned())),
        }
    }

    /// Recognise a package by file name.  Returns the format and the name
    /// with its suffix stripped.
    pub fn detect(path: &Path) -> Option<(Self, String)> {
        let name = path.file_name()?.to_str()?;
        let lower = name.to_ascii_lowercase();
        for (suffix, format) in [
            (".zip", PackageFormat::Zip),
            (".tgz", PackageFormat::Tgz),
            (".tar.gz", PackageFormat::Tgz),
        ] {
            if lower.ends_with(suffix) && lower.len() > suffix.len() {
                return Some((format, name[..name.len() - suffix.len()].to_owned()));
            }
        }
        None
    }

    /// `<bag_dir>.<ext>` beside the bag directory.
    pub fn package_path(self, bag_dir: &Path) -> PathBuf {
        let mut name = bag_dir.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".");
        name.push(self.extension());
        bag_dir.with_file_name(name)
    }
}

// ── Pack ─────────────────────────────────────────────────────────────────────

struct TreeEntry {
    path:   PathBuf,
    name:   String,
    is_dir: bool,
}

fn walk_tree(dir: &Path) -> BagResult<Vec<TreeEntry>> {
    let root_name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| BagError::invalid_path(&dir.to_string_lossy(), "bag directory has no usable name"))?
        .to_owned();

    let mut out = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let rel = paths::to_rel(dir, entry.path())
            .ok_or_else(|| BagError::invalid_path(&entry.path().to_string_lossy(), "not valid UTF-8"))?;
        let is_dir = entry.file_type().is_dir();
        if !is_dir && !entry.file_type().is_file() {
            tracing::warn!(path = %rel, "skipping non-regular file while packing");
            continue;
        }
        out.push(TreeEntry { path: entry.into_path(), name: format!("{root_name}/{rel}"), is_dir });
    }
    Ok(out)
}

/// Serialize the directory `dir` into a new package file at `dest`.
///
/// Returns the number of file entries written.
pub fn pack(dir: &Path, format: PackageFormat, dest: &Path) -> BagResult<usize> {
    let tree = walk_tree(dir)?;
    let out = File::create(dest)?;
    let files = match format {
        PackageFormat::Zip => pack_zip(&tree, out)?,
        PackageFormat::Tgz => pack_tgz(&tree, out)?,
    };
    debug!(dir = %dir.display(), dest = %dest.display(), files, "packed bag");
    Ok(files)
}

fn pack_zip<W: Write + Seek>(tree: &[TreeEntry], out: W) -> BagResult<usize> {
    let base = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());
    let mut zip = ZipWriter::new(out);
    let mut files = 0;
    for entry in tree {
        if entry.is_dir {
            zip.add_directory(format!("{}/", entry.name), base.unix_permissions(0o755))?;
            continue;
        }
        let size = fs::metadata(&entry.path)?.len();
        let opts = base.unix_permissions(0o644).large_file(size >= u64::from(u32::MAX));
        zip.start_file(entry.name.as_str(), opts)?;
        io::copy(&mut File::open(&entry.path)?, &mut zip)?;
        files += 1;
    }
    zip.finish()?;
    Ok(files)
}

fn pack_tgz<W: Write>(tree: &[TreeEntry], out: W) -> BagResult<usize> {
    let encoder = GzBuilder::new()
        .mtime(0)
        .operating_system(255)
        .write(out, Compression::default());
    let mut tar = tar::Builder::new(encoder);
    tar.mode(HeaderMode::Deterministic);

    let mut files = 0;
    for entry in tree {
        let mut header = Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        if entry.is_dir {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            tar.append_data(&mut header, format!("{}/", entry.name), io::empty())?;
        } else {
            let file = File::open(&entry.path)?;
            header.set_entry_type(EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(file.metadata()?.len());
            tar.append_data(&mut header, &entry.name, file)?;
            files += 1;
        }
    }
    tar.into_inner()?.finish()?.flush()?;
    Ok(files)
}

// ── Unpack ───────────────────────────────────────────────────────────────────

/// Entry name → path inside the bag, with the root folder removed.
/// `None` for the root folder entry itself.
fn strip_root(name: &str) -> BagResult<Option<String>> {
    let normal = paths::normalize(name)?;
    Ok(normal.split_once('/').map(|(_, rest)| rest.to_owned()))
}

/// Inflated files are write-once: an existing target fails with
/// [`BagError::AlreadyExists`].
fn write_entry<R: Read>(dest: &Path, rel: &str, mut data: R) -> BagResult<()> {
    let mut out = paths::create_new(dest, rel)?;
    io::copy(&mut data, &mut out)?;
    out.flush()?;
    debug!(entry = %rel, "inflated");
    Ok(())
}

/// Inflate a seekable package into `dest`.  Returns the number of files.
pub fn unpack<R: Read + Seek>(reader: R, format: PackageFormat, dest: &Path) -> BagResult<usize> {
    fs::create_dir_all(dest)?;
    match format {
        PackageFormat::Zip => unpack_zip(reader, dest),
        PackageFormat::Tgz => unpack_tgz(reader, dest),
    }
}

/// Inflate from a forward-only stream.  Zip needs random access to its
/// central directory, so zip streams are buffered in memory first.
pub fn unpack_stream<R: Read>(mut reader: R, format: PackageFormat, dest: &Path) -> BagResult<usize> {
    fs::create_dir_all(dest)?;
    match format {
        PackageFormat::Zip => {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf)?;
            unpack_zip(Cursor::new(buf), dest)
        }
        PackageFormat::Tgz => unpack_tgz(reader, dest),
    }
}

pub fn unpack_file(path: &Path, format: PackageFormat, dest: &Path) -> BagResult<usize> {
    unpack(File::open(path)?, format, dest)
}

fn unpack_zip<R: Read + Seek>(reader: R, dest: &Path) -> BagResult<usize> {
    let mut archive = ZipArchive::new(reader)?;
    let mut files = 0;
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let Some(rel) = strip_root(entry.name())? else { continue };
        if entry.is_dir() {
            fs::create_dir_all(paths::to_fs(dest, &rel))?;
        } else {
            write_entry(dest, &rel, entry)?;
            files += 1;
        }
    }
    Ok(files)
}

fn unpack_tgz<R: Read>(reader: R, dest: &Path) -> BagResult<usize> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let mut files = 0;
    for entry in archive.entries()? {
        let entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let Some(rel) = strip_root(&name)? else { continue };
        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(paths::to_fs(dest, &rel))?;
        } else if kind.is_file() {
            write_entry(dest, &rel, entry)?;
            files += 1;
        } else {
            tracing::warn!(entry = %name, "skipping non-regular tar entry");
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree(root: &Path) {
        fs::create_dir_all(root.join("data/sub")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("bagit.txt"), "BagIt-Version: 0.97\n").unwrap();
        fs::write(root.join("data/sub/x.bin"), vec![7u8; 5000]).unwrap();
    }

    #[test]
    fn detect_strips_suffix() {
        assert_eq!(PackageFormat::detect(Path::new("/a/bag1.zip")), Some((PackageFormat::Zip, "bag1".into())));
        assert_eq!(PackageFormat::detect(Path::new("bag1.tar.gz")), Some((PackageFormat::Tgz, "bag1".into())));
        assert_eq!(PackageFormat::detect(Path::new("bag1.tgz")), Some((PackageFormat::Tgz, "bag1".into())));
        assert_eq!(PackageFormat::detect(Path::new("bag1")), None);
        assert_eq!(PackageFormat::Zip.package_path(Path::new("/t/b1")), PathBuf::from("/t/b1.zip"));
    }

    #[test]
    fn pack_unpack_preserves_tree() {
        for format in PackageFormat::ALL {
            let tmp = tempfile::tempdir().unwrap();
            let bag = tmp.path().join("b1");
            sample_tree(&bag);
            let pkg = format.package_path(&bag);
            assert_eq!(pack(&bag, format, &pkg).unwrap(), 2);

            let out = tmp.path().join("restored");
            assert_eq!(unpack_file(&pkg, format, &out).unwrap(), 2);
            assert_eq!(fs::read(out.join("data/sub/x.bin")).unwrap(), vec![7u8; 5000]);
            assert!(out.join("empty").is_dir(), "{format:?}");
        }
    }

    #[test]
    fn packing_is_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        let bag = tmp.path().join("b1");
        sample_tree(&bag);
        for format in PackageFormat::ALL {
            let a = tmp.path().join(format!("a.{}", format.extension()));
            let b = tmp.path().join(format!("b.{}", format.extension()));
            pack(&bag, format, &a).unwrap();
            pack(&bag, format, &b).unwrap();
            assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
        }
    }

    #[test]
    fn stream_unpack_handles_zip() {
        let tmp = tempfile::tempdir().unwrap();
        let bag = tmp.path().join("b1");
        sample_tree(&bag);
        let pkg = PackageFormat::Zip.package_path(&bag);
        pack(&bag, PackageFormat::Zip, &pkg).unwrap();

        let bytes = fs::read(&pkg).unwrap();
        let out = tmp.path().join("streamed");
        unpack_stream(&bytes[..], PackageFormat::Zip, &out).unwrap();
        assert!(out.join("bagit.txt").is_file());
    }

    #[test]
    fn unpack_refuses_to_overwrite() {
        for format in PackageFormat::ALL {
            let tmp = tempfile::tempdir().unwrap();
            let bag = tmp.path().join("b1");
            sample_tree(&bag);
            let pkg = format.package_path(&bag);
            pack(&bag, format, &pkg).unwrap();

            let out = tmp.path().join("occupied");
            fs::create_dir_all(&out).unwrap();
            fs::write(out.join("bagit.txt"), "keep me").unwrap();
            let err = unpack_file(&pkg, format, &out).unwrap_err();
            assert!(matches!(err, BagError::AlreadyExists(ref p) if p == "bagit.txt"), "{format:?}");
            assert_eq!(fs::read_to_string(out.join("bagit.txt")).unwrap(), "keep me");
        }
    }
}
