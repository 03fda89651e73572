//! Error taxonomy shared by every bag component.
//!
//! Structural incompleteness is never an error: it surfaces only as
//! `Bag::is_complete()` / `Bag::is_valid()` returning `false`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type BagResult<T> = Result<T, BagError>;

/// Coarse classification of a [`BagError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unknown/ambiguous checksum algorithm, unsupported format, bad options.
    Configuration,
    /// Attempted overwrite, or resolution of an undeclared reference.
    Integrity,
    /// A call the current state or the bag layout does not allow.
    Usage,
    /// Underlying read/write/archive fault.
    Io,
}

#[derive(Error, Debug)]
pub enum BagError {
    #[error("Unknown checksum algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("Ambiguous checksum algorithm, found manifests for: {}", .0.join(", "))]
    AmbiguousAlgorithm(Vec<String>),
    #[error("No payload manifest found in {}", .0.display())]
    MissingManifest(PathBuf),
    #[error("Unsupported package format: {0}")]
    UnsupportedFormat(String),
    #[error("Invalid options: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Path already exists in bag: {0}")]
    AlreadyExists(String),
    #[error("No unresolved payload reference for: {0}")]
    UnknownReference(String),

    #[error("Invalid bag path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("Reserved tag file name: {0}")]
    ReservedPath(String),
    #[error("Invalid metadata property {name:?}: {reason}")]
    InvalidMetadata { name: String, reason: &'static str },
    #[error("Bag has already been built")]
    AlreadyBuilt,
    #[error("Bag is sealed: direct file access refused for {0}")]
    Sealed(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl BagError {
    pub(crate) fn invalid_path(path: &str, reason: &'static str) -> Self {
        BagError::InvalidPath { path: path.to_owned(), reason }
    }

    pub(crate) fn invalid_metadata(name: &str, reason: &'static str) -> Self {
        BagError::InvalidMetadata { name: name.to_owned(), reason }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            BagError::UnknownAlgorithm(_)
            | BagError::AmbiguousAlgorithm(_)
            | BagError::MissingManifest(_)
            | BagError::UnsupportedFormat(_)
            | BagError::Config(_) => ErrorCategory::Configuration,
            BagError::AlreadyExists(_) | BagError::UnknownReference(_) => ErrorCategory::Integrity,
            BagError::InvalidPath { .. }
            | BagError::ReservedPath(_)
            | BagError::InvalidMetadata { .. }
            | BagError::AlreadyBuilt
            | BagError::Sealed(_) => ErrorCategory::Usage,
            BagError::Archive(_) | BagError::Io(_) => ErrorCategory::Io,
        }
    }

    /// Map an `AlreadyExists` I/O failure on `path` to the integrity variant.
    pub(crate) fn from_create(err: io::Error, path: &str) -> Self {
        if err.kind() == io::ErrorKind::AlreadyExists {
            BagError::AlreadyExists(path.to_owned())
        } else {
            BagError::Io(err)
        }
    }
}
