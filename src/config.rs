//! Per-instance configuration for [`Filler`](crate::filler::Filler) and
//! [`Loader`](crate::loader::Loader).
//!
//! Nothing here is process-wide: every filler and loader receives its own
//! copy.  Options may be loaded from JSON; absent fields take defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::archive::PackageFormat;
use crate::checksum::ChecksumAlgorithm;
use crate::error::BagResult;

pub const DEFAULT_BAGIT_VERSION: &str = "0.97";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BagOptions {
    /// Algorithm for both manifests of a new bag.
    pub algorithm:      ChecksumAlgorithm,
    /// Write Bagging-Date, Bag-Size, Payload-Oxnum and the software agent
    /// on finalize.
    pub auto_metadata:  bool,
    pub bagit_version:  String,
    pub software_agent: String,
    /// Archive formats the loader will inflate.
    pub formats:        Vec<PackageFormat>,
}

impl Default for BagOptions {
    fn default() -> Self {
        Self {
            algorithm:      ChecksumAlgorithm::Md5,
            auto_metadata:  true,
            bagit_version:  DEFAULT_BAGIT_VERSION.to_owned(),
            software_agent: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            formats:        PackageFormat::ALL.to_vec(),
        }
    }
}

impl BagOptions {
    pub fn with_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn without_auto_metadata(mut self) -> Self {
        self.auto_metadata = false;
        self
    }

    pub fn from_json(text: &str) -> BagResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> BagResult<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn accepts(&self, format: PackageFormat) -> bool {
        self.formats.contains(&format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let opts = BagOptions::from_json(r#"{ "algorithm": "sha256", "formats": ["zip"] }"#).unwrap();
        assert_eq!(opts.algorithm, ChecksumAlgorithm::Sha256);
        assert!(opts.auto_metadata);
        assert_eq!(opts.bagit_version, DEFAULT_BAGIT_VERSION);
        assert!(opts.accepts(PackageFormat::Zip));
        assert!(!opts.accepts(PackageFormat::Tgz));
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let err = BagOptions::from_json(r#"{ "algorithm": "crc32" }"#).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Configuration);
    }
}
