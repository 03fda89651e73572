pub mod error;
pub mod checksum;
pub mod paths;
pub mod manifest;
pub mod fetch;
pub mod metadata;
pub mod chain;
pub mod config;
pub mod archive;
pub mod filler;
pub mod loader;
pub mod bag;

pub use error::{BagError, BagResult, ErrorCategory};
pub use checksum::ChecksumAlgorithm;
pub use config::BagOptions;
pub use archive::PackageFormat;
pub use chain::DigestWriter;
pub use filler::{Filler, PackageStream};
pub use loader::Loader;
pub use bag::{Bag, ValidationReport};
