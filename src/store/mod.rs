mod fs;

pub use fs::FsContentStore;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store location {location} is not a directory")]
    BadLocation { location: String },
    #[error("unsupported file type at {path}")]
    UnsupportedFileType { path: String },
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

/// Opaque, deterministic reference to a materialized directory: same bytes,
/// same handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentHandle {
    pub digest: String,
    pub path: PathBuf,
}

pub trait ContentStore {
    fn add_to_store(&self, name: &str, dir: &Path) -> Result<ContentHandle, StoreError>;
}
