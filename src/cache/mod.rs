mod file;

pub use file::{PijulfetchCache, DEFAULT_IMPURE_TTL};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{model::attrs::Attrs, store::ContentHandle};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache location {location} is not a directory")]
    BadLocation { location: String },
    #[error("cache lock cannot be acquired")]
    Lock(#[from] crate::flock::Error),
    #[error("could not encode cache entry: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

/// One cached resolution: the metadata discovered by the probe and the
/// store handle of the materialized tree. Final entries describe one
/// immutable snapshot and are never superseded; provisional entries record
/// "latest known", may be superseded, and expire so that an unpinned
/// request eventually sees the remote move.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub info: Attrs,
    pub handle: ContentHandle,
    pub is_final: bool,
    /// Seconds since the epoch at write time; drives provisional-entry
    /// expiry, meaningless for final entries.
    pub written_at: u64,
}

/// The two-tier resolution cache. Keys are attribute mappings; the resolver
/// layers its locked and impure key families on top of this interface.
pub trait ResolutionCache {
    /// A backend read failure is indistinguishable from a miss on purpose:
    /// the resolver falls through to a fresh clone either way.
    fn lookup(&self, key: &Attrs) -> Option<CacheEntry>;

    /// Write failures are surfaced: dropping a successful fetch's
    /// provenance would corrupt future impure-key reuse.
    fn add(
        &self,
        key: &Attrs,
        info: &Attrs,
        handle: &ContentHandle,
        is_final: bool,
    ) -> Result<(), CacheError>;
}
