use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use log::{debug, info, trace, warn};
use sha2::{Digest, Sha256};

use crate::{flock::FileLock, model::attrs::Attrs, store::ContentHandle};

use super::{CacheEntry, CacheError, ResolutionCache};

const LOCK_FILE: &str = ".lock";

/// How long a provisional "latest known" entry is served before an unpinned
/// request goes back to the network.
pub const DEFAULT_IMPURE_TTL: Duration = Duration::from_secs(3600);

/// File-backed resolution cache: one JSON entry per key digest, the whole
/// directory guarded by an exclusive lock for the lifetime of the process.
pub struct PijulfetchCache {
    pub location: PathBuf,
    impure_ttl: Duration,
    _lock: FileLock,
}

impl PijulfetchCache {
    pub fn new(location: PathBuf, impure_ttl: Duration) -> Result<PijulfetchCache, CacheError> {
        if location.exists() {
            if !location.is_dir() {
                return Err(CacheError::BadLocation {
                    location: location.to_str().unwrap_or("").to_string(),
                });
            }
        } else {
            fs::create_dir_all(&location)?;
        }

        let lock = Self::acquire_lock(&location)?;

        Ok(PijulfetchCache {
            location,
            impure_ttl,
            _lock: lock,
        })
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        info!("clearing resolution cache {}", self.location.display());
        for entry in fs::read_dir(&self.location)? {
            let entry = entry?;
            if entry.file_name() == LOCK_FILE {
                continue;
            }
            fs::remove_file(entry.path())?;
        }
        Ok(())
    }

    fn acquire_lock(location: &Path) -> Result<FileLock, CacheError> {
        let lock_path = location.join(LOCK_FILE);
        debug!("acquiring a lock on {}", lock_path.display());
        let lock = FileLock::new(&lock_path)?;
        debug!("acquired a lock on the cache location");
        Ok(lock)
    }

    fn entry_path(&self, key: &Attrs) -> Result<PathBuf, CacheError> {
        let canonical = serde_json::to_vec(key)?;
        let digest = hex::encode(Sha256::digest(&canonical));
        Ok(self.location.join(format!("{digest}.json")))
    }

    fn read_entry(&self, path: &Path) -> Result<CacheEntry, CacheError> {
        let contents = fs::read(path)?;
        Ok(serde_json::from_slice(&contents)?)
    }
}

impl ResolutionCache for PijulfetchCache {
    fn lookup(&self, key: &Attrs) -> Option<CacheEntry> {
        let path = match self.entry_path(key) {
            Ok(path) => path,
            Err(error) => {
                warn!("could not compute cache entry path for {}: {}", key, error);
                return None;
            }
        };
        if !path.exists() {
            trace!("cache miss for {}", key);
            return None;
        }
        match self.read_entry(&path) {
            Ok(entry) => {
                if !entry.handle.path.exists() {
                    debug!(
                        "cache entry for {} points at a missing store path, treating as a miss",
                        key
                    );
                    return None;
                }
                if !entry.is_final
                    && now_epoch_secs().saturating_sub(entry.written_at)
                        > self.impure_ttl.as_secs()
                {
                    debug!("provisional cache entry for {} has expired", key);
                    return None;
                }
                debug!("cache hit for {}", key);
                Some(entry)
            }
            Err(error) => {
                warn!("unreadable cache entry for {}: {}", key, error);
                None
            }
        }
    }

    fn add(
        &self,
        key: &Attrs,
        info: &Attrs,
        handle: &ContentHandle,
        is_final: bool,
    ) -> Result<(), CacheError> {
        let path = self.entry_path(key)?;

        if path.exists() {
            if let Ok(existing) = self.read_entry(&path) {
                if existing.is_final {
                    trace!("keeping final cache entry for {}", key);
                    return Ok(());
                }
            }
        }

        let entry = CacheEntry {
            info: info.clone(),
            handle: handle.clone(),
            is_final,
            written_at: now_epoch_secs(),
        };

        // Write-then-rename so a concurrent reader never sees a torn entry.
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec_pretty(&entry)?)?;
        fs::rename(&staging, &path)?;

        debug!(
            "cached {} -> {} (final: {})",
            key,
            entry.handle.path.display(),
            is_final
        );
        Ok(())
    }
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
