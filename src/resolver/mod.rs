use log::{debug, info, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    cache::{CacheError, ResolutionCache},
    model::{
        attrs::{AttrError, Attrs},
        input::PijulInput,
    },
    probe::{ProbeError, RepoStatus, RepositoryProbe},
    store::{ContentHandle, ContentStore, StoreError},
};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("channel mismatch for {url}: requested `{requested}`, got `{actual}`")]
    ChannelMismatch {
        url: String,
        requested: String,
        actual: String,
    },
    #[error("state mismatch for {url}: requested `{requested}`, got `{actual}`")]
    StateMismatch {
        url: String,
        requested: String,
        actual: String,
    },
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error("could not persist resolution metadata: {0}")]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Attrs(#[from] AttrError),
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

/// How a failed status probe after a successful clone is handled. Earlier
/// schema revisions treated it as "no info available"; the current one
/// treats it as fatal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    #[default]
    Strict,
    Lenient,
}

/// The outcome of one resolution: the store handle of the materialized
/// snapshot and the input enriched with everything resolution discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub handle: ContentHandle,
    pub input: PijulInput,
}

/// Orchestrates probe, cache, and store to materialize an input, enforcing
/// the locked/impure consistency rules: a locked hit is final and never
/// revalidated, and an impure answer is never presented as pinned.
pub struct Resolver<'a, P, C, S> {
    probe: &'a P,
    cache: &'a C,
    store: &'a S,
    probe_mode: ProbeMode,
}

impl<'a, P, C, S> Resolver<'a, P, C, S>
where
    P: RepositoryProbe,
    C: ResolutionCache,
    S: ContentStore,
{
    pub fn new(probe: &'a P, cache: &'a C, store: &'a S, probe_mode: ProbeMode) -> Self {
        Resolver {
            probe,
            cache,
            store,
            probe_mode,
        }
    }

    pub fn resolve(
        &self,
        input: &PijulInput,
        name: Option<&str>,
    ) -> Result<Resolution, ResolveError> {
        let name = name.map(str::to_owned).unwrap_or_else(|| input.name());
        let repo_url = input.base_url();
        let channel = input.channel.as_deref();
        let state = input.state.as_deref();

        let impure_key = impure_key(&name, &repo_url);
        let locked_key = match (channel, state) {
            (Some(channel), Some(state)) => Some(locked_key(&name, channel, state)),
            _ => None,
        };

        // A locked hit is final: the snapshot it names can never change, so
        // no probe and no revalidation.
        if let Some(key) = &locked_key {
            if let Some(entry) = self.cache.lookup(key) {
                debug!("locked cache hit for {}", input);
                return self.finish(input, entry.handle, &entry.info);
            }
        }

        if let Some(entry) = self.cache.lookup(&impure_key) {
            if satisfies_request(&entry.info, channel, state) {
                debug!("latest known snapshot of {} satisfies the request", repo_url);
                return self.finish(input, entry.handle, &entry.info);
            }
            debug!(
                "latest known snapshot of {} does not satisfy the requested pin, cloning afresh",
                repo_url
            );
        }

        info!("fetching {}", input);

        // Scoped clone directory, removed on every exit path.
        let tmp_dir = tempfile::tempdir()?;
        let repo_dir = tmp_dir.path().join("source");

        self.probe.clone_repo(&repo_url, channel, state, &repo_dir)?;

        let status = match self.probe.status(&repo_dir) {
            Ok(status) => status,
            Err(error) if self.probe_mode == ProbeMode::Lenient => {
                warn!("no repository status available for {}: {}", repo_url, error);
                // Nothing to validate and nothing to key cache entries
                // under; hand back the tree unresolved.
                self.probe.strip_metadata(&repo_dir)?;
                let handle = self.store.add_to_store(&name, &repo_dir)?;
                return Ok(Resolution {
                    handle,
                    input: input.clone(),
                });
            }
            Err(error) => return Err(error.into()),
        };

        if let Some(requested) = channel {
            if requested != status.channel {
                return Err(ResolveError::ChannelMismatch {
                    url: repo_url,
                    requested: requested.to_owned(),
                    actual: status.channel,
                });
            }
        }
        if let Some(requested) = state {
            if requested != status.state {
                return Err(ResolveError::StateMismatch {
                    url: repo_url,
                    requested: requested.to_owned(),
                    actual: status.state,
                });
            }
        }

        self.probe.strip_metadata(&repo_dir)?;
        let handle = self.store.add_to_store(&name, &repo_dir)?;

        let info = status.to_attrs();

        // The impure entry always reflects the freshest resolution; the
        // locked entry makes the just-discovered snapshot pinnable and is
        // final from the moment it is written.
        self.cache.add(&impure_key, &info, &handle, false)?;
        let final_key = locked_key
            .unwrap_or_else(|| locked_key_for_status(&name, &status));
        self.cache.add(&final_key, &info, &handle, true)?;

        self.finish(input, handle, &info)
    }

    fn finish(
        &self,
        input: &PijulInput,
        handle: ContentHandle,
        info: &Attrs,
    ) -> Result<Resolution, ResolveError> {
        let input = input.clone().enriched(info)?;
        Ok(Resolution { handle, input })
    }
}

/// "Latest known state for this repo and name, as of some past resolution."
fn impure_key(name: &str, repo_url: &str) -> Attrs {
    let mut key = Attrs::new();
    key.insert("type", "pijul");
    key.insert("name", name);
    key.insert("url", repo_url);
    key
}

/// One exact snapshot, eligible for indefinite reuse.
fn locked_key(name: &str, channel: &str, state: &str) -> Attrs {
    let mut key = Attrs::new();
    key.insert("type", "pijul");
    key.insert("name", name);
    key.insert("channel", channel);
    key.insert("state", state);
    key
}

fn locked_key_for_status(name: &str, status: &RepoStatus) -> Attrs {
    locked_key(name, &status.channel, &status.state)
}

/// An absent requested channel or state is a wildcard; a present one must
/// match the cached metadata exactly.
fn satisfies_request(info: &Attrs, channel: Option<&str>, state: Option<&str>) -> bool {
    let channel_ok = channel.map_or(true, |requested| info.get_str("channel") == Some(requested));
    let state_ok = state.map_or(true, |requested| info.get_str("state") == Some(requested));
    channel_ok && state_ok
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::BTreeMap, fs, path::Path};

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use url::Url;

    use crate::{cache::CacheEntry, store::FsContentStore};

    use super::*;

    /// Probe stand-in: "clones" by writing a fixed tree and reports a
    /// scripted status, counting invocations.
    struct FakeProbe {
        status: RefCell<Result<RepoStatus, ()>>,
        tree: RefCell<Vec<(String, String)>>,
        clones: RefCell<usize>,
    }

    impl FakeProbe {
        fn reporting(channel: &str, state: &str, last_modified: u64) -> Self {
            FakeProbe {
                status: RefCell::new(Ok(RepoStatus {
                    channel: channel.to_owned(),
                    state: state.to_owned(),
                    last_modified,
                })),
                tree: RefCell::new(vec![("file.txt".to_owned(), state.to_owned())]),
                clones: RefCell::new(0),
            }
        }

        fn failing_status() -> Self {
            let probe = Self::reporting("main", "S1", 1700000000);
            *probe.status.borrow_mut() = Err(());
            probe
        }

        fn advance_to(&self, channel: &str, state: &str, last_modified: u64) {
            *self.status.borrow_mut() = Ok(RepoStatus {
                channel: channel.to_owned(),
                state: state.to_owned(),
                last_modified,
            });
            *self.tree.borrow_mut() = vec![("file.txt".to_owned(), state.to_owned())];
        }

        fn clone_count(&self) -> usize {
            *self.clones.borrow()
        }
    }

    impl RepositoryProbe for FakeProbe {
        fn clone_repo(
            &self,
            _url: &str,
            _channel: Option<&str>,
            _state: Option<&str>,
            dest: &Path,
        ) -> Result<(), ProbeError> {
            *self.clones.borrow_mut() += 1;
            fs::create_dir_all(dest.join(".pijul"))?;
            fs::write(dest.join(".pijul/bookkeeping"), "internal")?;
            for (name, contents) in self.tree.borrow().iter() {
                fs::write(dest.join(name), contents)?;
            }
            Ok(())
        }

        fn status(&self, _repo_dir: &Path) -> Result<RepoStatus, ProbeError> {
            self.status
                .borrow()
                .clone()
                .map_err(|_| ProbeError::NoCurrentChannel)
        }

        fn strip_metadata(&self, repo_dir: &Path) -> Result<(), ProbeError> {
            let metadata = repo_dir.join(".pijul");
            if metadata.exists() {
                fs::remove_dir_all(metadata)?;
            }
            Ok(())
        }

        fn track_file(&self, _repo_dir: &Path, _file: &Path) -> Result<(), ProbeError> {
            Ok(())
        }

        fn record_change(
            &self,
            _repo_dir: &Path,
            _file: &Path,
            _message: &str,
        ) -> Result<(), ProbeError> {
            Ok(())
        }
    }

    /// In-memory cache with the same final-entry semantics as the
    /// file-backed one.
    #[derive(Default)]
    struct MemoryCache {
        entries: RefCell<BTreeMap<Attrs, CacheEntry>>,
    }

    impl MemoryCache {
        /// Simulates provisional-entry expiry, which the file-backed cache
        /// drives off a TTL.
        fn expire_provisional(&self) {
            self.entries
                .borrow_mut()
                .retain(|_, entry| entry.is_final);
        }
    }

    impl ResolutionCache for MemoryCache {
        fn lookup(&self, key: &Attrs) -> Option<CacheEntry> {
            self.entries.borrow().get(key).cloned()
        }

        fn add(
            &self,
            key: &Attrs,
            info: &Attrs,
            handle: &ContentHandle,
            is_final: bool,
        ) -> Result<(), CacheError> {
            let mut entries = self.entries.borrow_mut();
            if entries.get(key).is_some_and(|entry| entry.is_final) {
                return Ok(());
            }
            entries.insert(
                key.clone(),
                CacheEntry {
                    info: info.clone(),
                    handle: handle.clone(),
                    is_final,
                    written_at: 0,
                },
            );
            Ok(())
        }
    }

    struct Fixture {
        _store_dir: TempDir,
        store: FsContentStore,
        cache: MemoryCache,
        probe: FakeProbe,
    }

    impl Fixture {
        fn new(probe: FakeProbe) -> Self {
            let store_dir = TempDir::new().unwrap();
            let store = FsContentStore::new(store_dir.path().join("store")).unwrap();
            Fixture {
                _store_dir: store_dir,
                store,
                cache: MemoryCache::default(),
                probe,
            }
        }

        fn resolver(&self) -> Resolver<'_, FakeProbe, MemoryCache, FsContentStore> {
            Resolver::new(&self.probe, &self.cache, &self.store, ProbeMode::Strict)
        }

        fn lenient_resolver(&self) -> Resolver<'_, FakeProbe, MemoryCache, FsContentStore> {
            Resolver::new(&self.probe, &self.cache, &self.store, ProbeMode::Lenient)
        }
    }

    fn unlocked_input() -> PijulInput {
        PijulInput::new(Url::parse("https://example.org/repo").unwrap())
    }

    fn locked_input(channel: &str, state: &str) -> PijulInput {
        let mut input = unlocked_input();
        input.channel = Some(channel.to_owned());
        input.state = Some(state.to_owned());
        input
    }

    #[test]
    fn unlocked_resolution_enriches_and_caches() {
        let fixture = Fixture::new(FakeProbe::reporting("main", "S1", 1700000000));
        let resolution = fixture.resolver().resolve(&unlocked_input(), None).unwrap();

        assert_eq!(resolution.input.channel.as_deref(), Some("main"));
        assert_eq!(resolution.input.state.as_deref(), Some("S1"));
        assert_eq!(resolution.input.last_modified, Some(1700000000));
        assert!(resolution.handle.path.join("file.txt").exists());
        assert!(!resolution.handle.path.join(".pijul").exists());

        let impure = fixture
            .cache
            .lookup(&impure_key("repo", "https://example.org/repo"))
            .unwrap();
        assert!(!impure.is_final);
        assert_eq!(impure.info.get_str("state"), Some("S1"));

        let locked = fixture
            .cache
            .lookup(&locked_key("repo", "main", "S1"))
            .unwrap();
        assert!(locked.is_final);
        assert_eq!(locked.info, impure.info);
    }

    #[test]
    fn locked_resolution_is_idempotent_with_one_clone() {
        let fixture = Fixture::new(FakeProbe::reporting("main", "S1", 1700000000));
        let input = locked_input("main", "S1");

        let first = fixture.resolver().resolve(&input, None).unwrap();
        let second = fixture.resolver().resolve(&input, None).unwrap();

        assert_eq!(first.handle, second.handle);
        assert_eq!(first.input, second.input);
        assert_eq!(fixture.probe.clone_count(), 1);
    }

    #[test]
    fn unlocked_rerun_hits_the_impure_entry() {
        let fixture = Fixture::new(FakeProbe::reporting("main", "S1", 1700000000));

        fixture.resolver().resolve(&unlocked_input(), None).unwrap();
        fixture.resolver().resolve(&unlocked_input(), None).unwrap();

        assert_eq!(fixture.probe.clone_count(), 1);
    }

    #[test]
    fn channel_mismatch_is_fatal_and_writes_nothing() {
        let fixture = Fixture::new(FakeProbe::reporting("main", "S1", 1700000000));
        let mut input = unlocked_input();
        input.channel = Some("release".to_owned());

        let error = fixture.resolver().resolve(&input, None).unwrap_err();
        match error {
            ResolveError::ChannelMismatch { requested, actual, .. } => {
                assert_eq!(requested, "release");
                assert_eq!(actual, "main");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(fixture
            .cache
            .lookup(&impure_key("repo", "https://example.org/repo"))
            .is_none());
    }

    #[test]
    fn state_mismatch_reports_both_values() {
        let fixture = Fixture::new(FakeProbe::reporting("main", "S1", 1700000000));
        let input = locked_input("main", "S2");

        let error = fixture.resolver().resolve(&input, None).unwrap_err();
        match error {
            ResolveError::StateMismatch { requested, actual, .. } => {
                assert_eq!(requested, "S2");
                assert_eq!(actual, "S1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn impure_entry_is_superseded_but_locked_entry_survives() {
        let fixture = Fixture::new(FakeProbe::reporting("main", "S1", 1700000000));

        let first = fixture.resolver().resolve(&unlocked_input(), None).unwrap();

        // Remote moved on; the impure entry no longer satisfies a request
        // pinned to the new state, forcing a fresh clone.
        fixture.probe.advance_to("main", "S2", 1700000100);
        let pinned = locked_input("main", "S2");
        let second = fixture.resolver().resolve(&pinned, None).unwrap();

        assert_ne!(first.handle, second.handle);
        assert_eq!(fixture.probe.clone_count(), 2);

        let impure = fixture
            .cache
            .lookup(&impure_key("repo", "https://example.org/repo"))
            .unwrap();
        assert_eq!(impure.info.get_str("state"), Some("S2"));

        // The old snapshot stays pinnable.
        let old_locked = fixture
            .cache
            .lookup(&locked_key("repo", "main", "S1"))
            .unwrap();
        assert_eq!(old_locked.info.get_str("state"), Some("S1"));
        assert_eq!(old_locked.handle, first.handle);
    }

    #[test]
    fn stale_impure_entry_with_wildcard_request_is_reused() {
        let fixture = Fixture::new(FakeProbe::reporting("main", "S1", 1700000000));

        let first = fixture.resolver().resolve(&unlocked_input(), None).unwrap();
        fixture.probe.advance_to("main", "S2", 1700000100);
        let second = fixture.resolver().resolve(&unlocked_input(), None).unwrap();

        // No pin requested: the cached latest still counts as an answer.
        assert_eq!(first.handle, second.handle);
        assert_eq!(fixture.probe.clone_count(), 1);
    }

    #[test]
    fn expired_impure_entry_forces_a_fresh_clone_and_keeps_old_pins() {
        let fixture = Fixture::new(FakeProbe::reporting("main", "S1", 1700000000));

        let first = fixture.resolver().resolve(&unlocked_input(), None).unwrap();
        fixture.probe.advance_to("main", "S2", 1700000100);
        fixture.cache.expire_provisional();

        let second = fixture.resolver().resolve(&unlocked_input(), None).unwrap();

        assert_ne!(first.handle, second.handle);
        assert_eq!(second.input.state.as_deref(), Some("S2"));
        assert_eq!(fixture.probe.clone_count(), 2);

        let impure = fixture
            .cache
            .lookup(&impure_key("repo", "https://example.org/repo"))
            .unwrap();
        assert_eq!(impure.info.get_str("state"), Some("S2"));

        let old_locked = fixture
            .cache
            .lookup(&locked_key("repo", "main", "S1"))
            .unwrap();
        assert_eq!(old_locked.handle, first.handle);
    }

    #[test]
    fn explicit_name_overrides_the_derived_one() {
        let fixture = Fixture::new(FakeProbe::reporting("main", "S1", 1700000000));
        fixture
            .resolver()
            .resolve(&unlocked_input(), Some("custom"))
            .unwrap();

        assert!(fixture
            .cache
            .lookup(&impure_key("custom", "https://example.org/repo"))
            .is_some());
        assert!(fixture
            .cache
            .lookup(&impure_key("repo", "https://example.org/repo"))
            .is_none());
    }

    #[test]
    fn strict_mode_fails_on_probe_failure() {
        let fixture = Fixture::new(FakeProbe::failing_status());
        let error = fixture.resolver().resolve(&unlocked_input(), None).unwrap_err();
        assert!(matches!(error, ResolveError::Probe(_)));
        assert!(fixture
            .cache
            .lookup(&impure_key("repo", "https://example.org/repo"))
            .is_none());
    }

    #[test]
    fn lenient_mode_returns_unresolved_tree_without_cache_writes() {
        let fixture = Fixture::new(FakeProbe::failing_status());
        let resolution = fixture
            .lenient_resolver()
            .resolve(&unlocked_input(), None)
            .unwrap();

        assert!(resolution.handle.path.join("file.txt").exists());
        assert_eq!(resolution.input, unlocked_input());
        assert!(fixture
            .cache
            .lookup(&impure_key("repo", "https://example.org/repo"))
            .is_none());
    }

    #[test]
    fn worked_example_scenario() {
        let fixture = Fixture::new(FakeProbe::reporting("main", "S1", 1700000000));
        let resolution = fixture.resolver().resolve(&unlocked_input(), None).unwrap();

        let mut expected_info = Attrs::new();
        expected_info.insert("channel", "main");
        expected_info.insert("state", "S1");
        expected_info.insert("lastModified", 1700000000u64);

        let impure = fixture
            .cache
            .lookup(&impure_key("repo", "https://example.org/repo"))
            .unwrap();
        assert_eq!(impure.info, expected_info);
        assert!(!impure.is_final);

        let locked = fixture
            .cache
            .lookup(&locked_key("repo", "main", "S1"))
            .unwrap();
        assert_eq!(locked.info, expected_info);
        assert!(locked.is_final);
        assert_eq!(locked.handle, resolution.handle);
    }

    #[test]
    fn resolved_tree_lands_under_its_name() {
        let fixture = Fixture::new(FakeProbe::reporting("main", "S1", 1700000000));
        let resolution = fixture.resolver().resolve(&unlocked_input(), None).unwrap();
        let file_name = resolution
            .handle
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        assert!(file_name.ends_with("-repo"), "got {file_name}");
        assert!(!file_name.starts_with(".tmp-"));
    }
}
