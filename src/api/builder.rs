use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use home::home_dir;

use crate::{
    cache::{PijulfetchCache, DEFAULT_IMPURE_TTL},
    probe::PijulProbe,
    resolver::ProbeMode,
    scheme::{PijulScheme, SchemeRegistry},
    store::FsContentStore,
    Pijulfetch,
};

#[derive(Default)]
pub struct PijulfetchBuilder {
    cache_directory: Option<PathBuf>,
    store_directory: Option<PathBuf>,
    probe_program: Option<String>,
    probe_mode: Option<ProbeMode>,
    impure_ttl: Option<Duration>,
}

impl PijulfetchBuilder {
    /// Location of the resolution cache directory.
    ///
    /// Defaults to `$HOME/.pijulfetch/cache`.
    pub fn cache_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_directory = Some(path.into());
        self
    }

    /// Location of the content store directory.
    ///
    /// Defaults to `$HOME/.pijulfetch/store`.
    pub fn store_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_directory = Some(path.into());
        self
    }

    /// Name or path of the pijul executable.
    ///
    /// Defaults to `pijul`, resolved through `$PATH`.
    pub fn probe_program(mut self, program: impl Into<String>) -> Self {
        self.probe_program = Some(program.into());
        self
    }

    /// How a failed status probe is handled; strict by default.
    pub fn probe_mode(mut self, mode: ProbeMode) -> Self {
        self.probe_mode = Some(mode);
        self
    }

    /// How long a cached unpinned resolution is reused before the remote is
    /// consulted again; one hour by default.
    pub fn impure_ttl(mut self, ttl: Duration) -> Self {
        self.impure_ttl = Some(ttl);
        self
    }

    pub fn try_build(self) -> anyhow::Result<Pijulfetch> {
        let Self {
            cache_directory,
            store_directory,
            probe_program,
            probe_mode,
            impure_ttl,
        } = self;

        let cache_directory = match cache_directory {
            Some(path) => path,
            None => default_directory("cache")?,
        };
        let store_directory = match store_directory {
            Some(path) => path,
            None => default_directory("store")?,
        };

        let cache =
            PijulfetchCache::new(cache_directory, impure_ttl.unwrap_or(DEFAULT_IMPURE_TTL))?;
        let store = FsContentStore::new(store_directory)?;
        let probe = match probe_program {
            Some(program) => PijulProbe::new(program),
            None => PijulProbe::default(),
        };
        let registry = SchemeRegistry::new().with_scheme(PijulScheme::default());

        Ok(Pijulfetch {
            cache,
            store,
            probe,
            scheme: PijulScheme::default(),
            registry,
            probe_mode: probe_mode.unwrap_or_default(),
        })
    }
}

fn default_directory(kind: &str) -> anyhow::Result<PathBuf> {
    let mut directory =
        home_dir().context("could not find home dir, please define the $HOME env variable")?;
    directory.push(".pijulfetch");
    directory.push(kind);
    Ok(directory)
}
