use std::path::{Path, PathBuf};

use anyhow::anyhow;
use url::Url;

use crate::{
    cache::PijulfetchCache,
    model::{attrs::Attrs, input::PijulInput},
    probe::PijulProbe,
    resolver::{ProbeMode, Resolution, Resolver},
    scheme::{InputScheme, PijulScheme, SchemeRegistry},
    store::FsContentStore,
};

mod builder;

pub use builder::PijulfetchBuilder;

pub struct Pijulfetch {
    cache: PijulfetchCache,
    store: FsContentStore,
    probe: PijulProbe,
    scheme: PijulScheme,
    registry: SchemeRegistry,
    probe_mode: ProbeMode,
}

impl Pijulfetch {
    pub fn builder() -> PijulfetchBuilder {
        PijulfetchBuilder::default()
    }

    /// Builds a validated input from a URL-ish reference.
    pub fn input_from_url(&self, url: &str) -> anyhow::Result<PijulInput> {
        self.registry
            .input_from_url(url)?
            .ok_or_else(|| anyhow!("unrecognized repository URL scheme: {url}"))
    }

    /// Builds a validated input from a wire attribute mapping.
    pub fn input_from_attrs(&self, attrs: &Attrs) -> anyhow::Result<PijulInput> {
        self.registry
            .input_from_attrs(attrs)?
            .ok_or_else(|| anyhow!("no input scheme recognizes these attributes"))
    }

    /// Materializes the input into the content store, returning its store
    /// handle and the enriched input.
    pub fn resolve(&self, input: &PijulInput, name: Option<&str>) -> anyhow::Result<Resolution> {
        let resolver = Resolver::new(&self.probe, &self.cache, &self.store, self.probe_mode);
        Ok(resolver.resolve(input, name)?)
    }

    /// Renders an input back into a URL; for a resolved input this is a
    /// fully pinned reference.
    pub fn to_url(&self, input: &PijulInput) -> anyhow::Result<Url> {
        Ok(self.scheme.to_url(input)?)
    }

    /// Whether the input already carries enough metadata that resolution
    /// can be skipped by callers needing only a freshness judgment.
    pub fn has_complete_info(&self, input: &PijulInput) -> bool {
        self.scheme.has_complete_info(input)
    }

    /// For an unpinned `file` URL, the local working copy path that can be
    /// used in place without fetching.
    pub fn local_source_path(&self, input: &PijulInput) -> Option<PathBuf> {
        self.scheme.local_source_path(input)
    }

    /// Registers a changed file with the input's local working copy,
    /// recording the change when a message is given. Fails for inputs that
    /// do not denote a local working copy.
    pub fn mark_changed_file(
        &self,
        input: &PijulInput,
        file: &Path,
        commit_message: Option<&str>,
    ) -> anyhow::Result<()> {
        Ok(self
            .scheme
            .mark_changed_file(&self.probe, input, file, commit_message)?)
    }

    pub fn clear_cache(&self) -> anyhow::Result<()> {
        self.cache.clear()?;
        Ok(())
    }
}
