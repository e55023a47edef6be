mod pijul;

pub use pijul::PijulProbe;

use std::{path::Path, process::ExitStatus};

use thiserror::Error;

use crate::model::attrs::Attrs;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("`{program} {command}` {status}")]
    CommandFailed {
        program: String,
        command: String,
        status: ExitStatus,
    },
    #[error("could not parse log output: {0}")]
    UnparseableLog(#[from] serde_json::Error),
    #[error("log contains no entries")]
    EmptyLog,
    #[error("invalid timestamp `{timestamp}`: {source}")]
    BadTimestamp {
        timestamp: String,
        source: chrono::ParseError,
    },
    #[error("timestamp `{0}` predates the epoch")]
    PreEpochTimestamp(String),
    #[error("could not determine the current channel")]
    NoCurrentChannel,
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

/// What the repository reports about itself right after a clone. Produced
/// once per clone and only ever persisted through cache entry metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoStatus {
    pub channel: String,
    pub state: String,
    pub last_modified: u64,
}

impl RepoStatus {
    pub fn to_attrs(&self) -> Attrs {
        let mut info = Attrs::new();
        info.insert("channel", self.channel.clone());
        info.insert("state", self.state.clone());
        info.insert("lastModified", self.last_modified);
        info
    }
}

/// Adapter around the external version-control tool. Pure I/O, no caching
/// logic.
pub trait RepositoryProbe {
    /// Clones `url` into `dest`, optionally starting from a specific
    /// channel and/or state. Must fail loudly on a non-zero exit.
    fn clone_repo(
        &self,
        url: &str,
        channel: Option<&str>,
        state: Option<&str>,
        dest: &Path,
    ) -> Result<(), ProbeError>;

    /// Reads the current channel and the most recent state of a cloned
    /// repository.
    fn status(&self, repo_dir: &Path) -> Result<RepoStatus, ProbeError>;

    /// Removes the tool's internal bookkeeping from a cloned tree, so two
    /// clones of the same snapshot produce byte-identical directories.
    fn strip_metadata(&self, repo_dir: &Path) -> Result<(), ProbeError>;

    /// Begins tracking a file in a local working copy.
    fn track_file(&self, repo_dir: &Path, file: &Path) -> Result<(), ProbeError>;

    /// Records pending changes to a tracked file under the given message.
    fn record_change(&self, repo_dir: &Path, file: &Path, message: &str)
        -> Result<(), ProbeError>;
}
