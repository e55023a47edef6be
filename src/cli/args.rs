use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Resolves Pijul repository references into content-addressed snapshots.
#[derive(Debug, Parser)]
#[command(version)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
    /// Location of the resolution cache directory.
    #[arg(long)]
    pub cache_directory: Option<PathBuf>,
    /// Location of the content store directory.
    #[arg(long)]
    pub store_directory: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve a repository reference and print the store path
    Resolve {
        /// Repository URL (pijul, pijul+http, pijul+https or pijul+ssh)
        url: String,
        /// Pin the resolution to a channel
        #[arg(long)]
        channel: Option<String>,
        /// Pin the resolution to a state identifier
        #[arg(long)]
        state: Option<String>,
        /// Override the name derived from the URL
        #[arg(long)]
        name: Option<String>,
    },
    /// Resolve a repository reference and print a fully pinned URL
    Lock {
        /// Repository URL (pijul, pijul+http, pijul+https or pijul+ssh)
        url: String,
        /// Pin the resolution to a channel
        #[arg(long)]
        channel: Option<String>,
        /// Pin the resolution to a state identifier
        #[arg(long)]
        state: Option<String>,
        /// Override the name derived from the URL
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove all cached resolutions
    ClearCache,
}
