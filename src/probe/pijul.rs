use std::{
    path::Path,
    process::{Command, Stdio},
};

use chrono::DateTime;
use log::{debug, trace};
use serde::Deserialize;

use super::{ProbeError, RepoStatus, RepositoryProbe};

const METADATA_DIR: &str = ".pijul";

/// The channel listing marks the active channel with `* `, e.g.
/// `* main`. Exactly one line carries the marker.
const CHANNEL_MARKER: char = '*';
const CHANNEL_PREFIX_LEN: usize = 2;

pub struct PijulProbe {
    program: String,
}

#[derive(Deserialize)]
struct LogEntry {
    timestamp: String,
    state: String,
}

impl PijulProbe {
    pub fn new(program: impl Into<String>) -> Self {
        PijulProbe {
            program: program.into(),
        }
    }

    /// Runs an informational command with captured output.
    fn run(&self, args: &[&str], repo_dir: &Path) -> Result<String, ProbeError> {
        trace!("running {} {} in {}", self.program, args.join(" "), repo_dir.display());
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(repo_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ProbeError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(ProbeError::CommandFailed {
                program: self.program.clone(),
                command: args.join(" "),
                status: output.status,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Runs a command with the terminal passed through, so the tool can
    /// prompt for credentials or change descriptions.
    fn run_interactive(&self, args: &[String], dir: Option<&Path>) -> Result<(), ProbeError> {
        trace!("running {} {} interactively", self.program, args.join(" "));
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(dir) = dir {
            command.current_dir(dir);
        }
        let status = command
            .status()
            .map_err(|source| ProbeError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(ProbeError::CommandFailed {
                program: self.program.clone(),
                command: args.join(" "),
                status,
            });
        }
        Ok(())
    }

    fn latest_state(&self, repo_dir: &Path) -> Result<(String, u64), ProbeError> {
        let output = self.run(
            &["log", "--output-format", "json", "--state", "--limit", "1"],
            repo_dir,
        )?;
        parse_log(&output)
    }

    fn current_channel(&self, repo_dir: &Path) -> Result<String, ProbeError> {
        let output = self.run(&["channel"], repo_dir)?;
        parse_channel_listing(&output)
    }
}

impl Default for PijulProbe {
    fn default() -> Self {
        PijulProbe::new("pijul")
    }
}

impl RepositoryProbe for PijulProbe {
    fn clone_repo(
        &self,
        url: &str,
        channel: Option<&str>,
        state: Option<&str>,
        dest: &Path,
    ) -> Result<(), ProbeError> {
        let mut args = vec!["clone".to_owned()];
        if let Some(channel) = channel {
            args.push("--channel".to_owned());
            args.push(channel.to_owned());
        }
        if let Some(state) = state {
            args.push("--state".to_owned());
            args.push(state.to_owned());
        }
        args.push(url.to_owned());
        args.push(dest.to_string_lossy().into_owned());

        debug!("cloning {} into {}", url, dest.display());
        self.run_interactive(&args, None)
    }

    fn status(&self, repo_dir: &Path) -> Result<RepoStatus, ProbeError> {
        let (state, last_modified) = self.latest_state(repo_dir)?;
        let channel = self.current_channel(repo_dir)?;
        Ok(RepoStatus {
            channel,
            state,
            last_modified,
        })
    }

    fn strip_metadata(&self, repo_dir: &Path) -> Result<(), ProbeError> {
        let metadata_dir = repo_dir.join(METADATA_DIR);
        if metadata_dir.exists() {
            std::fs::remove_dir_all(&metadata_dir)?;
        }
        Ok(())
    }

    fn track_file(&self, repo_dir: &Path, file: &Path) -> Result<(), ProbeError> {
        let file = file.to_string_lossy();
        self.run(&["add", "--", file.as_ref()], repo_dir)?;
        Ok(())
    }

    fn record_change(
        &self,
        repo_dir: &Path,
        file: &Path,
        message: &str,
    ) -> Result<(), ProbeError> {
        // Interactive: recording may prompt for identity or key passphrase.
        let args = vec![
            "record".to_owned(),
            file.to_string_lossy().into_owned(),
            "-m".to_owned(),
            message.to_owned(),
        ];
        self.run_interactive(&args, Some(repo_dir))
    }
}

/// Parses `pijul log --output-format json --state --limit 1`: a JSON array
/// whose first element carries the state identifier and an RFC3339
/// timestamp. Timezone offsets are honored, not discarded.
fn parse_log(output: &str) -> Result<(String, u64), ProbeError> {
    let entries: Vec<LogEntry> = serde_json::from_str(output)?;
    let entry = entries.into_iter().next().ok_or(ProbeError::EmptyLog)?;

    let timestamp =
        DateTime::parse_from_rfc3339(&entry.timestamp).map_err(|source| ProbeError::BadTimestamp {
            timestamp: entry.timestamp.clone(),
            source,
        })?;
    let last_modified = u64::try_from(timestamp.timestamp())
        .map_err(|_| ProbeError::PreEpochTimestamp(entry.timestamp.clone()))?;

    Ok((entry.state, last_modified))
}

/// Parses the channel listing; the active channel is the single line
/// prefixed with the marker.
fn parse_channel_listing(output: &str) -> Result<String, ProbeError> {
    for line in output.lines() {
        if line.starts_with(CHANNEL_MARKER) {
            if let Some(name) = line.get(CHANNEL_PREFIX_LEN..) {
                if !name.is_empty() {
                    return Ok(name.to_owned());
                }
            }
        }
    }
    Err(ProbeError::NoCurrentChannel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_log_reads_first_entry() {
        let output = r#"[{"hash":"ABC","state":"S1","timestamp":"2023-11-14T22:13:20+00:00","authors":[]}]"#;
        let (state, last_modified) = parse_log(output).unwrap();
        assert_eq!(state, "S1");
        assert_eq!(last_modified, 1700000000);
    }

    #[test]
    fn parse_log_honors_timezone_offset() {
        let output = r#"[{"state":"S1","timestamp":"2023-11-15T00:13:20+02:00"}]"#;
        let (_, last_modified) = parse_log(output).unwrap();
        assert_eq!(last_modified, 1700000000);
    }

    #[test]
    fn parse_log_empty_array_is_an_error() {
        assert!(matches!(parse_log("[]"), Err(ProbeError::EmptyLog)));
    }

    #[test]
    fn parse_log_garbage_is_an_error() {
        assert!(matches!(
            parse_log("not json"),
            Err(ProbeError::UnparseableLog(_))
        ));
    }

    #[test]
    fn parse_log_bad_timestamp_is_an_error() {
        let output = r#"[{"state":"S1","timestamp":"yesterday"}]"#;
        assert!(matches!(
            parse_log(output),
            Err(ProbeError::BadTimestamp { .. })
        ));
    }

    #[test]
    fn parse_channel_listing_finds_the_marked_line() {
        let output = "  stable\n* main\n  experiment\n";
        assert_eq!(parse_channel_listing(output).unwrap(), "main");
    }

    #[test]
    fn parse_channel_listing_without_marker_is_an_error() {
        let output = "  stable\n  main\n";
        assert!(matches!(
            parse_channel_listing(output),
            Err(ProbeError::NoCurrentChannel)
        ));
    }

    #[test]
    fn parse_channel_listing_empty_output_is_an_error() {
        assert!(matches!(
            parse_channel_listing(""),
            Err(ProbeError::NoCurrentChannel)
        ));
    }
}
