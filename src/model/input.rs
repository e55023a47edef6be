use std::fmt::{self, Display};

use url::Url;

use super::attrs::{AttrError, AttrValue, Attrs};

/// The fallback input name when the repository URL has no usable path
/// segment.
pub const DEFAULT_NAME: &str = "source";

/// A fully validated fetch request, and after resolution, a description of
/// the exact snapshot obtained.
///
/// The `url` is the scheme-stripped repository location: query parameters
/// other than the reserved `channel`/`state` are still part of it. An input
/// is *locked* when both `channel` and `state` pin one immutable snapshot;
/// a locked input must never resolve to anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PijulInput {
    pub url: Url,
    pub channel: Option<String>,
    pub state: Option<String>,
    pub last_modified: Option<u64>,
}

impl PijulInput {
    pub fn new(url: Url) -> Self {
        PijulInput {
            url,
            channel: None,
            state: None,
            last_modified: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.channel.is_some() && self.state.is_some()
    }

    /// The repository URL without query or fragment, as used in impure
    /// cache keys and passed to the clone operation.
    pub fn base_url(&self) -> String {
        let mut base = self.url.clone();
        base.set_query(None);
        base.set_fragment(None);
        base.to_string()
    }

    /// Derives a human-readable name from the last non-empty path segment
    /// of the URL.
    pub fn name(&self) -> String {
        self.url
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|segment| !segment.is_empty())
            .next_back()
            .unwrap_or(DEFAULT_NAME)
            .to_owned()
    }

    /// The provenance attributes this input already carries.
    pub fn info_attrs(&self) -> Attrs {
        let mut info = Attrs::new();
        if let Some(channel) = &self.channel {
            info.insert("channel", channel.clone());
        }
        if let Some(state) = &self.state {
            info.insert("state", state.clone());
        }
        if let Some(last_modified) = self.last_modified {
            info.insert("lastModified", last_modified);
        }
        info
    }

    /// Folds freshly discovered metadata into this input. An attribute the
    /// input already carries must agree with the incoming value; a
    /// disagreement means the caller is about to describe two different
    /// snapshots as one, which is an error, not an update.
    pub fn enriched(mut self, info: &Attrs) -> Result<Self, AttrError> {
        merge_str_field(&mut self.channel, info, "channel")?;
        merge_str_field(&mut self.state, info, "state")?;
        merge_int_field(&mut self.last_modified, info, "lastModified")?;
        Ok(self)
    }
}

impl Display for PijulInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)?;
        if let Some(channel) = &self.channel {
            write!(f, " channel={}", channel)?;
        }
        if let Some(state) = &self.state {
            write!(f, " state={}", state)?;
        }
        Ok(())
    }
}

fn merge_str_field(
    field: &mut Option<String>,
    info: &Attrs,
    key: &str,
) -> Result<(), AttrError> {
    let Some(incoming) = info.get_str(key) else {
        return Ok(());
    };
    match field {
        Some(existing) if existing != incoming => Err(AttrError::Conflict {
            key: key.to_owned(),
            existing: AttrValue::from(existing.as_str()),
            incoming: AttrValue::from(incoming),
        }),
        Some(_) => Ok(()),
        None => {
            *field = Some(incoming.to_owned());
            Ok(())
        }
    }
}

fn merge_int_field(field: &mut Option<u64>, info: &Attrs, key: &str) -> Result<(), AttrError> {
    let Some(incoming) = info.get_int(key) else {
        return Ok(());
    };
    match field {
        Some(existing) if *existing != incoming => Err(AttrError::Conflict {
            key: key.to_owned(),
            existing: AttrValue::Int(*existing),
            incoming: AttrValue::Int(incoming),
        }),
        Some(_) => Ok(()),
        None => {
            *field = Some(incoming);
            Ok(())
        }
    }
}
