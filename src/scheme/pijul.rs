use std::path::{Path, PathBuf};

use log::trace;
use url::Url;

use crate::{
    model::{attrs::Attrs, input::PijulInput},
    probe::RepositoryProbe,
};

use super::{InputScheme, MarkError, Schema, SchemeError, CURRENT_SCHEMA};

const SCHEME_TYPE: &str = "pijul";
const SCHEME_PREFIX: &str = "pijul+";
const URL_SCHEMES: [&str; 4] = ["pijul", "pijul+http", "pijul+https", "pijul+ssh"];

/// Query parameters lifted out of the URL into first-class attributes; all
/// other parameters stay part of the stored repository URL.
const RESERVED_PARAMS: [&str; 2] = ["channel", "state"];

pub struct PijulScheme {
    schema: Schema,
}

impl PijulScheme {
    pub fn new(schema: Schema) -> Self {
        PijulScheme { schema }
    }

    /// A `file` URL with no pin denotes a local working copy that can be
    /// used in place without fetching.
    pub fn local_source_path(&self, input: &PijulInput) -> Option<PathBuf> {
        if input.url.scheme() == "file" && input.channel.is_none() && input.state.is_none() {
            input.url.to_file_path().ok()
        } else {
            None
        }
    }

    /// Registers a changed file with the local working copy an unpinned
    /// `file` URL denotes, recording the change when a message is given.
    pub fn mark_changed_file<P: RepositoryProbe>(
        &self,
        probe: &P,
        input: &PijulInput,
        file: &Path,
        commit_message: Option<&str>,
    ) -> Result<(), MarkError> {
        let source_path = self
            .local_source_path(input)
            .ok_or_else(|| MarkError::NotLocal {
                input: input.to_string(),
            })?;

        probe.track_file(&source_path, file)?;
        if let Some(message) = commit_message {
            probe.record_change(&source_path, file, message)?;
        }
        Ok(())
    }
}

impl Default for PijulScheme {
    fn default() -> Self {
        PijulScheme::new(CURRENT_SCHEMA)
    }
}

impl InputScheme for PijulScheme {
    fn input_from_url(&self, url: &str) -> Result<Option<PijulInput>, SchemeError> {
        let Ok(parsed) = Url::parse(url) else {
            return Ok(None);
        };
        if !URL_SCHEMES.contains(&parsed.scheme()) {
            return Ok(None);
        }

        // `Url` serializes the scheme in lowercase, so the prefix can be
        // stripped textually.
        let stripped = parsed
            .as_str()
            .strip_prefix(SCHEME_PREFIX)
            .unwrap_or(parsed.as_str());
        let mut base = Url::parse(stripped).map_err(|source| SchemeError::InvalidUrl {
            url: stripped.to_owned(),
            source,
        })?;

        let mut attrs = Attrs::new();
        attrs.insert("type", SCHEME_TYPE);

        let mut passthrough = Vec::new();
        for (name, value) in base.query_pairs() {
            if RESERVED_PARAMS.contains(&name.as_ref()) {
                attrs.insert(name.into_owned(), value.into_owned());
            } else {
                passthrough.push((name.into_owned(), value.into_owned()));
            }
        }
        base.set_query(None);
        if !passthrough.is_empty() {
            base.query_pairs_mut().extend_pairs(passthrough);
        }

        attrs.insert("url", base.to_string());

        trace!("recognized pijul URL as {}", attrs);
        self.input_from_attrs(&attrs)
    }

    fn input_from_attrs(&self, attrs: &Attrs) -> Result<Option<PijulInput>, SchemeError> {
        if attrs.get_str("type") != Some(SCHEME_TYPE) {
            return Ok(None);
        }

        if !self.schema.supports_state && attrs.contains("state") {
            return Err(SchemeError::UnsupportedAttribute {
                name: "state".to_owned(),
            });
        }
        for name in attrs.keys() {
            if !self.schema.allowed.contains(&name) {
                return Err(SchemeError::UnsupportedAttribute {
                    name: name.to_owned(),
                });
            }
        }

        let url = required_str(attrs, "url")?;
        let url = Url::parse(url).map_err(|source| SchemeError::InvalidUrl {
            url: url.to_owned(),
            source,
        })?;

        let mut input = PijulInput::new(url);
        input.channel = optional_str(attrs, "channel")?.map(str::to_owned);
        input.state = optional_str(attrs, "state")?.map(str::to_owned);
        input.last_modified = optional_int(attrs, "lastModified")?;

        Ok(Some(input))
    }

    fn to_url(&self, input: &PijulInput) -> Result<Url, SchemeError> {
        let mut url = input.url.clone();
        if let Some(channel) = &input.channel {
            url.query_pairs_mut().append_pair("channel", channel);
        }
        if let Some(state) = &input.state {
            url.query_pairs_mut().append_pair("state", state);
        }

        if url.scheme() == SCHEME_TYPE {
            return Ok(url);
        }
        let prefixed = format!("{}{}", SCHEME_PREFIX, url);
        Url::parse(&prefixed).map_err(|source| SchemeError::InvalidUrl {
            url: prefixed,
            source,
        })
    }

    fn has_complete_info(&self, input: &PijulInput) -> bool {
        input.last_modified.is_some()
    }
}

fn required_str<'a>(attrs: &'a Attrs, name: &str) -> Result<&'a str, SchemeError> {
    optional_str(attrs, name)?.ok_or_else(|| SchemeError::MissingAttribute {
        name: name.to_owned(),
    })
}

fn optional_str<'a>(attrs: &'a Attrs, name: &str) -> Result<Option<&'a str>, SchemeError> {
    if !attrs.contains(name) {
        return Ok(None);
    }
    attrs
        .get_str(name)
        .map(Some)
        .ok_or_else(|| SchemeError::WrongAttributeType {
            name: name.to_owned(),
        })
}

fn optional_int(attrs: &Attrs, name: &str) -> Result<Option<u64>, SchemeError> {
    if !attrs.contains(name) {
        return Ok(None);
    }
    attrs
        .get_int(name)
        .map(Some)
        .ok_or_else(|| SchemeError::WrongAttributeType {
            name: name.to_owned(),
        })
}
