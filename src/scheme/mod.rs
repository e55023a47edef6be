mod pijul;

pub use pijul::PijulScheme;

use thiserror::Error;
use url::Url;

use crate::{
    model::{attrs::Attrs, input::PijulInput},
    probe::ProbeError,
};

#[derive(Error, Debug)]
pub enum SchemeError {
    #[error("unsupported input attribute `{name}`")]
    UnsupportedAttribute { name: String },
    #[error("missing input attribute `{name}`")]
    MissingAttribute { name: String },
    #[error("input attribute `{name}` has the wrong type")]
    WrongAttributeType { name: String },
    #[error("invalid repository URL `{url}`: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
}

#[derive(Error, Debug)]
pub enum MarkError {
    #[error("{input} does not denote a local working copy")]
    NotLocal { input: String },
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// One schema revision: which attributes are legal and whether `state`
/// pins exist at all. A new revision is a new const, not a code change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    pub version: u32,
    pub allowed: &'static [&'static str],
    pub supports_state: bool,
}

/// The first schema revision had no `state` attribute, so inputs validated
/// against it can never be locked.
pub const SCHEMA_V1: Schema = Schema {
    version: 1,
    allowed: &["type", "url", "channel", "lastModified"],
    supports_state: false,
};

pub const SCHEMA_V2: Schema = Schema {
    version: 2,
    allowed: &["type", "url", "channel", "state", "lastModified"],
    supports_state: true,
};

pub const CURRENT_SCHEMA: Schema = SCHEMA_V2;

/// Translation between external representations (URLs, attribute maps) and
/// validated inputs. `Ok(None)` means "not mine, try the next scheme".
pub trait InputScheme {
    fn input_from_url(&self, url: &str) -> Result<Option<PijulInput>, SchemeError>;

    fn input_from_attrs(&self, attrs: &Attrs) -> Result<Option<PijulInput>, SchemeError>;

    fn to_url(&self, input: &PijulInput) -> Result<Url, SchemeError>;

    /// Whether the input already carries enough metadata that a caller who
    /// only needs a freshness judgment can skip resolution entirely.
    fn has_complete_info(&self, input: &PijulInput) -> bool;
}

/// An explicit registry of input schemes, built once at startup and passed
/// by reference to whatever composes them.
#[derive(Default)]
pub struct SchemeRegistry {
    schemes: Vec<Box<dyn InputScheme>>,
}

impl SchemeRegistry {
    pub fn new() -> Self {
        SchemeRegistry::default()
    }

    pub fn with_scheme(mut self, scheme: impl InputScheme + 'static) -> Self {
        self.schemes.push(Box::new(scheme));
        self
    }

    pub fn input_from_url(&self, url: &str) -> Result<Option<PijulInput>, SchemeError> {
        for scheme in &self.schemes {
            if let Some(input) = scheme.input_from_url(url)? {
                return Ok(Some(input));
            }
        }
        Ok(None)
    }

    pub fn input_from_attrs(&self, attrs: &Attrs) -> Result<Option<PijulInput>, SchemeError> {
        for scheme in &self.schemes {
            if let Some(input) = scheme.input_from_attrs(attrs)? {
                return Ok(Some(input));
            }
        }
        Ok(None)
    }
}
