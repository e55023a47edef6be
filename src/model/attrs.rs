use std::{
    collections::BTreeMap,
    fmt::{self, Display, Write},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttrError {
    #[error("conflicting values for attribute `{key}`: `{existing}` vs `{incoming}`")]
    Conflict {
        key: String,
        existing: AttrValue,
        incoming: AttrValue,
    },
}

/// A single attribute value as it appears on the wire and in cache keys.
/// `lastModified` is the only integer attribute; everything else is a string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(u64),
    String(String),
}

impl Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(value) => write!(f, "{}", value),
            AttrValue::String(value) => f.write_str(value),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::String(value.to_owned())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::String(value)
    }
}

impl From<u64> for AttrValue {
    fn from(value: u64) -> Self {
        AttrValue::Int(value)
    }
}

/// An ordered attribute mapping. Cache keys and cache entry metadata are
/// both `Attrs`; ordering is fixed so that equal mappings serialize to equal
/// bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attrs(BTreeMap<String, AttrValue>);

impl Attrs {
    pub fn new() -> Self {
        Attrs::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(AttrValue::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<u64> {
        match self.0.get(key) {
            Some(AttrValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Inserts every attribute of `source`, refusing to overwrite an
    /// existing attribute with a different value. This is what keeps a
    /// descriptor from ever describing two different snapshots at once.
    pub fn merge(&mut self, source: Attrs) -> Result<(), AttrError> {
        for (key, incoming) in source.0 {
            match self.0.get(&key) {
                Some(existing) if *existing != incoming => {
                    return Err(AttrError::Conflict {
                        key,
                        existing: existing.clone(),
                        incoming,
                    });
                }
                Some(_) => {}
                None => {
                    self.0.insert(key, incoming);
                }
            }
        }
        Ok(())
    }
}

impl Display for Attrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char('{')?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        f.write_char('}')
    }
}

impl FromIterator<(String, AttrValue)> for Attrs {
    fn from_iter<T: IntoIterator<Item = (String, AttrValue)>>(iter: T) -> Self {
        Attrs(iter.into_iter().collect())
    }
}
