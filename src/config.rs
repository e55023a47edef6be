use std::{collections::HashMap, path::PathBuf};

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

use crate::resolver::ProbeMode;

pub struct PijulfetchConfig {
    pub cache_dir: Option<PathBuf>,
    pub store_dir: Option<PathBuf>,
    pub probe_mode: Option<ProbeMode>,
}

impl PijulfetchConfig {
    pub fn load() -> anyhow::Result<Self> {
        let raw_config = RawConfig::load(None)?;

        Ok(Self {
            cache_dir: raw_config.cache.dir,
            store_dir: raw_config.store.dir,
            probe_mode: raw_config.probe.mode,
        })
    }
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct RawConfig {
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    store: StoreConfig,
    #[serde(default)]
    probe: ProbeConfig,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct CacheConfig {
    dir: Option<PathBuf>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct StoreConfig {
    dir: Option<PathBuf>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct ProbeConfig {
    mode: Option<ProbeMode>,
}

impl RawConfig {
    fn load(env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(
                Environment::with_prefix("PIJULFETCH")
                    .separator("_")
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn load_empty() {
        let env = HashMap::from([]);
        let config = RawConfig::load(Some(env)).unwrap();
        assert_eq!(config, RawConfig::default());
    }

    #[test]
    fn load_environment() {
        let env = HashMap::from([
            ("PIJULFETCH_CACHE_DIR".to_owned(), "/cache".to_owned()),
            ("PIJULFETCH_STORE_DIR".to_owned(), "/store".to_owned()),
            ("PIJULFETCH_PROBE_MODE".to_owned(), "lenient".to_owned()),
        ]);
        let config = RawConfig::load(Some(env)).unwrap();
        assert_eq!(
            config,
            RawConfig {
                cache: CacheConfig {
                    dir: Some("/cache".into())
                },
                store: StoreConfig {
                    dir: Some("/store".into())
                },
                probe: ProbeConfig {
                    mode: Some(ProbeMode::Lenient)
                }
            }
        )
    }
}
