use std::{collections::HashMap, path::PathBuf};

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Settings that can be given through `SUBMIRROR_*` environment variables
/// instead of command line flags.
pub struct SubmirrorConfig {
    pub mirror_dir: Option<PathBuf>,
    pub workers: Option<usize>,
    pub queue_length: Option<usize>,
}

impl SubmirrorConfig {
    pub fn load() -> anyhow::Result<Self> {
        let raw_config = RawConfig::load(None)?;

        Ok(Self {
            mirror_dir: raw_config.mirror.dir,
            workers: raw_config.workers.count,
            queue_length: raw_config.workers.queue,
        })
    }
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct RawConfig {
    #[serde(default)]
    mirror: MirrorConfig,
    #[serde(default)]
    workers: WorkersConfig,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct MirrorConfig {
    dir: Option<PathBuf>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct WorkersConfig {
    count: Option<usize>,
    queue: Option<usize>,
}

impl RawConfig {
    fn load(env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(
                Environment::with_prefix("SUBMIRROR")
                    .separator("_")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }
}
