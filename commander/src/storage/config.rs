use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

const DEFAULT_DB_PATH: &str = "commander.redb";

/// Location of the commander database.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DB_PATH)
    }
}

impl StorageConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reads the `[storage]` section of a .toml file. `STORAGE__PATH`
    /// overrides the file; without either the database lands in the working
    /// directory.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = path
            .to_str()
            .with_context(|| format!("config path {} is not valid UTF-8", path.display()))?;

        Config::builder()
            .set_default("storage.path", DEFAULT_DB_PATH)?
            .add_source(File::with_name(file))
            .add_source(
                Environment::with_prefix("STORAGE")
                    .keep_prefix(true)
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("failed to read storage configuration from {file}"))?
            .get::<Self>("storage")
            .context("invalid [storage] section")
    }
}
