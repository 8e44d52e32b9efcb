use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use flightdeck_jobs::{CronConfig, JobsConfig};
use serde::Deserialize;

use crate::error::{CliError, Result};

pub(crate) const DEFAULT_CONFIG_FILE: &str = "flightdeck.toml";
const DEFAULT_STORE_DIR: &str = ".flightdeck/flights";
const DEFAULT_CLAIMS_DIR: &str = ".flightdeck/claims";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Config {
    pub(crate) store: StoreConfig,
    pub(crate) jobs: JobsConfig,
    pub(crate) cleanup: CronConfig,
    pub(crate) log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct StoreConfig {
    pub(crate) dir: PathBuf,
    /// Where periodic jobs record their claims; shared by every replica.
    pub(crate) claims_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_STORE_DIR),
            claims_dir: PathBuf::from(DEFAULT_CLAIMS_DIR),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct LogConfig {
    pub(crate) filter: Option<String>,
}

impl Config {
    /// Load `path`, or `flightdeck.toml` in the current directory when no
    /// path is given. Only the implicit default file may be absent.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound && !explicit => {
                return Ok(Self::default());
            }
            Err(source) => return Err(CliError::ConfigRead { path, source }),
        };
        Self::parse(&content).map_err(|source| CliError::ConfigParse {
            path,
            source: Box::new(source),
        })
    }

    fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
