// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snapboot_btrfs::SnapshotSearch;
use snapboot_types::{SnapshotCount, SubvolumeReference};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/snapboot.toml";
pub const DEFAULT_REFIND_CONFIG: &str = "refind.conf";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: LoggingLevel,
    /// Also write a daily rolling log file here
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnapshotManipulation {
    pub selection_count: SnapshotCount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootStanzaGeneration {
    /// File name of the root rEFInd configuration on the ESP
    #[serde(default = "default_refind_config")]
    pub refind_config: String,

    /// Title of the menuentry the generated stanzas are cloned from
    pub template_entry: String,

    #[serde(default)]
    pub subvolume_reference: SubvolumeReference,
}

fn default_refind_config() -> String {
    DEFAULT_REFIND_CONFIG.to_string()
}

/// Contents of `/etc/snapboot.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Filesystem UUID or PARTUUID of the ESP, needed when several exist
    #[serde(default)]
    pub esp_uuid: Option<String>,

    pub snapshot_search: Vec<SnapshotSearch>,

    #[serde(default)]
    pub snapshot_manipulation: SnapshotManipulation,

    pub boot_stanza_generation: BootStanzaGeneration,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that cannot be expressed in the schema.
    ///
    /// The selection count is checked when snapshots are selected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.snapshot_search.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[snapshot_search]] directory is required".to_string(),
            ));
        }

        for search in &self.snapshot_search {
            if !search.directory.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "snapshot_search directory '{}' must be absolute",
                    search.directory.display()
                )));
            }
            if search.max_depth == 0 {
                return Err(ConfigError::Invalid(format!(
                    "snapshot_search max_depth for '{}' must be at least 1",
                    search.directory.display()
                )));
            }
        }

        let stanzas = &self.boot_stanza_generation;
        if stanzas.refind_config.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "boot_stanza_generation.refind_config must not be empty".to_string(),
            ));
        }
        if stanzas.template_entry.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "boot_stanza_generation.template_entry must not be empty".to_string(),
            ));
        }

        if self.esp_uuid.as_deref().is_some_and(|uuid| uuid.trim().is_empty()) {
            return Err(ConfigError::Invalid("esp_uuid must not be empty".to_string()));
        }

        Ok(())
    }
}
