//! Host configuration: where plugins, their data and the staging area live.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application folder name under the platform data directory.
const APP_DIR_NAME: &str = "plugin-host";

/// Folder name of the staging area under the OS temp directory.
const STAGING_DIR_NAME: &str = "plugin-host-staging";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub data_root: PathBuf,
    /// Plugins shipped with the host.
    pub preinstalled_dir: PathBuf,
    /// Plugins installed by the user.
    pub plugins_dir: PathBuf,
    pub settings_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Extraction area used while installing a package.
    pub staging_dir: PathBuf,
    /// Plugin IDs that install into `preinstalled_dir` instead of `plugins_dir`.
    pub preinstalled_ids: Vec<String>,
}

/// On-disk form: every key optional, gaps are derived from `data_root`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    data_root: Option<PathBuf>,
    preinstalled_dir: Option<PathBuf>,
    plugins_dir: Option<PathBuf>,
    settings_dir: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    staging_dir: Option<PathBuf>,
    preinstalled_ids: Option<Vec<String>>,
}

impl HostConfig {
    /// Derives every location from a single data root.
    pub fn from_data_root(data_root: impl Into<PathBuf>) -> Self {
        let data_root = data_root.into();
        Self {
            preinstalled_dir: data_root.join("preinstalled_plugins"),
            plugins_dir: data_root.join("plugins"),
            settings_dir: data_root.join("settings").join("plugins"),
            cache_dir: data_root.join("cache").join("plugins"),
            staging_dir: data_root.join("tmp").join("plugins"),
            preinstalled_ids: Vec::new(),
            data_root,
        }
    }

    /// Reads a JSON config file. Missing keys fall back to the
    /// `from_data_root` layout of the configured (or default) data root.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {:?}", path))?;
        let raw: RawConfig = serde_json::from_str(&content)
            .context(format!("Failed to parse config file: {:?}", path))?;

        let base = match raw.data_root {
            Some(root) => Self::from_data_root(root),
            None => Self::default(),
        };

        Ok(Self {
            preinstalled_dir: raw.preinstalled_dir.unwrap_or(base.preinstalled_dir),
            plugins_dir: raw.plugins_dir.unwrap_or(base.plugins_dir),
            settings_dir: raw.settings_dir.unwrap_or(base.settings_dir),
            cache_dir: raw.cache_dir.unwrap_or(base.cache_dir),
            staging_dir: raw.staging_dir.unwrap_or(base.staging_dir),
            preinstalled_ids: raw.preinstalled_ids.unwrap_or(base.preinstalled_ids),
            data_root: base.data_root,
        })
    }
}

impl Default for HostConfig {
    /// Platform data directory, with staging under the OS temp directory.
    fn default() -> Self {
        let data_root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME);
        Self {
            staging_dir: std::env::temp_dir().join(STAGING_DIR_NAME),
            ..Self::from_data_root(data_root)
        }
    }
}
