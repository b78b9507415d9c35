//! Canonical filesystem locations for plugins and their per-plugin data.
//!
//! Everything here is a pure path computation over the configured roots,
//! except [`PluginLayout::ensure_directories`].

use crate::config::HostConfig;
use crate::plugin::PluginManifest;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Hex digits of the PluginID hash kept in a combined name.
const ID_HASH_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct PluginLayout {
    preinstalled_dir: PathBuf,
    plugins_dir: PathBuf,
    settings_dir: PathBuf,
    cache_dir: PathBuf,
    staging_dir: PathBuf,
    preinstalled_ids: HashSet<String>,
}

impl PluginLayout {
    pub fn new(config: &HostConfig) -> Self {
        Self {
            preinstalled_dir: config.preinstalled_dir.clone(),
            plugins_dir: config.plugins_dir.clone(),
            settings_dir: config.settings_dir.clone(),
            cache_dir: config.cache_dir.clone(),
            staging_dir: config.staging_dir.clone(),
            preinstalled_ids: config.preinstalled_ids.iter().cloned().collect(),
        }
    }

    pub fn preinstalled_dir(&self) -> &Path {
        &self.preinstalled_dir
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    pub fn settings_dir(&self) -> &Path {
        &self.settings_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Roots scanned for plugin directories, preinstalled first.
    pub fn plugin_roots(&self) -> [&Path; 2] {
        [&self.preinstalled_dir, &self.plugins_dir]
    }

    /// Creates every root directory. Safe to call repeatedly.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.preinstalled_dir,
            &self.plugins_dir,
            &self.settings_dir,
            &self.cache_dir,
            &self.staging_dir,
        ] {
            fs::create_dir_all(dir)
                .context(format!("Failed to create plugin directory: {:?}", dir))?;
        }
        Ok(())
    }

    pub fn is_preinstalled_path(&self, directory: &Path) -> bool {
        directory.starts_with(&self.preinstalled_dir)
    }

    pub fn is_preinstalled_id(&self, plugin_id: &str) -> bool {
        self.preinstalled_ids.contains(plugin_id)
    }

    /// Stable per-plugin folder name: `{directory name}_{md5(PluginID) prefix}`.
    pub fn combined_name(&self, manifest: &PluginManifest) -> String {
        let hash = format!("{:x}", md5::compute(manifest.plugin_id.as_bytes()));
        format!("{}_{}", manifest.directory_name(), &hash[..ID_HASH_LEN])
    }

    pub fn settings_directory(&self, manifest: &PluginManifest) -> PathBuf {
        self.settings_dir.join(self.combined_name(manifest))
    }

    pub fn cache_directory(&self, manifest: &PluginManifest) -> PathBuf {
        self.cache_dir.join(self.combined_name(manifest))
    }

    /// Where a staged plugin directory named `staged_name` is installed.
    pub fn install_target(&self, staged_name: &str, plugin_id: &str) -> PathBuf {
        if self.is_preinstalled_id(plugin_id) {
            self.preinstalled_dir.join(staged_name)
        } else {
            self.plugins_dir.join(format!("{}_{}", staged_name, plugin_id))
        }
    }

    /// Extraction directory for the package whose file stem is `package_name`.
    pub fn staging_directory(&self, package_name: &str) -> PathBuf {
        self.staging_dir.join(package_name)
    }
}
