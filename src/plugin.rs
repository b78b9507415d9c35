//! Plugin manifest model and descriptor parsing.
//!
//! Every plugin directory carries a `plugin.json` descriptor:
//!
//! ```json
//! {
//!   "PluginID": "d9e6c1a4",
//!   "Name": "DeepL",
//!   "Author": "someone",
//!   "Website": "https://example.com",
//!   "Version": "1.2.0",
//!   "ExecuteFilePath": "libdeepl.so"
//! }
//! ```
//!
//! Keys the host does not interpret are kept in [`PluginManifest::metadata`].

use crate::capability::CapabilitySet;
use crate::error::ManifestError;
use crate::layout::PluginLayout;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// Well-known descriptor file name inside a plugin directory.
pub const MANIFEST_FILE_NAME: &str = "plugin.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginManifest {
    #[serde(rename = "PluginID")]
    pub plugin_id: String,
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub website: String,
    #[serde(with = "lenient_version")]
    pub version: Version,
    /// Entry code unit, relative to the plugin directory.
    pub execute_file_path: String,
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    #[serde(skip)]
    pub plugin_directory: PathBuf,
    #[serde(skip)]
    pub is_pre_plugin: bool,
    /// File stem of the loaded entry unit.
    #[serde(skip)]
    pub assembly_name: Option<String>,
    /// Name of the exported capability type.
    #[serde(skip)]
    pub capability_type: Option<String>,
    #[serde(skip)]
    pub capabilities: CapabilitySet,
    #[serde(skip)]
    pub settings_directory_path: Option<PathBuf>,
    #[serde(skip)]
    pub cache_directory_path: Option<PathBuf>,
}

impl PluginManifest {
    /// Absolute path of the entry code unit.
    pub fn execute_file(&self) -> PathBuf {
        self.plugin_directory.join(&self.execute_file_path)
    }

    pub fn directory_name(&self) -> String {
        self.plugin_directory
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn kind(&self) -> &'static str {
        if self.is_pre_plugin {
            "preinstalled"
        } else {
            "user"
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.capability_type.is_some()
    }
}

/// Parses the descriptor in `directory`, logging why it was rejected.
pub fn parse_manifest(directory: &Path, layout: &PluginLayout) -> Option<PluginManifest> {
    match read_manifest(directory, layout) {
        Ok(manifest) => Some(manifest),
        Err(e @ (ManifestError::InvalidJson { .. } | ManifestError::Read { .. })) => {
            error!("{}", e);
            None
        }
        Err(e) => {
            warn!("{}", e);
            None
        }
    }
}

/// Parses and validates the descriptor in `directory`.
///
/// Stamps `plugin_directory` and `is_pre_plugin`; load-time fields stay empty.
pub fn read_manifest(directory: &Path, layout: &PluginLayout) -> Result<PluginManifest, ManifestError> {
    if !directory.is_dir() {
        return Err(ManifestError::DirectoryMissing(directory.to_path_buf()));
    }

    let config_path = directory.join(MANIFEST_FILE_NAME);
    if !config_path.is_file() {
        return Err(ManifestError::DescriptorMissing(config_path));
    }

    let content = fs::read_to_string(&config_path).map_err(|source| ManifestError::Read {
        path: config_path.clone(),
        source,
    })?;
    if content.trim().is_empty() {
        return Err(ManifestError::EmptyDescriptor(config_path));
    }

    let mut manifest: PluginManifest =
        serde_json::from_str(&content).map_err(|source| ManifestError::InvalidJson {
            path: config_path.clone(),
            source,
        })?;

    if manifest.plugin_id.trim().is_empty() {
        return Err(ManifestError::EmptyPluginId(config_path));
    }

    manifest.plugin_directory = directory.to_path_buf();

    let execute_file = manifest.execute_file();
    if manifest.execute_file_path.trim().is_empty() || !execute_file.is_file() {
        return Err(ManifestError::ExecutableMissing(execute_file));
    }

    manifest.is_pre_plugin = layout.is_preinstalled_path(directory);

    Ok(manifest)
}

/// Parses a version string, accepting forms stricter semver rejects:
/// a leading `v`, missing minor/patch (`1.2` is `1.2.0`) and a fourth
/// numeric component (`1.2.3.4` becomes `1.2.3+4`).
pub fn parse_version(input: &str) -> Result<Version, semver::Error> {
    let trimmed = input.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    let split = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(split);

    let mut parts: Vec<&str> = core.split('.').collect();
    let mut build = None;
    if parts.len() == 4 && !suffix.contains('+') {
        build = parts.pop();
    }
    while parts.len() < 3 {
        parts.push("0");
    }

    let mut normalized = format!("{}{}", parts.join("."), suffix);
    if let Some(build) = build {
        normalized.push('+');
        normalized.push_str(build);
    }
    Version::parse(&normalized)
}

mod lenient_version {
    use semver::Version;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(version: &Version, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(version)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Version, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_version(&raw).map_err(serde::de::Error::custom)
    }
}
