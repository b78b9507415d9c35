//! Error types for manifest parsing, code loading and package installation.
//!
//! Discovery and load failures are isolated per plugin and end up in the
//! load summary; install failures are returned to the caller so the host can
//! show the message to the user as-is.

use semver::Version;
use std::path::PathBuf;
use thiserror::Error;

/// Why a plugin directory did not yield a manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("plugin directory does not exist: {}", .0.display())]
    DirectoryMissing(PathBuf),

    #[error("plugin config file not found: {}", .0.display())]
    DescriptorMissing(PathBuf),

    #[error("plugin config file is empty: {}", .0.display())]
    EmptyDescriptor(PathBuf),

    #[error("error reading plugin config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in plugin config {}: {source}", path.display())]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("plugin config has an empty PluginID: {}", .0.display())]
    EmptyPluginId(PathBuf),

    #[error("plugin executable file not found: {}", .0.display())]
    ExecutableMissing(PathBuf),
}

/// Failure to bring a plugin's code into the process.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The entry code unit disappeared between discovery and load.
    #[error("plugin file not found: {}", .0.display())]
    CodeUnitMissing(PathBuf),

    /// One message per declaration, export or dependency that failed to resolve.
    #[error("type loading failed: {}", .0.join("; "))]
    TypeResolutionFailed(Vec<String>),

    #[error("no exported type implements a plugin capability in {}", .0.display())]
    CapabilityNotFound(PathBuf),

    /// The unit at this path is already mapped; opening it again would
    /// hand back the old code.
    #[error("plugin file is already loaded in this process: {}", .0.display())]
    AlreadyLoaded(PathBuf),

    #[error("plugin loading error in {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl LoadError {
    /// Short name of the failure kind, used in load summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::CodeUnitMissing(_) => "CodeUnitMissing",
            LoadError::TypeResolutionFailed(_) => "TypeResolutionFailed",
            LoadError::CapabilityNotFound(_) => "CapabilityNotFound",
            LoadError::AlreadyLoaded(_) => "AlreadyLoaded",
            LoadError::Load { .. } => "LoadError",
        }
    }
}

/// Failure of [`crate::PluginManager::install_from_package`].
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Plugin path cannot be empty.")]
    EmptyPath,

    #[error("Plugin file does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Unsupported plugin file type: {extension}. Expected .{expected}")]
    UnsupportedExtension {
        extension: String,
        expected: &'static str,
    },

    #[error("Failed to clean extraction directory: {0}")]
    StagingCleanup(#[source] std::io::Error),

    #[error("Failed to extract plugin package: {0:#}")]
    Extraction(anyhow::Error),

    #[error("Invalid plugin structure: {}", .0.display())]
    InvalidManifest(PathBuf),

    #[error("Plugin already installed: {name} v{version}. Uninstall the old version before installing a new one.")]
    AlreadyInstalled { name: String, version: Version },

    #[error("{name} was uninstalled in this session. Restart the application before installing it again.")]
    RestartRequired { name: String, directory: PathBuf },

    #[error("Failed to move plugin to target path {}: {reason:#}", target.display())]
    Move { target: PathBuf, reason: anyhow::Error },

    #[error("Failed to load plugin from {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: LoadError,
    },
}
