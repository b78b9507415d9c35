//! Plugin Host Core Library
//!
//! Lifecycle manager for third-party plugins that provide translation, OCR,
//! text-to-speech, dictionary and vocabulary services to a host application.
//!
//! # Architecture
//!
//! The host shell owns one [`PluginManager`] and passes it explicitly to
//! whatever needs it. The manager is consumed either from Rust or, via the
//! C ABI in the `ffi` module, from a native host shell.
//!
//! # Core Features Implemented
//!
//! ## Manifests (`plugin` module)
//! - `PluginManifest` - Identity, version and entry unit parsed from `plugin.json`
//! - `parse_manifest()` - Validate a plugin directory, rejecting broken descriptors
//!
//! ## Layout (`layout` and `config` modules)
//! - `HostConfig` - Preinstalled, user, settings, cache and staging roots
//! - `PluginLayout` - Install targets and per-plugin settings/cache directories
//!
//! ## Discovery (`registry` module)
//! - `scan_all()` - Walk plugin roots, deleting directories marked for deletion
//! - `dedupe()` - Keep the newest version of each `PluginID`
//! - `PluginRegistry` - Loaded plugins keyed by `PluginID`, queryable by capability
//!
//! ## Loading (`loader` and `capability` modules)
//! - `DylibLoader` - Load a native library and its colocated dependencies
//! - `StaticLoader` - Serve plugins linked into the host binary
//! - `declare_plugin!` - Registration entry point a plugin library exports
//!
//! ## Lifecycle (`manager` and `operations` modules)
//! - `load_all()` - Startup discovery, deduplication and loading
//! - `install_from_package()` - Install a `.spkg` package
//! - `uninstall_plugin()` - Mark for deletion; files go on the next start
//! - `cleanup_temp_files()` - Remove the staging area
//!
//! Loaded code is never unloaded. Reloading a plugin means marking it,
//! restarting the process and discovering it again.

pub mod capability;
pub mod config;
pub mod error;
pub mod ffi;
pub mod layout;
pub mod loader;
pub mod manager;
pub mod operations;
pub mod plugin;
pub mod registry;

pub use capability::{Capability, CapabilitySet, Plugin, PluginContext, PluginDeclaration, PluginExport, PluginType};
pub use config::HostConfig;
pub use error::{InstallError, LoadError, ManifestError};
pub use layout::PluginLayout;
pub use loader::{CodeHandle, CodeLoader, DylibLoader, LoadedPlugin, StaticLoader};
pub use manager::{LoadFailure, LoadReport, PluginLanguageLoader, PluginManager};
pub use plugin::{parse_manifest, PluginManifest, MANIFEST_FILE_NAME};
pub use registry::{PluginEntry, PluginRegistry};
