//! Plugin lifecycle manager.
//!
//! Owns the registry and drives discovery, loading, installation and
//! uninstallation. All operations are synchronous and take `&mut self`;
//! callers that share a manager serialize access themselves.

use crate::capability::Capability;
use crate::config::HostConfig;
use crate::error::{InstallError, LoadError};
use crate::layout::PluginLayout;
use crate::loader::{CodeLoader, DylibLoader};
use crate::operations::{
    delete_path, extract_package, is_marked_for_deletion, mark_for_deletion, move_directory,
    try_delete_directory, PACKAGE_EXTENSION,
};
use crate::plugin::{parse_manifest, PluginManifest};
use crate::registry::{dedupe, scan_all, sweep_marked, PluginEntry, PluginRegistry};
use anyhow::Result;
use chrono::Local;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Loads the bundled language resources of a freshly installed plugin.
pub trait PluginLanguageLoader {
    fn load_plugin_languages(&self, plugin_directory: &Path);
}

/// A plugin that was discovered but could not be loaded.
#[derive(Debug)]
pub struct LoadFailure {
    pub plugin_id: String,
    pub name: String,
    pub directory: PathBuf,
    pub error: LoadError,
}

/// Outcome of [`PluginManager::load_all`].
#[derive(Debug, Default)]
pub struct LoadReport {
    /// IDs registered by this pass.
    pub loaded: Vec<String>,
    pub failures: Vec<LoadFailure>,
    /// Older copies skipped in favor of a newer version.
    pub duplicates: Vec<PluginManifest>,
    /// Data directories removed because they were marked for deletion.
    pub swept: usize,
}

impl LoadReport {
    pub fn total(&self) -> usize {
        self.loaded.len() + self.failures.len()
    }

    pub fn succeeded(&self) -> usize {
        self.loaded.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

pub struct PluginManager {
    layout: PluginLayout,
    loader: Box<dyn CodeLoader>,
    languages: Option<Box<dyn PluginLanguageLoader>>,
    registry: PluginRegistry,
    /// Install directories uninstalled by this process. Their code may
    /// still be mapped, so nothing new is loaded from them until restart.
    pending_removal: HashSet<PathBuf>,
}

impl PluginManager {
    /// Creates a manager and makes sure every plugin directory exists.
    pub fn new(layout: PluginLayout, loader: impl CodeLoader + 'static) -> Result<Self> {
        layout.ensure_directories()?;
        Ok(Self {
            layout,
            loader: Box::new(loader),
            languages: None,
            registry: PluginRegistry::new(),
            pending_removal: HashSet::new(),
        })
    }

    /// Manager loading native plugin libraries from the configured roots.
    pub fn from_config(config: &HostConfig) -> Result<Self> {
        Self::new(PluginLayout::new(config), DylibLoader::new())
    }

    pub fn with_language_loader(mut self, languages: impl PluginLanguageLoader + 'static) -> Self {
        self.languages = Some(Box::new(languages));
        self
    }

    pub fn layout(&self) -> &PluginLayout {
        &self.layout
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Registered plugins sorted by `PluginID`.
    pub fn plugins(&self) -> Vec<&PluginEntry> {
        self.registry.sorted()
    }

    pub fn get(&self, plugin_id: &str) -> Option<&PluginEntry> {
        self.registry.get(plugin_id)
    }

    pub fn plugins_with(&self, capability: Capability) -> Vec<&PluginEntry> {
        self.registry.with_capability(capability)
    }

    pub fn plugins_matching<F>(&self, predicate: F) -> Vec<&PluginEntry>
    where
        F: Fn(&PluginEntry) -> bool,
    {
        self.registry.matching(predicate)
    }

    /// Discovers and loads every plugin under the plugin roots.
    ///
    /// Removes directories marked for deletion, keeps the newest copy of each
    /// `PluginID` and loads it. Failures are logged and reported, never raised.
    /// Plugins already registered are left as they are.
    pub fn load_all(&mut self) -> LoadReport {
        let mut report = LoadReport {
            swept: sweep_marked(self.layout.settings_dir()) + sweep_marked(self.layout.cache_dir()),
            ..LoadReport::default()
        };

        let manifests = scan_all(self.layout.plugin_roots(), &self.layout);
        let (unique, duplicates) = dedupe(manifests);
        log_duplicates(&duplicates);
        report.duplicates = duplicates;

        for manifest in unique {
            if self.registry.contains(&manifest.plugin_id) {
                debug!(plugin_id = %manifest.plugin_id, "Plugin already registered, skipping");
                continue;
            }

            match self.load_manifest(manifest) {
                Ok(entry) => {
                    report.loaded.push(entry.manifest.plugin_id.clone());
                    self.registry.insert(entry);
                }
                Err(failure) => report.failures.push(failure),
            }
        }

        self.log_load_results(&report);
        report
    }

    /// Installs a `.spkg` package.
    ///
    /// The package is extracted into the staging area, validated, moved to
    /// its install path and loaded. The registry only changes on success.
    pub fn install_from_package(&mut self, package_path: impl AsRef<Path>) -> Result<PluginManifest, InstallError> {
        let package_path = package_path.as_ref();
        validate_package_path(package_path)?;

        let package_name = package_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .ok_or(InstallError::EmptyPath)?;
        let staging = self.layout.staging_directory(&package_name);
        debug!("Installing plugin package {:?} via {:?}", package_path, staging);

        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(InstallError::StagingCleanup)?;
        }

        if let Err(e) = extract_package(package_path, &staging) {
            discard_staging(&staging);
            return Err(InstallError::Extraction(e));
        }

        let result = self.install_staged(&staging);
        match &result {
            Ok(manifest) => info!(
                plugin_id = %manifest.plugin_id,
                "Installed plugin {} v{}", manifest.name, manifest.version
            ),
            Err(e) => {
                warn!("Failed to install plugin package {:?}: {}", package_path, e);
                discard_staging(&staging);
            }
        }
        result
    }

    fn install_staged(&mut self, staging: &Path) -> Result<PluginManifest, InstallError> {
        let staged = parse_manifest(staging, &self.layout)
            .ok_or_else(|| InstallError::InvalidManifest(staging.to_path_buf()))?;

        if let Some(existing) = self.registry.get(&staged.plugin_id) {
            return Err(InstallError::AlreadyInstalled {
                name: staged.name,
                version: existing.manifest.version.clone(),
            });
        }

        let staged_name = staged.directory_name();
        let target = self.layout.install_target(&staged_name, &staged.plugin_id);

        if self.pending_removal.contains(&target) {
            return Err(InstallError::RestartRequired {
                name: staged.name,
                directory: target,
            });
        }
        if let Some(owner) = self.registry.iter().find(|entry| entry.manifest.plugin_directory == target) {
            return Err(InstallError::Move {
                reason: anyhow::anyhow!("directory belongs to installed plugin {}", owner.plugin_id()),
                target,
            });
        }

        // Left behind by a failed load or by an uninstall in an earlier run.
        if target.exists() {
            warn!("Replacing stale plugin directory {:?}", target);
            delete_path(&target).map_err(|reason| InstallError::Move {
                target: target.clone(),
                reason,
            })?;
        }
        move_directory(staging, &target).map_err(|reason| InstallError::Move {
            target: target.clone(),
            reason,
        })?;

        let manifest = parse_manifest(&target, &self.layout)
            .ok_or_else(|| InstallError::InvalidManifest(target.clone()))?;
        self.discard_stale_data(&manifest);

        let entry = self.load_manifest(manifest).map_err(|failure| InstallError::Load {
            path: target.clone(),
            source: failure.error,
        })?;
        let manifest = entry.manifest.clone();
        self.registry.insert(entry);

        if let Some(languages) = &self.languages {
            languages.load_plugin_languages(&target);
        }

        Ok(manifest)
    }

    /// Uninstalls a plugin on the next restart.
    ///
    /// Marks the install, settings and cache directories for deletion and
    /// drops the plugin from the registry. Nothing is deleted here: the
    /// plugin's code may still be mapped. The next [`load_all`](Self::load_all)
    /// in a fresh process removes the marked directories; until then
    /// installing into the same directory fails with
    /// [`InstallError::RestartRequired`].
    pub fn uninstall_plugin(&mut self, manifest: &PluginManifest) -> bool {
        if let Err(e) = mark_for_deletion(&manifest.plugin_directory) {
            warn!("{:#}", e);
        }

        for dir in [
            self.layout.settings_directory(manifest),
            self.layout.cache_directory(manifest),
        ] {
            if dir.is_dir() {
                if let Err(e) = mark_for_deletion(&dir) {
                    warn!("{:#}", e);
                }
            }
        }

        self.registry.remove(&manifest.plugin_id);
        self.pending_removal.insert(manifest.plugin_directory.clone());
        info!(
            plugin_id = %manifest.plugin_id,
            "Uninstalled plugin {}, files are removed on next start", manifest.name
        );
        true
    }

    /// Removes the staging area. Failures are logged only.
    pub fn cleanup_temp_files(&self) {
        let staging = self.layout.staging_dir();
        if !staging.exists() {
            return;
        }
        if let Err(e) = fs::remove_dir_all(staging) {
            error!("Failed to cleanup temp files {:?}: {}", staging, e);
        }
    }

    fn load_manifest(&self, mut manifest: PluginManifest) -> Result<PluginEntry, LoadFailure> {
        let loaded = match self.loader.load(&manifest) {
            Ok(loaded) => loaded,
            Err(error) => {
                error!(plugin_id = %manifest.plugin_id, "Failed to load plugin {}: {}", manifest.name, error);
                return Err(LoadFailure {
                    plugin_id: manifest.plugin_id,
                    name: manifest.name,
                    directory: manifest.plugin_directory,
                    error,
                });
            }
        };

        manifest.assembly_name = Some(loaded.handle.assembly_name());
        manifest.capability_type = Some(loaded.plugin_type.type_name.clone());
        manifest.capabilities = loaded.plugin_type.capabilities;
        manifest.settings_directory_path = Some(self.layout.settings_directory(&manifest));
        manifest.cache_directory_path = Some(self.layout.cache_directory(&manifest));

        info!(plugin_id = %manifest.plugin_id, "Loaded plugin {}", manifest.name);
        Ok(PluginEntry {
            manifest,
            plugin_type: loaded.plugin_type,
            handle: loaded.handle,
            loaded_at: Local::now(),
        })
    }

    /// A reinstall reuses the data directories of the uninstalled copy;
    /// drop them now if they are still waiting for deletion.
    fn discard_stale_data(&self, manifest: &PluginManifest) {
        for dir in [
            self.layout.settings_directory(manifest),
            self.layout.cache_directory(manifest),
        ] {
            if is_marked_for_deletion(&dir) {
                try_delete_directory(&dir);
            }
        }
    }

    fn log_load_results(&self, report: &LoadReport) {
        info!(
            total = report.total(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            duplicates = report.duplicates.len(),
            "Plugin loading finished"
        );

        for plugin_id in &report.loaded {
            if let Some(entry) = self.registry.get(plugin_id) {
                let manifest = &entry.manifest;
                info!(
                    "  ✓ {} v{} (ID: {}) | {} | author: {} | unit: {} | capabilities: {}",
                    manifest.name,
                    manifest.version,
                    manifest.plugin_id,
                    manifest.kind(),
                    manifest.author,
                    manifest.assembly_name.as_deref().unwrap_or_default(),
                    manifest.capabilities
                );
            }
        }

        for failure in &report.failures {
            error!(
                "  ✗ {} (ID: {}) in {:?}: {} [{}]",
                failure.name,
                failure.plugin_id,
                failure.directory,
                failure.error,
                failure.error.kind()
            );
        }
    }
}

fn validate_package_path(package_path: &Path) -> Result<(), InstallError> {
    if package_path.as_os_str().is_empty() || package_path.to_string_lossy().trim().is_empty() {
        return Err(InstallError::EmptyPath);
    }

    if !package_path.is_file() {
        return Err(InstallError::NotFound(package_path.to_path_buf()));
    }

    let extension = package_path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if extension != PACKAGE_EXTENSION {
        return Err(InstallError::UnsupportedExtension {
            extension: if extension.is_empty() {
                String::new()
            } else {
                format!(".{}", extension)
            },
            expected: PACKAGE_EXTENSION,
        });
    }

    Ok(())
}

fn discard_staging(staging: &Path) {
    if staging.exists() && !try_delete_directory(staging) {
        debug!("Staging directory {:?} left behind", staging);
    }
}

fn log_duplicates(duplicates: &[PluginManifest]) {
    if duplicates.is_empty() {
        return;
    }

    warn!("Found {} duplicate plugin(s), skipping:", duplicates.len());
    for duplicate in duplicates {
        warn!(
            "  ↳ {} v{} (ID: {}) | {} | author: {} | directory: {} | website: {}",
            duplicate.name,
            duplicate.version,
            duplicate.plugin_id,
            duplicate.kind(),
            duplicate.author,
            duplicate.directory_name(),
            duplicate.website
        );
    }
}
