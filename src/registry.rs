//! Plugin discovery, version deduplication and the in-memory registry.
//!
//! # Discovery
//!
//! Every immediate subdirectory of a plugin root is a candidate plugin.
//! A candidate carrying the deletion marker is removed from disk before its
//! manifest is even read; this is the only place marked directories are
//! physically deleted. A candidate whose manifest fails to parse is logged
//! and skipped without affecting its siblings.
//!
//! # Deduplication
//!
//! When several directories declare the same `PluginID` (an upgrade copied
//! next to the old version, a preinstalled plugin also installed by the
//! user), the highest version wins. Equal versions are resolved by directory
//! name, lexicographically first wins, so the outcome does not depend on
//! filesystem enumeration order.

use crate::capability::{Capability, PluginType};
use crate::layout::PluginLayout;
use crate::loader::CodeHandle;
use crate::operations::{is_marked_for_deletion, try_delete_directory};
use crate::plugin::{parse_manifest, PluginManifest};
use chrono::{DateTime, Local};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Scans every root for plugin directories and returns the parsed manifests.
pub fn scan_all<'a>(roots: impl IntoIterator<Item = &'a Path>, layout: &PluginLayout) -> Vec<PluginManifest> {
    let mut manifests = Vec::new();

    for root in roots {
        for directory in subdirectories(root) {
            if is_marked_for_deletion(&directory) {
                info!("Removing plugin directory marked for deletion: {:?}", directory);
                try_delete_directory(&directory);
                continue;
            }

            if let Some(manifest) = parse_manifest(&directory, layout) {
                manifests.push(manifest);
            }
        }
    }

    manifests
}

/// Deletes marked subdirectories of `root` without parsing anything.
/// Returns how many were removed.
pub fn sweep_marked(root: &Path) -> usize {
    subdirectories(root)
        .into_iter()
        .filter(|dir| is_marked_for_deletion(dir))
        .filter(|dir| try_delete_directory(dir))
        .count()
}

/// Immediate subdirectories of `root`, sorted by name.
fn subdirectories(root: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to scan plugin root {:?}: {}", root, e);
            return Vec::new();
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(e) => {
                warn!("Failed to read entry in {:?}: {}", root, e);
                None
            }
        })
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    dirs
}

/// Splits manifests into one survivor per `PluginID` and the rest.
///
/// Survivors are returned sorted by `PluginID`.
pub fn dedupe(manifests: Vec<PluginManifest>) -> (Vec<PluginManifest>, Vec<PluginManifest>) {
    let mut grouped: BTreeMap<String, Vec<PluginManifest>> = BTreeMap::new();
    for manifest in manifests {
        grouped.entry(manifest.plugin_id.clone()).or_default().push(manifest);
    }

    let mut unique = Vec::with_capacity(grouped.len());
    let mut duplicates = Vec::new();

    for (_, mut group) in grouped {
        group.sort_by(|a, b| {
            b.version
                .cmp(&a.version)
                .then_with(|| a.directory_name().cmp(&b.directory_name()))
                .then_with(|| a.plugin_directory.cmp(&b.plugin_directory))
        });
        let mut group = group.into_iter();
        if let Some(latest) = group.next() {
            unique.push(latest);
        }
        duplicates.extend(group);
    }

    (unique, duplicates)
}

/// A successfully loaded plugin.
#[derive(Debug, Clone)]
pub struct PluginEntry {
    pub manifest: PluginManifest,
    pub plugin_type: PluginType,
    pub handle: CodeHandle,
    pub loaded_at: DateTime<Local>,
}

impl PluginEntry {
    pub fn plugin_id(&self) -> &str {
        &self.manifest.plugin_id
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.plugin_type.capabilities.contains(capability)
    }
}

/// Loaded plugins keyed by `PluginID`.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    entries: HashMap<String, PluginEntry>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, returning the one it displaced.
    pub fn insert(&mut self, entry: PluginEntry) -> Option<PluginEntry> {
        debug!(plugin_id = %entry.plugin_id(), "Registering plugin");
        self.entries.insert(entry.manifest.plugin_id.clone(), entry)
    }

    pub fn remove(&mut self, plugin_id: &str) -> Option<PluginEntry> {
        self.entries.remove(plugin_id)
    }

    pub fn get(&self, plugin_id: &str) -> Option<&PluginEntry> {
        self.entries.get(plugin_id)
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.entries.contains_key(plugin_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginEntry> {
        self.entries.values()
    }

    /// Entries sorted by `PluginID`.
    pub fn sorted(&self) -> Vec<&PluginEntry> {
        let mut entries: Vec<&PluginEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.plugin_id().cmp(b.plugin_id()));
        entries
    }

    pub fn matching<F>(&self, predicate: F) -> Vec<&PluginEntry>
    where
        F: Fn(&PluginEntry) -> bool,
    {
        let mut entries: Vec<&PluginEntry> = self.entries.values().filter(|e| predicate(e)).collect();
        entries.sort_by(|a, b| a.plugin_id().cmp(b.plugin_id()));
        entries
    }

    pub fn with_capability(&self, capability: Capability) -> Vec<&PluginEntry> {
        self.matching(|entry| entry.has_capability(capability))
    }
}
