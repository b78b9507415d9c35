//! Loading plugin code units into the process.
//!
//! [`DylibLoader`] opens the entry library named by the manifest with
//! `libloading`, after first opening every other dynamic library colocated in
//! the plugin directory so the entry unit's own dependencies resolve without
//! being registered with the host. It then reads the library's
//! `plugin_declaration` static and resolves it against the host ABI.
//!
//! Libraries that resolve successfully are leaked: a loaded plugin stays
//! mapped until the process exits, and nothing here ever unloads it.
//! Libraries that fail resolution are dropped immediately. The dynamic
//! linker hands back the mapped library when the same path is opened again,
//! even if the file was replaced, so a path is only ever loaded once.
//!
//! [`StaticLoader`] serves plugins compiled into the host binary. The code
//! unit file still has to exist on disk, but its declaration comes from a
//! table registered up front.

use crate::capability::{CapabilitySet, PluginDeclaration, PluginType, ABI_VERSION, DECLARATION_SYMBOL};
use crate::error::LoadError;
use crate::plugin::PluginManifest;
use libloading::Library;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::env::consts::DLL_EXTENSION;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Binds a manifest to its exported capability type.
pub trait CodeLoader {
    fn load(&self, manifest: &PluginManifest) -> Result<LoadedPlugin, LoadError>;
}

#[derive(Debug, Clone)]
pub struct LoadedPlugin {
    pub handle: CodeHandle,
    pub plugin_type: PluginType,
}

/// Opaque reference to a loaded code unit. Valid for the process lifetime.
#[derive(Debug, Clone)]
pub struct CodeHandle {
    path: PathBuf,
    library: Option<&'static Library>,
}

impl CodeHandle {
    /// Handle for code linked into the host binary.
    pub fn in_process(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            library: None,
        }
    }

    fn dynamic(path: PathBuf, library: &'static Library) -> Self {
        Self {
            path,
            library: Some(library),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File stem of the code unit.
    pub fn assembly_name(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn is_dynamic(&self) -> bool {
        self.library.is_some()
    }
}

/// Names of the code units found next to an entry unit.
#[derive(Debug, Default)]
pub struct UnitIndex {
    available: HashSet<String>,
    failed: HashMap<String, String>,
}

impl UnitIndex {
    /// Index of the colocated units of `entry`, all considered available.
    pub fn colocated(directory: &Path, entry: &Path) -> Self {
        let mut index = Self::default();
        for unit in colocated_units(directory, entry) {
            index.add_available(&unit);
        }
        index
    }

    pub fn add_available(&mut self, unit: &Path) {
        for name in unit_names(unit) {
            self.available.insert(name);
        }
    }

    pub fn add_failed(&mut self, unit: &Path, reason: String) {
        for name in unit_names(unit) {
            self.failed.insert(name, reason.clone());
        }
    }

    fn check(&self, dependency: &str) -> Result<(), String> {
        if self.available.contains(dependency) {
            return Ok(());
        }
        match self.failed.get(dependency) {
            Some(reason) => Err(format!("dependency `{}` failed to load: {}", dependency, reason)),
            None => Err(format!("dependency `{}` not found in plugin directory", dependency)),
        }
    }
}

/// Checks a declaration against the host and picks the capability type.
///
/// Every problem found is collected before failing, so the error lists all of
/// them. Among valid exports the first with a non-empty capability set wins.
pub fn resolve_declaration(
    declaration: &PluginDeclaration,
    unit: &Path,
    units: &UnitIndex,
) -> Result<PluginType, LoadError> {
    let mut errors = Vec::new();

    if declaration.abi_version != ABI_VERSION {
        errors.push(format!(
            "plugin ABI version {} does not match host ABI version {}",
            declaration.abi_version, ABI_VERSION
        ));
    }

    for dependency in declaration.dependencies {
        if let Err(e) = units.check(dependency) {
            errors.push(e);
        }
    }

    let mut resolved = Vec::with_capacity(declaration.exports.len());
    for (index, export) in declaration.exports.iter().enumerate() {
        if export.type_name.trim().is_empty() {
            errors.push(format!("export #{} has an empty type name", index));
            continue;
        }
        match CapabilitySet::from_bits(export.capabilities) {
            Some(capabilities) => resolved.push(PluginType {
                type_name: export.type_name.to_string(),
                capabilities,
                create: export.create,
            }),
            None => errors.push(format!(
                "`{}` declares unknown capability bits {:#x}",
                export.type_name, export.capabilities
            )),
        }
    }

    if !errors.is_empty() {
        return Err(LoadError::TypeResolutionFailed(errors));
    }

    resolved
        .into_iter()
        .find(|plugin_type| !plugin_type.capabilities.is_empty())
        .ok_or_else(|| LoadError::CapabilityNotFound(unit.to_path_buf()))
}

/// Canonical paths of entry units mapped for the rest of the process.
static LOADED_UNITS: Mutex<BTreeSet<PathBuf>> = Mutex::new(BTreeSet::new());

/// Loads plugins from native dynamic libraries.
#[derive(Debug, Default)]
pub struct DylibLoader;

impl DylibLoader {
    pub fn new() -> Self {
        Self
    }

    /// Whether the entry unit at `unit` was loaded by this process.
    pub fn is_loaded(unit: &Path) -> bool {
        loaded_units().contains(&canonical(unit))
    }
}

fn loaded_units() -> MutexGuard<'static, BTreeSet<PathBuf>> {
    LOADED_UNITS.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CodeLoader for DylibLoader {
    fn load(&self, manifest: &PluginManifest) -> Result<LoadedPlugin, LoadError> {
        let unit = manifest.execute_file();
        if !unit.is_file() {
            return Err(LoadError::CodeUnitMissing(unit));
        }

        let key = canonical(&unit);
        if loaded_units().contains(&key) {
            return Err(LoadError::AlreadyLoaded(unit));
        }

        let (dependencies, units) = load_dependencies(&manifest.plugin_directory, &unit);

        let library = match unsafe { open_library(&unit) } {
            Ok(library) => library,
            Err(_) if !unit.exists() => return Err(LoadError::CodeUnitMissing(unit)),
            Err(e) => return Err(load_failure(&unit, e)),
        };

        let plugin_type = {
            let symbol = unsafe { library.get::<*const PluginDeclaration>(DECLARATION_SYMBOL) }
                .map_err(|e| load_failure(&unit, e))?;
            if symbol.is_null() {
                return Err(load_failure(&unit, "plugin_declaration symbol is null"));
            }
            let declaration: &PluginDeclaration = unsafe { &**symbol };
            resolve_declaration(declaration, &unit, &units)?
        };

        debug!(
            "Loaded {:?} with {} colocated unit(s), type {}",
            unit,
            dependencies.len(),
            plugin_type.type_name
        );

        for (_, dependency) in dependencies {
            std::mem::forget(dependency);
        }
        let library: &'static Library = Box::leak(Box::new(library));
        loaded_units().insert(key);

        Ok(LoadedPlugin {
            handle: CodeHandle::dynamic(unit, library),
            plugin_type,
        })
    }
}

/// Opens every colocated library, retrying until a pass makes no progress so
/// units that depend on each other load in any order.
fn load_dependencies(directory: &Path, entry: &Path) -> (Vec<(PathBuf, Library)>, UnitIndex) {
    let mut index = UnitIndex::default();
    let mut loaded = Vec::new();
    let mut pending = colocated_units(directory, entry);

    loop {
        let mut progressed = false;
        let mut failed = Vec::new();

        for unit in pending {
            match unsafe { open_library(&unit) } {
                Ok(library) => {
                    index.add_available(&unit);
                    loaded.push((unit, library));
                    progressed = true;
                }
                Err(e) => failed.push((unit, e.to_string())),
            }
        }

        if failed.is_empty() || !progressed {
            for (unit, reason) in failed {
                warn!("Failed to load colocated unit {:?}: {}", unit, reason);
                index.add_failed(&unit, reason);
            }
            return (loaded, index);
        }
        pending = failed.into_iter().map(|(unit, _)| unit).collect();
    }
}

#[cfg(unix)]
unsafe fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};
    UnixLibrary::open(Some(path), RTLD_NOW | RTLD_GLOBAL).map(Library::from)
}

#[cfg(not(unix))]
unsafe fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    Library::new(path)
}

fn load_failure(
    unit: &Path,
    source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> LoadError {
    LoadError::Load {
        path: unit.to_path_buf(),
        source: source.into(),
    }
}

/// Dynamic libraries in `directory` other than `entry`, sorted by name.
fn colocated_units(directory: &Path, entry: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut units: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path != entry)
        .filter(|path| {
            path.extension()
                .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(DLL_EXTENSION))
                .unwrap_or(false)
        })
        .collect();
    units.sort();
    units
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// A unit can be referred to by file name or by stem.
fn unit_names(unit: &Path) -> Vec<String> {
    [unit.file_name(), unit.file_stem()]
        .into_iter()
        .flatten()
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

/// Serves declarations of plugins linked into the host, keyed by the file
/// name of the manifest's code unit.
#[derive(Debug, Default, Clone)]
pub struct StaticLoader {
    units: HashMap<String, &'static PluginDeclaration>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unit(mut self, file_name: impl Into<String>, declaration: &'static PluginDeclaration) -> Self {
        self.register(file_name, declaration);
        self
    }

    pub fn register(&mut self, file_name: impl Into<String>, declaration: &'static PluginDeclaration) {
        self.units.insert(file_name.into(), declaration);
    }
}

impl CodeLoader for StaticLoader {
    fn load(&self, manifest: &PluginManifest) -> Result<LoadedPlugin, LoadError> {
        let unit = manifest.execute_file();
        if !unit.is_file() {
            return Err(LoadError::CodeUnitMissing(unit));
        }

        let file_name = unit
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let declaration = self.units.get(&file_name).ok_or_else(|| {
            load_failure(&unit, format!("no built-in code unit registered as `{}`", file_name))
        })?;

        let units = UnitIndex::colocated(&manifest.plugin_directory, &unit);
        let plugin_type = resolve_declaration(declaration, &unit, &units)?;

        Ok(LoadedPlugin {
            handle: CodeHandle::in_process(unit),
            plugin_type,
        })
    }
}
