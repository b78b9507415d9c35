//! FFI (Foreign Function Interface) bindings for the host shell.
//!
//! This module exposes the plugin manager through C-compatible functions so
//! a native host shell can drive discovery, installation and uninstallation.
//!
//! # Memory Management
//!
//! - Rust allocates memory and returns pointers to the caller
//! - The calling code MUST call the corresponding `_free` functions to prevent leaks
//! - Strings are null-terminated UTF-8
//!
//! # Threading
//!
//! A manager handle is not synchronized. The caller must not use one handle
//! from several threads at the same time.
//!
//! # Usage from C
//!
//! ```c
//! CPluginManager *manager = pluginhost_manager_new("/home/me/.local/share/host");
//! pluginhost_load_all(manager);
//!
//! CPlugin *installed = NULL;
//! char *error = pluginhost_install_plugin(manager, "/tmp/DeepL.spkg", &installed);
//! if (error) { show(error); pluginhost_free_string(error); }
//! else { pluginhost_free_plugin(installed); }
//!
//! pluginhost_manager_free(manager);
//! ```

use crate::config::HostConfig;
use crate::manager::PluginManager;
use crate::plugin::PluginManifest;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::PathBuf;
use std::ptr;
use tracing::error;

// ============================================================================
// C-Compatible Types
// ============================================================================

/// Opaque handle to a plugin manager
pub struct CPluginManager {
    manager: PluginManager,
}

/// C-compatible plugin information
#[repr(C)]
pub struct CPlugin {
    pub plugin_id: *mut c_char,
    pub name: *mut c_char,
    pub author: *mut c_char,
    pub website: *mut c_char,
    pub version: *mut c_char,
    pub directory: *mut c_char,
    /// Bitmask of `Capability::bit` values
    pub capabilities: u32,
    pub is_pre_plugin: c_int,
}

// ============================================================================
// Manager Lifetime
// ============================================================================

/// Create a manager rooted at `data_root`, or at the platform data directory
/// when `data_root` is null.
/// Returns null if the plugin directories cannot be created.
/// Caller MUST call pluginhost_manager_free() when done.
#[no_mangle]
pub extern "C" fn pluginhost_manager_new(data_root: *const c_char) -> *mut CPluginManager {
    let config = if data_root.is_null() {
        HostConfig::default()
    } else {
        match unsafe { c_char_to_string(data_root) } {
            Some(root) => HostConfig::from_data_root(root),
            None => return ptr::null_mut(),
        }
    };

    match PluginManager::from_config(&config) {
        Ok(manager) => Box::into_raw(Box::new(CPluginManager { manager })),
        Err(e) => {
            error!("Error creating plugin manager: {:#}", e);
            ptr::null_mut()
        }
    }
}

/// Free a manager returned by pluginhost_manager_new().
/// Loaded plugin code stays mapped until the process exits.
#[no_mangle]
pub extern "C" fn pluginhost_manager_free(manager: *mut CPluginManager) {
    if !manager.is_null() {
        unsafe {
            let _ = Box::from_raw(manager);
        }
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// Discover and load all plugins. Returns the number of failed plugins,
/// or -1 if `manager` is null.
#[no_mangle]
pub extern "C" fn pluginhost_load_all(manager: *mut CPluginManager) -> c_int {
    if manager.is_null() {
        return -1;
    }
    let report = unsafe { (*manager).manager.load_all() };
    report.failed() as c_int
}

/// Get the number of registered plugins.
#[no_mangle]
pub extern "C" fn pluginhost_plugin_count(manager: *const CPluginManager) -> c_int {
    if manager.is_null() {
        return 0;
    }
    unsafe { (*manager).manager.registry().len() as c_int }
}

/// Get the plugin at `index`, in `PluginID` order.
/// Caller MUST call pluginhost_free_plugin() when done.
#[no_mangle]
pub extern "C" fn pluginhost_plugin_get(manager: *const CPluginManager, index: c_int) -> *mut CPlugin {
    if manager.is_null() || index < 0 {
        return ptr::null_mut();
    }

    let plugins = unsafe { (*manager).manager.plugins() };
    match plugins.get(index as usize) {
        Some(entry) => to_c_plugin(&entry.manifest),
        None => ptr::null_mut(),
    }
}

/// Free a CPlugin returned by this library.
#[no_mangle]
pub extern "C" fn pluginhost_free_plugin(plugin: *mut CPlugin) {
    if !plugin.is_null() {
        unsafe {
            let p = Box::from_raw(plugin);
            free_c_char(p.plugin_id);
            free_c_char(p.name);
            free_c_char(p.author);
            free_c_char(p.website);
            free_c_char(p.version);
            free_c_char(p.directory);
        }
    }
}

// ============================================================================
// Plugin Operations
// ============================================================================

/// Install a plugin package.
/// Returns null on success and stores the installed plugin in `out_plugin`
/// (if non-null; free it with pluginhost_free_plugin()). On failure returns
/// the error message; free it with pluginhost_free_string().
#[no_mangle]
pub extern "C" fn pluginhost_install_plugin(
    manager: *mut CPluginManager,
    package_path: *const c_char,
    out_plugin: *mut *mut CPlugin,
) -> *mut c_char {
    if manager.is_null() || package_path.is_null() {
        return string_to_c_char("Invalid arguments.");
    }

    let path = match unsafe { c_char_to_string(package_path) } {
        Some(path) => PathBuf::from(path),
        None => return string_to_c_char("Plugin path is not valid UTF-8."),
    };

    match unsafe { (*manager).manager.install_from_package(&path) } {
        Ok(manifest) => {
            if !out_plugin.is_null() {
                unsafe {
                    *out_plugin = to_c_plugin(&manifest);
                }
            }
            ptr::null_mut()
        }
        Err(e) => string_to_c_char(&e.to_string()),
    }
}

/// Uninstall a registered plugin by ID. The plugin's files are removed on
/// the next pluginhost_load_all(). Returns 1 on success, 0 if not registered.
#[no_mangle]
pub extern "C" fn pluginhost_uninstall_plugin(manager: *mut CPluginManager, plugin_id: *const c_char) -> c_int {
    if manager.is_null() || plugin_id.is_null() {
        return 0;
    }

    let plugin_id = match unsafe { c_char_to_string(plugin_id) } {
        Some(id) => id,
        None => return 0,
    };

    let manager = unsafe { &mut (*manager).manager };
    let manifest = match manager.get(&plugin_id) {
        Some(entry) => entry.manifest.clone(),
        None => return 0,
    };
    manager.uninstall_plugin(&manifest) as c_int
}

/// Remove the staging area.
#[no_mangle]
pub extern "C" fn pluginhost_cleanup_temp_files(manager: *const CPluginManager) {
    if !manager.is_null() {
        unsafe { (*manager).manager.cleanup_temp_files() }
    }
}

// ============================================================================
// String Management
// ============================================================================

/// Free a string returned by FFI functions.
#[no_mangle]
pub extern "C" fn pluginhost_free_string(s: *mut c_char) {
    free_c_char(s);
}

// ============================================================================
// Helper Functions
// ============================================================================

fn to_c_plugin(manifest: &PluginManifest) -> *mut CPlugin {
    Box::into_raw(Box::new(CPlugin {
        plugin_id: string_to_c_char(&manifest.plugin_id),
        name: string_to_c_char(&manifest.name),
        author: string_to_c_char(&manifest.author),
        website: string_to_c_char(&manifest.website),
        version: string_to_c_char(&manifest.version.to_string()),
        directory: string_to_c_char(&manifest.plugin_directory.to_string_lossy()),
        capabilities: manifest.capabilities.bits(),
        is_pre_plugin: manifest.is_pre_plugin as c_int,
    }))
}

unsafe fn c_char_to_string(s: *const c_char) -> Option<String> {
    CStr::from_ptr(s).to_str().ok().map(str::to_owned)
}

/// Never null: interior NUL bytes become U+FFFD, since a null error
/// string from pluginhost_install_plugin() means success.
fn string_to_c_char(s: &str) -> *mut c_char {
    let c_str = match CString::new(s) {
        Ok(c_str) => c_str,
        Err(e) => {
            let lossy = String::from_utf8_lossy(&e.into_vec()).replace('\0', "\u{FFFD}");
            CString::new(lossy).unwrap_or_default()
        }
    };
    c_str.into_raw()
}

fn free_c_char(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            let _ = CString::from_raw(s);
        }
    }
}
