//! Filesystem operations behind install and uninstall.
//!
//! This module provides the primitives the lifecycle manager composes:
//! - Extract: unpack a `.spkg` package into the staging area
//! - Move: relocate a staged plugin to its install path
//! - Mark: request deferred deletion of a directory with a sentinel file
//! - Delete: best-effort recursive removal of marked or stale directories

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// Package file extension, compared case-insensitively.
pub const PACKAGE_EXTENSION: &str = "spkg";

/// Sentinel file requesting removal of its directory on the next scan.
pub const DELETION_MARKER: &str = "NeedDelete.txt";

/// Extract a zip package into `dest`, creating it if needed.
/// Entries that would land outside `dest` abort the extraction.
pub fn extract_package(package: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(package)
        .context(format!("Failed to open package: {:?}", package))?;
    let mut archive = zip::ZipArchive::new(file)
        .context(format!("Failed to read package as zip archive: {:?}", package))?;

    fs::create_dir_all(dest)
        .context(format!("Failed to create extraction directory: {:?}", dest))?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .with_context(|| format!("Package entry escapes the archive root: {}", entry.name()))?;
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out_file = fs::File::create(&out_path)
            .context(format!("Failed to create file: {:?}", out_path))?;
        io::copy(&mut entry, &mut out_file)
            .context(format!("Failed to write file: {:?}", out_path))?;
    }

    debug!("Extracted {} entries from {:?}", archive.len(), package);
    Ok(())
}

/// Move a directory. Falls back to copy-then-delete when a rename is not
/// possible, e.g. when the staging area is on another filesystem.
/// `dest` must not exist.
pub fn move_directory(source: &Path, dest: &Path) -> Result<()> {
    if !source.is_dir() {
        anyhow::bail!("Source directory does not exist: {:?}", source);
    }
    if dest.exists() {
        anyhow::bail!("Destination already exists: {:?}", dest);
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    if let Err(e) = fs::rename(source, dest) {
        debug!("Rename {:?} -> {:?} failed ({}), copying instead", source, dest, e);
        copy_directory_recursive(source, dest)?;
        fs::remove_dir_all(source)
            .context(format!("Failed to remove source directory after copy: {:?}", source))?;
    }

    Ok(())
}

/// Recursively copy a directory.
pub fn copy_directory_recursive(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let path = entry.path();
        let dest_path = dest.join(entry.file_name());

        if path.is_dir() {
            copy_directory_recursive(&path, &dest_path)?;
        } else {
            fs::copy(&path, &dest_path)
                .context(format!("Failed to copy {:?} to {:?}", path, dest_path))?;
        }
    }

    Ok(())
}

/// Delete a file or directory. Missing paths are not an error.
pub fn delete_path(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    if path.is_dir() {
        fs::remove_dir_all(path)
            .context(format!("Failed to remove directory: {:?}", path))?;
    } else {
        fs::remove_file(path)
            .context(format!("Failed to remove file: {:?}", path))?;
    }

    Ok(())
}

/// Write the deletion marker into `dir`.
pub fn mark_for_deletion(dir: &Path) -> Result<()> {
    let marker = dir.join(DELETION_MARKER);
    fs::File::create(&marker)
        .context(format!("Failed to write deletion marker: {:?}", marker))?;
    Ok(())
}

pub fn is_marked_for_deletion(dir: &Path) -> bool {
    dir.join(DELETION_MARKER).is_file()
}

/// Remove a directory tree, logging instead of failing.
pub fn try_delete_directory(dir: &Path) -> bool {
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            debug!("Deleted directory {:?}", dir);
            true
        }
        Err(e) => {
            warn!("Failed to delete directory {:?}: {}", dir, e);
            false
        }
    }
}
