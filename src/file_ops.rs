// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Agent Trust Authors
use log::*;
use std::{
    fs::{self, Permissions},
    io::{self, Write},
    os::unix::fs::PermissionsExt,
    path::Path,
};
use tempfile::NamedTempFile;

/// Write the contents to a temporary file next to where it will be published
///
/// The file is flushed to disk with the given permissions but stays
/// invisible under its final name until `publish` is called.
pub fn stage(dir: &Path, contents: &[u8], mode: u32) -> io::Result<NamedTempFile> {
    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(contents)?;
    staged
        .as_file()
        .set_permissions(Permissions::from_mode(mode))?;
    staged.as_file().sync_all()?;
    Ok(staged)
}

/// Atomically move a staged file to its final path, replacing any file there
pub fn publish(staged: NamedTempFile, path: &Path) -> io::Result<()> {
    _ = staged.persist(path).map_err(|e| e.error)?;
    debug!("Published {}", path.display());
    Ok(())
}

/// Stage and publish in one step
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    publish(stage(dir, contents, mode)?, path)
}

/// Remove a file, treating a missing file as already removed
///
/// Returns whether a file was actually removed
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Check that the path is a regular file the process can open for reading
pub fn is_readable_file(path: &Path) -> bool {
    path.is_file() && fs::File::open(path).is_ok()
}
