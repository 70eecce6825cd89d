// Copyright (c) 2025 Semrel Contributors
// Licensed under the Semrel License. See LICENSE file for details.

//! Filesystem helpers shared by the on-disk stores.
//!
//! Stores are rebuilt by writing into a sibling staging path and swapping it
//! into place once every write has been synced. A failed build only ever
//! leaves the staging path behind, never a half-written target.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Sibling path used while a store at `target` is being (re)built.
pub(crate) fn staging_path(target: &Path) -> PathBuf {
    sibling_with_suffix(target, "staging")
}

fn sibling_with_suffix(target: &Path, suffix: &str) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    target.with_file_name(name)
}

/// Removes a directory tree if it exists.
pub(crate) fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Creates a fresh, empty staging directory for `target`.
pub(crate) fn fresh_staging_dir(target: &Path) -> io::Result<PathBuf> {
    let staging = staging_path(target);
    remove_dir_if_exists(&staging)?;
    if let Some(parent) = staging.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::create_dir_all(&staging)?;
    Ok(staging)
}

/// Replaces the directory at `target` with `staging`.
///
/// The previous directory is first renamed aside, so at every instant either
/// the old or the new tree is present under a known name.
pub(crate) fn replace_dir(staging: &Path, target: &Path) -> io::Result<()> {
    let retired = sibling_with_suffix(target, "retired");
    remove_dir_if_exists(&retired)?;

    let had_previous = target.exists();
    if had_previous {
        fs::rename(target, &retired)?;
    }

    if let Err(e) = fs::rename(staging, target) {
        // Put the previous generation back before reporting
        if had_previous {
            let _ = fs::rename(&retired, target);
        }
        return Err(e);
    }

    if had_previous {
        remove_dir_if_exists(&retired)?;
    }
    Ok(())
}

/// Atomically replaces a file with another file.
#[cfg(unix)]
pub(crate) fn replace_file(src: &Path, dst: &Path) -> io::Result<()> {
    fs::rename(src, dst)
}

#[cfg(windows)]
pub(crate) fn replace_file(src: &Path, dst: &Path) -> io::Result<()> {
    // On Windows, rename can fail if the destination exists
    const MAX_RETRIES: u32 = 3;

    for attempt in 0..MAX_RETRIES {
        match fs::rename(src, dst) {
            Ok(()) => return Ok(()),
            Err(_) if attempt < MAX_RETRIES - 1 => {
                let _ = fs::remove_file(dst);
                std::thread::sleep(std::time::Duration::from_millis(10));
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    fs::rename(src, dst)
}

/// Modification time of a file as nanoseconds since the Unix epoch.
///
/// Used as the version token for derived caches.
pub(crate) fn modified_token(path: &Path) -> io::Result<u64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(system_time_token(modified))
}

pub(crate) fn system_time_token(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_staging_path_is_sibling() {
        let target = Path::new("/tmp/data/phrases");
        assert_eq!(staging_path(target), PathBuf::from("/tmp/data/phrases.staging"));
    }

    #[test]
    fn test_replace_dir_swaps_contents() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("store");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("old.txt"), b"old").unwrap();

        let staging = fresh_staging_dir(&target).unwrap();
        fs::write(staging.join("new.txt"), b"new").unwrap();
        replace_dir(&staging, &target).unwrap();

        assert!(target.join("new.txt").exists());
        assert!(!target.join("old.txt").exists());
        assert!(!staging.exists());
    }

    #[test]
    fn test_replace_dir_without_previous() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("fresh");
        let staging = fresh_staging_dir(&target).unwrap();
        replace_dir(&staging, &target).unwrap();
        assert!(target.is_dir());
    }
}
