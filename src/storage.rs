// SPDX-License-Identifier: GPL-3.0-only

//! Output-directory bootstrap and disk-space cleanup (§6, External
//! Interfaces / Filesystem).
//!
//! Disk space is read via `statvfs` free/total byte counts, a critical
//! threshold triggers deleting the oldest 20% of saved `.jpg` files, and
//! the check is cheap enough to run once per orchestrator iteration
//! without its own background thread.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::constants::{DISK_CLEANUP_FRACTION, DISK_CRITICAL_FREE_BYTES, DISK_CRITICAL_USED_FRACTION};
use crate::errors::AppError;

/// Creates the output directory if it doesn't already exist (§6).
pub fn ensure_output_dir(dir: &Path) -> Result<(), AppError> {
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Free/total byte counts for the filesystem backing `dir`.
#[derive(Debug, Clone, Copy)]
pub struct DiskUsage {
    pub free_bytes: u64,
    pub total_bytes: u64,
}

impl DiskUsage {
    pub fn used_fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            1.0 - (self.free_bytes as f64 / self.total_bytes as f64)
        }
    }

    /// True when free space is below the critical byte threshold, or usage
    /// exceeds the critical fraction (§6).
    pub fn is_critical(&self) -> bool {
        self.free_bytes < DISK_CRITICAL_FREE_BYTES || self.used_fraction() > DISK_CRITICAL_USED_FRACTION
    }
}

/// Reads free/total space for the filesystem backing `dir` via `statvfs`.
pub fn disk_usage(dir: &Path) -> Option<DiskUsage> {
    let c_path = std::ffi::CString::new(dir.to_string_lossy().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if ret != 0 {
        return None;
    }
    let block_size = stat.f_frsize as u64;
    Some(DiskUsage {
        free_bytes: stat.f_bavail as u64 * block_size,
        total_bytes: stat.f_blocks as u64 * block_size,
    })
}

/// Deletes the oldest 20% of `.jpg` files in `dir`, oldest by modification
/// time first, at least one file if any exist. Returns the number deleted
/// (§6).
pub fn cleanup_oldest_jpegs(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        warn!(dir = %dir.display(), "Cannot open output directory for disk cleanup");
        return 0;
    };

    let mut files: Vec<(PathBuf, SystemTime)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("jpg")) != Some(true) {
            continue;
        }
        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                files.push((path, modified));
            }
        }
    }

    if files.is_empty() {
        return 0;
    }

    files.sort_by_key(|(_, modified)| *modified);

    let to_delete = ((files.len() as f64) * DISK_CLEANUP_FRACTION).ceil().max(1.0) as usize;
    let mut deleted = 0;
    for (path, _) in files.iter().take(to_delete) {
        match std::fs::remove_file(path) {
            Ok(()) => {
                deleted += 1;
                debug!(path = %path.display(), "Deleted old detection photo");
            }
            Err(e) => warn!(error = %e, path = %path.display(), "Failed to delete old detection photo"),
        }
    }
    deleted
}

/// Checks disk space for `output_dir` and, if critical, runs a cleanup
/// pass. A no-op (returns `false`) if `statvfs` fails or space is fine.
pub fn check_and_cleanup(output_dir: &Path) -> bool {
    let Some(usage) = disk_usage(output_dir) else {
        return false;
    };
    if !usage.is_critical() {
        return false;
    }
    let deleted = cleanup_oldest_jpegs(output_dir);
    if deleted > 0 {
        info!(deleted, "Cleaned up old detection photos due to low disk space");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::thread::sleep;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn ensure_output_dir_creates_missing_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        assert!(!nested.exists());
        ensure_output_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn disk_usage_reports_nonzero_total_for_a_real_path() {
        let dir = tempdir().unwrap();
        let usage = disk_usage(dir.path()).expect("statvfs should succeed on a real path");
        assert!(usage.total_bytes > 0);
    }

    #[test]
    fn cleanup_deletes_oldest_twenty_percent_and_preserves_newest() {
        let dir = tempdir().unwrap();
        for i in 0..10 {
            File::create(dir.path().join(format!("{i}.jpg"))).unwrap();
            sleep(Duration::from_millis(5));
        }
        let deleted = cleanup_oldest_jpegs(dir.path());
        assert_eq!(deleted, 2);
        assert!(!dir.path().join("0.jpg").exists());
        assert!(dir.path().join("9.jpg").exists());
    }

    #[test]
    fn cleanup_ignores_non_jpg_files() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("note.txt")).unwrap();
        assert_eq!(cleanup_oldest_jpegs(dir.path()), 0);
        assert!(dir.path().join("note.txt").exists());
    }
}
