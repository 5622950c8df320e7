//! Auxiliary evaluation asset copy.
//!
//! Jobs may have extra evaluation files (test inputs, expected outputs, helper
//! scripts) stored outside the submission under `<asset_root>/<job_id>`. They are
//! merged into the job directory before the first query. Existing files are never
//! overwritten, so copying twice is a no-op.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::RunnerError;

/// Counts from one copy pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files_copied: usize,
    pub files_skipped: usize,
    pub dirs_created: usize,
}

/// Copies `<asset_root>/<job_id>` into `dest` if it exists.
///
/// Returns `Ok(None)` when the job has no assets.
pub fn copy_job_assets(
    asset_root: &Path,
    job_id: &str,
    dest: &Path,
) -> Result<Option<CopyStats>, RunnerError> {
    let src = asset_root.join(job_id);
    if !src.is_dir() {
        return Ok(None);
    }
    let stats = copy_tree_no_overwrite(&src, dest)?;
    tracing::debug!(
        job_id,
        copied = stats.files_copied,
        skipped = stats.files_skipped,
        "Copied evaluation assets"
    );
    Ok(Some(stats))
}

/// Recursively copies `src` into `dst`, keeping any file that already exists in `dst`.
pub fn copy_tree_no_overwrite(src: &Path, dst: &Path) -> Result<CopyStats, RunnerError> {
    let mut stats = CopyStats::default();
    let asset_err = |path: &Path, e: &dyn std::fmt::Display| RunnerError::AssetCopy {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| asset_err(src, &e))?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            if !target.exists() {
                fs::create_dir_all(&target).map_err(|e| asset_err(&target, &e))?;
                stats.dirs_created += 1;
            }
        } else if target.exists() {
            stats.files_skipped += 1;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| asset_err(parent, &e))?;
            }
            fs::copy(entry.path(), &target).map_err(|e| asset_err(&target, &e))?;
            stats.files_copied += 1;
        }
    }

    Ok(stats)
}
