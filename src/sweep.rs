//! Mirror reconciliation sweeps
//!
//! Two read-then-delete passes over the on-disk artifact tree, both with
//! a dry-run mode that only reports:
//!
//! - orphan sweep: a file whose reconstructed upstream URL no longer
//!   appears in the file registry belongs to no release and is deleted
//! - unwanted sweep: the selection pipeline is re-run over every stored
//!   package and files it would prune now are deleted, reclaiming space
//!   after a policy change
//!
//! The database lives under the mirror root by default, so its path is
//! excluded from the walk explicitly.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::closure::ExclusionPolicy;
use crate::config::Config;
use crate::filters::ReleasePipeline;
use crate::mirror::local_path;
use crate::store::Store;

/// Counters of one sweep pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepSummary {
    /// Files examined.
    pub scanned: usize,
    /// Files deleted (or, in dry-run, that would be deleted).
    pub removed: usize,
    /// Bytes reclaimed.
    pub bytes: u64,
}

/// Reconstruct the canonical upstream URL of an on-disk artifact.
pub fn upstream_url(mirror_root: &Path, files_url: &str, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(mirror_root).ok()?;
    let mut url = String::from(files_url.trim_end_matches('/'));
    for component in relative.components() {
        url.push('/');
        url.push_str(component.as_os_str().to_str()?);
    }
    Some(url)
}

fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_dir() {
            walk_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn delete_file(path: &Path, dry_run: bool, summary: &mut SweepSummary) {
    let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    summary.removed += 1;
    summary.bytes += size;

    if dry_run {
        info!("would delete {} ({} bytes)", path.display(), size);
        return;
    }

    match fs::remove_file(path) {
        Ok(()) => {
            debug!("deleted {} ({} bytes)", path.display(), size);
            // Empty parents go too; a non-empty parent just stays.
            if let Some(parent) = path.parent() {
                let _ = fs::remove_dir(parent);
            }
        }
        Err(err) => warn!("failed to delete {}: {}", path.display(), err),
    }
}

/// Delete on-disk files no release record references anymore.
pub fn sweep_orphans(store: &Store, config: &Config, dry_run: bool) -> Result<SweepSummary> {
    let mirror_root = PathBuf::from(&config.mirror_root);
    let database = config.database_path();

    let mut summary = SweepSummary::default();
    if !mirror_root.is_dir() {
        info!("mirror root {} does not exist yet", mirror_root.display());
        return Ok(summary);
    }

    let mut files = Vec::new();
    walk_files(&mirror_root, &mut files)?;

    for path in files {
        // The store and its journals are not artifacts.
        if path.to_string_lossy().starts_with(&*database.to_string_lossy()) {
            continue;
        }
        summary.scanned += 1;

        let referenced = match upstream_url(&mirror_root, &config.files_url, &path) {
            Some(url) => store.has_file_url(&url)?,
            None => false,
        };
        if !referenced {
            delete_file(&path, dry_run, &mut summary);
        }
    }

    info!(
        "orphan sweep: {} scanned, {} removed, {} bytes",
        summary.scanned, summary.removed, summary.bytes
    );
    Ok(summary)
}

/// Delete on-disk files the selection pipeline prunes under the current
/// policy.
pub fn sweep_unwanted(
    store: &Store,
    config: &Config,
    policy: &mut ExclusionPolicy,
    dry_run: bool,
) -> Result<SweepSummary> {
    let mirror_root = PathBuf::from(&config.mirror_root);
    let pipeline = ReleasePipeline::new(&config.selection);
    let conditions = policy.closure(store)?.conditions.clone();

    let mut summary = SweepSummary::default();
    for name in store.package_names()? {
        let releases = store.release_map(&name)?;
        if releases.is_empty() {
            continue;
        }
        let current_version = store.current_version(&name)?;
        let selection = pipeline.select(
            releases,
            conditions.get(&name),
            current_version.as_deref(),
        );

        for removed in &selection.removed {
            let Some(path) = local_path(&mirror_root, &config.files_url, &removed.file.url)
            else {
                continue;
            };
            summary.scanned += 1;
            // A pruned file that was never downloaded needs no deletion.
            if path.is_file() {
                delete_file(&path, dry_run, &mut summary);
            }
        }
    }

    info!(
        "unwanted sweep: {} candidates, {} removed, {} bytes",
        summary.scanned, summary.removed, summary.bytes
    );
    Ok(summary)
}
