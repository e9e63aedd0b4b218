//! Catalog/metadata reconciliation against the upstream index
//!
//! A pass compares the upstream global serial with the stored one and
//! returns immediately when they match. Otherwise it atomically replaces
//! the catalog, deletes metadata of packages that fell out of the
//! catalog, and fetches metadata for every stale candidate one package
//! at a time. Any per-package failure marks that package ignored and the
//! pass moves on; only the serial check and the catalog listing are
//! allowed to fail the run.

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::store::Store;
use crate::transport::IndexTransport;

const PROGRESS_EVERY: usize = 500;

/// Counters of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncSummary {
    /// Upstream serial already matched; nothing was touched.
    pub up_to_date: bool,
    /// Entries in the refreshed catalog.
    pub listed: usize,
    /// Entries whose serial advanced past the previous high-water mark.
    pub advanced: usize,
    /// Orphaned metadata records deleted.
    pub orphans_removed: usize,
    /// Stale candidates at the start of the fetch loop.
    pub candidates: usize,
    /// Metadata records fetched and stored.
    pub fetched: usize,
    /// Candidates that failed and were marked ignored.
    pub failed: usize,
    /// The pass stopped early on an interrupt.
    pub cancelled: bool,
}

/// Run one reconciliation pass.
pub async fn reconcile(
    transport: &dyn IndexTransport,
    store: &mut Store,
    cancel: &CancelToken,
) -> Result<SyncSummary> {
    let mut summary = SyncSummary::default();

    let upstream_serial = transport
        .last_serial()
        .await
        .context("Failed to fetch upstream serial")?;

    if store.last_serial()? == Some(upstream_serial) {
        info!("Catalog up to date at serial {}", upstream_serial);
        summary.up_to_date = true;
        return Ok(summary);
    }

    let catalog = transport
        .list_packages()
        .await
        .context("Failed to fetch upstream catalog")?;

    let stats = store.replace_catalog(upstream_serial, &catalog)?;
    summary.listed = stats.listed;
    summary.advanced = stats.advanced;
    info!(
        "Catalog refreshed: {} packages, {} changed, serial {}",
        stats.listed, stats.advanced, upstream_serial
    );

    // Packages dropped upstream lose their metadata before any fetches.
    for name in store.orphaned_names()? {
        debug!("Deleting orphaned package {}", name);
        store.delete_package(&name)?;
        summary.orphans_removed += 1;
    }
    if summary.orphans_removed > 0 {
        info!("Removed {} orphaned packages", summary.orphans_removed);
    }

    let candidates = store.stale_candidates()?;
    summary.candidates = candidates.len();
    info!("{} packages need a metadata fetch", summary.candidates);

    for (done, name) in candidates.iter().enumerate() {
        if cancel.is_requested() {
            warn!(
                "Interrupted after {} of {} packages",
                done, summary.candidates
            );
            summary.cancelled = true;
            break;
        }

        match transport.fetch_metadata(name).await {
            Ok(mut meta) => {
                // Keep the stored record keyed by its catalog spelling.
                meta.info.name = name.clone();
                if let Err(err) = store.insert_package(&meta) {
                    error!("{}: store rejected metadata: {:#}", name, err);
                    store.set_ignored(name, true)?;
                    summary.failed += 1;
                } else {
                    summary.fetched += 1;
                }
            }
            Err(err) => {
                warn!("{}: {}", name, err);
                store.set_ignored(name, true)?;
                summary.failed += 1;
            }
        }

        if (done + 1) % PROGRESS_EVERY == 0 {
            info!(
                "Metadata: {}/{} ({} failed)",
                done + 1,
                summary.candidates,
                summary.failed
            );
        }
    }

    info!(
        "Sync done: {} fetched, {} failed, {} orphans removed",
        summary.fetched, summary.failed, summary.orphans_removed
    );
    Ok(summary)
}
