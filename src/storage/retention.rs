use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::config::RetentionConfig;
use crate::core::error::StorageError;
use crate::observability::metrics as obs;

use super::PublishStore;

// ---------------------------------------------------------------------------
// Retention reaper
// ---------------------------------------------------------------------------

/// Outcome of one retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Regular files seen in the listing.
    pub scanned: usize,
    pub deleted: usize,
    pub retained: usize,
    /// Deletions that failed for a reason other than the file already being gone.
    pub failed: usize,
    /// Abandoned staging directories removed.
    pub staging_removed: usize,
}

/// Background task that enforces the retention window.
///
/// Sleeps `interval`, runs one pass, repeats until cancelled. The first pass
/// happens one interval after startup. Passes are not synchronised with
/// request handling: a download that lands after the listing is simply
/// considered on the next tick, and a serve request racing a deletion may see
/// a 404 or a short read.
pub async fn run_retention_task(
    store: PublishStore,
    retention: RetentionConfig,
    cancel: CancellationToken,
) {
    let interval: Duration = retention.interval();
    info!(
        interval_secs = retention.interval_secs,
        max_age_secs = retention.max_age_secs,
        "retention task started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("retention task shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {
                match run_retention_pass(&store, retention.max_age(), Utc::now()).await {
                    Ok(report) => {
                        if report.deleted > 0 || report.failed > 0 {
                            info!(
                                scanned = report.scanned,
                                deleted = report.deleted,
                                retained = report.retained,
                                failed = report.failed,
                                "retention pass completed"
                            );
                        } else {
                            debug!(scanned = report.scanned, "retention pass completed, nothing expired");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "retention pass failed");
                    }
                }
            }
        }
    }
}

/// Delete every file in the store whose mtime is more than `max_age` before `now`.
///
/// Only the listing itself can fail the pass. Individual deletion failures
/// are logged and counted and the scan continues with the next entry. Files
/// that disappeared in the meantime count as neither deleted nor failed.
/// Running the pass twice with the same `now` leaves the store unchanged the
/// second time.
pub async fn run_retention_pass(
    store: &PublishStore,
    max_age: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<RetentionReport, StorageError> {
    let artifacts = store.list().await?;
    let mut report = RetentionReport {
        scanned: artifacts.len(),
        ..RetentionReport::default()
    };

    for artifact in &artifacts {
        let age = now.signed_duration_since(artifact.last_modified);
        if age <= max_age {
            report.retained += 1;
            continue;
        }

        match store.delete(artifact).await {
            Ok(()) => {
                report.deleted += 1;
                debug!(
                    name = %artifact.name,
                    age_secs = age.num_seconds(),
                    size = artifact.size,
                    "deleted expired file"
                );
            }
            Err(StorageError::NotFound { .. }) => {
                debug!(name = %artifact.name, "expired file already removed");
            }
            Err(e) => {
                report.failed += 1;
                obs::inc_retention_delete_failure();
                warn!(name = %artifact.name, error = %e, "failed to delete expired file");
            }
        }
    }

    report.staging_removed = purge_stale_staging(store, max_age, now).await;

    obs::inc_retention_pass();
    obs::add_retention_files_deleted(report.deleted as u64);
    Ok(report)
}

/// Remove staging directories abandoned by a crashed or killed process.
///
/// Directories held by an in-flight job are skipped however old they are.
/// Anything else older than `max_age` has no owner.
async fn purge_stale_staging(
    store: &PublishStore,
    max_age: chrono::Duration,
    now: DateTime<Utc>,
) -> usize {
    let dirs = match store.list_staging().await {
        Ok(dirs) => dirs,
        Err(e) => {
            warn!(error = %e, "failed to list staging directories");
            return 0;
        }
    };

    let mut removed = 0;
    for (path, modified) in dirs {
        if store.is_staging_active(&path) || now.signed_duration_since(modified) <= max_age {
            continue;
        }
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                removed += 1;
                info!(path = %path.display(), "removed abandoned staging directory");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to remove staging directory");
            }
        }
    }
    removed
}
