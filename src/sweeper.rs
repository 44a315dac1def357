//! Background expiry sweeper.
//!
//! Expired files stop being served the moment their expiry passes, because
//! every read path checks it. The sweeper is what actually reclaims them: it
//! wakes up periodically, deletes the blob of every expired record, then the
//! record, then the owner's cached listing. It also reaps uploads that never
//! left the pending state (the process died between the two writes).
//!
//! Ordering matters. If the blob delete fails the record is left in place so
//! the next pass retries; a record is never removed while its blob might
//! still exist.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{self, Cache};
use crate::config::SweeperConfig;
use crate::object_store::ObjectStore;
use crate::storage::models::FileRecord;
use crate::storage::{self, MetadataStore};

/// Counters for one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub expired_found: usize,
    pub deleted: usize,
    /// Records left for a later pass because a step failed
    pub skipped: usize,
    pub pending_reaped: usize,
}

/// Performs sweep passes. Held by the background loop, usable directly in tests.
#[derive(Clone)]
pub struct Sweeper {
    db: Arc<dyn MetadataStore>,
    store: Arc<dyn ObjectStore>,
    cache: Arc<dyn Cache>,
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(
        db: Arc<dyn MetadataStore>,
        store: Arc<dyn ObjectStore>,
        cache: Arc<dyn Cache>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            db,
            store,
            cache,
            config,
        }
    }

    /// One pass over expired and abandoned records.
    pub async fn run_pass(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let now = Utc::now();

        match storage::blocking(&self.db, move |db| db.expired_files(now)).await {
            Ok(expired) => {
                stats.expired_found = expired.len();
                for file in expired {
                    if self.reclaim(&file).await {
                        stats.deleted += 1;
                    } else {
                        stats.skipped += 1;
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to query expired files, ending sweep pass");
                return stats;
            }
        }

        let grace = chrono::Duration::from_std(self.config.pending_grace)
            .unwrap_or(chrono::Duration::MAX);
        if let Some(cutoff) = now.checked_sub_signed(grace) {
            match storage::blocking(&self.db, move |db| db.stale_pending_files(cutoff)).await {
                Ok(stale) => {
                    for file in stale {
                        if self.reclaim(&file).await {
                            stats.pending_reaped += 1;
                        } else {
                            stats.skipped += 1;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Failed to query abandoned uploads"),
            }
        }

        stats
    }

    /// Blob, then record, then cache. Returns false if the record was kept.
    async fn reclaim(&self, file: &FileRecord) -> bool {
        if let Err(e) = self.store.delete(&file.storage_key).await {
            warn!(
                file_id = file.id,
                storage_key = %file.storage_key,
                error = %e,
                "Failed to delete blob, keeping record for retry"
            );
            return false;
        }

        let id = file.id;
        if let Err(e) = storage::blocking(&self.db, move |db| db.delete_file(id)).await {
            warn!(file_id = id, error = %e, "Failed to delete file record");
            return false;
        }

        cache::invalidate_user(self.cache.as_ref(), &file.owner_id).await;
        debug!(
            file_id = file.id,
            owner_id = %file.owner_id,
            storage_key = %file.storage_key,
            "Reclaimed file"
        );
        true
    }
}

/// A handle to the running sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    /// Starts the sweeper as a background task. The first pass runs immediately.
    pub fn start(sweeper: Sweeper) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval_secs = sweeper.config.interval.as_secs();

        let task = tokio::spawn(sweeper_loop(sweeper, shutdown_rx));

        info!(interval_secs, "Expiry sweeper started");

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Signal the loop to stop. A pass already running finishes first.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Expiry sweeper task ended abnormally");
            }
        }
        info!("Expiry sweeper stopped");
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(sweeper: Sweeper, mut shutdown_rx: watch::Receiver<bool>) {
    let interval = sweeper.config.interval;

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        let stats = sweeper.run_pass().await;
        if stats.expired_found > 0 || stats.pending_reaped > 0 || stats.skipped > 0 {
            info!(
                expired_found = stats.expired_found,
                deleted = stats.deleted,
                skipped = stats.skipped,
                pending_reaped = stats.pending_reaped,
                "Sweep pass complete"
            );
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }
    }
}
