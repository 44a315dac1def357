//! Upload coordination.
//!
//! An upload writes the blob and the metadata record concurrently, then either
//! commits (the record becomes visible), compensates (whatever was written is
//! rolled back in the background) or reports a timeout. The record is only
//! promoted to `Active` after the blob write has been confirmed.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{self, Cache};
use crate::config::UploadConfig;
use crate::object_store::{ObjectStore, ObjectStoreError, ResponseOverrides};
use crate::storage::models::{FileRecord, NewFile};
use crate::storage::{self, DatabaseError, MetadataStore};
use crate::token::{self, RandomError};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("object store write failed: {0}")]
    ObjectStore(#[from] ObjectStoreError),
    #[error("metadata write failed: {0}")]
    Metadata(#[from] DatabaseError),
    #[error(transparent)]
    Random(#[from] RandomError),
    #[error("expiry is out of range")]
    ExpiryOutOfRange,
    #[error("record vanished before it could be committed")]
    RecordLost,
    #[error("sub-task ended without reporting a result")]
    SubTaskLost,
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug)]
pub struct UploadRequest {
    pub owner_id: String,
    pub original_name: String,
    pub content_type: String,
    pub data: Bytes,
    /// Lifetime of the upload. Falls back to the configured default.
    pub expires_in: Option<Duration>,
}

#[derive(Debug)]
pub struct UploadedFile {
    pub record: FileRecord,
    /// Time-limited retrieval URL
    pub url: String,
}

/// Terminal state of one upload.
#[derive(Debug)]
pub enum UploadOutcome {
    /// Blob and record are both durable and the record is visible.
    Committed(UploadedFile),
    /// One side failed. Anything the other side wrote is being rolled back.
    Compensated(UploadError),
    /// The deadline passed first. In-flight work was cancelled and is being
    /// rolled back, but the caller cannot assume either way.
    TimedOut,
}

type SubResult<T> = Result<T, UploadError>;

/// Where a sub-task stood when the race ended.
enum Leg<T> {
    Running(oneshot::Receiver<SubResult<T>>),
    Succeeded(T),
    Failed,
    /// Ended without a clean report; it may have written before stopping.
    Unknown,
}

/// Errors after which a write may still have landed.
fn may_have_written(e: &UploadError) -> bool {
    matches!(e, UploadError::Cancelled | UploadError::SubTaskLost)
}

fn received<T>(r: Result<SubResult<T>, oneshot::error::RecvError>) -> SubResult<T> {
    r.unwrap_or(Err(UploadError::SubTaskLost))
}

#[derive(Clone)]
pub struct UploadCoordinator {
    store: Arc<dyn ObjectStore>,
    db: Arc<dyn MetadataStore>,
    cache: Arc<dyn Cache>,
    config: UploadConfig,
}

impl UploadCoordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        db: Arc<dyn MetadataStore>,
        cache: Arc<dyn Cache>,
        config: UploadConfig,
    ) -> Self {
        Self {
            store,
            db,
            cache,
            config,
        }
    }

    pub async fn upload(&self, req: UploadRequest) -> UploadOutcome {
        let now = Utc::now();

        let expires_at = match req.expires_in.or(self.config.default_file_ttl) {
            Some(ttl) => match chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| now.checked_add_signed(ttl))
            {
                Some(at) => Some(at),
                None => return UploadOutcome::Compensated(UploadError::ExpiryOutOfRange),
            },
            None => None,
        };

        let storage_key = match token::storage_key(&req.original_name, now) {
            Ok(key) => key,
            Err(e) => return UploadOutcome::Compensated(e.into()),
        };

        let byte_size = req.data.len() as u64;

        let cancel = CancellationToken::new();
        // Abandoned by the caller (client went away): stop both sub-tasks.
        let _abandon = cancel.clone().drop_guard();

        let (blob_tx, mut blob_rx) = oneshot::channel::<SubResult<String>>();
        {
            let store = Arc::clone(&self.store);
            let cancel = cancel.clone();
            let key = storage_key.clone();
            let overrides = ResponseOverrides::attachment(&req.content_type, &req.original_name);
            let data = req.data;
            let link_ttl = self.config.link_ttl;
            tokio::spawn(async move {
                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(UploadError::Cancelled),
                    r = write_blob(store.as_ref(), &key, data, &overrides, link_ttl) => r,
                };
                let _ = blob_tx.send(result);
            });
        }

        let (meta_tx, mut meta_rx) = oneshot::channel::<SubResult<FileRecord>>();
        {
            let db = Arc::clone(&self.db);
            let cancel = cancel.clone();
            let new = NewFile {
                owner_id: req.owner_id.clone(),
                storage_key: storage_key.clone(),
                original_name: req.original_name,
                byte_size,
                mime_type: req.content_type,
                share_token: None,
                expires_at,
                created_at: now,
            };
            tokio::task::spawn_blocking(move || {
                let result = if cancel.is_cancelled() {
                    Err(UploadError::Cancelled)
                } else {
                    write_metadata(db.as_ref(), new)
                };
                let _ = meta_tx.send(result);
            });
        }

        // None = still running, Some(None) = failed, Some(Some(v)) = succeeded
        let mut blob: Option<Option<String>> = None;
        let mut blob_uncertain = false;
        let mut meta: Option<Option<FileRecord>> = None;
        let mut failure: Option<UploadError> = None;
        let mut timed_out = false;

        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                r = &mut blob_rx, if blob.is_none() => match received(r) {
                    Ok(url) => blob = Some(Some(url)),
                    Err(e) => {
                        blob = Some(None);
                        blob_uncertain = may_have_written(&e);
                        failure = Some(e);
                    }
                },
                r = &mut meta_rx, if meta.is_none() => match received(r) {
                    Ok(record) => meta = Some(Some(record)),
                    Err(e) => {
                        meta = Some(None);
                        failure = Some(e);
                    }
                },
                _ = &mut deadline => timed_out = true,
            }

            let both_done = matches!((&blob, &meta), (Some(Some(_)), Some(Some(_))));
            if failure.is_some() || timed_out || both_done {
                break;
            }
        }

        let blob = match blob {
            None => Leg::Running(blob_rx),
            Some(Some(url)) => Leg::Succeeded(url),
            Some(None) if blob_uncertain => Leg::Unknown,
            Some(None) => Leg::Failed,
        };
        let meta = match meta {
            None => Leg::Running(meta_rx),
            Some(Some(record)) => Leg::Succeeded(record),
            Some(None) => Leg::Failed,
        };

        if let Some(error) = failure {
            warn!(
                owner_id = %req.owner_id,
                storage_key = %storage_key,
                error = %error,
                "Upload failed, rolling back"
            );
            cancel.cancel();
            self.compensate(storage_key, blob, meta);
            return UploadOutcome::Compensated(error);
        }

        if timed_out {
            warn!(
                owner_id = %req.owner_id,
                storage_key = %storage_key,
                timeout_ms = self.config.timeout.as_millis() as u64,
                "Upload timed out, cancelling"
            );
            cancel.cancel();
            self.compensate(storage_key, blob, meta);
            return UploadOutcome::TimedOut;
        }

        match (blob, meta) {
            (Leg::Succeeded(url), Leg::Succeeded(record)) => {
                self.commit(storage_key, url, record).await
            }
            (blob, meta) => {
                // Unreachable by the loop's exit conditions; roll back regardless.
                self.compensate(storage_key, blob, meta);
                UploadOutcome::Compensated(UploadError::SubTaskLost)
            }
        }
    }

    /// Make the pending record visible. Runs only once the blob is confirmed.
    async fn commit(&self, storage_key: String, url: String, record: FileRecord) -> UploadOutcome {
        let id = record.id;
        let activated = storage::blocking(&self.db, move |db| db.activate_file(id)).await;

        let error = match activated {
            Ok(Some(active)) => {
                cache::invalidate_user(self.cache.as_ref(), &active.owner_id).await;
                debug!(
                    file_id = active.id,
                    owner_id = %active.owner_id,
                    storage_key = %storage_key,
                    byte_size = active.byte_size,
                    "Upload committed"
                );
                return UploadOutcome::Committed(UploadedFile {
                    record: active,
                    url,
                });
            }
            Ok(None) => UploadError::RecordLost,
            Err(e) => UploadError::Metadata(e),
        };

        warn!(file_id = id, storage_key = %storage_key, error = %error, "Upload commit failed, rolling back");
        self.compensate(storage_key, Leg::Succeeded(url), Leg::Succeeded(record));
        UploadOutcome::Compensated(error)
    }

    /// Roll back both sides in the background. Failures are logged, never returned.
    fn compensate(&self, storage_key: String, blob: Leg<String>, meta: Leg<FileRecord>) {
        let store = Arc::clone(&self.store);
        let db = Arc::clone(&self.db);
        tokio::spawn(reconcile(store, db, storage_key, blob, meta));
    }
}

async fn write_blob(
    store: &dyn ObjectStore,
    key: &str,
    data: Bytes,
    overrides: &ResponseOverrides,
    link_ttl: Duration,
) -> SubResult<String> {
    store.put(key, data, &overrides.content_type).await?;
    Ok(store.presigned_get(key, link_ttl, Some(overrides)).await?)
}

fn write_metadata(db: &dyn MetadataStore, mut new: NewFile) -> SubResult<FileRecord> {
    new.share_token = Some(token::generate_share_token()?);
    Ok(db.insert_file(new)?)
}

async fn reconcile(
    store: Arc<dyn ObjectStore>,
    db: Arc<dyn MetadataStore>,
    storage_key: String,
    blob: Leg<String>,
    meta: Leg<FileRecord>,
) {
    let blob_written = match blob {
        Leg::Running(rx) => match received(rx.await) {
            Ok(_) => true,
            Err(e) => may_have_written(&e),
        },
        Leg::Succeeded(_) | Leg::Unknown => true,
        Leg::Failed => false,
    };
    if blob_written {
        match store.delete(&storage_key).await {
            Ok(()) => debug!(storage_key = %storage_key, "Removed orphaned blob"),
            Err(e) => {
                warn!(storage_key = %storage_key, error = %e, "Failed to remove orphaned blob")
            }
        }
    }

    let record = match meta {
        Leg::Running(rx) => received(rx.await).ok(),
        Leg::Succeeded(record) => Some(record),
        // A record the sweeper reaps once it goes stale
        Leg::Failed | Leg::Unknown => None,
    };
    if let Some(record) = record {
        let id = record.id;
        match storage::blocking(&db, move |db| db.delete_file(id)).await {
            Ok(_) => debug!(file_id = id, "Removed pending record"),
            Err(e) => warn!(file_id = id, error = %e, "Failed to remove pending record"),
        }
    }
}
