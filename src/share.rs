//! Public share link resolution.
//!
//! Anyone holding a share token may fetch the file. Every failure that says
//! something about the token (malformed, unknown, expired, blob gone) comes
//! back as the same `NotFound`, and the metadata lookup runs for every token
//! so the response does not reveal which case applied.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{self, Cache};
use crate::config::{ShareDelivery, UploadConfig};
use crate::object_store::{ObjectStore, ObjectStoreError, ResponseOverrides};
use crate::storage::models::FileRecord;
use crate::storage::{self, DatabaseError, MetadataStore};
use crate::token;

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("File not found or expired")]
    NotFound,
    #[error("Object store error: {0}")]
    Store(#[from] ObjectStoreError),
    #[error("Metadata error: {0}")]
    Metadata(#[from] DatabaseError),
}

#[derive(Debug)]
pub enum Delivery {
    /// Send the client to a presigned object store URL
    Redirect(String),
    /// The blob itself
    Bytes(Bytes),
}

#[derive(Debug)]
pub struct SharedFile {
    pub record: FileRecord,
    pub delivery: Delivery,
}

#[derive(Clone)]
pub struct ShareResolver {
    db: Arc<dyn MetadataStore>,
    store: Arc<dyn ObjectStore>,
    cache: Arc<dyn Cache>,
    delivery: ShareDelivery,
    link_ttl: std::time::Duration,
}

impl ShareResolver {
    pub fn new(
        db: Arc<dyn MetadataStore>,
        store: Arc<dyn ObjectStore>,
        cache: Arc<dyn Cache>,
        delivery: ShareDelivery,
        uploads: &UploadConfig,
    ) -> Self {
        Self {
            db,
            store,
            cache,
            delivery,
            link_ttl: uploads.link_ttl,
        }
    }

    pub async fn resolve(&self, share_token: &str) -> Result<SharedFile, ShareError> {
        let well_formed = token::is_well_formed_share_token(share_token);

        let lookup = share_token.to_string();
        let found =
            storage::blocking(&self.db, move |db| db.get_file_by_share_token(&lookup)).await?;
        let record = match found {
            Some(record) if well_formed && !record.is_expired(Utc::now()) => record,
            _ => return Err(ShareError::NotFound),
        };

        match self.store.exists(&record.storage_key).await {
            Ok(true) => {}
            Ok(false) => {
                self.drop_dangling(&record).await;
                return Err(ShareError::NotFound);
            }
            Err(e) => return Err(e.into()),
        }

        let delivery = match self.delivery {
            ShareDelivery::Redirect => {
                let headers =
                    ResponseOverrides::attachment(&record.mime_type, &record.original_name);
                Delivery::Redirect(
                    self.store
                        .presigned_get(&record.storage_key, self.link_ttl, Some(&headers))
                        .await?,
                )
            }
            ShareDelivery::Stream => match self.store.get(&record.storage_key).await {
                Ok(data) => Delivery::Bytes(data),
                // Lost between the existence check and the read.
                Err(ObjectStoreError::NotFound(_)) => return Err(ShareError::NotFound),
                Err(e) => return Err(e.into()),
            },
        };

        debug!(file_id = record.id, "Resolved share link");
        Ok(SharedFile { record, delivery })
    }

    /// The record outlived its blob. Remove it so it stops being listed.
    async fn drop_dangling(&self, record: &FileRecord) {
        warn!(
            file_id = record.id,
            storage_key = %record.storage_key,
            "Shared file has no blob, removing record"
        );
        let id = record.id;
        if let Err(e) = storage::blocking(&self.db, move |db| db.delete_file(id)).await {
            warn!(file_id = id, error = %e, "Failed to remove dangling record");
            return;
        }
        cache::invalidate_user(self.cache.as_ref(), &record.owner_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    use crate::storage::models::NewFile;
    use crate::testutil::Harness;

    async fn shared(h: &Harness, key: &str, expires_in: Option<ChronoDuration>) -> FileRecord {
        h.store
            .put(key, Bytes::from_static(b"shared bytes"), "text/plain")
            .await
            .unwrap();
        let record = h
            .db
            .insert_file(NewFile {
                owner_id: "U1".to_string(),
                storage_key: key.to_string(),
                original_name: "doc.txt".to_string(),
                byte_size: 12,
                mime_type: "text/plain".to_string(),
                share_token: Some(token::generate_share_token().unwrap()),
                expires_at: expires_in.map(|d| Utc::now() + d),
                created_at: Utc::now(),
            })
            .unwrap();
        h.db.activate_file(record.id).unwrap().unwrap()
    }

    fn resolver(h: &Harness, delivery: ShareDelivery) -> ShareResolver {
        ShareResolver::new(
            h.meta.clone(),
            h.store.clone(),
            h.cache.clone(),
            delivery,
            &h.upload_config(),
        )
    }

    #[tokio::test]
    async fn test_redirect_to_presigned_url() {
        let h = Harness::new();
        let record = shared(&h, "doc-key.txt", None).await;
        let token = record.share_token.clone().unwrap();

        let shared = resolver(&h, ShareDelivery::Redirect).resolve(&token).await.unwrap();
        assert_eq!(shared.record.id, record.id);
        match shared.delivery {
            Delivery::Redirect(url) => {
                assert!(url.contains("/blobs/doc-key.txt?"));
                assert!(url.contains("signature="));
            }
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_returns_bytes() {
        let h = Harness::new();
        let record = shared(&h, "doc-key.txt", Some(ChronoDuration::hours(1))).await;
        let token = record.share_token.clone().unwrap();

        let shared = resolver(&h, ShareDelivery::Stream).resolve(&token).await.unwrap();
        match shared.delivery {
            Delivery::Bytes(data) => assert_eq!(&data[..], b"shared bytes"),
            other => panic!("expected bytes, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_malformed_and_expired_are_not_found() {
        let h = Harness::new();
        let r = resolver(&h, ShareDelivery::Redirect);

        let unknown = token::generate_share_token().unwrap();
        assert!(matches!(r.resolve(&unknown).await, Err(ShareError::NotFound)));
        assert!(matches!(r.resolve("").await, Err(ShareError::NotFound)));
        assert!(matches!(r.resolve("../etc").await, Err(ShareError::NotFound)));

        let expired = shared(&h, "old.txt", Some(ChronoDuration::seconds(-5))).await;
        let token = expired.share_token.unwrap();
        assert!(matches!(r.resolve(&token).await, Err(ShareError::NotFound)));
        // Expired records are left for the sweeper.
        assert!(h.db.get_file(expired.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_blob_removes_record() {
        let h = Harness::new();
        let record = shared(&h, "vanished.txt", None).await;
        h.store.delete("vanished.txt").await.unwrap();

        let token = record.share_token.clone().unwrap();
        let r = resolver(&h, ShareDelivery::Redirect);
        assert!(matches!(r.resolve(&token).await, Err(ShareError::NotFound)));
        assert!(h.db.get_file(record.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_existence_check_failure_is_an_error_not_a_miss() {
        let h = Harness::new();
        let record = shared(&h, "flaky.txt", None).await;
        h.store.fail_exists(true);

        let token = record.share_token.clone().unwrap();
        let r = resolver(&h, ShareDelivery::Redirect);
        assert!(matches!(r.resolve(&token).await, Err(ShareError::Store(_))));
        assert!(h.db.get_file(record.id).unwrap().is_some());
    }
}
