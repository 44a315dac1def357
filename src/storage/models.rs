use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Visibility of a record. Only `Active` records are returned to readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Inserted by an in-flight upload whose blob is not yet confirmed.
    Pending,
    Active,
}

/// A file record stored in redb
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: u64,
    pub owner_id: String,
    /// Object store key holding the bytes
    pub storage_key: String,
    pub original_name: String,
    pub byte_size: u64,
    pub mime_type: String,
    #[serde(default)]
    pub share_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Active and not expired at `now`.
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.status == FileStatus::Active && !self.is_expired(now)
    }
}

/// A record to insert. The store assigns the id and starts it as `Pending`.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub owner_id: String,
    pub storage_key: String,
    pub original_name: String,
    pub byte_size: u64,
    pub mime_type: String,
    pub share_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NewFile {
    pub(crate) fn into_record(self, id: u64) -> FileRecord {
        FileRecord {
            id,
            owner_id: self.owner_id,
            storage_key: self.storage_key,
            original_name: self.original_name,
            byte_size: self.byte_size,
            mime_type: self.mime_type,
            share_token: self.share_token,
            expires_at: self.expires_at,
            status: FileStatus::Pending,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}
