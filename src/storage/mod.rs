pub mod db;
mod files;
pub mod models;
mod tables;

pub use db::{Database, DatabaseError};
pub use tables::*;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use models::{FileRecord, NewFile};

/// Metadata store operations the services depend on.
///
/// Implemented by [`Database`]. Calls block on disk I/O; async code goes
/// through [`blocking`].
pub trait MetadataStore: Send + Sync {
    fn insert_file(&self, file: NewFile) -> Result<FileRecord, DatabaseError>;
    fn activate_file(&self, id: u64) -> Result<Option<FileRecord>, DatabaseError>;
    fn get_owned_file(&self, id: u64, owner_id: &str)
        -> Result<Option<FileRecord>, DatabaseError>;
    fn get_file_by_share_token(&self, token: &str) -> Result<Option<FileRecord>, DatabaseError>;
    fn list_files_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>, DatabaseError>;
    fn search_files(&self, owner_id: &str, query: &str)
        -> Result<Vec<FileRecord>, DatabaseError>;
    fn assign_share_token(
        &self,
        id: u64,
        owner_id: &str,
        candidate: &str,
    ) -> Result<Option<FileRecord>, DatabaseError>;
    fn delete_file(&self, id: u64) -> Result<bool, DatabaseError>;
    fn expired_files(&self, now: DateTime<Utc>) -> Result<Vec<FileRecord>, DatabaseError>;
    fn stale_pending_files(&self, before: DateTime<Utc>)
        -> Result<Vec<FileRecord>, DatabaseError>;
}

/// Run metadata calls on the blocking pool.
pub async fn blocking<T, F>(db: &Arc<dyn MetadataStore>, f: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce(&dyn MetadataStore) -> Result<T, DatabaseError> + Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(db.as_ref())).await?
}

impl MetadataStore for Database {
    fn insert_file(&self, file: NewFile) -> Result<FileRecord, DatabaseError> {
        Database::insert_file(self, file)
    }

    fn activate_file(&self, id: u64) -> Result<Option<FileRecord>, DatabaseError> {
        Database::activate_file(self, id)
    }

    fn get_owned_file(
        &self,
        id: u64,
        owner_id: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        Database::get_owned_file(self, id, owner_id)
    }

    fn get_file_by_share_token(&self, token: &str) -> Result<Option<FileRecord>, DatabaseError> {
        Database::get_file_by_share_token(self, token)
    }

    fn list_files_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>, DatabaseError> {
        Database::list_files_by_owner(self, owner_id)
    }

    fn search_files(
        &self,
        owner_id: &str,
        query: &str,
    ) -> Result<Vec<FileRecord>, DatabaseError> {
        Database::search_files(self, owner_id, query)
    }

    fn assign_share_token(
        &self,
        id: u64,
        owner_id: &str,
        candidate: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        Database::assign_share_token(self, id, owner_id, candidate)
    }

    fn delete_file(&self, id: u64) -> Result<bool, DatabaseError> {
        Database::delete_file(self, id)
    }

    fn expired_files(&self, now: DateTime<Utc>) -> Result<Vec<FileRecord>, DatabaseError> {
        Database::expired_files(self, now)
    }

    fn stale_pending_files(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<FileRecord>, DatabaseError> {
        Database::stale_pending_files(self, before)
    }
}
