use chrono::{DateTime, Utc};
use redb::{ReadableTable, Table, WriteTransaction};

use super::db::{Database, DatabaseError};
use super::models::{FileRecord, FileStatus, NewFile};
use super::tables::*;

fn load<T: ReadableTable<u64, &'static [u8]>>(
    table: &T,
    id: u64,
) -> Result<Option<FileRecord>, DatabaseError> {
    match table.get(id)? {
        Some(data) => {
            let file: FileRecord = rmp_serde::from_slice(data.value())?;
            Ok(Some(file))
        }
        None => Ok(None),
    }
}

fn store(table: &mut Table<u64, &[u8]>, file: &FileRecord) -> Result<(), DatabaseError> {
    let data = rmp_serde::to_vec_named(file)?;
    table.insert(file.id, data.as_slice())?;
    Ok(())
}

fn next_id(txn: &WriteTransaction) -> Result<u64, DatabaseError> {
    let mut sequences = txn.open_table(SEQUENCES)?;
    let next = sequences
        .get(FILE_ID_SEQUENCE)?
        .map(|v| v.value())
        .unwrap_or(0)
        + 1;
    sequences.insert(FILE_ID_SEQUENCE, next)?;
    Ok(next)
}

impl Database {
    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert a new record as `Pending`, assigning its id.
    /// Fails with `Conflict` if the storage key or share token is taken.
    pub fn insert_file(&self, new: NewFile) -> Result<FileRecord, DatabaseError> {
        debug_assert!(!new.owner_id.is_empty(), "owner id must not be empty");
        debug_assert!(!new.storage_key.is_empty(), "storage key must not be empty");

        let write_txn = self.begin_write()?;
        let record = {
            let mut keys = write_txn.open_table(STORAGE_KEYS)?;
            if keys.get(new.storage_key.as_str())?.is_some() {
                return Err(DatabaseError::Conflict(format!(
                    "storage key '{}' already exists",
                    new.storage_key
                )));
            }

            let mut tokens = write_txn.open_table(SHARE_TOKENS)?;
            if let Some(ref token) = new.share_token {
                if tokens.get(token.as_str())?.is_some() {
                    return Err(DatabaseError::Conflict("share token already issued".into()));
                }
            }

            let id = next_id(&write_txn)?;
            let record = new.into_record(id);

            let mut files = write_txn.open_table(FILES)?;
            store(&mut files, &record)?;

            keys.insert(record.storage_key.as_str(), id)?;
            if let Some(ref token) = record.share_token {
                tokens.insert(token.as_str(), id)?;
            }

            let mut owners = write_txn.open_table(OWNER_FILES)?;
            owners.insert((record.owner_id.as_str(), id), ())?;

            if let Some(expires_at) = record.expires_at {
                let mut expiries = write_txn.open_table(FILE_EXPIRIES)?;
                expiries.insert((expires_at.timestamp_millis(), id), ())?;
            }

            let mut pending = write_txn.open_table(PENDING_FILES)?;
            pending.insert(id, record.created_at.timestamp_millis())?;

            record
        };
        write_txn.commit()?;
        Ok(record)
    }

    /// Promote a pending record to `Active`, returning it. None if the record is gone.
    pub fn activate_file(&self, id: u64) -> Result<Option<FileRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let activated = {
            let mut files = write_txn.open_table(FILES)?;
            match load(&files, id)? {
                Some(mut file) => {
                    if file.status != FileStatus::Active {
                        file.status = FileStatus::Active;
                        file.updated_at = Utc::now();
                        store(&mut files, &file)?;
                    }
                    let mut pending = write_txn.open_table(PENDING_FILES)?;
                    pending.remove(id)?;
                    Some(file)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(activated)
    }

    /// Give an owned, active record a share token unless it already has one.
    /// Returns the record as stored afterwards, or None if the caller does not own it.
    pub fn assign_share_token(
        &self,
        id: u64,
        owner_id: &str,
        candidate: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let result = {
            let mut files = write_txn.open_table(FILES)?;
            match load(&files, id)? {
                Some(file) if file.owner_id != owner_id || file.status != FileStatus::Active => {
                    None
                }
                Some(file) if file.share_token.is_some() => Some(file),
                Some(mut file) => {
                    let mut tokens = write_txn.open_table(SHARE_TOKENS)?;
                    if tokens.get(candidate)?.is_some() {
                        return Err(DatabaseError::Conflict("share token already issued".into()));
                    }
                    tokens.insert(candidate, id)?;

                    file.share_token = Some(candidate.to_string());
                    file.updated_at = Utc::now();
                    store(&mut files, &file)?;
                    Some(file)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(result)
    }

    /// Delete a record and all of its index entries
    pub fn delete_file(&self, id: u64) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;
        let deleted = {
            let mut files = write_txn.open_table(FILES)?;
            let existing = load(&files, id)?;
            match existing {
                Some(file) => {
                    files.remove(id)?;

                    let mut keys = write_txn.open_table(STORAGE_KEYS)?;
                    keys.remove(file.storage_key.as_str())?;

                    if let Some(ref token) = file.share_token {
                        let mut tokens = write_txn.open_table(SHARE_TOKENS)?;
                        tokens.remove(token.as_str())?;
                    }

                    let mut owners = write_txn.open_table(OWNER_FILES)?;
                    owners.remove((file.owner_id.as_str(), id))?;

                    if let Some(expires_at) = file.expires_at {
                        let mut expiries = write_txn.open_table(FILE_EXPIRIES)?;
                        expiries.remove((expires_at.timestamp_millis(), id))?;
                    }

                    let mut pending = write_txn.open_table(PENDING_FILES)?;
                    pending.remove(id)?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(deleted)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Get a record by id regardless of owner or status
    pub fn get_file(&self, id: u64) -> Result<Option<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FILES)?;
        load(&table, id)
    }

    /// Get an active record by id, only if it belongs to `owner_id`
    pub fn get_owned_file(
        &self,
        id: u64,
        owner_id: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        Ok(self
            .get_file(id)?
            .filter(|f| f.owner_id == owner_id && f.status == FileStatus::Active))
    }

    /// Resolve a share token to its active record
    pub fn get_file_by_share_token(
        &self,
        token: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let tokens = read_txn.open_table(SHARE_TOKENS)?;

        let id = match tokens.get(token)? {
            Some(data) => data.value(),
            None => return Ok(None),
        };

        let files = read_txn.open_table(FILES)?;
        Ok(load(&files, id)?.filter(|f| f.status == FileStatus::Active))
    }

    /// All active records of an owner, oldest first
    pub fn list_files_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let owners = read_txn.open_table(OWNER_FILES)?;
        let files = read_txn.open_table(FILES)?;

        let mut result = Vec::new();
        for entry in owners.range((owner_id, 0u64)..=(owner_id, u64::MAX))? {
            let (key, _) = entry?;
            let (_, id) = key.value();
            if let Some(file) = load(&files, id)? {
                if file.status == FileStatus::Active {
                    result.push(file);
                }
            }
        }

        Ok(result)
    }

    /// Active records of an owner whose original name contains `query`, ignoring case
    pub fn search_files(
        &self,
        owner_id: &str,
        query: &str,
    ) -> Result<Vec<FileRecord>, DatabaseError> {
        let needle = query.to_lowercase();
        Ok(self
            .list_files_by_owner(owner_id)?
            .into_iter()
            .filter(|f| f.original_name.to_lowercase().contains(&needle))
            .collect())
    }

    /// Active records whose expiry is at or before `now`
    pub fn expired_files(&self, now: DateTime<Utc>) -> Result<Vec<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let expiries = read_txn.open_table(FILE_EXPIRIES)?;
        let files = read_txn.open_table(FILES)?;

        let cutoff = now.timestamp_millis();
        let mut result = Vec::new();
        for entry in expiries.range((i64::MIN, 0u64)..=(cutoff, u64::MAX))? {
            let (key, _) = entry?;
            let (_, id) = key.value();
            if let Some(file) = load(&files, id)? {
                if file.status == FileStatus::Active {
                    result.push(file);
                }
            }
        }

        Ok(result)
    }

    /// Pending records created before `before`
    pub fn stale_pending_files(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let pending = read_txn.open_table(PENDING_FILES)?;
        let files = read_txn.open_table(FILES)?;

        let cutoff = before.timestamp_millis();
        let mut result = Vec::new();
        for entry in pending.iter()? {
            let (id, created_at) = entry?;
            if created_at.value() >= cutoff {
                continue;
            }
            if let Some(file) = load(&files, id.value())? {
                result.push(file);
            }
        }

        Ok(result)
    }
}
