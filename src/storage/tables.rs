use redb::TableDefinition;

/// File records: id -> FileRecord (msgpack)
pub const FILES: TableDefinition<u64, &[u8]> = TableDefinition::new("files");

/// Share token index: token -> id (unique)
pub const SHARE_TOKENS: TableDefinition<&str, u64> = TableDefinition::new("share_tokens");

/// Storage key index: storage key -> id (unique)
pub const STORAGE_KEYS: TableDefinition<&str, u64> = TableDefinition::new("storage_keys");

/// Owner index: (owner_id, id) -> ()
pub const OWNER_FILES: TableDefinition<(&str, u64), ()> = TableDefinition::new("owner_files");

/// Expiry index: (expires_at millis, id) -> ()
pub const FILE_EXPIRIES: TableDefinition<(i64, u64), ()> = TableDefinition::new("file_expiries");

/// Uploads not yet committed: id -> created_at millis
pub const PENDING_FILES: TableDefinition<u64, i64> = TableDefinition::new("pending_files");

/// Named counters: name -> last issued value
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

pub const FILE_ID_SEQUENCE: &str = "files";
