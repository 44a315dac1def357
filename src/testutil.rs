//! Shared test helpers: a temp-dir backed service graph with fault injection.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::cache::MemoryCache;
use crate::catalog::Catalog;
use crate::config::{
    Config, NodeConfig, SharingConfig, StorageConfig, SweeperConfig, UploadConfig,
};
use crate::object_store::{
    LinkSigner, LocalStore, ObjectStore, ObjectStoreError, ResponseOverrides,
};
use crate::share::ShareResolver;
use crate::storage::models::{FileRecord, NewFile};
use crate::storage::{Database, DatabaseError, MetadataStore};
use crate::upload::UploadCoordinator;
use crate::AppState;

pub const TEST_BASE_URL: &str = "http://files.test";
pub const TEST_SIGNING_SECRET: &[u8] = b"test-link-secret";

/// Poll `check` until it returns true, for up to two seconds.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn injected(what: &str) -> ObjectStoreError {
    ObjectStoreError::Backend(format!("injected {what} failure"))
}

/// [`LocalStore`] with switchable failures and latency.
pub struct FaultyObjectStore {
    inner: LocalStore,
    root: std::path::PathBuf,
    fail_put: AtomicBool,
    fail_delete: AtomicBool,
    fail_exists: AtomicBool,
    panic_after_put: AtomicBool,
    put_delay_ms: AtomicU64,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

impl FaultyObjectStore {
    pub fn new(root: std::path::PathBuf) -> Self {
        let signer = LinkSigner::new(TEST_SIGNING_SECRET, TEST_BASE_URL);
        Self {
            inner: LocalStore::new(&root, signer).expect("Failed to create test object store"),
            root,
            fail_put: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_exists: AtomicBool::new(false),
            panic_after_put: AtomicBool::new(false),
            put_delay_ms: AtomicU64::new(0),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn fail_put(&self, on: bool) {
        self.fail_put.store(on, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, on: bool) {
        self.fail_delete.store(on, Ordering::SeqCst);
    }

    pub fn fail_exists(&self, on: bool) {
        self.fail_exists.store(on, Ordering::SeqCst);
    }

    /// Write the object, then panic instead of reporting success.
    pub fn panic_after_put(&self, on: bool) {
        self.panic_after_put.store(on, Ordering::SeqCst);
    }

    /// Delay applied before every put, failing or not.
    pub fn set_put_delay(&self, delay: Duration) {
        self.put_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Puts that completed successfully.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Delete calls, successful or not.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Objects on disk, partial writes included.
    pub fn local_object_count(&self) -> usize {
        std::fs::read_dir(&self.root)
            .map(|entries| entries.filter_map(Result::ok).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ObjectStore for FaultyObjectStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), ObjectStoreError> {
        let delay = self.put_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(injected("put"));
        }
        self.inner.put(key, data, content_type).await?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.panic_after_put.load(Ordering::SeqCst) {
            panic!("injected panic after put");
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(injected("delete"));
        }
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        if self.fail_exists.load(Ordering::SeqCst) {
            return Err(injected("exists"));
        }
        self.inner.exists(key).await
    }

    async fn presigned_get(
        &self,
        key: &str,
        ttl: Duration,
        overrides: Option<&ResponseOverrides>,
    ) -> Result<String, ObjectStoreError> {
        self.inner.presigned_get(key, ttl, overrides).await
    }
}

/// [`Database`] with switchable failures on the calls tests need to break.
pub struct FaultyMetadataStore {
    inner: Database,
    fail_insert: AtomicBool,
    insert_delay_ms: AtomicU64,
    fail_expired_query: AtomicBool,
}

impl FaultyMetadataStore {
    pub fn new(inner: Database) -> Self {
        Self {
            inner,
            fail_insert: AtomicBool::new(false),
            insert_delay_ms: AtomicU64::new(0),
            fail_expired_query: AtomicBool::new(false),
        }
    }

    pub fn fail_insert(&self, on: bool) {
        self.fail_insert.store(on, Ordering::SeqCst);
    }

    /// Blocking delay applied before every insert, failing or not.
    pub fn set_insert_delay(&self, delay: Duration) {
        self.insert_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_expired_query(&self, on: bool) {
        self.fail_expired_query.store(on, Ordering::SeqCst);
    }
}

impl MetadataStore for FaultyMetadataStore {
    fn insert_file(&self, file: NewFile) -> Result<FileRecord, DatabaseError> {
        let delay = self.insert_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(DatabaseError::Conflict("injected insert failure".into()));
        }
        self.inner.insert_file(file)
    }

    fn activate_file(&self, id: u64) -> Result<Option<FileRecord>, DatabaseError> {
        self.inner.activate_file(id)
    }

    fn get_owned_file(&self, id: u64, owner_id: &str) -> Result<Option<FileRecord>, DatabaseError> {
        self.inner.get_owned_file(id, owner_id)
    }

    fn get_file_by_share_token(&self, token: &str) -> Result<Option<FileRecord>, DatabaseError> {
        self.inner.get_file_by_share_token(token)
    }

    fn list_files_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>, DatabaseError> {
        self.inner.list_files_by_owner(owner_id)
    }

    fn search_files(&self, owner_id: &str, query: &str) -> Result<Vec<FileRecord>, DatabaseError> {
        self.inner.search_files(owner_id, query)
    }

    fn assign_share_token(
        &self,
        id: u64,
        owner_id: &str,
        candidate: &str,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        self.inner.assign_share_token(id, owner_id, candidate)
    }

    fn delete_file(&self, id: u64) -> Result<bool, DatabaseError> {
        self.inner.delete_file(id)
    }

    fn expired_files(&self, now: DateTime<Utc>) -> Result<Vec<FileRecord>, DatabaseError> {
        if self.fail_expired_query.load(Ordering::SeqCst) {
            return Err(DatabaseError::Conflict("injected query failure".into()));
        }
        self.inner.expired_files(now)
    }

    fn stale_pending_files(&self, before: DateTime<Utc>) -> Result<Vec<FileRecord>, DatabaseError> {
        self.inner.stale_pending_files(before)
    }
}

/// A full service graph over a temporary directory.
///
/// `db` is the raw database for assertions; services are wired to `meta`,
/// which wraps the same database with fault injection.
pub struct Harness {
    pub db: Arc<Database>,
    pub meta: Arc<FaultyMetadataStore>,
    pub store: Arc<FaultyObjectStore>,
    pub cache: Arc<MemoryCache>,
    pub config: Config,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let data_dir = dir.path().join("data");
        let files_dir = dir.path().join("files");

        let config = Config {
            node: NodeConfig {
                bind_address: "127.0.0.1:0".to_string(),
                data_dir: data_dir.to_string_lossy().to_string(),
                public_base_url: TEST_BASE_URL.to_string(),
            },
            storage: StorageConfig {
                local_storage_path: files_dir.to_string_lossy().to_string(),
                ..Default::default()
            },
            uploads: UploadConfig {
                timeout: Duration::from_secs(5),
                ..Default::default()
            },
            sweeper: SweeperConfig::default(),
            sharing: SharingConfig::default(),
            max_upload_size: 1024 * 1024,
            cache_ttl: Duration::from_secs(60),
            user_id_header: "x-user-id".to_string(),
        };

        let db = Database::open(&data_dir).expect("Failed to open test database");

        Self {
            meta: Arc::new(FaultyMetadataStore::new(db.clone())),
            db: Arc::new(db),
            store: Arc::new(FaultyObjectStore::new(files_dir)),
            cache: Arc::new(MemoryCache::new()),
            config,
            _dir: dir,
        }
    }

    pub fn upload_config(&self) -> UploadConfig {
        self.config.uploads.clone()
    }

    pub fn coordinator(&self) -> UploadCoordinator {
        UploadCoordinator::new(
            self.store.clone(),
            self.meta.clone(),
            self.cache.clone(),
            self.upload_config(),
        )
    }

    pub fn coordinator_with_timeout(&self, timeout: Duration) -> UploadCoordinator {
        let config = UploadConfig {
            timeout,
            ..self.upload_config()
        };
        UploadCoordinator::new(self.store.clone(), self.meta.clone(), self.cache.clone(), config)
    }

    pub fn catalog(&self) -> Catalog {
        Catalog::new(
            self.meta.clone(),
            self.store.clone(),
            self.cache.clone(),
            &self.config,
        )
    }

    pub fn shares(&self) -> ShareResolver {
        ShareResolver::new(
            self.meta.clone(),
            self.store.clone(),
            self.cache.clone(),
            self.config.sharing.delivery,
            &self.config.uploads,
        )
    }

    /// Application state over this harness, with local signed links enabled.
    pub fn state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            config: self.config.clone(),
            uploads: self.coordinator(),
            catalog: self.catalog(),
            shares: self.shares(),
            object_store: self.store.clone(),
            local_links: Some(LinkSigner::new(TEST_SIGNING_SECRET, TEST_BASE_URL)),
        })
    }
}
