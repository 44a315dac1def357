use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::{LinkSigner, ObjectStore, ObjectStoreError, ResponseOverrides};

/// Local filesystem object store. Retrieval URLs point at this service's
/// `/blobs` route and are signed by a [`LinkSigner`].
pub struct LocalStore {
    base_path: PathBuf,
    signer: LinkSigner,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(base_path: P, signer: LinkSigner) -> Result<Self, std::io::Error> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        remove_partial_writes(&base_path)?;
        Ok(Self { base_path, signer })
    }

    /// Keys are flat file names; anything that could leave the base directory is rejected.
    fn object_path(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains("..")
            || key.contains('/')
            || key.contains('\\')
        {
            return Err(ObjectStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(key))
    }
}

fn partial_path(base: &Path, key: &str) -> PathBuf {
    base.join(format!(".{key}.part"))
}

/// Partial files left by writes that were cancelled or interrupted. Nothing
/// writes them before the store is constructed, so all of them are stale.
fn remove_partial_writes(base: &Path) -> Result<(), std::io::Error> {
    for entry in std::fs::read_dir(base)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') && name.ends_with(".part") {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => tracing::debug!(file = %name, "Removed stale partial write"),
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "Failed to remove partial write")
                }
            }
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        _content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key)?;
        // Write aside and rename so an interrupted write never leaves a partial object.
        let partial = partial_path(&self.base_path, key);
        tokio::fs::write(&partial, &data).await?;
        tokio::fs::rename(&partial, &path).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key)?;
        // A cancelled put may have left its partial file behind.
        let _ = tokio::fs::remove_file(partial_path(&self.base_path, key)).await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let path = self.object_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn presigned_get(
        &self,
        key: &str,
        ttl: Duration,
        overrides: Option<&ResponseOverrides>,
    ) -> Result<String, ObjectStoreError> {
        self.object_path(key)?;
        Ok(self.signer.sign(key, ttl.as_secs(), overrides))
    }
}
