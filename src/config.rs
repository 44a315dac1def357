use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Longest lifetime a GCS V4 signed URL may carry.
pub const MAX_GCS_LINK_TTL_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub uploads: UploadConfig,
    pub sweeper: SweeperConfig,
    pub sharing: SharingConfig,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
    /// TTL of cached per-user file listings
    pub cache_ttl: Duration,
    /// Header an upstream gateway sets to the authenticated user id
    pub user_id_header: String,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
    /// Externally reachable base URL, used for share and blob links
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub enum StorageBackend {
    Gcs,
    Local,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for local storage backend
    pub local_storage_path: String,
    /// HMAC secret for local signed links. A random key is generated when unset,
    /// which invalidates outstanding links on restart.
    pub link_signing_secret: Option<String>,
    /// GCS bucket name (required when backend is gcs)
    pub gcs_bucket: Option<String>,
    /// Path to GCS service account JSON (optional, defaults to ADC)
    pub gcs_credentials_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Deadline for the blob and metadata writes of a single upload
    pub timeout: Duration,
    /// Lifetime of presigned retrieval URLs
    pub link_ttl: Duration,
    /// Expiry applied to uploads that do not request one
    pub default_file_ttl: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
    /// Age after which a record still pending is considered abandoned
    pub pending_grace: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareDelivery {
    /// Redirect to a presigned object store URL
    Redirect,
    /// Stream the bytes through this service
    Stream,
}

#[derive(Debug, Clone)]
pub struct SharingConfig {
    pub delivery: ShareDelivery,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_storage_path: "./uploads".to_string(),
            link_signing_secret: None,
            gcs_bucket: None,
            gcs_credentials_file: None,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            link_ttl: Duration::from_secs(MAX_GCS_LINK_TTL_SECS),
            default_file_ttl: None,
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            pending_grace: Duration::from_secs(900),
        }
    }
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            delivery: ShareDelivery::Redirect,
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string())
            .trim_end_matches('/')
            .to_string();

        let max_upload_size = std::env::var("MAX_UPLOAD_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50 * 1024 * 1024); // 50MB

        let storage_backend = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "gcs" => StorageBackend::Gcs,
            _ => StorageBackend::Local,
        };

        let local_storage_path =
            std::env::var("LOCAL_STORAGE_PATH").unwrap_or_else(|_| "./uploads".to_string());

        let link_signing_secret = std::env::var("LINK_SIGNING_SECRET")
            .ok()
            .filter(|s| !s.is_empty());
        let gcs_bucket = std::env::var("GCS_BUCKET").ok();
        let gcs_credentials_file = std::env::var("GCS_CREDENTIALS_FILE").ok();

        let uploads = UploadConfig {
            timeout: env_secs("UPLOAD_TIMEOUT_SECS").unwrap_or(Duration::from_secs(30)),
            link_ttl: env_secs("LINK_TTL_SECS")
                .unwrap_or(Duration::from_secs(MAX_GCS_LINK_TTL_SECS)),
            default_file_ttl: env_secs("DEFAULT_FILE_TTL_SECS"),
        };

        let sweeper = SweeperConfig {
            interval: env_secs("SWEEP_INTERVAL_SECS").unwrap_or(Duration::from_secs(3600)),
            pending_grace: env_secs("PENDING_GRACE_SECS").unwrap_or(Duration::from_secs(900)),
        };

        let delivery = match std::env::var("SHARE_DELIVERY")
            .unwrap_or_else(|_| "redirect".to_string())
            .to_lowercase()
            .as_str()
        {
            "stream" => ShareDelivery::Stream,
            _ => ShareDelivery::Redirect,
        };

        let cache_ttl = env_secs("CACHE_TTL_SECS").unwrap_or(Duration::from_secs(3600));

        let user_id_header = std::env::var("USER_ID_HEADER")
            .unwrap_or_else(|_| "x-user-id".to_string())
            .to_lowercase();

        let config = Config {
            node: NodeConfig {
                bind_address,
                data_dir,
                public_base_url,
            },
            storage: StorageConfig {
                backend: storage_backend,
                local_storage_path,
                link_signing_secret,
                gcs_bucket,
                gcs_credentials_file,
            },
            uploads,
            sweeper,
            sharing: SharingConfig { delivery },
            max_upload_size,
            cache_ttl,
            user_id_header,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.node.public_base_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "PUBLIC_BASE_URL cannot be empty".to_string(),
            ));
        }

        if self.user_id_header.is_empty() {
            return Err(ConfigError::ValidationError(
                "USER_ID_HEADER cannot be empty".to_string(),
            ));
        }

        for (name, value) in [
            ("UPLOAD_TIMEOUT_SECS", self.uploads.timeout),
            ("LINK_TTL_SECS", self.uploads.link_ttl),
            ("SWEEP_INTERVAL_SECS", self.sweeper.interval),
            ("CACHE_TTL_SECS", self.cache_ttl),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        // Younger pending records may belong to uploads still in flight.
        if self.sweeper.pending_grace <= self.uploads.timeout {
            return Err(ConfigError::ValidationError(
                "PENDING_GRACE_SECS must be greater than UPLOAD_TIMEOUT_SECS".to_string(),
            ));
        }

        if matches!(self.uploads.default_file_ttl, Some(ttl) if ttl.is_zero()) {
            return Err(ConfigError::ValidationError(
                "DEFAULT_FILE_TTL_SECS must be greater than 0".to_string(),
            ));
        }

        if matches!(self.storage.backend, StorageBackend::Gcs) {
            if self.storage.gcs_bucket.is_none() {
                return Err(ConfigError::ValidationError(
                    "GCS_BUCKET is required when STORAGE_BACKEND=gcs".to_string(),
                ));
            }
            if self.uploads.link_ttl.as_secs() > MAX_GCS_LINK_TTL_SECS {
                return Err(ConfigError::ValidationError(format!(
                    "LINK_TTL_SECS cannot exceed {MAX_GCS_LINK_TTL_SECS} with the gcs backend"
                )));
            }
        }

        if self.storage.link_signing_secret.is_none()
            && matches!(self.storage.backend, StorageBackend::Local)
        {
            tracing::warn!(
                "LINK_SIGNING_SECRET is not set. Signed blob links will not survive a restart."
            );
        }

        Ok(())
    }

    /// Public URL at which a share token resolves.
    pub fn share_url(&self, token: &str) -> String {
        format!("{}/api/files/shared/{token}", self.node.public_base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            node: NodeConfig {
                bind_address: "127.0.0.1:0".to_string(),
                data_dir: "./data".to_string(),
                public_base_url: "http://files.test".to_string(),
            },
            storage: StorageConfig::default(),
            uploads: UploadConfig::default(),
            sweeper: SweeperConfig::default(),
            sharing: SharingConfig::default(),
            max_upload_size: 1024,
            cache_ttl: Duration::from_secs(60),
            user_id_header: "x-user-id".to_string(),
        }
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = sample();
        config.uploads.timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_pending_grace_within_upload_timeout() {
        let mut config = sample();
        config.sweeper.pending_grace = Duration::ZERO;
        assert!(config.validate().is_err());

        config.sweeper.pending_grace = config.uploads.timeout;
        assert!(config.validate().is_err());

        config.sweeper.pending_grace = config.uploads.timeout + Duration::from_secs(1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_bucket_for_gcs() {
        let mut config = sample();
        config.storage.backend = StorageBackend::Gcs;
        assert!(config.validate().is_err());

        config.storage.gcs_bucket = Some("bucket".to_string());
        assert!(config.validate().is_ok());

        config.uploads.link_ttl = Duration::from_secs(MAX_GCS_LINK_TTL_SECS + 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_share_url() {
        assert_eq!(
            sample().share_url("abc"),
            "http://files.test/api/files/shared/abc"
        );
    }
}
