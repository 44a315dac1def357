use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use file_share::{
    api,
    cache::{Cache, MemoryCache},
    catalog::Catalog,
    config::{Config, StorageBackend},
    object_store as obj,
    share::ShareResolver,
    storage::{Database, MetadataStore},
    sweeper::{ExpirySweeper, Sweeper},
    upload::UploadCoordinator,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real deployments set the environment directly
    let _ = dotenvy::dotenv();

    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "file-share starting");

    // Load configuration
    let config = Config::load()?;

    // Initialize database
    let db = Database::open(&config.node.data_dir)?;
    info!("Database opened at: {}", config.node.data_dir);
    let db: Arc<dyn MetadataStore> = Arc::new(db);

    // Initialize object store backend
    let (object_store, local_links): (Arc<dyn obj::ObjectStore>, _) = match config.storage.backend
    {
        StorageBackend::Local => {
            let signer = match config.storage.link_signing_secret.as_deref() {
                Some(secret) => obj::LinkSigner::new(secret.as_bytes(), &config.node.public_base_url),
                None => obj::LinkSigner::random(&config.node.public_base_url)?,
            };
            let store = obj::LocalStore::new(&config.storage.local_storage_path, signer.clone())?;
            info!(
                "Using local storage backend at: {}",
                config.storage.local_storage_path
            );
            (Arc::new(store) as Arc<dyn obj::ObjectStore>, Some(signer))
        }
        StorageBackend::Gcs => {
            let bucket = config
                .storage
                .gcs_bucket
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("GCS_BUCKET is required for the gcs backend"))?;
            let store =
                obj::GcsStore::new(bucket, config.storage.gcs_credentials_file.as_deref()).await?;
            info!("Using GCS storage backend, bucket: {}", bucket);
            (Arc::new(store) as Arc<dyn obj::ObjectStore>, None)
        }
    };

    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());

    // Start the expiry sweeper
    let sweeper = ExpirySweeper::start(Sweeper::new(
        Arc::clone(&db),
        Arc::clone(&object_store),
        Arc::clone(&cache),
        config.sweeper.clone(),
    ));

    // Create shared state
    let state = Arc::new(AppState {
        uploads: UploadCoordinator::new(
            Arc::clone(&object_store),
            Arc::clone(&db),
            Arc::clone(&cache),
            config.uploads.clone(),
        ),
        catalog: Catalog::new(
            Arc::clone(&db),
            Arc::clone(&object_store),
            Arc::clone(&cache),
            &config,
        ),
        shares: ShareResolver::new(
            Arc::clone(&db),
            Arc::clone(&object_store),
            Arc::clone(&cache),
            config.sharing.delivery,
            &config.uploads,
        ),
        object_store,
        local_links,
        config: config.clone(),
    });

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    info!("Listening on: {}", config.node.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let a sweep pass in progress finish
    info!("Shutting down background tasks");
    sweeper.shutdown().await;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
