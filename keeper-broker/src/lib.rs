pub mod auth;
pub mod config;
pub mod deadline;
pub mod error;
pub mod http;
pub mod models;
pub mod state;
pub mod telemetry;

use std::sync::Arc;

use anyhow::Context;
use keeper_core::{
    BlobStore, CredentialStore, CryptoEngine, FileBlobStore, MemoryBlobStore, MemoryStore,
    SecretStore, VaultLimits, VaultService,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::auth::{AuthGateway, PasswordService, TokenService};
use crate::config::{BlobBackend, KeeperConfig, StorageBackend};

pub use state::AppState;
pub use telemetry::CorrelationId;

pub async fn run(config: KeeperConfig) -> anyhow::Result<()> {
    let state = build_state(&config).await?;

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| {
            format!(
                "failed to bind http listener on {addr}",
                addr = config.server.bind
            )
        })?;

    let http_addr = listener.local_addr()?;
    info!(%http_addr, "http server listening");

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!("http server stopped");
    Ok(())
}

/// Wires stores, crypto and auth services from a validated configuration.
pub async fn build_state(config: &KeeperConfig) -> anyhow::Result<AppState> {
    let (credentials, secrets) = build_stores(config).await?;

    let crypto = CryptoEngine::from_hex(&config.security.data_encryption_key)
        .context("invalid data encryption key")?;
    let mut vault = VaultService::new(secrets, Arc::new(crypto)).with_limits(VaultLimits {
        max_payload_bytes: config.security.max_payload_bytes,
    });
    if let Some(blobs) = build_blob_store(config) {
        vault = vault.with_blob_store(blobs);
    }

    let tokens = TokenService::new(&config.security).context("invalid token configuration")?;
    let passwords =
        PasswordService::new(&config.security.password).context("invalid password hashing")?;
    let auth = AuthGateway::new(credentials, passwords, tokens.clone());

    Ok(AppState::new(
        vault,
        auth,
        tokens,
        (&config.server).into(),
    ))
}

async fn build_stores(
    config: &KeeperConfig,
) -> anyhow::Result<(Arc<dyn CredentialStore>, Arc<dyn SecretStore>)> {
    match config.storage.backend {
        StorageBackend::Memory => {
            warn!("using in-memory storage; data is lost on restart");
            let store = Arc::new(MemoryStore::new());
            let credentials: Arc<dyn CredentialStore> = store.clone();
            let secrets: Arc<dyn SecretStore> = store;
            Ok((credentials, secrets))
        }
        #[cfg(feature = "postgres")]
        StorageBackend::Postgres => {
            let url = config
                .storage
                .database_url
                .as_deref()
                .context("storage.database_url is required for the postgres backend")?;
            let store = Arc::new(
                keeper_core::PgStore::connect(url, config.storage.max_connections)
                    .await
                    .context("failed to connect to postgres")?,
            );
            info!("connected to postgres");
            let credentials: Arc<dyn CredentialStore> = store.clone();
            let secrets: Arc<dyn SecretStore> = store;
            Ok((credentials, secrets))
        }
        #[cfg(not(feature = "postgres"))]
        StorageBackend::Postgres => {
            anyhow::bail!("keeper-broker was built without the postgres feature")
        }
    }
}

fn build_blob_store(config: &KeeperConfig) -> Option<Arc<dyn BlobStore>> {
    match config.blob.backend {
        BlobBackend::None => None,
        BlobBackend::Memory => Some(Arc::new(MemoryBlobStore::new())),
        BlobBackend::File => {
            info!(root = %config.blob.root, "file blob store enabled");
            Some(Arc::new(FileBlobStore::new(&config.blob.root)))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(?err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => warn!(?err, "failed to install sigterm handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
