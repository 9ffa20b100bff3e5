#![forbid(unsafe_code)]

//! **fluxa-service** – Fluxa's HTTP front door, processor poll loop, and
//! read path, wired together into one binary (§10.1).
//!
//! Shaped after `toka-orchestration-service::main`: `dotenv` +
//! `clap::Parser` CLI, `tracing_subscriber` initialization, an
//! `axum::Router` served behind `tokio::net::TcpListener`, and a
//! `tokio::select!` over the server future, a graceful-shutdown signal, and
//! (here, in place of the orchestration-session future) the processor's
//! poll loop.

mod config;
mod http;
mod poll;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fluxa_ledger::Ledger;
use fluxa_storage::{
    BlobStore, FilesystemBlobStore, MemoryNotificationBus, MemoryQueue, MemoryStore,
    NotificationBus, PostgresStore, QueueTransport, RelationalStore, TimeoutBlobStore,
    TimeoutLedger, TimeoutRelationalStore,
};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{AppConfig, Cli, StorageBackend};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::load(cli).context("failed to load fluxa-service configuration")?;

    init_logging(&config.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "starting fluxa-service");

    let state = build_state(&config).await?;

    let app = http::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "HTTP server listening");

    let server = axum::serve(listener, app);

    let (poll_shutdown_tx, poll_shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let poll_handle = tokio::spawn(poll::run(state, async {
        let _ = poll_shutdown_rx.await;
    }));

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server exited with an error");
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    let _ = poll_shutdown_tx.send(());
    let _ = poll_handle.await;

    info!("fluxa-service stopped");
    Ok(())
}

fn init_logging(log_level: &str) {
    let filter = format!(
        "fluxa_service={level},fluxa_ingest={level},fluxa_processor={level},fluxa_storage={level},fluxa_ledger={level}",
        level = log_level
    );

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn build_state(config: &AppConfig) -> Result<AppState> {
    let blob_store: Arc<dyn BlobStore> = Arc::new(TimeoutBlobStore::new(
        FilesystemBlobStore::new(config.blob_root.clone()),
        config.blob_timeout,
    ));
    let queue: Arc<dyn QueueTransport> = Arc::new(MemoryQueue::new(config.max_receive_count));
    let notifier: Arc<dyn NotificationBus> = Arc::new(MemoryNotificationBus::default());

    let (ledger, relational): (Arc<dyn Ledger>, Arc<dyn RelationalStore>) = match config.storage {
        StorageBackend::Memory => {
            let store = MemoryStore::new(chrono::Duration::from_std(config.liveness_window)?);
            let ledger: Arc<dyn Ledger> =
                Arc::new(TimeoutLedger::new(store.clone(), config.db_timeout));
            let relational: Arc<dyn RelationalStore> =
                Arc::new(TimeoutRelationalStore::new(store, config.db_timeout));
            (ledger, relational)
        }
        StorageBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .context("missing database_url for postgres backend")?;
            let store = PostgresStore::connect(database_url)
                .await
                .context("failed to connect to Postgres")?
                .with_liveness_window(chrono::Duration::from_std(config.liveness_window)?);
            let ledger: Arc<dyn Ledger> =
                Arc::new(TimeoutLedger::new(store.clone(), config.db_timeout));
            let relational: Arc<dyn RelationalStore> =
                Arc::new(TimeoutRelationalStore::new(store, config.db_timeout));
            (ledger, relational)
        }
    };

    Ok(AppState {
        ledger,
        relational,
        blob_store,
        queue,
        notifier,
        batch_size: config.batch_size,
        poll_interval: config.poll_interval,
        max_inline_bytes: config.max_inline_bytes,
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
