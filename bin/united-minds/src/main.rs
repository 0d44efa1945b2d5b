//! # United Minds Binary
//!
//! The entry point that assembles the forum API from configuration and the
//! storage/auth plugins selected at compile time.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;
use um_api::AppState;
use um_config::{AppConfig, LogConfig, LogFormat};

#[cfg(feature = "db-sqlite")]
use um_db_sqlite::SqliteRepo;

#[cfg(feature = "auth-jwt")]
use um_auth_jwt::JwtAuthProvider;

#[cfg(not(feature = "db-sqlite"))]
compile_error!("united-minds needs a storage backend: enable the `db-sqlite` feature");

#[cfg(not(feature = "auth-jwt"))]
compile_error!("united-minds needs an auth provider: enable the `auth-jwt` feature");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config.log);

    // 1. Storage: one repo backs every storage port.
    let repo = SqliteRepo::new(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("failed to open database {}", config.database.url))?;

    // 2. Identity
    let auth = JwtAuthProvider::new(&config.auth.jwt_secret, config.auth.token_ttl_hours);

    let state = Arc::new(AppState {
        users: Box::new(repo.clone()),
        threads: Box::new(repo.clone()),
        votes: Box::new(repo.clone()),
        replies: Box::new(repo.clone()),
        reposts: Box::new(repo.clone()),
        follows: Box::new(repo),
        auth: Box::new(auth),
        pagination: config.pagination,
    });

    let app = um_api::router(state, &config.server.cors_origins);

    let address = config.server.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(%address, "United Minds API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server shut down");
    Ok(())
}

/// `RUST_LOG` wins over the configured filter when set.
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
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
}
