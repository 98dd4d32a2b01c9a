// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::{Arc, Once};

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{self, Config, FileConfig};
use crate::store::SqliteStore;
use crate::transport::{build_router, AppState};

static CRYPTO_INIT: Once = Once::new();

/// Install the rustls crypto provider (needed for reqwest even on plain HTTP).
pub fn ensure_crypto_provider() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Initialize tracing from config. Safe to call more than once.
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Load the provider file, open the store, and serve until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    ensure_crypto_provider();

    let file = match config.providers {
        Some(ref path) => config::load_file_config(path)?,
        None => FileConfig::default(),
    };
    let store = SqliteStore::open(&config.database).await?;
    let addr = config.bind_addr();
    info!(
        database = %config.database.display(),
        backend = %config.backend_url,
        providers = file.providers.len(),
        "starting launchpad"
    );

    let state = AppState::new(config, file, Arc::new(store))?;
    let router = build_router(state);

    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP listening on {addr}");
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(err = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
