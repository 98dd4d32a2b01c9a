// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use anyhow::Context;
use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use crate::backend::client::HttpBackend;
use crate::backend::ExecutionBackend;
use crate::config::{Config, FileConfig};
use crate::credential::broker::TokenBroker;
use crate::credential::identity::IdentityBinder;
use crate::credential::vault::CredentialVault;
use crate::jobs::reconcile::JobReconciler;
use crate::jobs::submit::JobSubmitter;
use crate::jobs::JobSettings;
use crate::store::StateStore;

/// Shared application state passed to all handlers via axum `State` extractor.
///
/// Every field is shared; cloning is cheap and all clones see the same store.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn StateStore>,
    pub broker: Arc<TokenBroker>,
    pub identity: Arc<IdentityBinder>,
    pub submitter: Arc<JobSubmitter>,
    pub reconciler: Arc<JobReconciler>,
    cookie_key: Key,
}

impl AppState {
    /// Wire the services against the HTTP backend named in `config`.
    pub fn new(config: Config, file: FileConfig, store: Arc<dyn StateStore>) -> anyhow::Result<Self> {
        let backend: Arc<dyn ExecutionBackend> =
            Arc::new(HttpBackend::new(&config.backend_url, config.http_timeout()));
        Self::with_backend(config, file, store, backend)
    }

    pub fn with_backend(
        config: Config,
        file: FileConfig,
        store: Arc<dyn StateStore>,
        backend: Arc<dyn ExecutionBackend>,
    ) -> anyhow::Result<Self> {
        let vault = CredentialVault::from_base64(&config.refresh_token_key)
            .context("invalid refresh token key")?;
        let cookie_key = cookie_key(&config.cookie_secret)?;
        if file.providers.is_empty() {
            tracing::warn!("no OAuth providers configured; nobody can log in");
        }

        let settings = JobSettings::from_config(&config, &file);
        let broker = Arc::new(TokenBroker::new(
            file.providers,
            config.base_url.clone(),
            vault,
            store.clone(),
            config.backend_url.clone(),
            config.api_key_endpoint.clone(),
            config.refresh_margin(),
            config.http_timeout(),
        ));
        let secure_cookies = config.base_url.starts_with("https://");

        Ok(Self {
            identity: Arc::new(IdentityBinder::new(store.clone(), secure_cookies)),
            submitter: Arc::new(JobSubmitter::new(broker.clone(), backend.clone(), settings.clone())),
            reconciler: Arc::new(JobReconciler::new(broker.clone(), backend, settings)),
            broker,
            store,
            config: Arc::new(config),
            cookie_key,
        })
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

/// Expand the configured secret to the 64 bytes the cookie key needs.
fn cookie_key(secret: &str) -> anyhow::Result<Key> {
    let digest = ring::digest::digest(&ring::digest::SHA512, secret.as_bytes());
    Key::try_from(digest.as_ref()).map_err(|e| anyhow::anyhow!("invalid cookie secret: {e}"))
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
