// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token broker: drives the authorization-code handshake, keeps access
//! tokens fresh on demand, and derives the backend API key.
//!
//! The broker holds no per-user state. Every operation works on a
//! [`SessionState`] the caller loaded from the store and writes the result
//! back before returning, so any worker can serve the next request.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::credential::oauth::{self, CallbackParams, TokenResponse};
use crate::credential::vault::CredentialVault;
use crate::credential::{epoch_secs, IdentityClaims, ProviderConfig};
use crate::error::{LaunchError, LaunchResult};
use crate::store::{SessionState, StateStore};

/// Prefix of the backend message for an access token it cannot map to a user.
const UNKNOWN_USER_PREFIX: &str = "Cannot locate user by access token.";

/// Where a session stands in the OAuth lifecycle, derived from stored fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPhase {
    Unauthenticated,
    AwaitingCallback,
    /// Access token usable without a network call.
    Valid,
    /// Access token stale; the next use refreshes it.
    Expired,
    /// Nothing left to refresh with; the user must log in again.
    Revoked,
}

/// Backend response for the API-key endpoint.
#[derive(Debug, Deserialize)]
struct ApiKeyResponse {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    err_msg: Option<String>,
}

pub struct TokenBroker {
    providers: BTreeMap<String, ProviderConfig>,
    base_url: String,
    vault: CredentialVault,
    store: Arc<dyn StateStore>,
    http: reqwest::Client,
    backend_url: String,
    api_key_endpoint: String,
    refresh_margin: Duration,
}

impl TokenBroker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        providers: BTreeMap<String, ProviderConfig>,
        base_url: String,
        vault: CredentialVault,
        store: Arc<dyn StateStore>,
        backend_url: String,
        api_key_endpoint: String,
        refresh_margin: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            providers,
            base_url,
            vault,
            store,
            http: reqwest::Client::builder().timeout(timeout).build().unwrap_or_default(),
            backend_url: backend_url.trim_end_matches('/').to_owned(),
            api_key_endpoint,
            refresh_margin,
        }
    }

    pub fn providers(&self) -> &BTreeMap<String, ProviderConfig> {
        &self.providers
    }

    fn provider(&self, id: &str) -> LaunchResult<&ProviderConfig> {
        self.providers.get(id).ok_or_else(|| LaunchError::UnknownProvider(id.to_owned()))
    }

    fn token_is_usable(&self, session: &SessionState) -> bool {
        !session.access_token.is_empty()
            && session.access_token_expires_at > epoch_secs() + self.refresh_margin.as_secs()
    }

    pub fn phase(&self, session: &SessionState) -> TokenPhase {
        if session.access_token.is_empty() {
            if session.handshake_token.is_empty() {
                TokenPhase::Unauthenticated
            } else {
                TokenPhase::AwaitingCallback
            }
        } else if self.token_is_usable(session) {
            TokenPhase::Valid
        } else if session.refresh_token.is_empty() || session.provider.is_empty() {
            TokenPhase::Revoked
        } else {
            TokenPhase::Expired
        }
    }

    /// Consent URL for `provider_id`, correlated by the session's handshake token.
    pub fn authorization_url(
        &self,
        provider_id: &str,
        session: &SessionState,
    ) -> LaunchResult<String> {
        let provider = self.provider(provider_id)?;
        Ok(oauth::build_auth_url(
            provider,
            &provider.redirect_uri(&self.base_url),
            &session.handshake_token,
        ))
    }

    /// Finish a login at the provider's redirect path.
    ///
    /// The session is located by the callback's `state`, records the provider
    /// before the exchange, then stores the new tokens. The handshake token is
    /// consumed on success and a session already bound to a user is never
    /// matched. Returns the identity claims read (unverified) from the
    /// identity token.
    pub async fn complete_handshake(
        &self,
        provider_id: &str,
        params: &CallbackParams,
    ) -> LaunchResult<(SessionState, IdentityClaims)> {
        let provider = self.provider(provider_id)?;

        if let Some(ref error) = params.error {
            let detail = params.error_description.as_deref().unwrap_or_default();
            tracing::warn!(provider = provider_id, error = %error, "provider refused login");
            return Err(LaunchError::OAuth(format!("{error} {detail}").trim().to_owned()));
        }

        let state = params.state.as_deref().filter(|s| !s.is_empty());
        let mut session = match state {
            Some(state) => self.store.session_by_handshake(state).await?,
            None => None,
        }
        .filter(|session| session.user_id.is_none())
        .ok_or(LaunchError::HandshakeMismatch)?;

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| LaunchError::OAuth("callback carried no authorization code".into()))?;

        session.provider = provider_id.to_owned();
        self.store.save_session(&session).await?;

        let redirect_uri = provider.redirect_uri(&self.base_url);
        let token = oauth::exchange_code(&self.http, provider, code, &redirect_uri)
            .await
            .map_err(|e| LaunchError::OAuth(format!("{e:#}")))?;

        let id_token = token
            .id_token
            .clone()
            .ok_or_else(|| LaunchError::OAuth("token response carried no id_token".into()))?;
        let claims = oauth::decode_id_token_claims(&id_token, &provider.name_claim)
            .map_err(|e| LaunchError::OAuth(format!("{e:#}")))?;

        self.apply_token(&mut session, &token)?;
        session.handshake_token.clear();
        self.store.save_session(&session).await?;

        tracing::info!(provider = provider_id, session = %session.id, "login handshake completed");
        Ok((session, claims))
    }

    /// Copy a token response into `session`, encrypting the refresh token.
    /// A response without a refresh token keeps the stored one.
    fn apply_token(&self, session: &mut SessionState, token: &TokenResponse) -> LaunchResult<()> {
        session.access_token = token.access_token.clone();
        session.access_token_expires_at = match token.expires_in {
            Some(secs) => epoch_secs() + secs,
            None => 0,
        };
        if let Some(ref refresh) = token.refresh_token {
            session.refresh_token = self.vault.encrypt(refresh)?;
        }
        Ok(())
    }

    /// A usable access token for `session`, refreshing it when stale.
    pub async fn access_token(&self, session: &mut SessionState) -> LaunchResult<String> {
        if self.token_is_usable(session) {
            return Ok(session.access_token.clone());
        }

        let reauth = |reason: &str| LaunchError::ReauthenticationRequired {
            provider: session.provider.clone(),
            reason: reason.to_owned(),
        };
        if session.provider.is_empty() {
            return Err(reauth("no provider recorded for this session"));
        }
        if session.refresh_token.is_empty() {
            return Err(reauth("no refresh token stored"));
        }
        let provider = self.providers.get(&session.provider).ok_or_else(|| {
            reauth("provider is no longer configured")
        })?;

        let refresh_token = self.vault.decrypt(&session.refresh_token)?;
        let token = match oauth::do_refresh(&self.http, provider, &refresh_token).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(provider = %session.provider, err = %e, "token refresh rejected");
                return Err(reauth(&format!("{e:#}")));
            }
        };

        let mut updated = session.clone();
        self.apply_token(&mut updated, &token)?;
        self.store.save_session(&updated).await?;
        *session = updated;

        tracing::debug!(provider = %session.provider, session = %session.id, "access token refreshed");
        Ok(session.access_token.clone())
    }

    /// The backend API key for `session`, derived from the access token on
    /// first use and cached afterwards.
    pub async fn backend_api_key(&self, session: &mut SessionState) -> LaunchResult<String> {
        if !session.backend_api_key.is_empty() {
            return Ok(session.backend_api_key.clone());
        }

        let access_token = self.access_token(session).await?;
        let url = format!("{}{}", self.backend_url, self.api_key_endpoint);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&access_token)
            .send()
            .await
            .map_err(|e| LaunchError::BackendUnreachable { message: e.to_string() })?;

        let unavailable = |message: String| LaunchError::BackendKeyUnavailable {
            provider: session.provider.clone(),
            message,
        };
        let status = resp.status();
        let body: ApiKeyResponse = resp
            .json()
            .await
            .map_err(|e| unavailable(format!("unexpected API key response ({status}): {e}")))?;

        if let Some(msg) = body.err_msg {
            if msg.starts_with(UNKNOWN_USER_PREFIX) {
                return Err(unavailable(format!(
                    "Please login to {} once with {} before using this dashboard.",
                    self.backend_url,
                    session.provider.to_uppercase()
                )));
            }
            return Err(unavailable(msg));
        }
        let key = body
            .api_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| unavailable(format!("backend returned no API key ({status})")))?;

        session.backend_api_key = key;
        self.store.save_session(session).await?;
        tracing::info!(session = %session.id, "backend API key derived");
        Ok(session.backend_api_key.clone())
    }

    /// Forget the cached backend key so the next call derives a fresh one.
    pub async fn invalidate_backend_api_key(&self, session: &mut SessionState) -> LaunchResult<()> {
        if session.backend_api_key.is_empty() {
            return Ok(());
        }
        session.backend_api_key.clear();
        self.store.save_session(session).await?;
        tracing::info!(session = %session.id, "backend API key invalidated");
        Ok(())
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
