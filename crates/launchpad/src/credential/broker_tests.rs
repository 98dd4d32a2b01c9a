// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::assert_err_contains;
use crate::store::MemoryStore;
use crate::test_support::{MockGalaxy, MockIdp};

struct Fixture {
    broker: TokenBroker,
    vault: CredentialVault,
    store: Arc<dyn StateStore>,
    idp: MockIdp,
    galaxy: MockGalaxy,
}

async fn fixture() -> anyhow::Result<Fixture> {
    crate::ensure_crypto_provider();
    let idp = MockIdp::new();
    let galaxy = MockGalaxy::new();
    let provider = idp.spawn("ucams/redirect").await?;
    let backend_url = galaxy.spawn().await?;
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let broker = TokenBroker::new(
        BTreeMap::from([("ucams".to_owned(), provider)]),
        "http://dashboard.test".into(),
        CredentialVault::new(&[7; 32])?,
        store.clone(),
        backend_url,
        "/api/users/current/api_key".into(),
        Duration::from_secs(60),
        Duration::from_secs(2),
    );
    Ok(Fixture { broker, vault: CredentialVault::new(&[7; 32])?, store, idp, galaxy })
}

impl Fixture {
    /// Stored session for `ucams` with the given access-token expiry.
    async fn session(&self, expires_at: u64) -> anyhow::Result<SessionState> {
        let mut session = self.store.create_session("hs-1").await?;
        session.provider = "ucams".into();
        session.access_token = "access-seed".into();
        session.access_token_expires_at = expires_at;
        session.refresh_token = self.vault.encrypt("refresh-seed")?;
        self.store.save_session(&session).await?;
        Ok(session)
    }

    async fn stored(&self) -> anyhow::Result<SessionState> {
        self.store
            .session_by_handshake("hs-1")
            .await?
            .ok_or_else(|| anyhow::anyhow!("session vanished"))
    }
}

fn callback(state: &str, code: &str) -> CallbackParams {
    CallbackParams {
        code: Some(code.into()),
        state: Some(state.into()),
        error: None,
        error_description: None,
    }
}

#[tokio::test]
async fn authorization_url_carries_handshake_token() -> anyhow::Result<()> {
    let f = fixture().await?;
    let session = f.store.create_session("hs-abc").await?;
    let url = f.broker.authorization_url("ucams", &session)?;
    assert!(url.contains("state=hs-abc"));
    assert!(url.contains("client_id=dashboard"));
    assert!(url.contains("redirect_uri=http%3A%2F%2Fdashboard.test%2Fucams%2Fredirect"));
    assert_err_contains!(f.broker.authorization_url("github", &session), "github");
    Ok(())
}

#[tokio::test]
async fn handshake_stores_encrypted_tokens() -> anyhow::Result<()> {
    let f = fixture().await?;
    f.store.create_session("hs-1").await?;

    let (session, claims) = f.broker.complete_handshake("ucams", &callback("hs-1", "code-1")).await?;
    assert_eq!(claims.email, "ada@example.org");
    assert_eq!(claims.display_name, "Ada");
    assert_eq!(session.provider, "ucams");
    assert_eq!(session.access_token, "access-1");
    assert_ne!(session.refresh_token, "refresh-1");
    assert_eq!(f.vault.decrypt(&session.refresh_token)?, "refresh-1");
    assert!(session.access_token_expires_at > epoch_secs() + 3000);
    assert!(session.handshake_token.is_empty());
    assert!(f.store.session_by_handshake("hs-1").await?.is_none());

    let user = f.store.find_or_create_user("ada@example.org", "Ada").await?;
    f.store.bind_session_to_user(&session.id, user.id).await?;
    let stored = f.store.session_by_user(user.id).await?;
    assert_eq!(stored, Some(SessionState { user_id: Some(user.id), ..session }));

    let idp = f.idp.state.lock().await;
    assert_eq!(idp.exchange_calls, 1);
    assert!(idp.last_authorization.as_deref().is_some_and(|a| a.starts_with("Basic ")));
    assert_eq!(idp.last_form.get("code").map(String::as_str), Some("code-1"));
    Ok(())
}

#[tokio::test]
async fn handshake_with_unknown_state_is_rejected() -> anyhow::Result<()> {
    let f = fixture().await?;
    f.store.create_session("hs-1").await?;
    let err = f.broker.complete_handshake("ucams", &callback("hs-other", "code-1")).await;
    assert!(matches!(err, Err(LaunchError::HandshakeMismatch)));
    assert_eq!(f.idp.state.lock().await.exchange_calls, 0);
    Ok(())
}

#[tokio::test]
async fn used_state_cannot_complete_a_second_handshake() -> anyhow::Result<()> {
    let f = fixture().await?;
    f.store.create_session("hs-1").await?;
    f.broker.complete_handshake("ucams", &callback("hs-1", "code-1")).await?;

    let err = f.broker.complete_handshake("ucams", &callback("hs-1", "code-2")).await;
    assert!(matches!(err, Err(LaunchError::HandshakeMismatch)));
    assert_eq!(f.idp.state.lock().await.exchange_calls, 1);
    Ok(())
}

#[tokio::test]
async fn bound_session_is_not_matched_by_state() -> anyhow::Result<()> {
    let f = fixture().await?;
    let session = f.store.create_session("hs-1").await?;
    let user = f.store.find_or_create_user("ada@example.org", "Ada").await?;
    f.store.bind_session_to_user(&session.id, user.id).await?;

    let err = f.broker.complete_handshake("ucams", &callback("hs-1", "code-1")).await;
    assert!(matches!(err, Err(LaunchError::HandshakeMismatch)));
    assert_eq!(f.idp.state.lock().await.exchange_calls, 0);
    Ok(())
}

#[tokio::test]
async fn handshake_reports_provider_error() -> anyhow::Result<()> {
    let f = fixture().await?;
    f.store.create_session("hs-1").await?;
    let params = CallbackParams {
        code: None,
        state: Some("hs-1".into()),
        error: Some("access_denied".into()),
        error_description: Some("user cancelled".into()),
    };
    assert_err_contains!(f.broker.complete_handshake("ucams", &params).await, "access_denied");
    Ok(())
}

#[tokio::test]
async fn rejected_code_leaves_tokens_empty() -> anyhow::Result<()> {
    let f = fixture().await?;
    f.store.create_session("hs-1").await?;
    let err = f.broker.complete_handshake("ucams", &callback("hs-1", "bad-code")).await;
    assert!(matches!(err, Err(LaunchError::OAuth(_))));
    let stored = f.stored().await?;
    assert!(stored.access_token.is_empty());
    assert_eq!(stored.provider, "ucams");
    Ok(())
}

#[tokio::test]
async fn fresh_token_needs_no_refresh() -> anyhow::Result<()> {
    let f = fixture().await?;
    let mut session = f.session(epoch_secs() + 3600).await?;
    assert_eq!(f.broker.phase(&session), TokenPhase::Valid);
    assert_eq!(f.broker.access_token(&mut session).await?, "access-seed");
    assert_eq!(f.idp.state.lock().await.refresh_calls, 0);
    Ok(())
}

#[tokio::test]
async fn token_inside_refresh_margin_is_refreshed() -> anyhow::Result<()> {
    let f = fixture().await?;
    let mut session = f.session(epoch_secs() + 30).await?;
    assert_eq!(f.broker.phase(&session), TokenPhase::Expired);
    assert_eq!(f.broker.access_token(&mut session).await?, "access-1");
    assert_eq!(f.idp.state.lock().await.refresh_calls, 1);
    Ok(())
}

#[tokio::test]
async fn refresh_rotates_and_persists() -> anyhow::Result<()> {
    let f = fixture().await?;
    let mut session = f.session(0).await?;

    assert_eq!(f.broker.access_token(&mut session).await?, "access-1");
    assert_eq!(f.vault.decrypt(&session.refresh_token)?, "refresh-1");
    assert_eq!(f.stored().await?, session);

    let idp = f.idp.state.lock().await;
    assert_eq!(idp.refresh_calls, 1);
    assert_eq!(idp.last_form.get("refresh_token").map(String::as_str), Some("refresh-seed"));
    Ok(())
}

#[tokio::test]
async fn refresh_without_rotation_keeps_refresh_token() -> anyhow::Result<()> {
    let f = fixture().await?;
    f.idp.state.lock().await.rotate_refresh = false;
    let mut session = f.session(0).await?;
    let before = session.refresh_token.clone();

    f.broker.access_token(&mut session).await?;
    assert_eq!(session.refresh_token, before);
    assert_eq!(f.vault.decrypt(&session.refresh_token)?, "refresh-seed");
    Ok(())
}

#[tokio::test]
async fn missing_expiry_forces_refresh_next_time() -> anyhow::Result<()> {
    let f = fixture().await?;
    f.idp.state.lock().await.expires_in = None;
    let mut session = f.session(0).await?;

    f.broker.access_token(&mut session).await?;
    assert_eq!(session.access_token_expires_at, 0);
    f.broker.access_token(&mut session).await?;
    assert_eq!(f.idp.state.lock().await.refresh_calls, 2);
    Ok(())
}

#[tokio::test]
async fn rejected_refresh_requires_login_and_keeps_fields() -> anyhow::Result<()> {
    let f = fixture().await?;
    f.idp.state.lock().await.reject_refresh = true;
    let mut session = f.session(0).await?;
    let before = session.clone();

    let err = f.broker.access_token(&mut session).await;
    assert!(
        matches!(err, Err(LaunchError::ReauthenticationRequired { ref provider, .. }) if provider == "ucams")
    );
    assert_eq!(session, before);
    assert_eq!(f.stored().await?, before);
    Ok(())
}

#[tokio::test]
async fn missing_refresh_token_requires_login() -> anyhow::Result<()> {
    let f = fixture().await?;
    let mut session = f.session(0).await?;
    session.refresh_token.clear();
    assert_eq!(f.broker.phase(&session), TokenPhase::Revoked);

    let err = f.broker.access_token(&mut session).await;
    assert!(matches!(err, Err(LaunchError::ReauthenticationRequired { .. })));
    assert_eq!(f.idp.state.lock().await.refresh_calls, 0);
    Ok(())
}

#[tokio::test]
async fn corrupt_refresh_token_is_reported() -> anyhow::Result<()> {
    let f = fixture().await?;
    let mut session = f.session(0).await?;
    session.refresh_token = "not-a-ciphertext".into();
    let err = f.broker.access_token(&mut session).await;
    assert!(matches!(err, Err(LaunchError::CredentialCorrupt)));
    Ok(())
}

#[tokio::test]
async fn api_key_is_derived_once_and_cached() -> anyhow::Result<()> {
    let f = fixture().await?;
    let mut session = f.session(epoch_secs() + 3600).await?;

    assert_eq!(f.broker.backend_api_key(&mut session).await?, "galaxy-key");
    assert_eq!(f.broker.backend_api_key(&mut session).await?, "galaxy-key");
    assert_eq!(f.stored().await?.backend_api_key, "galaxy-key");

    let galaxy = f.galaxy.state.lock().await;
    assert_eq!(galaxy.api_key_requests, 1);
    assert_eq!(galaxy.last_bearer.as_deref(), Some("access-seed"));
    Ok(())
}

#[tokio::test]
async fn unknown_backend_user_gets_login_hint() -> anyhow::Result<()> {
    let f = fixture().await?;
    f.galaxy.state.lock().await.api_key_error =
        Some("Cannot locate user by access token. Unknown subject".into());
    let mut session = f.session(epoch_secs() + 3600).await?;

    let err = f.broker.backend_api_key(&mut session).await;
    assert_err_contains!(err, "once with UCAMS before using this dashboard");
    assert!(session.backend_api_key.is_empty());
    Ok(())
}

#[tokio::test]
async fn other_backend_key_errors_pass_through() -> anyhow::Result<()> {
    let f = fixture().await?;
    f.galaxy.state.lock().await.api_key_error = Some("Account is deactivated".into());
    let mut session = f.session(epoch_secs() + 3600).await?;

    let err = f.broker.backend_api_key(&mut session).await;
    assert!(matches!(
        err,
        Err(LaunchError::BackendKeyUnavailable { ref message, .. }) if message == "Account is deactivated"
    ));
    Ok(())
}

#[tokio::test]
async fn invalidated_key_is_derived_again() -> anyhow::Result<()> {
    let f = fixture().await?;
    let mut session = f.session(epoch_secs() + 3600).await?;
    f.broker.backend_api_key(&mut session).await?;

    f.broker.invalidate_backend_api_key(&mut session).await?;
    assert!(f.stored().await?.backend_api_key.is_empty());

    f.broker.backend_api_key(&mut session).await?;
    assert_eq!(f.galaxy.state.lock().await.api_key_requests, 2);
    Ok(())
}

#[tokio::test]
async fn phase_before_login() -> anyhow::Result<()> {
    let f = fixture().await?;
    assert_eq!(f.broker.phase(&SessionState::default()), TokenPhase::Unauthenticated);
    assert_eq!(f.broker.phase(&SessionState::new("hs")), TokenPhase::AwaitingCallback);
    Ok(())
}
