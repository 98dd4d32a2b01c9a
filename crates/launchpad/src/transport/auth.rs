// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::cookie::Key;
use axum_extra::extract::PrivateCookieJar;

use crate::credential::identity::IdentityBinder;
use crate::error::LaunchError;
use crate::store::SessionState;
use crate::transport::state::AppState;

/// Stored session of the user logged in on this request.
///
/// Rejects with `401` when the framework cookie is missing, tampered with,
/// or points at a user whose session was retired by a newer login.
#[derive(Debug, Clone)]
pub struct UserSession(pub SessionState);

impl FromRequestParts<AppState> for UserSession {
    type Rejection = LaunchError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar: PrivateCookieJar<Key> = PrivateCookieJar::from_request_parts(parts, state)
            .await
            .map_err(|_| LaunchError::NotAuthenticated)?;
        let user_id =
            IdentityBinder::authenticated_user_id(&jar).ok_or(LaunchError::NotAuthenticated)?;

        state.store.session_by_user(user_id).await?.map(Self).ok_or(LaunchError::NotAuthenticated)
    }
}
