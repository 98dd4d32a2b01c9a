// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binds verified identity claims to local users and the framework session.
//!
//! The framework session is an encrypted private cookie carrying the local
//! user id. A second private cookie remembers the pending handshake token so
//! repeated page loads before login reuse one session record.

use std::sync::Arc;

use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::PrivateCookieJar;

use crate::credential::{generate_handshake_token, IdentityClaims};
use crate::error::LaunchResult;
use crate::store::{SessionState, StateStore, UserRecord};

pub const SESSION_COOKIE: &str = "launchpad_session";
pub const HANDSHAKE_COOKIE: &str = "launchpad_handshake";

pub struct IdentityBinder {
    store: Arc<dyn StateStore>,
    secure_cookies: bool,
}

impl IdentityBinder {
    pub fn new(store: Arc<dyn StateStore>, secure_cookies: bool) -> Self {
        Self { store, secure_cookies }
    }

    fn cookie(&self, name: &'static str, value: String) -> Cookie<'static> {
        Cookie::build((name, value))
            .http_only(true)
            .secure(self.secure_cookies)
            .same_site(SameSite::Lax)
            .path("/")
            .build()
    }

    /// Log `claims` in on this request: find or create the user, retire the
    /// user's older session records, bind `session`, and set the session
    /// cookie. Repeating it for the same user is harmless.
    pub async fn bind_and_login(
        &self,
        claims: &IdentityClaims,
        session: &mut SessionState,
        jar: PrivateCookieJar,
    ) -> LaunchResult<(UserRecord, PrivateCookieJar)> {
        let user = self.store.find_or_create_user(&claims.email, &claims.display_name).await?;
        self.store.bind_session_to_user(&session.id, user.id).await?;
        session.user_id = Some(user.id);

        let jar = jar
            .add(self.cookie(SESSION_COOKIE, user.id.to_string()))
            .remove(Cookie::build(HANDSHAKE_COOKIE).path("/"));
        tracing::info!(user_id = user.id, session = %session.id, "user logged in");
        Ok((user, jar))
    }

    /// User id from the session cookie, if the request is authenticated.
    pub fn authenticated_user_id(jar: &PrivateCookieJar) -> Option<i64> {
        jar.get(SESSION_COOKIE).and_then(|c| c.value().parse().ok())
    }

    /// The logged-in user, if the cookie points at one that still exists.
    pub async fn current_user(&self, jar: &PrivateCookieJar) -> LaunchResult<Option<UserRecord>> {
        match Self::authenticated_user_id(jar) {
            Some(id) => self.store.user(id).await,
            None => Ok(None),
        }
    }

    /// Session record for a not-yet-authenticated browser, created on first
    /// use and remembered in a private cookie afterwards.
    pub async fn pending_session(
        &self,
        jar: PrivateCookieJar,
    ) -> LaunchResult<(SessionState, PrivateCookieJar)> {
        if let Some(token) = jar.get(HANDSHAKE_COOKIE).map(|c| c.value().to_owned()) {
            if let Some(session) = self.store.session_by_handshake(&token).await? {
                if session.user_id.is_none() {
                    return Ok((session, jar));
                }
            }
        }

        let session = self.store.create_session(&generate_handshake_token()).await?;
        let jar = jar.add(self.cookie(HANDSHAKE_COOKIE, session.handshake_token.clone()));
        Ok((session, jar))
    }

    pub fn logout(&self, jar: PrivateCookieJar) -> PrivateCookieJar {
        jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
