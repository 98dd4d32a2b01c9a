// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable session and user records shared by every worker.

pub mod memory;
pub mod sqlite;

use std::fmt;

use async_trait::async_trait;

use crate::credential::epoch_secs;
use crate::error::LaunchResult;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// OAuth progress and token material for one browser session or user.
///
/// `refresh_token` only ever holds vault ciphertext. Empty strings mean
/// "not set" for every token field.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub id: String,
    pub user_id: Option<i64>,
    pub access_token: String,
    /// Epoch seconds; 0 when the provider did not say.
    pub access_token_expires_at: u64,
    pub refresh_token: String,
    /// Provider that issued the tokens; empty until the callback.
    pub provider: String,
    pub backend_api_key: String,
    pub handshake_token: String,
    pub created_at: u64,
}

impl SessionState {
    pub fn new(handshake_token: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            handshake_token: handshake_token.to_owned(),
            created_at: epoch_secs(),
            ..Self::default()
        }
    }
}

// Token fields are redacted so sessions can be logged.
impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("has_access_token", &!self.access_token.is_empty())
            .field("access_token_expires_at", &self.access_token_expires_at)
            .field("has_refresh_token", &!self.refresh_token.is_empty())
            .field("provider", &self.provider)
            .field("has_backend_api_key", &!self.backend_api_key.is_empty())
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub display_name: String,
    pub created_at: u64,
}

/// Persistence for [`SessionState`] and [`UserRecord`].
///
/// Writes are last-writer-wins; callers re-read before acting when that
/// matters.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Insert a fresh pre-login session keyed by `handshake_token`.
    async fn create_session(&self, handshake_token: &str) -> LaunchResult<SessionState>;

    async fn session_by_handshake(&self, token: &str) -> LaunchResult<Option<SessionState>>;

    async fn session_by_user(&self, user_id: i64) -> LaunchResult<Option<SessionState>>;

    /// Overwrite the stored row with `state` (matched by id).
    async fn save_session(&self, state: &SessionState) -> LaunchResult<()>;

    /// Look a user up by email, creating the record on first login.
    async fn find_or_create_user(&self, email: &str, display_name: &str)
        -> LaunchResult<UserRecord>;

    async fn user(&self, user_id: i64) -> LaunchResult<Option<UserRecord>>;

    /// Delete every other session owned by `user_id`, then bind `session_id`
    /// to it, as one atomic step.
    async fn bind_session_to_user(&self, session_id: &str, user_id: i64) -> LaunchResult<()>;

    async fn sessions_for_user(&self, user_id: i64) -> LaunchResult<Vec<SessionState>>;
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
