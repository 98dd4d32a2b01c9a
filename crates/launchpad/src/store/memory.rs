// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{SessionState, StateStore, UserRecord};
use crate::credential::epoch_secs;
use crate::error::{LaunchError, LaunchResult};

/// In-process store for tests and single-worker development.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, SessionState>,
    users: HashMap<i64, UserRecord>,
    next_user_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn create_session(&self, handshake_token: &str) -> LaunchResult<SessionState> {
        let state = SessionState::new(handshake_token);
        self.inner.write().await.sessions.insert(state.id.clone(), state.clone());
        Ok(state)
    }

    async fn session_by_handshake(&self, token: &str) -> LaunchResult<Option<SessionState>> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.values().find(|s| s.handshake_token == token).cloned())
    }

    async fn session_by_user(&self, user_id: i64) -> LaunchResult<Option<SessionState>> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.values().find(|s| s.user_id == Some(user_id)).cloned())
    }

    async fn save_session(&self, state: &SessionState) -> LaunchResult<()> {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(&state.id) {
            Some(slot) => {
                *slot = state.clone();
                Ok(())
            }
            None => Err(LaunchError::Store(format!("session {} not found", state.id))),
        }
    }

    async fn find_or_create_user(
        &self,
        email: &str,
        display_name: &str,
    ) -> LaunchResult<UserRecord> {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.users.values().find(|u| u.email == email) {
            return Ok(user.clone());
        }
        inner.next_user_id += 1;
        let user = UserRecord {
            id: inner.next_user_id,
            email: email.to_owned(),
            display_name: display_name.to_owned(),
            created_at: epoch_secs(),
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user(&self, user_id: i64) -> LaunchResult<Option<UserRecord>> {
        Ok(self.inner.read().await.users.get(&user_id).cloned())
    }

    async fn bind_session_to_user(&self, session_id: &str, user_id: i64) -> LaunchResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.sessions.contains_key(session_id) {
            return Err(LaunchError::Store(format!("session {session_id} not found")));
        }
        inner.sessions.retain(|id, s| id == session_id || s.user_id != Some(user_id));
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.user_id = Some(user_id);
        }
        Ok(())
    }

    async fn sessions_for_user(&self, user_id: i64) -> LaunchResult<Vec<SessionState>> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.values().filter(|s| s.user_id == Some(user_id)).cloned().collect())
    }
}
