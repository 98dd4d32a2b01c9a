// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed [`StateStore`]. One database file is shared by every worker
//! on a host; WAL mode plus a busy timeout keeps concurrent writers apart.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use super::{SessionState, StateStore, UserRecord};
use crate::credential::epoch_secs;
use crate::error::{LaunchError, LaunchResult};

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 5000;

    CREATE TABLE IF NOT EXISTS users (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        email        TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL DEFAULT '',
        created_at   INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS sessions (
        id                      TEXT PRIMARY KEY,
        user_id                 INTEGER UNIQUE REFERENCES users(id) ON DELETE CASCADE,
        access_token            TEXT NOT NULL DEFAULT '',
        access_token_expires_at INTEGER NOT NULL DEFAULT 0,
        refresh_token           TEXT NOT NULL DEFAULT '',
        provider                TEXT NOT NULL DEFAULT '',
        backend_api_key         TEXT NOT NULL DEFAULT '',
        handshake_token         TEXT NOT NULL DEFAULT '',
        created_at              INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS sessions_handshake ON sessions(handshake_token);
";

const SESSION_COLUMNS: &str = "id, user_id, access_token, access_token_expires_at, \
     refresh_token, provider, backend_api_key, handshake_token, created_at";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`. `:memory:` opens a
    /// private in-memory database.
    pub async fn open(path: &Path) -> LaunchResult<Self> {
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory().await?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| LaunchError::Store(format!("create {}: {e}", parent.display())))?;
            }
            Connection::open(path).await?
        };

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        tracing::info!(path = %path.display(), "state store ready");
        Ok(Self { conn })
    }
}

fn to_sql_secs(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

fn from_sql_secs(secs: i64) -> u64 {
    u64::try_from(secs).unwrap_or(0)
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionState> {
    Ok(SessionState {
        id: row.get(0)?,
        user_id: row.get(1)?,
        access_token: row.get(2)?,
        access_token_expires_at: from_sql_secs(row.get(3)?),
        refresh_token: row.get(4)?,
        provider: row.get(5)?,
        backend_api_key: row.get(6)?,
        handshake_token: row.get(7)?,
        created_at: from_sql_secs(row.get(8)?),
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        created_at: from_sql_secs(row.get(3)?),
    })
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn create_session(&self, handshake_token: &str) -> LaunchResult<SessionState> {
        let state = SessionState::new(handshake_token);
        let row = state.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (id, handshake_token, created_at) VALUES (?1, ?2, ?3)",
                    params![row.id, row.handshake_token, to_sql_secs(row.created_at)],
                )?;
                Ok(())
            })
            .await?;
        Ok(state)
    }

    async fn session_by_handshake(&self, token: &str) -> LaunchResult<Option<SessionState>> {
        let token = token.to_owned();
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE handshake_token = ?1");
        let found = self
            .conn
            .call(move |conn| Ok(conn.query_row(&sql, [token], session_from_row).optional()?))
            .await?;
        Ok(found)
    }

    async fn session_by_user(&self, user_id: i64) -> LaunchResult<Option<SessionState>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = ?1");
        let found = self
            .conn
            .call(move |conn| Ok(conn.query_row(&sql, [user_id], session_from_row).optional()?))
            .await?;
        Ok(found)
    }

    async fn save_session(&self, state: &SessionState) -> LaunchResult<()> {
        let row = state.clone();
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE sessions SET user_id = ?2, access_token = ?3, \
                     access_token_expires_at = ?4, refresh_token = ?5, provider = ?6, \
                     backend_api_key = ?7, handshake_token = ?8 WHERE id = ?1",
                    params![
                        row.id,
                        row.user_id,
                        row.access_token,
                        to_sql_secs(row.access_token_expires_at),
                        row.refresh_token,
                        row.provider,
                        row.backend_api_key,
                        row.handshake_token,
                    ],
                )?;
                Ok(n)
            })
            .await?;
        if changed == 0 {
            return Err(LaunchError::Store(format!("session {} not found", state.id)));
        }
        Ok(())
    }

    async fn find_or_create_user(
        &self,
        email: &str,
        display_name: &str,
    ) -> LaunchResult<UserRecord> {
        let email = email.to_owned();
        let display_name = display_name.to_owned();
        let now = to_sql_secs(epoch_secs());
        let user = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO users (email, display_name, created_at) VALUES (?1, ?2, ?3) \
                     ON CONFLICT(email) DO NOTHING",
                    params![email, display_name, now],
                )?;
                Ok(conn.query_row(
                    "SELECT id, email, display_name, created_at FROM users WHERE email = ?1",
                    [email],
                    user_from_row,
                )?)
            })
            .await?;
        Ok(user)
    }

    async fn user(&self, user_id: i64) -> LaunchResult<Option<UserRecord>> {
        let found = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, email, display_name, created_at FROM users WHERE id = ?1",
                        [user_id],
                        user_from_row,
                    )
                    .optional()?)
            })
            .await?;
        Ok(found)
    }

    async fn bind_session_to_user(&self, session_id: &str, user_id: i64) -> LaunchResult<()> {
        let session_id = session_id.to_owned();
        let sid = session_id.clone();
        let bound = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM sessions WHERE user_id = ?1 AND id != ?2",
                    params![user_id, sid],
                )?;
                let n = tx.execute(
                    "UPDATE sessions SET user_id = ?1 WHERE id = ?2",
                    params![user_id, sid],
                )?;
                if n == 0 {
                    tx.rollback()?;
                    return Ok(false);
                }
                tx.commit()?;
                Ok(true)
            })
            .await?;
        if !bound {
            return Err(LaunchError::Store(format!("session {session_id} not found")));
        }
        Ok(())
    }

    async fn sessions_for_user(&self, user_id: i64) -> LaunchResult<Vec<SessionState>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = ?1");
        let sessions = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([user_id], session_from_row)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await?;
        Ok(sessions)
    }
}
