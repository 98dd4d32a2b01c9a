// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP request/response types and handlers for the dashboard API.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use axum_extra::extract::PrivateCookieJar;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::credential::identity::HANDSHAKE_COOKIE;
use crate::credential::oauth::CallbackParams;
use crate::error::{LaunchError, LaunchResult};
use crate::jobs::{InputValue, JobHandle, JobInputs, JobStatus};
use crate::transport::auth::UserSession;
use crate::transport::state::AppState;

/// Status used by the access check for every failure, so the dashboard can
/// tell it apart from transport errors.
const USER_STATUS_FAILURE: u16 = 450;

// -- Types --------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUserResponse {
    pub given_name: String,
    pub is_logged_in: bool,
    /// Provider id to consent URL; empty once logged in.
    pub providers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStatusResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub tool_id: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorRequest {
    /// Tool id to job id for every job the dashboard currently shows.
    #[serde(default)]
    pub tool_ids: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorResponse {
    pub jobs: Vec<JobStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub job_id: String,
    pub stopped: bool,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok".into(), version: env!("CARGO_PKG_VERSION").into() })
}

/// `GET /api/auth/user`
pub async fn auth_user(
    State(s): State<AppState>,
    jar: PrivateCookieJar,
) -> LaunchResult<(PrivateCookieJar, Json<AuthUserResponse>)> {
    if let Some(user) = s.identity.current_user(&jar).await? {
        let body = AuthUserResponse {
            given_name: user.display_name,
            is_logged_in: true,
            providers: BTreeMap::new(),
        };
        return Ok((jar, Json(body)));
    }

    let (session, jar) = s.identity.pending_session(jar).await?;
    let mut providers = BTreeMap::new();
    for id in s.broker.providers().keys() {
        providers.insert(id.clone(), s.broker.authorization_url(id, &session)?);
    }
    let body = AuthUserResponse { given_name: String::new(), is_logged_in: false, providers };
    Ok((jar, Json(body)))
}

/// `GET /{redirect_path}` for the provider `provider_id`.
pub async fn oauth_callback(
    provider_id: &str,
    s: AppState,
    jar: PrivateCookieJar,
    params: CallbackParams,
) -> Response {
    match complete_login(provider_id, &s, jar, &params).await {
        Ok(jar) => (jar, Redirect::to("/")).into_response(),
        Err(e) => {
            tracing::warn!(provider = provider_id, err = %e, "login failed");
            e.into_response()
        }
    }
}

async fn complete_login(
    provider_id: &str,
    s: &AppState,
    jar: PrivateCookieJar,
    params: &CallbackParams,
) -> LaunchResult<PrivateCookieJar> {
    // The state must be the one this browser was handed.
    let pending = jar.get(HANDSHAKE_COOKIE).map(|c| c.value().to_owned());
    if pending.is_none() || pending.as_deref() != params.state.as_deref() {
        return Err(LaunchError::HandshakeMismatch);
    }
    let (mut session, claims) = s.broker.complete_handshake(provider_id, params).await?;
    let (_, jar) = s.identity.bind_and_login(&claims, &mut session, jar).await?;
    Ok(jar)
}

/// `POST /api/auth/logout`
pub async fn logout(State(s): State<AppState>, jar: PrivateCookieJar) -> impl IntoResponse {
    (s.identity.logout(jar), StatusCode::NO_CONTENT)
}

/// `GET /api/jobs/user_status`
pub async fn user_status(
    State(s): State<AppState>,
    UserSession(mut session): UserSession,
) -> Response {
    match s.reconciler.check_backend_access(&mut session).await {
        Ok(()) => Json(UserStatusResponse { ok: true }).into_response(),
        Err(e) => {
            let status = StatusCode::from_u16(USER_STATUS_FAILURE).unwrap_or(StatusCode::BAD_GATEWAY);
            e.to_http_response_with(status)
        }
    }
}

/// `POST /api/jobs/launch`
pub async fn launch(
    State(s): State<AppState>,
    UserSession(mut session): UserSession,
    Json(req): Json<LaunchRequest>,
) -> LaunchResult<Json<JobHandle>> {
    if req.tool_id.is_empty() {
        return Err(LaunchError::InvalidRequest("tool_id must not be empty".into()));
    }
    let inputs: JobInputs = req
        .inputs
        .into_iter()
        .map(|(name, value)| (name, InputValue::from_wire(value, &s.config.file_prefix)))
        .collect();
    let handle = s.submitter.submit(&mut session, &req.tool_id, &inputs).await?;
    Ok(Json(handle))
}

/// `POST /api/jobs/monitor`
pub async fn monitor(
    State(s): State<AppState>,
    UserSession(mut session): UserSession,
    Json(req): Json<MonitorRequest>,
) -> LaunchResult<Json<MonitorResponse>> {
    let known: Vec<JobHandle> = req
        .tool_ids
        .into_iter()
        .map(|(tool_id, job_id)| JobHandle { job_id, tool_id })
        .collect();
    let jobs = s.reconciler.reconcile(&mut session, &known).await?;
    Ok(Json(MonitorResponse { jobs }))
}

/// `POST /api/jobs/stop`
pub async fn stop(
    State(s): State<AppState>,
    UserSession(mut session): UserSession,
    Json(req): Json<StopRequest>,
) -> LaunchResult<Json<StopResponse>> {
    s.reconciler.stop(&mut session, &req.job_id).await?;
    Ok(Json(StopResponse { job_id: req.job_id, stopped: true }))
}
