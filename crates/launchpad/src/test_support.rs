// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a fake OAuth provider, a fake execution
//! backend, and builders wiring them into an [`AppState`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use crate::config::{Config, FileConfig};
use crate::credential::vault::CredentialVault;
use crate::credential::{epoch_secs, ProviderConfig};
use crate::store::{MemoryStore, SessionState, StateStore};
use crate::transport::AppState;

/// Serve `router` on a random local port and return its base URL.
pub async fn spawn_router(router: Router) -> anyhow::Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://{addr}"))
}

/// Unsigned JWT carrying `claims`, in the shape providers return.
pub fn fake_id_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{body}.sig")
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let msg = match $expr {
            Ok(_) => None,
            Err(err) => Some(err.to_string()),
        };
        assert!(
            msg.as_deref().is_some_and(|m| m.contains($substr)),
            "expected error containing {:?}, got: {msg:?}",
            $substr
        );
    }};
}

// -- Fake OAuth provider ------------------------------------------------------

#[derive(Debug)]
pub struct IdpState {
    pub exchange_calls: u32,
    pub refresh_calls: u32,
    /// Refresh requests are answered with `invalid_grant`.
    pub reject_refresh: bool,
    /// Whether refresh responses carry a new refresh token.
    pub rotate_refresh: bool,
    pub expires_in: Option<u64>,
    pub claims: Value,
    pub last_authorization: Option<String>,
    pub last_form: HashMap<String, String>,
    issued: u32,
}

impl Default for IdpState {
    fn default() -> Self {
        Self {
            exchange_calls: 0,
            refresh_calls: 0,
            reject_refresh: false,
            rotate_refresh: true,
            expires_in: Some(3600),
            claims: json!({ "email": "ada@example.org", "given_name": "Ada" }),
            last_authorization: None,
            last_form: HashMap::new(),
            issued: 0,
        }
    }
}

#[derive(Clone, Default)]
pub struct MockIdp {
    pub state: Arc<Mutex<IdpState>>,
}

impl MockIdp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn router(&self) -> Router {
        Router::new().route("/token", post(idp_token)).with_state(self.state.clone())
    }

    /// Serve the provider and return a matching provider config.
    pub async fn spawn(&self, redirect_path: &str) -> anyhow::Result<ProviderConfig> {
        let url = spawn_router(self.router()).await?;
        Ok(ProviderConfig {
            client_id: "dashboard".into(),
            client_secret: "s3cret".into(),
            auth_url: format!("{url}/authorize"),
            token_url: format!("{url}/token"),
            scopes: "openid email profile".into(),
            redirect_path: redirect_path.into(),
            name_claim: "given_name".into(),
            display_name: None,
        })
    }
}

async fn idp_token(
    State(state): State<Arc<Mutex<IdpState>>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let mut s = state.lock().await;
    s.last_authorization =
        headers.get("authorization").and_then(|v| v.to_str().ok()).map(str::to_owned);
    s.last_form = form.clone();
    let grant = form.get("grant_type").map(String::as_str).unwrap_or_default();

    let invalid_grant =
        || (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_grant" }))).into_response();
    match grant {
        "authorization_code" => {
            s.exchange_calls += 1;
            if form.get("code").map(String::as_str) == Some("bad-code") {
                return invalid_grant();
            }
            s.issued += 1;
            let n = s.issued;
            let mut body = json!({
                "access_token": format!("access-{n}"),
                "refresh_token": format!("refresh-{n}"),
                "token_type": "Bearer",
                "id_token": fake_id_token(&s.claims),
            });
            if let Some(exp) = s.expires_in {
                body["expires_in"] = json!(exp);
            }
            Json(body).into_response()
        }
        "refresh_token" => {
            s.refresh_calls += 1;
            if s.reject_refresh {
                return invalid_grant();
            }
            s.issued += 1;
            let n = s.issued;
            let mut body = json!({ "access_token": format!("access-{n}"), "token_type": "Bearer" });
            if s.rotate_refresh {
                body["refresh_token"] = json!(format!("refresh-{n}"));
            }
            if let Some(exp) = s.expires_in {
                body["expires_in"] = json!(exp);
            }
            Json(body).into_response()
        }
        _ => invalid_grant(),
    }
}

// -- Fake execution backend ---------------------------------------------------

#[derive(Debug, Clone)]
pub struct FakeJob {
    pub id: String,
    pub tool_id: String,
    pub state: String,
    pub history_id: String,
    pub params: Map<String, Value>,
    /// Entry point target, relative to the backend root.
    pub entry_point: Option<String>,
    /// Status and body served at the entry point.
    pub page: (u16, String),
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub tool_id: String,
    pub history_id: String,
    pub inputs: Value,
}

#[derive(Debug)]
pub struct GalaxyState {
    pub api_key: String,
    /// `err_msg` answered by the API-key endpoint instead of a key.
    pub api_key_error: Option<String>,
    pub api_key_requests: u32,
    pub last_bearer: Option<String>,
    pub histories: Vec<(String, String)>,
    pub jobs: Vec<FakeJob>,
    pub tool_calls: Vec<ToolCall>,
    pub cancelled: Vec<String>,
    /// Ingest tool id; runs of it produce no output when `ingest_fails`.
    pub ingest_tool: String,
    pub ingest_fails: bool,
    /// Whether `POST /api/tools` reports the job id synchronously.
    pub sync_job_ids: bool,
    /// Tool runs report neither jobs nor outputs.
    pub empty_runs: bool,
    /// Dataset polls before `creating_job` is filled in; `None` never.
    pub creating_job_after: Option<u32>,
    pub dataset_polls: u32,
    /// Every job endpoint answers 500.
    pub down: bool,
    /// Jobs whose entry-point lookup fails.
    pub broken_entry_points: HashSet<String>,
    /// `x-api-key` seen by each result-page request.
    pub page_keys: Vec<Option<String>>,
    next_id: u32,
}

impl Default for GalaxyState {
    fn default() -> Self {
        Self {
            api_key: "galaxy-key".into(),
            api_key_error: None,
            api_key_requests: 0,
            last_bearer: None,
            histories: Vec::new(),
            jobs: Vec::new(),
            tool_calls: Vec::new(),
            cancelled: Vec::new(),
            ingest_tool: "neutrons_register".into(),
            ingest_fails: false,
            sync_job_ids: true,
            empty_runs: false,
            creating_job_after: Some(0),
            dataset_polls: 0,
            down: false,
            broken_entry_points: HashSet::new(),
            page_keys: Vec::new(),
            next_id: 0,
        }
    }
}

impl GalaxyState {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    /// Id of the history called `name`, creating it if needed.
    pub fn history(&mut self, name: &str) -> String {
        if let Some((id, _)) = self.histories.iter().find(|(_, n)| n == name) {
            return id.clone();
        }
        let id = self.next("hist");
        self.histories.push((id.clone(), name.to_owned()));
        id
    }

    /// Seed a job in the history called `history`.
    pub fn add_job(&mut self, id: &str, tool_id: &str, state: &str, history: &str) -> &mut FakeJob {
        let history_id = self.history(history);
        self.jobs.push(FakeJob {
            id: id.into(),
            tool_id: tool_id.into(),
            state: state.into(),
            history_id,
            params: Map::new(),
            entry_point: None,
            page: (200, "<html>tool ui</html>".into()),
        });
        let last = self.jobs.len() - 1;
        &mut self.jobs[last]
    }

    pub fn job(&self, id: &str) -> Option<&FakeJob> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn jobs_in(&self, history: &str) -> Vec<&FakeJob> {
        let Some((hid, _)) = self.histories.iter().find(|(_, n)| n == history) else {
            return Vec::new();
        };
        self.jobs.iter().filter(|j| &j.history_id == hid).collect()
    }
}

type Galaxy = Arc<Mutex<GalaxyState>>;

#[derive(Clone, Default)]
pub struct MockGalaxy {
    pub state: Galaxy,
}

impl MockGalaxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/users/current/api_key", get(galaxy_api_key))
            .route("/api/histories", get(galaxy_histories).post(galaxy_create_history))
            .route("/api/tools", post(galaxy_run_tool))
            .route("/api/datasets/{id}", get(galaxy_dataset))
            .route("/api/jobs", get(galaxy_jobs))
            .route("/api/jobs/{id}", get(galaxy_job).delete(galaxy_cancel))
            .route("/api/entry_points", get(galaxy_entry_points))
            .route("/interactive/{id}", get(galaxy_page))
            .with_state(self.state.clone())
    }

    pub async fn spawn(&self) -> anyhow::Result<String> {
        spawn_router(self.router()).await
    }
}

fn authorized(s: &GalaxyState, headers: &HeaderMap) -> Result<(), Response> {
    let key = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if key != Some(s.api_key.as_str()) {
        return Err((StatusCode::FORBIDDEN, Json(json!({ "err_msg": "Provided API key is not valid." })))
            .into_response());
    }
    if s.down {
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "database unavailable").into_response());
    }
    Ok(())
}

async fn galaxy_api_key(State(state): State<Galaxy>, headers: HeaderMap) -> Response {
    let mut s = state.lock().await;
    s.api_key_requests += 1;
    s.last_bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned);
    match s.api_key_error {
        Some(ref msg) => Json(json!({ "err_msg": msg })).into_response(),
        None => Json(json!({ "api_key": s.api_key })).into_response(),
    }
}

async fn galaxy_histories(
    State(state): State<Galaxy>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let s = state.lock().await;
    if let Err(resp) = authorized(&s, &headers) {
        return resp;
    }
    let name = q.get("qv").cloned().unwrap_or_default();
    let found: Vec<Value> = s
        .histories
        .iter()
        .filter(|(_, n)| *n == name)
        .map(|(id, n)| json!({ "id": id, "name": n }))
        .collect();
    Json(found).into_response()
}

async fn galaxy_create_history(
    State(state): State<Galaxy>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut s = state.lock().await;
    if let Err(resp) = authorized(&s, &headers) {
        return resp;
    }
    let name = body["name"].as_str().unwrap_or_default().to_owned();
    let id = s.history(&name);
    Json(json!({ "id": id, "name": name })).into_response()
}

async fn galaxy_run_tool(
    State(state): State<Galaxy>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut s = state.lock().await;
    if let Err(resp) = authorized(&s, &headers) {
        return resp;
    }
    let tool_id = body["tool_id"].as_str().unwrap_or_default().to_owned();
    let history_id = body["history_id"].as_str().unwrap_or_default().to_owned();
    s.tool_calls.push(ToolCall {
        tool_id: tool_id.clone(),
        history_id: history_id.clone(),
        inputs: body["inputs"].clone(),
    });

    if s.empty_runs || (tool_id == s.ingest_tool && s.ingest_fails) {
        return Json(json!({ "jobs": [], "outputs": [] })).into_response();
    }

    let job_id = s.next("job");
    let output_id = format!("ds-{job_id}");
    s.jobs.push(FakeJob {
        id: job_id.clone(),
        tool_id,
        state: "queued".into(),
        history_id,
        params: body["inputs"].as_object().cloned().unwrap_or_default(),
        entry_point: None,
        page: (200, String::new()),
    });

    let jobs = if s.sync_job_ids { json!([{ "id": job_id }]) } else { json!([]) };
    Json(json!({ "jobs": jobs, "outputs": [{ "id": output_id }] })).into_response()
}

async fn galaxy_dataset(
    State(state): State<Galaxy>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let mut s = state.lock().await;
    if let Err(resp) = authorized(&s, &headers) {
        return resp;
    }
    let polls = s.dataset_polls;
    s.dataset_polls += 1;
    let ready = s.creating_job_after.is_some_and(|after| polls >= after);
    let creating_job = match id.strip_prefix("ds-") {
        Some(job) if ready => Value::String(job.to_owned()),
        _ => Value::Null,
    };
    Json(json!({ "id": id, "creating_job": creating_job })).into_response()
}

async fn galaxy_jobs(
    State(state): State<Galaxy>,
    headers: HeaderMap,
    Query(q): Query<Vec<(String, String)>>,
) -> Response {
    let s = state.lock().await;
    if let Err(resp) = authorized(&s, &headers) {
        return resp;
    }
    let history = q.iter().find(|(k, _)| k == "history_id").map(|(_, v)| v.clone());
    let states: Vec<&str> = q.iter().filter(|(k, _)| k == "state").map(|(_, v)| v.as_str()).collect();
    let limit = q
        .iter()
        .find(|(k, _)| k == "limit")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(usize::MAX);

    // Newest first, the way create_time ordering is served.
    let found: Vec<Value> = s
        .jobs
        .iter()
        .rev()
        .filter(|j| history.as_deref().is_none_or(|h| j.history_id == h))
        .filter(|j| states.is_empty() || states.contains(&j.state.as_str()))
        .take(limit)
        .map(|j| json!({ "id": j.id, "tool_id": j.tool_id, "state": j.state }))
        .collect();
    Json(found).into_response()
}

async fn galaxy_job(
    State(state): State<Galaxy>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let s = state.lock().await;
    if let Err(resp) = authorized(&s, &headers) {
        return resp;
    }
    match s.job(&id) {
        Some(job) => Json(json!({ "id": job.id, "state": job.state, "params": job.params }))
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn galaxy_cancel(
    State(state): State<Galaxy>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let mut s = state.lock().await;
    if let Err(resp) = authorized(&s, &headers) {
        return resp;
    }
    let Some(pos) = s.jobs.iter().position(|j| j.id == id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    s.cancelled.push(id);
    let job = &mut s.jobs[pos];
    if matches!(job.state.as_str(), "ok" | "error" | "deleted") {
        return Json(false).into_response();
    }
    job.state = "deleting".into();
    Json(true).into_response()
}

async fn galaxy_entry_points(
    State(state): State<Galaxy>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let s = state.lock().await;
    if let Err(resp) = authorized(&s, &headers) {
        return resp;
    }
    let job_id = q.get("job_id").cloned().unwrap_or_default();
    if s.broken_entry_points.contains(&job_id) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "entry point lookup failed").into_response();
    }
    let points: Vec<Value> = s
        .job(&job_id)
        .and_then(|j| j.entry_point.clone())
        .map(|target| json!({ "job_id": job_id, "target": target }))
        .into_iter()
        .collect();
    Json(points).into_response()
}

async fn galaxy_page(
    State(state): State<Galaxy>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut s = state.lock().await;
    let key = headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(str::to_owned);
    s.page_keys.push(key);
    match s.job(&id) {
        Some(job) => {
            let (status, ref body) = job.page;
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, body.clone()).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// -- Wiring -------------------------------------------------------------------

/// A fake provider and backend plus an [`AppState`] pointed at them.
pub struct Harness {
    pub idp: MockIdp,
    pub galaxy: MockGalaxy,
    pub state: AppState,
    pub store: Arc<dyn StateStore>,
    pub vault: CredentialVault,
}

impl Harness {
    /// Fresh harness with one provider (`ucams`) and an in-memory store.
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(|_| {}).await
    }

    /// Like [`Harness::start`], letting the caller adjust the config first.
    pub async fn start_with(tweak: impl FnOnce(&mut Config)) -> anyhow::Result<Self> {
        crate::ensure_crypto_provider();
        let idp = MockIdp::new();
        let galaxy = MockGalaxy::new();
        let provider = idp.spawn("ucams/redirect").await?;
        let backend_url = galaxy.spawn().await?;

        let mut config = Config::test();
        config.backend_url = backend_url;
        tweak(&mut config);

        let mut file = FileConfig::default();
        file.providers = BTreeMap::from([("ucams".to_owned(), provider)]);

        let vault = CredentialVault::from_base64(&config.refresh_token_key)?;
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let state = AppState::new(config, file, store.clone())?;
        Ok(Self { idp, galaxy, state, store, vault })
    }

    /// A session that completed login, with fresh tokens for `ucams`.
    pub async fn logged_in_session(&self, email: &str) -> anyhow::Result<SessionState> {
        let mut session = self.store.create_session("hs-test").await?;
        let user = self.store.find_or_create_user(email, "Test").await?;
        self.store.bind_session_to_user(&session.id, user.id).await?;
        session.user_id = Some(user.id);
        session.provider = "ucams".into();
        session.access_token = "access-seed".into();
        session.access_token_expires_at = epoch_secs() + 3600;
        session.refresh_token = self.vault.encrypt("refresh-seed")?;
        session.handshake_token.clear();
        self.store.save_session(&session).await?;
        Ok(session)
    }
}

/// Extension trait to convert any `Display` error into `anyhow::Error`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}
