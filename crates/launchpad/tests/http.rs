// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests of the HTTP surface against fake provider and backend.

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{json, Value};

use launchpad::test_support::{AnyhowExt, Harness};
use launchpad::transport::build_router;

async fn server(h: &Harness) -> anyhow::Result<TestServer> {
    let mut server = TestServer::new(build_router(h.state.clone())).anyhow()?;
    server.save_cookies();
    Ok(server)
}

fn body(resp: &axum_test::TestResponse) -> anyhow::Result<Value> {
    Ok(serde_json::from_str(&resp.text())?)
}

fn state_param(url: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query.split('&').find_map(|pair| pair.strip_prefix("state=")).map(str::to_owned)
}

/// Walk the browser through the consent redirect and callback, returning
/// the `state` it used.
async fn login(server: &TestServer) -> anyhow::Result<String> {
    let resp = server.get("/api/auth/user").await;
    resp.assert_status_ok();
    let user = body(&resp)?;
    assert_eq!(user["is_logged_in"], json!(false));
    let auth_url = user["providers"]["ucams"].as_str().unwrap_or_default();
    let state = state_param(auth_url).ok_or_else(|| anyhow::anyhow!("no state in {auth_url}"))?;

    let resp = server
        .get("/ucams/redirect")
        .add_query_param("code", "code-1")
        .add_query_param("state", &state)
        .await;
    resp.assert_status(StatusCode::SEE_OTHER);
    Ok(state)
}

#[tokio::test]
async fn health_is_public() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    let server = server(&h).await?;
    let resp = server.get("/api/health").await;
    resp.assert_status_ok();
    assert_eq!(body(&resp)?["status"], json!("ok"));
    Ok(())
}

#[tokio::test]
async fn login_launch_monitor_stop_logout() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    let server = server(&h).await?;
    login(&server).await?;

    let resp = server.get("/api/auth/user").await;
    let user = body(&resp)?;
    assert_eq!(user["is_logged_in"], json!(true));
    assert_eq!(user["given_name"], json!("Ada"));

    server.get("/api/jobs/user_status").await.assert_status_ok();

    let resp = server
        .post("/api/jobs/launch")
        .json(&json!({ "tool_id": "viewer", "inputs": { "threshold": 3 } }))
        .await;
    resp.assert_status_ok();
    let launched = body(&resp)?;
    let job_id = launched["job_id"].as_str().unwrap_or_default().to_owned();
    assert!(!job_id.is_empty());
    assert_eq!(launched["tool_id"], json!("viewer"));

    let resp = server
        .post("/api/jobs/monitor")
        .json(&json!({ "tool_ids": { "viewer": job_id } }))
        .await;
    resp.assert_status_ok();
    let jobs = body(&resp)?["jobs"].clone();
    assert_eq!(jobs.as_array().map(Vec::len), Some(1));
    assert_eq!(jobs[0]["job_id"], json!(job_id));
    assert_eq!(jobs[0]["url_ready"], json!(false));
    assert!(jobs[0].get("parameters").is_none());

    let resp = server.post("/api/jobs/stop").json(&json!({ "job_id": job_id })).await;
    resp.assert_status_ok();
    assert_eq!(h.galaxy.state.lock().await.cancelled, vec![job_id]);

    server.post("/api/auth/logout").await.assert_status(StatusCode::NO_CONTENT);
    server.get("/api/jobs/user_status").await.assert_status(StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn logins_from_two_browsers_share_one_session() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    let first = server(&h).await?;
    let second = server(&h).await?;
    login(&first).await?;
    login(&second).await?;

    first.get("/api/jobs/user_status").await.assert_status_ok();
    second.get("/api/jobs/user_status").await.assert_status_ok();

    let user = h.store.find_or_create_user("ada@example.org", "Ada").await?;
    assert_eq!(h.store.sessions_for_user(user.id).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn callback_with_forged_state_is_rejected() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    let server = server(&h).await?;
    server.get("/api/auth/user").await.assert_status_ok();

    let resp = server
        .get("/ucams/redirect")
        .add_query_param("code", "code-1")
        .add_query_param("state", "forged")
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(h.idp.state.lock().await.exchange_calls, 0);
    Ok(())
}

#[tokio::test]
async fn replayed_state_does_not_take_over_session() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    let victim = server(&h).await?;
    let state = login(&victim).await?;

    h.idp.state.lock().await.claims =
        json!({ "email": "mallory@example.org", "given_name": "Mallory" });
    let attacker = server(&h).await?;
    let resp = attacker
        .get("/ucams/redirect")
        .add_query_param("code", "code-2")
        .add_query_param("state", &state)
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);

    // Same replay from a browser holding its own pending login.
    attacker.get("/api/auth/user").await.assert_status_ok();
    let resp = attacker
        .get("/ucams/redirect")
        .add_query_param("code", "code-2")
        .add_query_param("state", &state)
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);

    assert_eq!(h.idp.state.lock().await.exchange_calls, 1);
    victim.get("/api/jobs/user_status").await.assert_status_ok();
    let user = body(&victim.get("/api/auth/user").await)?;
    assert_eq!(user["given_name"], json!("Ada"));
    Ok(())
}

#[tokio::test]
async fn job_endpoints_require_login() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    let server = server(&h).await?;
    let resp = server.post("/api/jobs/launch").json(&json!({ "tool_id": "viewer" })).await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(body(&resp)?["error"]["code"], json!("UNAUTHORIZED"));
    Ok(())
}

#[tokio::test]
async fn unknown_backend_user_gets_status_450() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    h.galaxy.state.lock().await.api_key_error =
        Some("Cannot locate user by access token.".into());
    let server = server(&h).await?;
    login(&server).await?;

    let resp = server.get("/api/jobs/user_status").await;
    resp.assert_status(StatusCode::from_u16(450)?);
    let err = body(&resp)?["error"].clone();
    assert_eq!(err["code"], json!("BACKEND_KEY_UNAVAILABLE"));
    assert_eq!(err["provider"], json!("UCAMS"));
    assert!(err["message"].as_str().is_some_and(|m| m.contains("once with UCAMS")));
    Ok(())
}

#[tokio::test]
async fn failed_file_registration_names_parameter() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    h.galaxy.state.lock().await.ingest_fails = true;
    let server = server(&h).await?;
    login(&server).await?;

    let resp = server
        .post("/api/jobs/launch")
        .json(&json!({ "tool_id": "plotter", "inputs": { "data": "file_/no/such.nxs" } }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let err = body(&resp)?["error"].clone();
    assert_eq!(err["code"], json!("INPUT_REGISTRATION_FAILED"));
    assert_eq!(err["parameter"], json!("data"));
    Ok(())
}

#[tokio::test]
async fn backend_outage_is_bad_gateway() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    let server = server(&h).await?;
    login(&server).await?;
    server.get("/api/jobs/user_status").await.assert_status_ok();
    h.galaxy.state.lock().await.down = true;

    let resp = server.post("/api/jobs/monitor").json(&json!({ "tool_ids": {} })).await;
    resp.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(body(&resp)?["error"]["code"], json!("BACKEND_UNREACHABLE"));
    Ok(())
}

#[tokio::test]
async fn revoked_refresh_token_asks_for_login() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    let server = server(&h).await?;
    login(&server).await?;

    let user = h
        .store
        .find_or_create_user("ada@example.org", "Ada")
        .await?;
    let mut session = h
        .store
        .session_by_user(user.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no session after login"))?;
    session.access_token_expires_at = 0;
    session.backend_api_key.clear();
    h.store.save_session(&session).await?;
    h.idp.state.lock().await.reject_refresh = true;

    let resp = server.post("/api/jobs/launch").json(&json!({ "tool_id": "viewer" })).await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    let err = body(&resp)?["error"].clone();
    assert_eq!(err["code"], json!("REAUTHENTICATION_REQUIRED"));
    assert_eq!(err["provider"], json!("UCAMS"));
    Ok(())
}
