// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surface: login flow, framework session, and the job endpoints.

pub mod auth;
pub mod http;
pub mod state;

pub use state::AppState;

use std::collections::HashSet;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::PrivateCookieJar;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::credential::oauth::CallbackParams;

/// Build the axum `Router` with all API routes plus one callback route per
/// configured provider.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/api/health", get(http::health))
        .route("/api/auth/user", get(http::auth_user))
        .route("/api/auth/logout", post(http::logout))
        .route("/api/jobs/user_status", get(http::user_status))
        .route("/api/jobs/launch", post(http::launch))
        .route("/api/jobs/monitor", post(http::monitor))
        .route("/api/jobs/stop", post(http::stop));

    let mut seen = HashSet::new();
    for (id, provider) in state.broker.providers() {
        let path = callback_path(&provider.redirect_path);
        if path.starts_with("/api/") || !seen.insert(path.clone()) {
            tracing::warn!(provider = %id, path = %path, "skipping conflicting redirect path");
            continue;
        }
        let provider_id = id.clone();
        router = router.route(
            &path,
            get(
                move |State(s): State<AppState>,
                      jar: PrivateCookieJar,
                      Query(params): Query<CallbackParams>| {
                    let provider_id = provider_id.clone();
                    async move { http::oauth_callback(&provider_id, s, jar, params).await }
                },
            ),
        );
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn callback_path(redirect_path: &str) -> String {
    format!("/{}", redirect_path.trim_matches('/'))
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
