// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failures surfaced by the credential broker and the job engine.
///
/// Variants keep the offending identifier (provider, parameter, tool) so the
/// HTTP boundary can tell a transient backend outage apart from a credential
/// problem the user has to fix by logging in again.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Stored refresh token could not be decrypted with the process key.
    #[error("stored credential could not be decrypted; please log in again")]
    CredentialCorrupt,

    /// The provider rejected the refresh (or there is nothing to refresh with).
    #[error("re-authentication with {provider} required: {reason}")]
    ReauthenticationRequired { provider: String, reason: String },

    /// The backend refused to issue an API key for the current access token.
    #[error("{message}")]
    BackendKeyUnavailable { provider: String, message: String },

    #[error(
        "file for parameter '{parameter}' failed to register with the backend; \
         the path is likely malformed or nonexistent"
    )]
    InputRegistrationFailed { parameter: String },

    #[error("backend never assigned a job id for tool {tool_id}")]
    SubmissionTimedOut { tool_id: String },

    /// The backend could not be reached at all; the cached API key was dropped.
    #[error("failed to reach the execution backend: {message}")]
    BackendUnreachable { message: String },

    #[error("unknown OAuth provider: {0}")]
    UnknownProvider(String),

    #[error("OAuth state does not match any pending login")]
    HandshakeMismatch,

    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The backend answered but refused a single request.
    #[error("backend rejected request: {0}")]
    Backend(String),

    #[error("state store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type LaunchResult<T> = Result<T, LaunchError>;

impl LaunchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::CredentialCorrupt => ErrorCode::CredentialCorrupt,
            Self::ReauthenticationRequired { .. } => ErrorCode::ReauthenticationRequired,
            Self::BackendKeyUnavailable { .. } => ErrorCode::BackendKeyUnavailable,
            Self::InputRegistrationFailed { .. } => ErrorCode::InputRegistrationFailed,
            Self::SubmissionTimedOut { .. } => ErrorCode::SubmissionTimedOut,
            Self::BackendUnreachable { .. } => ErrorCode::BackendUnreachable,
            Self::UnknownProvider(_) => ErrorCode::UnknownProvider,
            Self::HandshakeMismatch | Self::OAuth(_) | Self::InvalidRequest(_) => {
                ErrorCode::BadRequest
            }
            Self::NotAuthenticated => ErrorCode::Unauthorized,
            Self::Backend(_) => ErrorCode::UpstreamError,
            Self::Store(_) | Self::Config(_) => ErrorCode::Internal,
        }
    }

    /// OAuth provider the failure relates to, when known.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::ReauthenticationRequired { provider, .. }
            | Self::BackendKeyUnavailable { provider, .. } => Some(provider),
            Self::UnknownProvider(provider) => Some(provider),
            _ => None,
        }
    }

    /// Job input parameter the failure relates to, when known.
    pub fn parameter(&self) -> Option<&str> {
        match self {
            Self::InputRegistrationFailed { parameter } => Some(parameter),
            _ => None,
        }
    }

    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().as_str().to_owned(),
            message: self.to_string(),
            provider: self.provider().map(str::to_uppercase),
            parameter: self.parameter().map(str::to_owned),
        }
    }

    /// Render with an explicit status, for endpoints with their own contract.
    pub fn to_http_response_with(&self, status: StatusCode) -> Response {
        if self.code() == ErrorCode::Internal {
            tracing::error!(err = %self, "internal error");
        }
        (status, Json(ErrorResponse { error: self.to_error_body() })).into_response()
    }
}

impl IntoResponse for LaunchError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code().http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.to_http_response_with(status)
    }
}

impl From<tokio_rusqlite::Error> for LaunchError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<rusqlite::Error> for LaunchError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

/// Machine-readable error codes for the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    CredentialCorrupt,
    ReauthenticationRequired,
    BackendKeyUnavailable,
    InputRegistrationFailed,
    SubmissionTimedOut,
    BackendUnreachable,
    UnknownProvider,
    Unauthorized,
    BadRequest,
    UpstreamError,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::CredentialCorrupt => 401,
            Self::ReauthenticationRequired => 401,
            Self::BackendKeyUnavailable => 502,
            Self::InputRegistrationFailed => 400,
            Self::SubmissionTimedOut => 504,
            Self::BackendUnreachable => 502,
            Self::UnknownProvider => 404,
            Self::Unauthorized => 401,
            Self::BadRequest => 400,
            Self::UpstreamError => 502,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CredentialCorrupt => "CREDENTIAL_CORRUPT",
            Self::ReauthenticationRequired => "REAUTHENTICATION_REQUIRED",
            Self::BackendKeyUnavailable => "BACKEND_KEY_UNAVAILABLE",
            Self::InputRegistrationFailed => "INPUT_REGISTRATION_FAILED",
            Self::SubmissionTimedOut => "SUBMISSION_TIMED_OUT",
            Self::BackendUnreachable => "BACKEND_UNREACHABLE",
            Self::UnknownProvider => "UNKNOWN_PROVIDER",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BadRequest => "BAD_REQUEST",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    /// Upper-cased provider id, so the client can offer the matching login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
