// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    corrupt = { LaunchError::CredentialCorrupt, 401, "CREDENTIAL_CORRUPT" },
    reauth = {
        LaunchError::ReauthenticationRequired { provider: "ucams".into(), reason: "x".into() },
        401,
        "REAUTHENTICATION_REQUIRED"
    },
    key = {
        LaunchError::BackendKeyUnavailable { provider: "ucams".into(), message: "x".into() },
        502,
        "BACKEND_KEY_UNAVAILABLE"
    },
    input = {
        LaunchError::InputRegistrationFailed { parameter: "input_file".into() },
        400,
        "INPUT_REGISTRATION_FAILED"
    },
    timeout = {
        LaunchError::SubmissionTimedOut { tool_id: "t".into() },
        504,
        "SUBMISSION_TIMED_OUT"
    },
    unreachable = {
        LaunchError::BackendUnreachable { message: "down".into() },
        502,
        "BACKEND_UNREACHABLE"
    },
    mismatch = { LaunchError::HandshakeMismatch, 400, "BAD_REQUEST" },
    invalid = { LaunchError::InvalidRequest("tool_id".into()), 400, "BAD_REQUEST" },
    anonymous = { LaunchError::NotAuthenticated, 401, "UNAUTHORIZED" },
    upstream = { LaunchError::Backend("500".into()), 502, "UPSTREAM_ERROR" },
    store = { LaunchError::Store("locked".into()), 500, "INTERNAL" },
)]
fn error_maps_to_code_and_status(err: LaunchError, status: u16, code: &str) {
    assert_eq!(err.code().http_status(), status);
    assert_eq!(err.code().as_str(), code);
}

#[test]
fn body_carries_offending_parameter() -> anyhow::Result<()> {
    let err = LaunchError::InputRegistrationFailed { parameter: "input_file".into() };
    let body = serde_json::to_value(err.to_error_body())?;
    assert_eq!(body["code"], "INPUT_REGISTRATION_FAILED");
    assert_eq!(body["parameter"], "input_file");
    assert!(body["message"].as_str().unwrap_or_default().contains("'input_file'"));
    assert!(body.get("provider").is_none());
    Ok(())
}

#[test]
fn body_carries_upper_cased_provider() -> anyhow::Result<()> {
    let err = LaunchError::ReauthenticationRequired {
        provider: "xcams".into(),
        reason: "invalid_grant".into(),
    };
    let body = serde_json::to_value(err.to_error_body())?;
    assert_eq!(body["provider"], "XCAMS");
    Ok(())
}

#[test]
fn transient_backend_failure_names_no_provider() {
    let err = LaunchError::BackendUnreachable { message: "connection refused".into() };
    assert_eq!(err.code(), ErrorCode::BackendUnreachable);
    assert_eq!(err.provider(), None);
}
