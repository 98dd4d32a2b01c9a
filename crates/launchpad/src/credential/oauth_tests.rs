// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use super::*;

fn provider() -> ProviderConfig {
    ProviderConfig {
        client_id: "dash board".into(),
        client_secret: "s".into(),
        auth_url: "https://idp.example/authorize".into(),
        token_url: "https://idp.example/token".into(),
        scopes: "openid email profile".into(),
        redirect_path: "ucams/redirect".into(),
        name_claim: "given_name".into(),
        display_name: None,
    }
}

fn jwt(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{body}.not-a-real-signature")
}

#[test]
fn auth_url_carries_all_parameters() {
    let url = build_auth_url(&provider(), "http://dash.test/ucams/redirect", "st@te");
    assert!(url.starts_with("https://idp.example/authorize?response_type=code"));
    assert!(url.contains("&client_id=dash+board"));
    assert!(url.contains("&redirect_uri=http%3A%2F%2Fdash.test%2Fucams%2Fredirect"));
    assert!(url.contains("&scope=openid+email+profile"));
    assert!(url.ends_with("&state=st%40te"));
}

#[test]
fn auth_url_appends_to_existing_query() {
    let mut p = provider();
    p.auth_url = "https://idp.example/authorize?tenant=x".into();
    let url = build_auth_url(&p, "http://dash.test/cb", "s");
    assert!(url.starts_with("https://idp.example/authorize?tenant=x&response_type=code"));
}

#[yare::parameterized(
    given_name = { "given_name", "Ada" },
    camel_case = { "givenName", "Lovelace" },
    missing    = { "nickname", "" },
)]
fn id_token_name_claim_is_configurable(claim: &str, expected: &str) {
    let token = jwt(serde_json::json!({
        "email": "ada@example.org",
        "given_name": "Ada",
        "givenName": "Lovelace",
    }));
    let claims = decode_id_token_claims(&token, claim).ok();
    assert_eq!(claims.as_ref().map(|c| c.email.as_str()), Some("ada@example.org"));
    assert_eq!(claims.as_ref().map(|c| c.display_name.as_str()), Some(expected));
}

#[test]
fn id_token_without_email_is_rejected() {
    let token = jwt(serde_json::json!({ "given_name": "Nobody" }));
    assert!(decode_id_token_claims(&token, "given_name").is_err());
}

#[test]
fn non_jwt_is_rejected() {
    assert!(decode_id_token_claims("opaque-token", "given_name").is_err());
    assert!(decode_id_token_claims("a.!!!.c", "given_name").is_err());
}

#[test]
fn token_response_tolerates_missing_optional_fields() -> anyhow::Result<()> {
    let token: TokenResponse = serde_json::from_str(r#"{"access_token":"at"}"#)?;
    assert_eq!(token.access_token, "at");
    assert!(token.refresh_token.is_none());
    assert!(token.expires_in.is_none());
    assert!(token.id_token.is_none());
    Ok(())
}
