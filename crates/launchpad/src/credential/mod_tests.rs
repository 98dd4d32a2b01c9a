// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn handshake_token_has_expected_length_and_charset() {
    let token = generate_handshake_token();
    assert_eq!(token.len(), HANDSHAKE_TOKEN_LEN);
    assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
}

#[test]
fn handshake_tokens_are_unique() {
    assert_ne!(generate_handshake_token(), generate_handshake_token());
}

fn provider(redirect_path: &str) -> ProviderConfig {
    ProviderConfig {
        client_id: "c".into(),
        client_secret: "s".into(),
        auth_url: "https://idp/authorize".into(),
        token_url: "https://idp/token".into(),
        scopes: "openid email".into(),
        redirect_path: redirect_path.into(),
        name_claim: "given_name".into(),
        display_name: None,
    }
}

#[yare::parameterized(
    plain           = { "http://dash.test", "ucams/redirect" },
    trailing_slash  = { "http://dash.test/", "ucams/redirect" },
    leading_slash   = { "http://dash.test", "/ucams/redirect" },
)]
fn redirect_uri_joins_cleanly(base: &str, path: &str) {
    assert_eq!(provider(path).redirect_uri(base), "http://dash.test/ucams/redirect");
}

#[test]
fn provider_defaults_fill_optional_fields() -> anyhow::Result<()> {
    let provider: ProviderConfig = serde_json::from_value(serde_json::json!({
        "client_id": "c",
        "client_secret": "s",
        "auth_url": "https://idp/authorize",
        "token_url": "https://idp/token",
        "redirect_path": "xcams/redirect",
    }))?;
    assert_eq!(provider.name_claim, "given_name");
    assert_eq!(provider.scopes, "openid email profile");
    assert!(provider.display_name.is_none());
    Ok(())
}
