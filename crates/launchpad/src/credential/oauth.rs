// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth authorization-code wire helpers: consent URL, code exchange,
//! refresh, and identity-token claim decoding.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::credential::{IdentityClaims, ProviderConfig};

/// Standard OAuth2 token response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Query parameters delivered to a provider's redirect path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Error body returned by token endpoints (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
struct TokenError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Build the provider consent URL for an authorization-code login.
pub fn build_auth_url(provider: &ProviderConfig, redirect_uri: &str, state: &str) -> String {
    let sep = if provider.auth_url.contains('?') { '&' } else { '?' };
    format!(
        "{auth_url}{sep}response_type=code\
         &client_id={client_id}\
         &redirect_uri={redirect_uri}\
         &scope={scope}\
         &state={state}",
        auth_url = provider.auth_url,
        client_id = urlencoding(&provider.client_id),
        redirect_uri = urlencoding(redirect_uri),
        scope = urlencoding(provider.scopes.trim()),
        state = urlencoding(state),
    )
}

/// Exchange an authorization code for tokens (form body, HTTP Basic client auth).
pub async fn exchange_code(
    client: &reqwest::Client,
    provider: &ProviderConfig,
    code: &str,
    redirect_uri: &str,
) -> anyhow::Result<TokenResponse> {
    let resp = client
        .post(&provider.token_url)
        .basic_auth(&provider.client_id, Some(&provider.client_secret))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ])
        .send()
        .await?;
    read_token_response(resp, "token exchange").await
}

/// Perform a single token refresh request.
pub async fn do_refresh(
    client: &reqwest::Client,
    provider: &ProviderConfig,
    refresh_token: &str,
) -> anyhow::Result<TokenResponse> {
    let resp = client
        .post(&provider.token_url)
        .basic_auth(&provider.client_id, Some(&provider.client_secret))
        .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
        .send()
        .await?;
    read_token_response(resp, "refresh").await
}

async fn read_token_response(resp: reqwest::Response, what: &str) -> anyhow::Result<TokenResponse> {
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let reason = match serde_json::from_str::<TokenError>(&text) {
            Ok(e) => match e.error_description {
                Some(desc) => format!("{}: {desc}", e.error),
                None => e.error,
            },
            Err(_) => text,
        };
        anyhow::bail!("{what} failed ({status}): {reason}");
    }

    let token: TokenResponse = resp.json().await?;
    Ok(token)
}

/// Read identity claims out of an identity token.
///
/// The signature is NOT verified. The token arrives directly from the
/// provider's token endpoint over TLS, and that channel is the trust
/// boundary. Never feed this a token that came from the browser.
pub fn decode_id_token_claims(id_token: &str, name_claim: &str) -> anyhow::Result<IdentityClaims> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("identity token is not a JWT"))?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes)?;

    let email = claims
        .get("email")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("identity token has no email claim"))?;
    let display_name = claims.get(name_claim).and_then(|v| v.as_str()).unwrap_or_default();

    Ok(IdentityClaims { email: email.to_owned(), display_name: display_name.to_owned() })
}

/// Form-style encoding for URL query parameters (spaces as `+`).
fn urlencoding(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            b' ' => out.push('+'),
            _ => {
                out.push('%');
                out.push(char::from(HEX[(b >> 4) as usize]));
                out.push(char::from(HEX[(b & 0xf) as usize]));
            }
        }
    }
    out
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

#[cfg(test)]
#[path = "oauth_tests.rs"]
mod tests;
