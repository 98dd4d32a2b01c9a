// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential brokering: OAuth handshake, encrypted refresh-token storage,
//! on-demand access-token renewal and backend API-key derivation.
//!
//! Every piece of state that has to survive a redirect round trip or a
//! different worker picking up the next request lives in the
//! [`StateStore`](crate::store::StateStore); nothing here caches in memory.

pub mod broker;
pub mod identity;
pub mod oauth;
pub mod vault;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Configuration for a single OAuth provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Consent page the browser is sent to.
    pub auth_url: String,
    /// Endpoint for code exchange and refresh.
    pub token_url: String,
    /// Space-separated scopes.
    #[serde(default = "default_scopes")]
    pub scopes: String,
    /// Callback path relative to the service base URL, without leading slash.
    pub redirect_path: String,
    /// Claim in the identity token holding the user's display name.
    #[serde(default = "default_name_claim")]
    pub name_claim: String,
    /// Human-readable label for login buttons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

fn default_scopes() -> String {
    "openid email profile".to_owned()
}

fn default_name_claim() -> String {
    "given_name".to_owned()
}

impl ProviderConfig {
    pub fn redirect_uri(&self, base_url: &str) -> String {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            self.redirect_path.trim_start_matches('/')
        )
    }
}

/// Identity claims decoded from a provider's identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub email: String,
    pub display_name: String,
}

/// Length of the handshake correlator in characters.
pub const HANDSHAKE_TOKEN_LEN: usize = 128;

/// Generate a single-use handshake token (96 random bytes, 128 URL-safe chars).
pub fn generate_handshake_token() -> String {
    let mut bytes = [0u8; HANDSHAKE_TOKEN_LEN / 4 * 3];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Current wall-clock time in epoch seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
