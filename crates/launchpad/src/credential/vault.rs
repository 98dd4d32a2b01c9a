// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated encryption of refresh tokens at rest.
//!
//! Ciphertext is `base64url(nonce || sealed)` where `sealed` is the
//! AES-256-GCM output with its 16-byte tag appended. Every encryption draws a
//! fresh random nonce.

use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::Rng;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};

use crate::error::{LaunchError, LaunchResult};

/// Key length in bytes.
pub const KEY_LEN: usize = 32;

#[derive(Debug)]
pub struct CredentialVault {
    key: LessSafeKey,
}

impl CredentialVault {
    pub fn new(key: &[u8; KEY_LEN]) -> LaunchResult<Self> {
        let unbound = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| LaunchError::Config("invalid refresh token key".into()))?;
        Ok(Self { key: LessSafeKey::new(unbound) })
    }

    /// Parse a base64 (standard or URL-safe) encoded 32-byte key.
    pub fn from_base64(encoded: &str) -> LaunchResult<Self> {
        let encoded = encoded.trim();
        let bytes = STANDARD
            .decode(encoded)
            .or_else(|_| URL_SAFE.decode(encoded))
            .map_err(|e| LaunchError::Config(format!("refresh token key is not base64: {e}")))?;
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            LaunchError::Config(format!(
                "refresh token key must be {KEY_LEN} bytes, got {}",
                b.len()
            ))
        })?;
        Self::new(&key)
    }

    pub fn encrypt(&self, plaintext: &str) -> LaunchResult<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce_bytes);

        let mut sealed = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut sealed,
            )
            .map_err(|_| LaunchError::Config("refresh token encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Fails with [`LaunchError::CredentialCorrupt`] for anything this key
    /// did not produce.
    pub fn decrypt(&self, ciphertext: &str) -> LaunchResult<String> {
        let raw = URL_SAFE_NO_PAD
            .decode(ciphertext.trim())
            .map_err(|_| LaunchError::CredentialCorrupt)?;
        if raw.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(LaunchError::CredentialCorrupt);
        }

        let (nonce_bytes, sealed) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| LaunchError::CredentialCorrupt)?;
        let mut buf = sealed.to_vec();
        let plain = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut buf)
            .map_err(|_| LaunchError::CredentialCorrupt)?;

        String::from_utf8(plain.to_vec()).map_err(|_| LaunchError::CredentialCorrupt)
    }
}

#[cfg(test)]
#[path = "vault_tests.rs"]
mod tests;
