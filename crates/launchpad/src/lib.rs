// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod backend;
pub mod config;
pub mod credential;
pub mod error;
pub mod jobs;
pub mod run;
pub mod store;
pub mod test_support;
pub mod transport;

pub use run::ensure_crypto_provider;
