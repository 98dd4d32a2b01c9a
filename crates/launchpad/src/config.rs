// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::credential::ProviderConfig;
use crate::jobs::StatePartition;

/// Dashboard API for launching and monitoring jobs on a remote execution backend.
#[derive(Debug, Clone, Parser)]
#[command(name = "launchpad", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "LAUNCHPAD_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// HTTP port to listen on.
    #[arg(long, env = "LAUNCHPAD_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Public base URL of this service, used to build OAuth redirect URIs.
    #[arg(long, env = "LAUNCHPAD_BASE_URL", default_value = "http://localhost:8000")]
    pub base_url: String,

    /// SQLite database shared by all workers on this host.
    #[arg(long, env = "LAUNCHPAD_DATABASE", default_value = "launchpad.sqlite3")]
    pub database: PathBuf,

    /// Base64-encoded 32-byte key used to encrypt stored refresh tokens.
    #[arg(long, env = "LAUNCHPAD_REFRESH_TOKEN_KEY", hide_env_values = true)]
    pub refresh_token_key: String,

    /// Secret (at least 32 bytes) the session cookie key is derived from.
    #[arg(long, env = "LAUNCHPAD_COOKIE_SECRET", hide_env_values = true)]
    pub cookie_secret: String,

    /// Path to the JSON file with OAuth providers and job-state sets.
    #[arg(long, env = "LAUNCHPAD_PROVIDERS")]
    pub providers: Option<PathBuf>,

    /// Base URL of the execution backend.
    #[arg(long, env = "LAUNCHPAD_BACKEND_URL", default_value = "http://localhost:8080")]
    pub backend_url: String,

    /// Backend endpoint that issues an API key for a bearer access token.
    #[arg(
        long,
        env = "LAUNCHPAD_API_KEY_ENDPOINT",
        default_value = "/api/users/current/api_key"
    )]
    pub api_key_endpoint: String,

    /// Name of the default backend workspace; the ingest and datafile
    /// workspaces derive their names from it.
    #[arg(long, env = "LAUNCHPAD_STORE_NAME", default_value = "launchpad")]
    pub store_name: String,

    /// Backend tool used to register file inputs.
    #[arg(long, env = "LAUNCHPAD_INGEST_TOOL", default_value = "neutrons_register")]
    pub ingest_tool: String,

    /// Input key of the ingest tool that receives the file path.
    #[arg(long, env = "LAUNCHPAD_INGEST_INPUT", default_value = "series_0|input")]
    pub ingest_input: String,

    /// Input values starting with this prefix are file references.
    #[arg(long, env = "LAUNCHPAD_FILE_PREFIX", default_value = "file_")]
    pub file_prefix: String,

    /// Interval between job-id polls after submission, in milliseconds.
    #[arg(long, env = "LAUNCHPAD_JOB_POLL_MS", default_value_t = 100)]
    pub job_poll_ms: u64,

    /// Max job-id polls before a submission is reported as timed out.
    #[arg(long, env = "LAUNCHPAD_JOB_POLL_ATTEMPTS", default_value_t = 50)]
    pub job_poll_attempts: u32,

    /// Number of most recent terminal jobs considered per workspace.
    #[arg(long, env = "LAUNCHPAD_TERMINAL_WINDOW", default_value_t = 5)]
    pub terminal_window: u32,

    /// Access tokens expiring within this many seconds are refreshed.
    #[arg(long, env = "LAUNCHPAD_REFRESH_MARGIN_SECS", default_value_t = 60)]
    pub refresh_margin_secs: u64,

    /// Tool that is forced to fail, for exercising error monitoring.
    #[arg(long, env = "LAUNCHPAD_FAIL_DRILL_TOOL")]
    pub fail_drill_tool: Option<String>,

    /// Timeout for outbound HTTP calls, in milliseconds.
    #[arg(long, env = "LAUNCHPAD_HTTP_TIMEOUT_MS", default_value_t = 10_000)]
    pub http_timeout_ms: u64,

    /// Log format (json or text).
    #[arg(long, env = "LAUNCHPAD_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LAUNCHPAD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cookie_secret.len() < 32 {
            anyhow::bail!("--cookie-secret must be at least 32 bytes");
        }
        if self.job_poll_attempts == 0 {
            anyhow::bail!("--job-poll-attempts must be positive");
        }
        if self.file_prefix.is_empty() {
            anyhow::bail!("--file-prefix must not be empty");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_ms)
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Workspace that receives registered file inputs.
    pub fn ingest_store_name(&self) -> String {
        format!("{}_data", self.store_name)
    }

    /// Workspace for jobs that consume file inputs.
    pub fn datafile_store_name(&self) -> String {
        format!("{}_datafile_tools", self.store_name)
    }

    /// Build a minimal `Config` for tests.
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            base_url: "http://dashboard.test".into(),
            database: PathBuf::from(":memory:"),
            refresh_token_key: "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".into(),
            cookie_secret: "0123456789abcdef0123456789abcdef0123456789abcdef".into(),
            providers: None,
            backend_url: "http://127.0.0.1:9".into(),
            api_key_endpoint: "/api/users/current/api_key".into(),
            store_name: "launchpad".into(),
            ingest_tool: "neutrons_register".into(),
            ingest_input: "series_0|input".into(),
            file_prefix: "file_".into(),
            job_poll_ms: 5,
            job_poll_attempts: 5,
            terminal_window: 5,
            refresh_margin_secs: 60,
            fail_drill_tool: None,
            http_timeout_ms: 2_000,
            log_format: "text".into(),
            log_level: "debug".into(),
        }
    }
}

/// Contents of the `--providers` JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    /// OAuth providers keyed by provider id (`ucams`, `xcams`, ...).
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    /// Backend job-state sets. Missing means the stock Galaxy partition.
    #[serde(default)]
    pub job_states: StatePartition,
    /// Body markers that mean a job URL is not serving the job yet.
    #[serde(default = "default_placeholder_markers")]
    pub placeholder_markers: Vec<String>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
            job_states: StatePartition::default(),
            placeholder_markers: default_placeholder_markers(),
        }
    }
}

pub fn default_placeholder_markers() -> Vec<String> {
    vec!["Proxy target missing".into(), "Javascript Required for Galaxy".into()]
}

/// Load and parse the providers file at `path`.
pub fn load_file_config(path: &Path) -> anyhow::Result<FileConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: FileConfig = serde_json::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
