// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job submission and reconciliation against the execution backend.
//!
//! No job registry is kept in process memory. The caller's known-handle set
//! plus the backend's own job queries are the only source of which jobs
//! matter.

pub mod reconcile;
pub mod submit;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{Config, FileConfig};

pub use reconcile::JobReconciler;
pub use submit::JobSubmitter;

/// State a job enters once the user deletes it; never reported.
pub const DELETED_STATE: &str = "deleted";

/// Parameters the backend adds to every job on its own behalf.
const BOOKKEEPING_PARAMS: &[&str] = &["chromInfo", "dbkey"];

/// One tool input as submitted by the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputValue {
    Literal(Value),
    /// Reference handed verbatim to the ingestion tool.
    File(String),
}

impl InputValue {
    /// Classify a wire value: strings starting with `file_prefix` are file
    /// references, everything else passes through.
    pub fn from_wire(value: Value, file_prefix: &str) -> Self {
        match value {
            Value::String(s) if s.starts_with(file_prefix) => Self::File(s),
            other => Self::Literal(other),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

pub type JobInputs = BTreeMap<String, InputValue>;

/// Backend-assigned job id plus the tool it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    pub tool_id: String,
}

/// Normalized view of one job, as returned by reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub tool_id: String,
    pub state: String,
    pub url: String,
    pub url_ready: bool,
    pub is_datafile_tool: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
}

/// Terminal / non-terminal partition of backend job states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePartition {
    pub terminal: Vec<String>,
    pub non_terminal: Vec<String>,
}

impl Default for StatePartition {
    fn default() -> Self {
        let owned = |states: &[&str]| states.iter().map(|s| (*s).to_owned()).collect();
        Self {
            terminal: owned(&["deleted", "deleting", "error", "ok"]),
            non_terminal: owned(&[
                "deleted_new",
                "failed",
                "new",
                "paused",
                "queued",
                "resubmitted",
                "running",
                "upload",
                "waiting",
            ]),
        }
    }
}

impl StatePartition {
    pub fn is_terminal(&self, state: &str) -> bool {
        self.terminal.iter().any(|s| s == state)
    }

    pub fn is_non_terminal(&self, state: &str) -> bool {
        self.non_terminal.iter().any(|s| s == state)
    }
}

/// Drop parameters the backend injects for its own bookkeeping.
pub fn strip_bookkeeping(params: Map<String, Value>) -> Map<String, Value> {
    params
        .into_iter()
        .filter(|(k, _)| !k.starts_with("__") && !BOOKKEEPING_PARAMS.contains(&k.as_str()))
        .collect()
}

/// Knobs shared by the submitter and the reconciler.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub store_name: String,
    pub ingest_store_name: String,
    pub datafile_store_name: String,
    pub ingest_tool: String,
    pub ingest_input: String,
    pub file_prefix: String,
    pub poll_interval: Duration,
    pub poll_attempts: u32,
    pub terminal_window: u32,
    pub fail_drill_tool: Option<String>,
    pub states: StatePartition,
    pub placeholder_markers: Vec<String>,
}

impl JobSettings {
    pub fn from_config(config: &Config, file: &FileConfig) -> Self {
        Self {
            store_name: config.store_name.clone(),
            ingest_store_name: config.ingest_store_name(),
            datafile_store_name: config.datafile_store_name(),
            ingest_tool: config.ingest_tool.clone(),
            ingest_input: config.ingest_input.clone(),
            file_prefix: config.file_prefix.clone(),
            poll_interval: config.job_poll_interval(),
            poll_attempts: config.job_poll_attempts,
            terminal_window: config.terminal_window,
            fail_drill_tool: config.fail_drill_tool.clone(),
            states: file.job_states.clone(),
            placeholder_markers: file.placeholder_markers.clone(),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
