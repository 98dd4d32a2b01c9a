// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution backend interface.
//!
//! [`ExecutionBackend`] is selected once at startup. Each core operation
//! acquires a [`BackendSession`] bound to one API key, uses it for the
//! duration of the call, and drops it when done. Nothing about the backend
//! connection outlives a request.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LaunchResult;

pub use client::HttpBackend;

/// A job as listed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendJob {
    pub id: String,
    #[serde(default)]
    pub tool_id: String,
    pub state: String,
}

/// Outcome of a tool submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolRun {
    /// Job id, when the backend assigned one synchronously.
    pub job_id: Option<String>,
    /// Ids of the datasets the run will produce.
    pub output_ids: Vec<String>,
}

/// Filter for job listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobQuery {
    pub states: Vec<String>,
    pub limit: Option<u32>,
    pub order_by: Option<String>,
}

/// Response to a readiness probe of a job's result URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Open a session authenticated by `api_key`.
    async fn connect(&self, api_key: &str) -> LaunchResult<Box<dyn BackendSession>>;
}

/// Operations available while connected to the backend as one user.
///
/// Transport failures surface as `BackendUnreachable`; a response the
/// backend rejected surfaces as `Backend`.
#[async_trait]
pub trait BackendSession: Send + Sync {
    /// Id of the workspace called `name`, creating it if missing.
    async fn ensure_workspace(&self, name: &str) -> LaunchResult<String>;

    async fn run_tool(
        &self,
        workspace_id: &str,
        tool_id: &str,
        inputs: &Map<String, Value>,
    ) -> LaunchResult<ToolRun>;

    /// Job that produces `dataset_id`, once the backend has scheduled it.
    async fn creating_job(&self, dataset_id: &str) -> LaunchResult<Option<String>>;

    async fn list_jobs(&self, workspace_id: &str, query: &JobQuery)
        -> LaunchResult<Vec<BackendJob>>;

    /// Parameters the job was submitted with.
    async fn job_parameters(&self, job_id: &str) -> LaunchResult<Map<String, Value>>;

    /// Result or proxy URL for the job, if it exposes one.
    async fn entry_point_url(&self, job_id: &str) -> LaunchResult<Option<String>>;

    async fn probe(&self, url: &str) -> LaunchResult<ProbeResponse>;

    async fn cancel_job(&self, job_id: &str) -> LaunchResult<()>;
}
