// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job submission: stage file inputs, launch the tool, wait for its job id.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::{InputValue, JobHandle, JobInputs, JobSettings};
use crate::backend::{BackendSession, ExecutionBackend, ToolRun};
use crate::credential::broker::TokenBroker;
use crate::error::{LaunchError, LaunchResult};
use crate::store::SessionState;

/// Extra input that makes the failure-drill tool fail on purpose.
const FAIL_DRILL_INPUT: (&str, &str) = ("command_mode|command", "fail");

pub struct JobSubmitter {
    broker: Arc<TokenBroker>,
    backend: Arc<dyn ExecutionBackend>,
    settings: JobSettings,
}

impl JobSubmitter {
    pub fn new(
        broker: Arc<TokenBroker>,
        backend: Arc<dyn ExecutionBackend>,
        settings: JobSettings,
    ) -> Self {
        Self { broker, backend, settings }
    }

    /// Launch `tool_id` for the user behind `session`.
    ///
    /// Every file input is registered first; if any registration fails,
    /// nothing is submitted.
    pub async fn submit(
        &self,
        session: &mut SessionState,
        tool_id: &str,
        inputs: &JobInputs,
    ) -> LaunchResult<JobHandle> {
        let api_key = self.broker.backend_api_key(session).await?;
        let conn = self.backend.connect(&api_key).await?;

        let has_files = inputs.values().any(InputValue::is_file);
        let ingest_ws = if has_files {
            Some(conn.ensure_workspace(&self.settings.ingest_store_name).await?)
        } else {
            None
        };

        let mut params = Map::new();
        for (name, value) in inputs {
            let resolved = match (value, ingest_ws.as_deref()) {
                (InputValue::Literal(v), _) => v.clone(),
                (InputValue::File(reference), Some(ws)) => {
                    let id = self.register_file(conn.as_ref(), ws, name, reference).await?;
                    json!({ "src": "hda", "id": id })
                }
                (InputValue::File(_), None) => {
                    return Err(LaunchError::InputRegistrationFailed { parameter: name.clone() })
                }
            };
            params.insert(name.clone(), resolved);
        }

        if self.settings.fail_drill_tool.as_deref() == Some(tool_id) {
            let (key, value) = FAIL_DRILL_INPUT;
            params.insert(key.to_owned(), Value::String(value.to_owned()));
        }

        let ws_name = if has_files {
            &self.settings.datafile_store_name
        } else {
            &self.settings.store_name
        };
        let ws = conn.ensure_workspace(ws_name).await?;
        let run = conn.run_tool(&ws, tool_id, &params).await?;
        let job_id = self.wait_for_job_id(conn.as_ref(), tool_id, run).await?;

        tracing::info!(tool_id, job_id = %job_id, workspace = %ws_name, "job submitted");
        Ok(JobHandle { job_id, tool_id: tool_id.to_owned() })
    }

    async fn register_file(
        &self,
        conn: &dyn BackendSession,
        ingest_ws: &str,
        parameter: &str,
        reference: &str,
    ) -> LaunchResult<String> {
        let mut inputs = Map::new();
        inputs.insert(self.settings.ingest_input.clone(), Value::String(reference.to_owned()));

        let failed = || LaunchError::InputRegistrationFailed { parameter: parameter.to_owned() };
        match conn.run_tool(ingest_ws, &self.settings.ingest_tool, &inputs).await {
            Ok(run) => run.output_ids.into_iter().next().ok_or_else(failed),
            Err(LaunchError::Backend(msg)) => {
                tracing::warn!(parameter, err = %msg, "file registration rejected");
                Err(failed())
            }
            Err(e) => Err(e),
        }
    }

    /// Poll until the backend has assigned a job id, bounded by the
    /// configured attempts.
    async fn wait_for_job_id(
        &self,
        conn: &dyn BackendSession,
        tool_id: &str,
        run: ToolRun,
    ) -> LaunchResult<String> {
        if let Some(id) = run.job_id {
            return Ok(id);
        }
        let timed_out = || LaunchError::SubmissionTimedOut { tool_id: tool_id.to_owned() };
        let Some(output) = run.output_ids.first() else {
            tracing::warn!(tool_id, "run reported neither a job nor outputs");
            return Err(timed_out());
        };

        for attempt in 0..self.settings.poll_attempts {
            match conn.creating_job(output).await {
                Ok(Some(id)) => return Ok(id),
                Ok(None) => {}
                Err(LaunchError::Backend(msg)) => {
                    tracing::debug!(tool_id, attempt, err = %msg, "job id not available yet");
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }

        tracing::warn!(tool_id, attempts = self.settings.poll_attempts, "no job id assigned");
        Err(timed_out())
    }
}

#[cfg(test)]
#[path = "submit_tests.rs"]
mod tests;
