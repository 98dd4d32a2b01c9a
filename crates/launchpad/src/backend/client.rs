// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for a Galaxy-style execution backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{BackendJob, BackendSession, ExecutionBackend, JobQuery, ProbeResponse, ToolRun};
use crate::error::{LaunchError, LaunchResult};

const API_KEY_HEADER: &str = "x-api-key";

/// Backend reached over its REST API.
pub struct HttpBackend {
    base_url: String,
    client: Client,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();
        Self { base_url: base_url.trim_end_matches('/').to_owned(), client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ExecutionBackend for HttpBackend {
    async fn connect(&self, api_key: &str) -> LaunchResult<Box<dyn BackendSession>> {
        if api_key.is_empty() {
            return Err(LaunchError::Backend("no API key for backend session".into()));
        }
        Ok(Box::new(HttpSession {
            base_url: self.base_url.clone(),
            api_key: api_key.to_owned(),
            client: self.client.clone(),
        }))
    }
}

/// One user's connection, dropped at the end of the operation that opened it.
struct HttpSession {
    base_url: String,
    api_key: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct Workspace {
    id: String,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ToolRunResponse {
    #[serde(default)]
    jobs: Vec<IdOnly>,
    #[serde(default)]
    outputs: Vec<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct DatasetResponse {
    #[serde(default)]
    creating_job: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobDetail {
    #[serde(default)]
    params: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct EntryPoint {
    #[serde(default)]
    target: Option<String>,
}

fn unreachable(e: reqwest::Error) -> LaunchError {
    LaunchError::BackendUnreachable { message: e.to_string() }
}

/// `id` as a single URL path segment. Only unreserved characters pass.
fn path_segment(id: &str) -> LaunchResult<&str> {
    let unreserved = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~');
    if id.is_empty() || id == "." || id == ".." || !id.chars().all(unreserved) {
        return Err(LaunchError::InvalidRequest(format!("malformed backend id {id:?}")));
    }
    Ok(id)
}

/// Whether `url` shares scheme, host and port with `base`.
fn same_origin(base: &str, url: &str) -> bool {
    match (Url::parse(base), Url::parse(url)) {
        (Ok(base), Ok(url)) => base.origin().is_tuple() && base.origin() == url.origin(),
        _ => false,
    }
}

impl HttpSession {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn absolute(&self, target: &str) -> String {
        if target.starts_with('/') {
            self.url(target)
        } else {
            target.to_owned()
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> LaunchResult<reqwest::Response> {
        let resp = req.header(API_KEY_HEADER, &self.api_key).send().await.map_err(unreachable)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LaunchError::Backend(format!("{what} returned {status}: {text}")));
        }
        Ok(resp)
    }

    async fn json<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        what: &str,
    ) -> LaunchResult<T> {
        let resp = self.send(req, what).await?;
        resp.json()
            .await
            .map_err(|e| LaunchError::Backend(format!("{what} returned unexpected body: {e}")))
    }
}

#[async_trait]
impl BackendSession for HttpSession {
    async fn ensure_workspace(&self, name: &str) -> LaunchResult<String> {
        let req = self.client.get(self.url("/api/histories")).query(&[("q", "name"), ("qv", name)]);
        let existing: Vec<Workspace> = self.json(req, "list histories").await?;
        if let Some(ws) = existing.into_iter().next() {
            return Ok(ws.id);
        }

        let req = self.client.post(self.url("/api/histories")).json(&serde_json::json!({ "name": name }));
        let created: Workspace = self.json(req, "create history").await?;
        tracing::info!(workspace = name, id = %created.id, "created backend workspace");
        Ok(created.id)
    }

    async fn run_tool(
        &self,
        workspace_id: &str,
        tool_id: &str,
        inputs: &Map<String, Value>,
    ) -> LaunchResult<ToolRun> {
        let body = serde_json::json!({
            "tool_id": tool_id,
            "history_id": workspace_id,
            "inputs": inputs,
        });
        let req = self.client.post(self.url("/api/tools")).json(&body);
        let run: ToolRunResponse = self.json(req, "run tool").await?;
        Ok(ToolRun {
            job_id: run.jobs.into_iter().next().map(|j| j.id),
            output_ids: run.outputs.into_iter().map(|o| o.id).collect(),
        })
    }

    async fn creating_job(&self, dataset_id: &str) -> LaunchResult<Option<String>> {
        let path = format!("/api/datasets/{}", path_segment(dataset_id)?);
        let req = self.client.get(self.url(&path));
        let dataset: DatasetResponse = self.json(req, "show dataset").await?;
        Ok(dataset.creating_job.filter(|id| !id.is_empty()))
    }

    async fn list_jobs(
        &self,
        workspace_id: &str,
        query: &JobQuery,
    ) -> LaunchResult<Vec<BackendJob>> {
        let mut params: Vec<(&str, String)> = vec![("history_id", workspace_id.to_owned())];
        params.extend(query.states.iter().map(|s| ("state", s.clone())));
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(ref order_by) = query.order_by {
            params.push(("order_by", order_by.clone()));
        }
        let req = self.client.get(self.url("/api/jobs")).query(&params);
        self.json(req, "list jobs").await
    }

    async fn job_parameters(&self, job_id: &str) -> LaunchResult<Map<String, Value>> {
        let req = self
            .client
            .get(self.url(&format!("/api/jobs/{}", path_segment(job_id)?)))
            .query(&[("full", "true")]);
        let detail: JobDetail = self.json(req, "show job").await?;
        Ok(detail.params)
    }

    async fn entry_point_url(&self, job_id: &str) -> LaunchResult<Option<String>> {
        let req = self.client.get(self.url("/api/entry_points")).query(&[("job_id", job_id)]);
        let points: Vec<EntryPoint> = self.json(req, "list entry points").await?;
        Ok(points
            .into_iter()
            .filter_map(|p| p.target)
            .find(|t| !t.is_empty())
            .map(|t| self.absolute(&t)))
    }

    async fn probe(&self, url: &str) -> LaunchResult<ProbeResponse> {
        let mut req = self.client.get(url);
        // Only the backend's own origin gets the key.
        if same_origin(&self.base_url, url) {
            req = req.header(API_KEY_HEADER, &self.api_key);
        }
        let resp = req.send().await.map_err(unreachable)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(unreachable)?;
        Ok(ProbeResponse { status, body })
    }

    async fn cancel_job(&self, job_id: &str) -> LaunchResult<()> {
        let path = format!("/api/jobs/{}", path_segment(job_id)?);
        let req = self.client.delete(self.url(&path));
        self.send(req, "cancel job").await?;
        tracing::info!(job_id, "cancelled backend job");
        Ok(())
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
