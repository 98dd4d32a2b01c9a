// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job reconciliation: merge the backend's view with the handles the caller
//! already knows about, and probe each job's result URL for readiness.

use std::collections::HashSet;
use std::sync::Arc;

use super::{strip_bookkeeping, JobHandle, JobSettings, JobStatus, DELETED_STATE};
use crate::backend::{BackendJob, BackendSession, ExecutionBackend, JobQuery};
use crate::credential::broker::TokenBroker;
use crate::error::{LaunchError, LaunchResult};
use crate::store::SessionState;

const ORDER_BY_CREATE_TIME: &str = "create_time";

pub struct JobReconciler {
    broker: Arc<TokenBroker>,
    backend: Arc<dyn ExecutionBackend>,
    settings: JobSettings,
}

impl JobReconciler {
    pub fn new(
        broker: Arc<TokenBroker>,
        backend: Arc<dyn ExecutionBackend>,
        settings: JobSettings,
    ) -> Self {
        Self { broker, backend, settings }
    }

    /// Current status of every active job, plus recently finished jobs the
    /// caller still tracks in `known`.
    ///
    /// A job whose URL lookup or probe fails is left out. If the backend
    /// cannot be queried at all, the cached API key is dropped and
    /// `BackendUnreachable` is returned.
    pub async fn reconcile(
        &self,
        session: &mut SessionState,
        known: &[JobHandle],
    ) -> LaunchResult<Vec<JobStatus>> {
        let api_key = self.broker.backend_api_key(session).await?;
        match self.collect(&api_key, known).await {
            Ok(statuses) => Ok(statuses),
            Err(e) => Err(self.backend_failure(session, e).await),
        }
    }

    /// Cancel `job_id`. A job that already finished is not an error here.
    pub async fn stop(&self, session: &mut SessionState, job_id: &str) -> LaunchResult<()> {
        let api_key = self.broker.backend_api_key(session).await?;
        let conn = self.backend.connect(&api_key).await?;
        conn.ensure_workspace(&self.settings.store_name).await?;
        conn.cancel_job(job_id).await
    }

    /// Confirm the user can reach the backend: derive the API key and make
    /// sure the default workspace exists.
    pub async fn check_backend_access(&self, session: &mut SessionState) -> LaunchResult<()> {
        let api_key = match self.broker.backend_api_key(session).await {
            Ok(key) => key,
            Err(e) => {
                if let Err(clear) = self.broker.invalidate_backend_api_key(session).await {
                    tracing::warn!(err = %clear, "failed to clear backend API key");
                }
                return Err(e);
            }
        };

        let checked = async {
            let conn = self.backend.connect(&api_key).await?;
            conn.ensure_workspace(&self.settings.store_name).await?;
            Ok::<(), LaunchError>(())
        }
        .await;
        match checked {
            Ok(()) => Ok(()),
            Err(e) => Err(self.backend_failure(session, e).await),
        }
    }

    async fn backend_failure(&self, session: &mut SessionState, err: LaunchError) -> LaunchError {
        tracing::error!(err = %err, "failed to reach backend");
        if let Err(clear) = self.broker.invalidate_backend_api_key(session).await {
            tracing::warn!(err = %clear, "failed to clear backend API key");
        }
        let message = match err {
            LaunchError::BackendUnreachable { message } => message,
            other => other.to_string(),
        };
        LaunchError::BackendUnreachable { message }
    }

    async fn collect(&self, api_key: &str, known: &[JobHandle]) -> LaunchResult<Vec<JobStatus>> {
        let conn = self.backend.connect(api_key).await?;
        let default_ws = conn.ensure_workspace(&self.settings.store_name).await?;
        let datafile_ws = conn.ensure_workspace(&self.settings.datafile_store_name).await?;

        let known_ids: HashSet<&str> = known.iter().map(|h| h.job_id.as_str()).collect();
        let states = &self.settings.states;
        let active_query = JobQuery { states: states.non_terminal.clone(), ..JobQuery::default() };
        let recent_query = JobQuery {
            states: states.terminal.clone(),
            limit: Some(self.settings.terminal_window),
            order_by: Some(ORDER_BY_CREATE_TIME.to_owned()),
        };

        let mut candidates: Vec<(BackendJob, bool)> = Vec::new();
        for (ws, is_datafile) in [(&default_ws, false), (&datafile_ws, true)] {
            let active = conn.list_jobs(ws, &active_query).await?;
            candidates.extend(
                active
                    .into_iter()
                    .filter(|j| states.is_non_terminal(&j.state))
                    .map(|j| (j, is_datafile)),
            );

            // Finished jobs only matter while the caller still shows them.
            let recent = conn.list_jobs(ws, &recent_query).await?;
            candidates.extend(
                recent
                    .into_iter()
                    .filter(|j| known_ids.contains(j.id.as_str()))
                    .map(|j| (j, is_datafile)),
            );
        }

        let mut seen = HashSet::new();
        candidates.retain(|(j, _)| j.state != DELETED_STATE && seen.insert(j.id.clone()));

        let mut statuses = Vec::with_capacity(candidates.len());
        for (job, is_datafile) in candidates {
            match self.status_of(conn.as_ref(), &job, is_datafile).await {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    tracing::debug!(job_id = %job.id, err = %e, "skipping job");
                }
            }
        }
        Ok(statuses)
    }

    async fn status_of(
        &self,
        conn: &dyn BackendSession,
        job: &BackendJob,
        is_datafile: bool,
    ) -> LaunchResult<JobStatus> {
        let parameters = if is_datafile {
            Some(strip_bookkeeping(conn.job_parameters(&job.id).await?))
        } else {
            None
        };

        let (url, url_ready) = match conn.entry_point_url(&job.id).await? {
            Some(url) => {
                let probe = conn.probe(&url).await?;
                let ready = (200..300).contains(&probe.status)
                    && !self.settings.placeholder_markers.iter().any(|m| probe.body.contains(m));
                (url, ready)
            }
            None => (String::new(), false),
        };

        Ok(JobStatus {
            job_id: job.id.clone(),
            tool_id: job.tool_id.clone(),
            state: job.state.clone(),
            url,
            url_ready,
            is_datafile_tool: is_datafile,
            parameters,
        })
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
