//! HTTP client for remote render services.
//!
//! Protocol:
//! - `POST {base}/jobs` with the request body → `{"jobId": "..."}`
//! - `GET {base}/jobs/{jobId}` → `{"status", "progress", "outputLocation", "sizeInBytes", "error"}`
//! - `DELETE {base}/jobs/{jobId}` cancels
//!
//! Status is polled at a fixed interval until the job reaches a terminal
//! state. A few consecutive poll failures are tolerated before the job is
//! given up on.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};
use vrender_models::{RenderRequest, RequestId};

use crate::backend::{BackendOutput, BackendProgress, RenderBackend};
use crate::error::BackendError;

/// Configuration of one remote render service.
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Backend name used in logs and results
    pub name: String,
    /// Service base URL (no trailing slash needed)
    pub base_url: String,
    /// Status poll cadence
    pub poll_interval: Duration,
    /// Timeout of each individual HTTP call
    pub request_timeout: Duration,
    /// Consecutive poll failures tolerated before giving up
    pub max_poll_failures: u32,
    /// Optional bearer token
    pub auth_token: Option<String>,
}

impl HttpBackendConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
            max_poll_failures: 3,
            auth_token: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn jobs_url(&self) -> String {
        format!("{}/jobs", self.base_url)
    }

    fn job_url(&self, job_id: &str) -> String {
        format!("{}/jobs/{}", self.base_url, job_id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    #[serde(alias = "job_id")]
    job_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum JobState {
    Queued,
    Running,
    #[serde(alias = "completed")]
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    status: JobState,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default, alias = "output_location")]
    output_location: Option<String>,
    #[serde(default, alias = "size_in_bytes")]
    size_in_bytes: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

/// Tracks consecutive poll failures.
#[derive(Debug)]
struct FailureTracker {
    consecutive_failures: u32,
    max_failures: u32,
}

impl FailureTracker {
    fn new(max_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_failures: max_failures.max(1),
        }
    }

    fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            debug!(
                "Status polling recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    /// Returns `true` once the failure budget is exhausted.
    fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        self.consecutive_failures >= self.max_failures
    }
}

/// Render backend talking to a remote job service over HTTP.
pub struct HttpRenderBackend {
    config: HttpBackendConfig,
    client: reqwest::Client,
    /// Remote job id per in-flight request, for cancellation
    jobs: Mutex<HashMap<RequestId, String>>,
}

impl HttpRenderBackend {
    pub fn new(config: HttpBackendConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: HttpBackendConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.timeout(self.config.request_timeout);
        match &self.config.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn create_job(&self, request: &RenderRequest) -> Result<String, BackendError> {
        let response = self
            .authorize(self.client.post(self.config.jobs_url()))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::failed(format!(
                "job submission rejected with HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| BackendError::invalid_response(format!("submit response: {}", e)))?;
        Ok(submitted.job_id)
    }

    async fn fetch_status(&self, job_id: &str) -> Result<JobStatus, BackendError> {
        let response = self
            .authorize(self.client.get(self.config.job_url(job_id)))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::failed(format!(
                "status poll returned HTTP {}",
                status.as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::invalid_response(format!("status response: {}", e)))
    }

    async fn wait_for_job(&self, job_id: &str, progress: &BackendProgress) -> Result<BackendOutput, BackendError> {
        let mut tracker = FailureTracker::new(self.config.max_poll_failures);
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;

            let status = match self.fetch_status(job_id).await {
                Ok(status) => {
                    tracker.record_success();
                    status
                }
                Err(e) => {
                    if tracker.record_failure() {
                        return Err(BackendError::failed(format!(
                            "lost contact with job {} after {} failed polls: {}",
                            job_id, tracker.consecutive_failures, e
                        )));
                    }
                    warn!(
                        backend = %self.config.name,
                        job_id = %job_id,
                        failures = tracker.consecutive_failures,
                        "Status poll failed: {}", e
                    );
                    continue;
                }
            };

            if let Some(pct) = status.progress {
                progress(pct.clamp(0.0, 100.0));
            }

            match status.status {
                JobState::Queued | JobState::Running => continue,
                JobState::Succeeded => {
                    let output_location = status.output_location.ok_or_else(|| {
                        BackendError::invalid_response("succeeded job has no outputLocation")
                    })?;
                    progress(100.0);
                    return Ok(BackendOutput {
                        output_location,
                        size_in_bytes: status.size_in_bytes,
                        job_id: Some(job_id.to_string()),
                    });
                }
                JobState::Failed => {
                    return Err(BackendError::failed(
                        status.error.unwrap_or_else(|| "render job failed".to_string()),
                    ));
                }
                JobState::Cancelled => {
                    return Err(BackendError::failed("job cancelled by render service"));
                }
            }
        }
    }

    fn track(&self, request_id: &RequestId, job_id: &str) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id.clone(), job_id.to_string());
    }

    fn untrack(&self, request_id: &RequestId) -> Option<String> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(request_id)
    }
}

#[async_trait]
impl RenderBackend for HttpRenderBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn submit(
        &self,
        request: &RenderRequest,
        progress: BackendProgress,
    ) -> Result<BackendOutput, BackendError> {
        let job_id = self.create_job(request).await?;
        info!(
            backend = %self.config.name,
            request_id = %request.id,
            job_id = %job_id,
            "Render job submitted"
        );

        self.track(&request.id, &job_id);
        let result = self.wait_for_job(&job_id, &progress).await;
        self.untrack(&request.id);
        result
    }

    async fn cancel(&self, request_id: &RequestId) -> Result<(), BackendError> {
        let Some(job_id) = self.untrack(request_id) else {
            return Ok(());
        };

        let response = self
            .authorize(self.client.delete(self.config.job_url(&job_id)))
            .send()
            .await?;

        if response.status().is_success() {
            info!(backend = %self.config.name, job_id = %job_id, "Render job cancelled");
            Ok(())
        } else {
            Err(BackendError::failed(format!(
                "cancel of job {} returned HTTP {}",
                job_id,
                response.status().as_u16()
            )))
        }
    }
}
