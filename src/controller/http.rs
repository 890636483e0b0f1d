//! HTTP/JSON controller link.
//!
//! Calls map onto three endpoints under the controller's base URL:
//!
//! - `POST {base}/api/tasks/{task}/jobs/{job}/completion` with [`CompletionUpdate`]
//! - `POST {base}/api/tasks/{task}/jobs/{job}/result` with a [`JobResult`]
//! - `POST {base}/api/tasks/{task}/jobs/{job}/error` with [`ErrorReport`]
//!
//! Any non-2xx response is a [`ControllerError::Rejected`]. There is no retry;
//! the reporter logs the failure and moves on.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::controller::{ControllerLink, JobResult};
use crate::error::ControllerError;
use crate::scheduler::{JobId, JobStatus, TaskId};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionUpdate {
    pub status: JobStatus,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct HttpControllerLink {
    client: reqwest::Client,
    base: String,
}

impl HttpControllerLink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ControllerError> {
        let parsed = reqwest::Url::parse(base_url)
            .map_err(|e| ControllerError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ControllerError::InvalidUrl(format!(
                "{}: unsupported scheme '{}'",
                base_url,
                parsed.scheme()
            )));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn endpoint(&self, task_id: TaskId, job_id: JobId, call: &str) -> String {
        format!("{}/api/tasks/{}/jobs/{}/{}", self.base, task_id, job_id, call)
    }

    async fn post<T>(&self, url: String, body: &T) -> Result<(), ControllerError>
    where
        T: Serialize + ?Sized,
    {
        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url, status = status.as_u16(), "Controller rejected call");
            return Err(ControllerError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl ControllerLink for HttpControllerLink {
    async fn update_job_completion_rate(
        &self,
        task_id: TaskId,
        job_id: JobId,
        status: JobStatus,
        rate: f64,
    ) -> Result<(), ControllerError> {
        let url = self.endpoint(task_id, job_id, "completion");
        self.post(url, &CompletionUpdate { status, rate }).await
    }

    async fn set_job_result(
        &self,
        task_id: TaskId,
        job_id: JobId,
        result: JobResult,
    ) -> Result<(), ControllerError> {
        let url = self.endpoint(task_id, job_id, "result");
        self.post(url, &result).await
    }

    async fn set_job_error_message(
        &self,
        task_id: TaskId,
        job_id: JobId,
        message: String,
    ) -> Result<(), ControllerError> {
        let url = self.endpoint(task_id, job_id, "error");
        self.post(url, &ErrorReport { message }).await
    }
}
