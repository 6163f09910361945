//! Client for the remote recurrence-materialization job.
//!
//! Large series are expanded and persisted server side. The engine posts the
//! raw form and gets back how many events were created. Timeouts come from
//! configuration; retries belong to the caller.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::EventForm;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("decode: {0}")]
    Decode(String),
}

/// Response body of a successful job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReceipt {
    pub created_count: u32,
    /// Id assigned by the remote document store; opaque to the engine.
    pub first_id: Option<String>,
}

#[async_trait]
pub trait RecurrenceJobClient: Send + Sync {
    async fn submit(&self, form: &EventForm) -> Result<JobReceipt, RemoteError>;
}

pub struct HttpRecurrenceJobClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRecurrenceJobClient {
    /// `base_url` without trailing slash, e.g. `https://jobs.example.com`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/recurrence-job", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RecurrenceJobClient for HttpRecurrenceJobClient {
    async fn submit(&self, form: &EventForm) -> Result<JobReceipt, RemoteError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(form)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<JobReceipt>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}
