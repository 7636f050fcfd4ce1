// crates/core/src/backend.rs
//! RunBackend trait and its HTTP implementation.

use async_trait::async_trait;
use runwatch_types::{RunId, StatusRecord};
use serde::Serialize;
use serde_json::Value;

use crate::config::BackendConfig;
use crate::error::BackendError;

/// Request/response operations the poll watcher needs from the backend.
///
/// Implementations include:
/// - `HttpRunBackend`: REST calls via `reqwest`
/// - scripted fakes in the watcher tests
#[async_trait]
pub trait RunBackend: Send + Sync {
    /// Single-shot status fetch for one run.
    async fn fetch_status(&self, run_id: &RunId) -> Result<StatusRecord, BackendError>;

    /// Acknowledge that the human completed the pending action.
    ///
    /// `action_type` is the waiting record's `user_action_required`, passed
    /// through unchanged. Backends may answer with the updated record.
    async fn confirm_action(
        &self,
        run_id: &RunId,
        action_type: Option<&str>,
        payload: Option<Value>,
    ) -> Result<Option<StatusRecord>, BackendError>;
}

/// Body of `POST /runs/{id}/confirm-action`.
#[derive(Debug, Serialize)]
struct ConfirmActionBody<'a> {
    action_type: Option<&'a str>,
    payload: Option<Value>,
}

/// REST backend: `GET {api}/runs/{id}/status`, `POST {api}/runs/{id}/confirm-action`.
#[derive(Debug, Clone)]
pub struct HttpRunBackend {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl HttpRunBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| BackendError::Http {
                url: config.api_url.clone(),
                source,
            })?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn run_url(&self, run_id: &RunId, suffix: &str) -> String {
        format!(
            "{}/runs/{}/{}",
            self.api_url,
            urlencoding::encode(run_id.as_str()),
            suffix
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send the request and return the body of a 2xx response.
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<String, BackendError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|source| BackendError::Http {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| BackendError::Http {
            url: url.to_string(),
            source,
        })?;

        match status.as_u16() {
            401 | 403 => Err(BackendError::Unauthorized {
                status: status.as_u16(),
            }),
            _ if !status.is_success() => Err(BackendError::Status {
                status: status.as_u16(),
                body,
            }),
            _ => Ok(body),
        }
    }
}

#[async_trait]
impl RunBackend for HttpRunBackend {
    async fn fetch_status(&self, run_id: &RunId) -> Result<StatusRecord, BackendError> {
        let url = self.run_url(run_id, "status");
        let body = self.execute(self.client.get(&url), &url).await?;
        serde_json::from_str(&body).map_err(|e| BackendError::Decode {
            url,
            message: e.to_string(),
        })
    }

    async fn confirm_action(
        &self,
        run_id: &RunId,
        action_type: Option<&str>,
        payload: Option<Value>,
    ) -> Result<Option<StatusRecord>, BackendError> {
        let url = self.run_url(run_id, "confirm-action");
        let request = self.client.post(&url).json(&ConfirmActionBody {
            action_type,
            payload,
        });
        let body = self.execute(request, &url).await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| BackendError::Decode {
                url,
                message: e.to_string(),
            })
    }
}
