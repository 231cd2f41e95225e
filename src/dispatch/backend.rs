//! HTTP client for the OData backend.

use crate::error::ToolError;
use crate::translate::{Action, HttpMethod};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Executes one action against the backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the decoded response body on a 2xx status.
    async fn execute(&self, action: &Action, cancel: &CancellationToken)
        -> Result<Value, ToolError>;
}

/// reqwest-backed implementation.
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::BackendUnavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, action: &Action) -> String {
        let relative = action.relative_url();
        if relative.starts_with('/') {
            format!("{}{}", self.base_url, relative)
        } else {
            format!("{}/{}", self.base_url, relative)
        }
    }

    async fn send(&self, action: &Action) -> Result<Value, ToolError> {
        let method = match action.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let url = self.url_for(action);
        debug!(method = %action.method, url = %url, "Backend request");

        let response = self
            .client
            .request(method, &url)
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ToolError::BackendError {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn execute(
        &self,
        action: &Action,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ToolError::Cancelled),
            res = self.send(action) => res,
        }
    }
}
