use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use reqwest::header::CONTENT_TYPE;

use super::error::ProxyError;

/// Where cache misses are sent.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Forwards a chat-completion request body verbatim and returns the raw
    /// response body.
    async fn complete(&self, body: Bytes) -> Result<Bytes, ProxyError>;
}

/// The supervised backend's OpenAI-compatible HTTP endpoint.
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBackend {
    /// `timeout` bounds the whole round trip; `None` waits indefinitely.
    pub fn new(host: &str, port: u16, timeout: Option<Duration>) -> reqwest::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            endpoint: format!("http://{host}:{port}/v1/chat/completions"),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionBackend for HttpBackend {
    async fn complete(&self, body: Bytes) -> Result<Bytes, ProxyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| ProxyError::backend("send", err))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProxyError::backend(
                "status",
                format!("HTTP {status}: {detail}"),
            ));
        }

        response
            .bytes()
            .await
            .map_err(|err| ProxyError::backend("read", err))
    }
}
