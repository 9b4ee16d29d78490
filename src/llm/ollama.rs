//! Ollama-compatible streaming chat client

use super::{ByteStream, ChatRequest, InferenceService, LlmError};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;

const CHAT_API: &str = "/api/chat";
const SHUTDOWN_API: &str = "/api/shutdown";

/// Client for a locally hosted Ollama server
pub struct OllamaService {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaService {
    /// `base_url` is scheme, host and port, e.g. `http://localhost:11434`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
            model: model.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn classify_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        let message = body.trim().to_string();
        match status.as_u16() {
            400..=499 => LlmError::invalid_request(format!("Invalid request: {message}")),
            500..=599 => LlmError::server_error(format!("Server error: {message}")),
            _ => LlmError::unknown(format!("HTTP {status}: {message}")),
        }
    }

    fn classify_transport(e: &reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::network(format!("Request timeout: {e}"))
        } else if e.is_connect() {
            LlmError::network(format!("Connection failed: {e}"))
        } else {
            LlmError::network(format!("Network error: {e}"))
        }
    }
}

#[async_trait]
impl InferenceService for OllamaService {
    async fn open_chat_stream(&self, request: &ChatRequest) -> Result<ByteStream, LlmError> {
        let url = format!("{}{CHAT_API}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| Self::classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_error(status, &body));
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| LlmError::network(format!("Stream read error: {e}")))
        });
        Ok(Box::pin(stream))
    }

    async fn stop_generation(&self) -> Result<(), LlmError> {
        let url = format!("{}{SHUTDOWN_API}", self.base_url);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| Self::classify_transport(&e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(Self::classify_error(status, &body))
        }
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
