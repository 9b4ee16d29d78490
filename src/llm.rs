//! Inference service abstraction
//!
//! The chat client talks to a locally hosted, Ollama-compatible server. The
//! service only opens the byte stream; decoding and session ownership live in
//! [`crate::stream`].

mod error;
pub mod ndjson;
mod ollama;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use ollama::OllamaService;
pub use types::*;

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Raw response body of a streaming chat request.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, LlmError>> + Send>>;

/// Common interface for inference backends
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Open a streaming chat request. Non-success statuses are errors.
    async fn open_chat_stream(&self, request: &ChatRequest) -> Result<ByteStream, LlmError>;

    /// Ask the server to stop any generation in progress.
    async fn stop_generation(&self) -> Result<(), LlmError>;

    /// Get the model ID
    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: InferenceService + ?Sized> InferenceService for Arc<T> {
    async fn open_chat_stream(&self, request: &ChatRequest) -> Result<ByteStream, LlmError> {
        (**self).open_chat_stream(request).await
    }

    async fn stop_generation(&self) -> Result<(), LlmError> {
        (**self).stop_generation().await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Logging wrapper for inference services
pub struct LoggingService {
    inner: Arc<dyn InferenceService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn InferenceService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl InferenceService for LoggingService {
    async fn open_chat_stream(&self, request: &ChatRequest) -> Result<ByteStream, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.open_chat_stream(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(_) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    messages = request.messages.len(),
                    "Chat stream opened"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = ?e.kind,
                    "Chat stream failed to open"
                );
            }
        }

        result
    }

    async fn stop_generation(&self) -> Result<(), LlmError> {
        let result = self.inner.stop_generation().await;
        if let Err(e) = &result {
            tracing::debug!(model = %self.model_id, error = %e, "Stop signal not delivered");
        }
        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
