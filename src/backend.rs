//! Generative backend abstraction
//!
//! The journal only needs "prompt in, text out". Concrete remote clients
//! live outside this crate and plug in through [`AiBackend`].

mod error;
mod offline;

#[cfg(test)]
pub mod testing;

pub use error::{BackendError, BackendErrorKind};
pub use offline::OfflineBackend;

use crate::prompt::PromptRequest;
use async_trait::async_trait;
use std::sync::Arc;

/// Text generation backend
#[async_trait]
pub trait AiBackend: Send + Sync {
    /// Generate raw reply text, expected to contain a JSON object
    async fn generate(&self, request: &PromptRequest) -> Result<String, BackendError>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: AiBackend + ?Sized> AiBackend for Arc<T> {
    async fn generate(&self, request: &PromptRequest) -> Result<String, BackendError> {
        (**self).generate(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Logging wrapper for backends
pub struct LoggingBackend {
    inner: Arc<dyn AiBackend>,
    name: String,
}

impl LoggingBackend {
    pub fn new(inner: Arc<dyn AiBackend>) -> Self {
        let name = inner.name().to_string();
        Self { inner, name }
    }
}

#[async_trait]
impl AiBackend for LoggingBackend {
    async fn generate(&self, request: &PromptRequest) -> Result<String, BackendError> {
        let start = std::time::Instant::now();
        let result = self.inner.generate(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(text) => {
                tracing::info!(
                    backend = %self.name,
                    persona = %request.persona,
                    mode = %request.mode,
                    duration_ms = %duration.as_millis(),
                    reply_len = text.len(),
                    "Backend request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    backend = %self.name,
                    persona = %request.persona,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = e.kind.as_str(),
                    retryable = e.kind.is_retryable(),
                    "Backend request failed"
                );
            }
        }

        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}
