//! Inference layer boundary.
//!
//! The orchestration core only needs one operation from a vision model:
//! turn an image plus a text query into text. Everything else (transport,
//! retries, model selection) lives behind [`InferenceBackend`].

pub mod ollama;

use crate::error::InferenceError;
use crate::models::ImageRef;
use async_trait::async_trait;
use std::sync::Arc;

pub use ollama::{OllamaBackend, OllamaConfig};

/// A vision-language model that answers a query about an image.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Run one inference call. Returns the model's text, trimmed.
    async fn run_inference(
        &self,
        image: &ImageRef,
        query: &str,
        system_instruction: Option<&str>,
    ) -> Result<String, InferenceError>;

    /// Name of the model, recorded in output metadata.
    fn model_name(&self) -> &str;

    /// Verify the backend is usable before the first request.
    async fn health_check(&self) -> Result<(), InferenceError> {
        Ok(())
    }
}

/// Long-lived model handle shared by every agent.
pub type ModelHandle = Arc<dyn InferenceBackend>;
