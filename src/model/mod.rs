//! Language-model service: text generation, embeddings, model management.
//!
//! [`ModelService`] is the narrow contract the pipeline needs; [`ollama`]
//! implements it over the Ollama HTTP API. The description and embedding
//! generators in [`generators`] are thin adapters on top.

pub mod generators;
pub mod ollama;

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;

pub use generators::{generate_description, generate_embedding, DescribeOptions};
pub use ollama::OllamaClient;

/// Incremental text fragments from a streaming generation. Dropping the stream
/// stops the producer behind it.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One text-generation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    /// Base64-encoded images for vision models.
    pub images: Vec<String>,
    pub system: Option<String>,
}

impl GenerateRequest {
    pub fn new(model: &str, prompt: impl Into<String>) -> Self {
        Self {
            model: model.to_string(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.images.push(image.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

#[async_trait]
pub trait ModelService: Send + Sync {
    /// Generate a complete response in one shot.
    async fn generate(&self, request: GenerateRequest) -> Result<String>;

    /// Generate a response as a stream of fragments.
    async fn generate_stream(&self, request: GenerateRequest) -> Result<TextStream>;

    /// Embed one string.
    async fn embed(&self, model: &str, prompt: &str) -> Result<Vec<f32>>;

    /// Names of locally available models.
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Download a model so it is locally available.
    async fn pull_model(&self, model: &str) -> Result<()>;
}

/// `name` satisfies a request for `wanted` exactly, or as its `:latest` tag.
pub fn model_matches(name: &str, wanted: &str) -> bool {
    name == wanted || (!wanted.contains(':') && name.strip_suffix(":latest") == Some(wanted))
}

/// Pull every model not already available. A no-op when all are present.
/// Returns the models that were pulled.
pub async fn ensure_models(service: &dyn ModelService, models: &[&str]) -> Result<Vec<String>> {
    let available = service.list_models().await?;
    let mut pulled = Vec::new();

    for &model in models {
        if available.iter().any(|name| model_matches(name, model)) {
            tracing::debug!(model, "model already available");
            continue;
        }
        if pulled.iter().any(|p: &String| p == model) {
            continue;
        }
        tracing::info!(model, "pulling model");
        service.pull_model(model).await?;
        pulled.push(model.to_string());
    }

    Ok(pulled)
}
