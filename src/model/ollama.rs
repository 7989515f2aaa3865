//! [`ModelService`] over an Ollama host, via `ollama-rs`.
//!
//! Streamed generations arrive as batches of response fragments; each batch is
//! joined into one text item so callers see a plain stream of strings.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::completion::GenerationResponse;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::generation::images::Image;
use ollama_rs::Ollama;

use super::{GenerateRequest, ModelService, TextStream};

#[derive(Clone)]
pub struct OllamaClient {
    client: Ollama,
    host: String,
}

impl OllamaClient {
    /// Client for the host at `host`, e.g. `http://localhost:11434`.
    pub fn new(host: &str) -> Result<Self> {
        let host = host.trim_end_matches('/').to_string();
        let client = Ollama::try_new(host.as_str())
            .with_context(|| format!("invalid model host URL: {host}"))?;
        Ok(Self { client, host })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn completion_request(request: &GenerateRequest) -> GenerationRequest {
        let mut completion = request.images.iter().fold(
            GenerationRequest::new(request.model.clone(), request.prompt.clone()),
            |req, image| req.add_image(Image::from_base64(image)),
        );
        if let Some(system) = &request.system {
            completion = completion.system(system.clone());
        }
        completion
    }
}

/// Text carried by one streamed batch.
fn join_fragments(batch: Vec<GenerationResponse>) -> String {
    batch.into_iter().map(|chunk| chunk.response).collect()
}

#[async_trait]
impl ModelService for OllamaClient {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let response = self
            .client
            .generate(Self::completion_request(&request))
            .await
            .with_context(|| format!("generation with {} failed at {}", request.model, self.host))?;
        Ok(response.response)
    }

    async fn generate_stream(&self, request: GenerateRequest) -> Result<TextStream> {
        let model = request.model.clone();
        let stream = self
            .client
            .generate_stream(Self::completion_request(&request))
            .await
            .with_context(|| format!("generation with {model} failed at {}", self.host))?;

        Ok(Box::pin(stream.map(move |batch| {
            batch
                .map(join_fragments)
                .with_context(|| format!("generation with {model} interrupted"))
        })))
    }

    async fn embed(&self, model: &str, prompt: &str) -> Result<Vec<f32>> {
        let request = GenerateEmbeddingsRequest::new(
            model.to_string(),
            EmbeddingsInput::Single(prompt.to_string()),
        );
        let response = self
            .client
            .generate_embeddings(request)
            .await
            .with_context(|| format!("embedding with {model} failed at {}", self.host))?;
        let embedding = response.embeddings.into_iter().next().unwrap_or_default();
        anyhow::ensure!(!embedding.is_empty(), "model {model} returned an empty embedding");
        Ok(embedding)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let models = self
            .client
            .list_local_models()
            .await
            .with_context(|| format!("model service unreachable at {}", self.host))?;
        Ok(models.into_iter().map(|m| m.name).collect())
    }

    async fn pull_model(&self, model: &str) -> Result<()> {
        let mut progress = self
            .client
            .pull_model_stream(model.to_string(), false)
            .await
            .with_context(|| format!("pulling {model} failed at {}", self.host))?;

        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {msg} {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );

        while let Some(status) = progress.next().await {
            let status = match status {
                Ok(status) => status,
                Err(e) => {
                    pb.abandon();
                    return Err(anyhow::Error::new(e).context(format!("pulling {model} failed")));
                }
            };
            if status.digest.is_some() {
                if let Some(total) = status.total {
                    pb.set_length(total);
                }
                pb.set_position(status.completed.unwrap_or(0));
            }
            pb.set_message(format!("{model} - {}", status.message));
        }

        pb.finish_and_clear();
        tracing::info!(model, "model pulled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_trailing_slash_is_normalized() {
        let client = OllamaClient::new("http://localhost:11434/").unwrap();
        assert_eq!(client.host(), "http://localhost:11434");
    }

    #[test]
    fn malformed_host_is_rejected() {
        let err = OllamaClient::new("not a url").err().unwrap();
        assert!(err.to_string().contains("invalid model host URL"));
    }

    #[tokio::test]
    async fn unreachable_host_is_an_error() {
        let client = OllamaClient::new("http://127.0.0.1:9").unwrap();
        let err = client.list_models().await.unwrap_err();
        assert!(err.to_string().contains("unreachable"));
    }

    #[tokio::test]
    async fn unreachable_host_fails_before_streaming() {
        let client = OllamaClient::new("http://127.0.0.1:9").unwrap();
        let request = GenerateRequest::new("m", "p").with_system("s");
        assert!(client.generate_stream(request).await.is_err());
    }
}
