//! Describe-and-store orchestrator.
//!
//! Consumes capture messages one at a time: pause, describe the image, embed
//! the description, upsert the document, seek past the message, resume.
//! Malformed messages and messages whose processing fails are skipped the
//! same way, so nothing ever wedges the channel.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::RecallContext;
use crate::channel::{EachMessagePayload, MessageHandler, TopicPartitionOffset};
use crate::model::generators::IMAGE_DESCRIPTION_PROMPT;
use crate::model::{generate_description, generate_embedding, DescribeOptions, ModelService};
use crate::store::VectorStore;
use crate::types::{ChannelMessage, Document};

pub struct DescribeAndStore {
    models: Arc<dyn ModelService>,
    store: VectorStore,
    collection: String,
    description_model: String,
    embedding_model: String,
    echo: bool,
    max_attempts: u32,
    prune_consumed: bool,
}

impl DescribeAndStore {
    pub fn new(ctx: &RecallContext) -> Self {
        let config = &ctx.config;
        Self {
            models: Arc::clone(&ctx.models),
            store: ctx.store(),
            collection: config.collection.name.clone(),
            description_model: config.models.description_model.clone(),
            embedding_model: config.models.embedding_model.clone(),
            echo: config.general.debug,
            max_attempts: config.describe.max_attempts.max(1),
            prune_consumed: config.channel.prune_consumed,
        }
    }

    /// Describe, embed and store one message. Returns the document id.
    pub async fn process(&self, message: &ChannelMessage) -> Result<String> {
        tracing::info!(
            timestamp = %message.timestamp,
            display = %message.capture.display.name,
            "describing capture"
        );

        let options = DescribeOptions {
            model: &self.description_model,
            prompt: IMAGE_DESCRIPTION_PROMPT,
            echo: self.echo,
        };
        let description =
            generate_description(self.models.as_ref(), &message.capture.data, &options).await?;
        let embedding =
            generate_embedding(self.models.as_ref(), &self.embedding_model, &description).await?;

        let document = Document::from_message(message, &description, embedding);
        let id = document.id.clone();
        // Resolved per document: the collection may have been reset meanwhile.
        self.store
            .get_or_create_collection(&self.collection)
            .await?
            .upsert(vec![document])
            .await
            .context("failed to store document")?;

        tracing::info!(id = %id, "stored description");
        Ok(id)
    }

    async fn process_with_attempts(&self, message: &ChannelMessage) -> Result<String> {
        let mut attempt = 1;
        loop {
            match self.process(message).await {
                Ok(id) => return Ok(id),
                Err(e) if attempt < self.max_attempts => {
                    tracing::warn!(attempt, error = %format!("{e:#}"), "processing failed; retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Make sure the models are present, then consume until `shutdown` fires
    /// and the channel is idle.
    pub async fn run(&self, ctx: &RecallContext, shutdown: &CancellationToken) -> Result<u64> {
        ctx.ensure_models().await?;
        let consumer = ctx.consumer().await?;
        let delivered = consumer.run(self, shutdown).await?;
        tracing::info!(delivered, "describer stopped");
        Ok(delivered)
    }
}

#[async_trait]
impl MessageHandler for DescribeAndStore {
    async fn handle(&self, payload: EachMessagePayload<'_>) -> Result<()> {
        let EachMessagePayload {
            topic,
            partition,
            message,
            controls,
        } = payload;

        // Nothing else is delivered until this message has been sought past.
        controls.pause(topic);

        match ChannelMessage::decode(message) {
            Ok(decoded) => {
                if let Err(e) = self.process_with_attempts(&decoded).await {
                    tracing::error!(
                        offset = message.offset,
                        id = %decoded.document_id(),
                        error = %format!("{e:#}"),
                        "failed to describe capture; skipping"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(offset = message.offset, error = %e, "skipping malformed message");
            }
        }

        let committed = controls
            .seek(TopicPartitionOffset {
                topic: topic.to_string(),
                partition,
                offset: message.offset + 1,
            })
            .await;
        controls.resume(topic);
        committed?;

        if self.prune_consumed {
            if let Err(e) = controls.prune_consumed().await {
                tracing::debug!(error = %e, "pruning consumed messages failed");
            }
        }
        Ok(())
    }
}
