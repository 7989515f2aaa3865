//! Orchestrators: recording, describe-and-store, and query.
//!
//! All three receive their collaborators through a [`RecallContext`] built
//! once at startup. The recorder and the describer never share state other
//! than the channel.

pub mod ingest;
pub mod query;
pub mod record;

use std::sync::Arc;

use anyhow::Result;

use crate::channel::{Consumer, Producer};
use crate::config::RecallConfig;
use crate::db::Db;
use crate::model::{self, ModelService};
use crate::store::{Collection, VectorStore};

pub use ingest::DescribeAndStore;
pub use query::{query, QueryOptions, QueryOutcome, NO_RESULTS_MESSAGE};
pub use record::{RecordOptions, RecordSummary, Recorder, MIN_CAPTURE_INTERVAL};

/// Everything the orchestrators depend on.
#[derive(Clone)]
pub struct RecallContext {
    pub config: Arc<RecallConfig>,
    pub db: Db,
    pub models: Arc<dyn ModelService>,
}

impl RecallContext {
    pub fn new(config: RecallConfig, db: Db, models: Arc<dyn ModelService>) -> Self {
        Self {
            config: Arc::new(config),
            db,
            models,
        }
    }

    pub fn store(&self) -> VectorStore {
        VectorStore::new(self.db.clone())
    }

    /// The screenshot collection, created on first use.
    pub async fn collection(&self) -> Result<Collection> {
        self.store()
            .get_or_create_collection(&self.config.collection.name)
            .await
    }

    pub fn producer(&self) -> Producer {
        Producer::new(self.db.clone())
    }

    /// Subscribe the describer group to the capture topic, oldest first.
    pub async fn consumer(&self) -> Result<Consumer> {
        let channel = &self.config.channel;
        Consumer::subscribe(
            self.db.clone(),
            &channel.group_id,
            &channel.topic,
            true,
            channel.poll_interval(),
        )
        .await
    }

    /// Make sure every configured model is available locally.
    pub async fn ensure_models(&self) -> Result<()> {
        let pulled = model::ensure_models(self.models.as_ref(), &self.config.models.all()).await?;
        if !pulled.is_empty() {
            tracing::info!(?pulled, "models pulled");
        }
        Ok(())
    }

    /// Drop the collection. Failures are logged and swallowed.
    pub async fn reset(&self) {
        let name = &self.config.collection.name;
        match self.store().delete_collection(name).await {
            Ok(true) => tracing::info!(collection = %name, "collection reset"),
            Ok(false) => tracing::debug!(collection = %name, "nothing to reset"),
            Err(e) => tracing::debug!(collection = %name, error = %e, "reset failed; ignoring"),
        }
    }
}
