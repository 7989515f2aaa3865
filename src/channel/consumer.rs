//! Consumer side of the channel.
//!
//! [`Consumer::run`] hands messages to a [`MessageHandler`] strictly one at a
//! time. The handler drives flow through [`ConsumerControls`]: it pauses the
//! topic while it works, seeks past the message to commit progress, then
//! resumes. Fetching only moves the in-memory position; the committed position
//! moves only on `seek`, so anything not sought past is redelivered after a
//! restart.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{committed_offset, log_end_offset, Record, TopicPartitionOffset, DEFAULT_PARTITION};
use crate::db::{self, Db};

/// What a handler receives for each message.
pub struct EachMessagePayload<'a> {
    pub topic: &'a str,
    pub partition: i32,
    pub message: &'a Record,
    pub controls: &'a ConsumerControls,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: EachMessagePayload<'_>) -> Result<()>;
}

struct ControlState {
    db: Db,
    group_id: String,
    topic: String,
    partition: i32,
    paused: Mutex<HashSet<String>>,
    position: Mutex<i64>,
    resumed: Notify,
}

/// Flow control handle shared between the run loop and the handler.
#[derive(Clone)]
pub struct ConsumerControls {
    inner: Arc<ControlState>,
}

impl ConsumerControls {
    /// Stop fetching from `topic` until [`resume`](Self::resume) is called.
    pub fn pause(&self, topic: &str) {
        if let Ok(mut paused) = self.inner.paused.lock() {
            paused.insert(topic.to_string());
        }
    }

    pub fn resume(&self, topic: &str) {
        if let Ok(mut paused) = self.inner.paused.lock() {
            paused.remove(topic);
        }
        self.inner.resumed.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.inner
            .paused
            .lock()
            .map(|paused| paused.contains(&self.inner.topic))
            .unwrap_or(false)
    }

    /// Next offset the run loop will fetch.
    pub fn position(&self) -> i64 {
        self.inner.position.lock().map(|p| *p).unwrap_or(0)
    }

    fn set_position(&self, offset: i64) {
        if let Ok(mut position) = self.inner.position.lock() {
            *position = offset;
        }
    }

    /// Move the read position and commit it for the consumer group.
    pub async fn seek(&self, target: TopicPartitionOffset) -> Result<()> {
        if target.topic != self.inner.topic || target.partition != self.inner.partition {
            bail!(
                "cannot seek {}:{} from a consumer subscribed to {}:{}",
                target.topic,
                target.partition,
                self.inner.topic,
                self.inner.partition
            );
        }

        let group_id = self.inner.group_id.clone();
        let offset = target.offset;
        db::with_conn(&self.inner.db, move |conn| {
            let now = chrono::Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO consumer_offsets (group_id, topic, partition_id, committed_offset, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT (group_id, topic, partition_id) \
                 DO UPDATE SET committed_offset = excluded.committed_offset, updated_at = excluded.updated_at",
                params![group_id, target.topic, target.partition, offset, now],
            )?;
            Ok(())
        })
        .await?;

        self.set_position(offset);
        tracing::trace!(topic = %self.inner.topic, offset, "seeked");
        Ok(())
    }

    /// Delete messages the group has already committed past.
    pub async fn prune_consumed(&self) -> Result<usize> {
        let inner = Arc::clone(&self.inner);
        db::with_conn(&self.inner.db, move |conn| {
            let Some(committed) =
                committed_offset(conn, &inner.group_id, &inner.topic, inner.partition)?
            else {
                return Ok(0);
            };
            // The newest message always stays so the log end never moves back.
            let removed = conn.execute(
                "DELETE FROM channel_messages WHERE topic = ?1 AND partition_id = ?2 AND msg_offset < ?3 \
                 AND msg_offset < (SELECT MAX(msg_offset) FROM channel_messages WHERE topic = ?1 AND partition_id = ?2)",
                params![inner.topic, inner.partition, committed],
            )?;
            Ok(removed)
        })
        .await
    }

    /// Wait until the topic is resumed. Returns `false` if shutdown was
    /// requested while paused.
    async fn wait_until_resumed(&self, shutdown: &CancellationToken) -> bool {
        loop {
            let notified = self.inner.resumed.notified();
            if !self.is_paused() {
                return true;
            }
            tokio::select! {
                _ = notified => {}
                _ = shutdown.cancelled() => return false,
            }
        }
    }
}

/// A subscription of one consumer group to one topic.
pub struct Consumer {
    controls: ConsumerControls,
    poll_interval: Duration,
}

impl Consumer {
    /// Subscribe `group_id` to `topic`. Starts at the group's committed offset;
    /// without one, at the oldest retained message (`from_beginning`) or at the
    /// log end.
    pub async fn subscribe(
        db: Db,
        group_id: &str,
        topic: &str,
        from_beginning: bool,
        poll_interval: Duration,
    ) -> Result<Self> {
        let (g, t) = (group_id.to_string(), topic.to_string());
        let start = db::with_conn(&db, move |conn| {
            Ok(match committed_offset(conn, &g, &t, DEFAULT_PARTITION)? {
                Some(offset) => offset,
                None if from_beginning => 0,
                None => log_end_offset(conn, &t, DEFAULT_PARTITION)?,
            })
        })
        .await?;

        tracing::info!(group_id, topic, start, "consumer subscribed");

        Ok(Self {
            controls: ConsumerControls {
                inner: Arc::new(ControlState {
                    db,
                    group_id: group_id.to_string(),
                    topic: topic.to_string(),
                    partition: DEFAULT_PARTITION,
                    paused: Mutex::new(HashSet::new()),
                    position: Mutex::new(start),
                    resumed: Notify::new(),
                }),
            },
            poll_interval,
        })
    }

    pub fn controls(&self) -> ConsumerControls {
        self.controls.clone()
    }

    pub fn topic(&self) -> &str {
        &self.controls.inner.topic
    }

    /// Deliver messages to `handler` one at a time until `shutdown` is
    /// cancelled and the log is idle. Returns the number of messages delivered.
    ///
    /// A cancelled token is only observed between messages, so an already
    /// cancelled token means "drain what is there, then return".
    pub async fn run<H: MessageHandler + ?Sized>(
        &self,
        handler: &H,
        shutdown: &CancellationToken,
    ) -> Result<u64> {
        let controls = &self.controls;
        let topic = controls.inner.topic.as_str();
        let partition = controls.inner.partition;
        let mut delivered = 0u64;

        loop {
            if !controls.wait_until_resumed(shutdown).await {
                tracing::warn!(topic, "shutdown while paused; stopping consumer");
                return Ok(delivered);
            }

            let position = controls.position();
            match self.fetch(position).await? {
                Some(record) => {
                    // Advance the fetch position; only a seek commits it.
                    controls.set_position(record.offset + 1);
                    let offset = record.offset;
                    let payload = EachMessagePayload {
                        topic,
                        partition,
                        message: &record,
                        controls,
                    };
                    if let Err(e) = handler.handle(payload).await {
                        tracing::error!(topic, offset, error = %e, "message handler failed");
                    }
                    delivered += 1;
                }
                None => {
                    if shutdown.is_cancelled() {
                        return Ok(delivered);
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown.cancelled() => {}
                    }
                }
            }
        }
    }

    async fn fetch(&self, position: i64) -> Result<Option<Record>> {
        let topic = self.controls.inner.topic.clone();
        let partition = self.controls.inner.partition;
        db::with_conn(&self.controls.inner.db, move |conn| {
            let record = conn
                .query_row(
                    "SELECT msg_offset, value, timestamp FROM channel_messages \
                     WHERE topic = ?1 AND partition_id = ?2 AND msg_offset >= ?3 \
                     ORDER BY msg_offset LIMIT 1",
                    params![topic, partition, position],
                    |row| {
                        Ok(Record {
                            topic: topic.clone(),
                            partition,
                            offset: row.get(0)?,
                            value: row.get(1)?,
                            timestamp: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(record)
        })
        .await
    }
}
