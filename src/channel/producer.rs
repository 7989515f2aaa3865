//! Producer side of the channel.

use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Transaction};

use super::{log_end_offset, OutgoingMessage, DEFAULT_PARTITION};
use crate::db::{self, Db};
use crate::types::{Capture, ChannelMessage};

/// Appends message batches to a topic.
#[derive(Clone)]
pub struct Producer {
    db: Db,
}

impl Producer {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Append a batch atomically. Returns the offsets assigned, in order.
    pub async fn send(&self, topic: &str, messages: Vec<OutgoingMessage>) -> Result<Vec<i64>> {
        let topic = topic.to_string();
        db::with_conn(&self.db, move |conn| {
            let tx = conn.transaction()?;
            let offsets = append(&tx, &topic, &messages)?;
            tx.commit()?;
            Ok(offsets)
        })
        .await
        .context("failed to publish to channel")
    }

    /// Stamp a batch of captures with the current unix time and publish them.
    /// Returns the timestamp shared by the batch.
    ///
    /// Timestamps are strictly increasing per topic: a batch published within
    /// the same second as the previous one is stamped one second later, so
    /// captures of one display never share a document id.
    pub async fn publish_captures(&self, topic: &str, captures: &[Capture]) -> Result<String> {
        let owned_topic = topic.to_string();
        let captures = captures.to_vec();
        let now = chrono::Utc::now().timestamp();
        let (timestamp, offsets) = db::with_conn(&self.db, move |conn| {
            let tx = conn.transaction()?;
            let timestamp = next_timestamp(&tx, &owned_topic, now)?.to_string();
            let messages = captures
                .iter()
                .map(|capture| ChannelMessage::encode(capture, &timestamp))
                .collect::<Result<Vec<_>>>()?;
            let offsets = append(&tx, &owned_topic, &messages)?;
            tx.commit()?;
            Ok((timestamp, offsets))
        })
        .await
        .context("failed to publish to channel")?;
        tracing::debug!(topic, %timestamp, count = offsets.len(), "published capture batch");
        Ok(timestamp)
    }
}

fn append(tx: &Transaction, topic: &str, messages: &[OutgoingMessage]) -> Result<Vec<i64>> {
    let mut next = log_end_offset(tx, topic, DEFAULT_PARTITION)?;
    let mut offsets = Vec::with_capacity(messages.len());
    for message in messages {
        tx.execute(
            "INSERT INTO channel_messages (topic, partition_id, msg_offset, value, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![topic, DEFAULT_PARTITION, next, message.value, message.timestamp],
        )?;
        offsets.push(next);
        next += 1;
    }
    Ok(offsets)
}

/// `now`, or one past the newest timestamp on the topic if that is not older.
fn next_timestamp(tx: &Transaction, topic: &str, now: i64) -> Result<i64> {
    let last: Option<String> = tx
        .query_row(
            "SELECT timestamp FROM channel_messages WHERE topic = ?1 AND partition_id = ?2 \
             ORDER BY msg_offset DESC LIMIT 1",
            params![topic, DEFAULT_PARTITION],
            |row| row.get(0),
        )
        .optional()?;
    let last = last.and_then(|ts| ts.parse::<i64>().ok());
    Ok(match last {
        Some(last) if last >= now => last + 1,
        _ => now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(ts: &str) -> OutgoingMessage {
        OutgoingMessage {
            value: Some(b"{}".to_vec()),
            timestamp: ts.into(),
        }
    }

    #[tokio::test]
    async fn offsets_are_dense_per_topic() {
        let db = db::open_in_memory().unwrap();
        let producer = Producer::new(db);

        let first = producer.send("a", vec![msg("1"), msg("1")]).await.unwrap();
        let second = producer.send("a", vec![msg("2")]).await.unwrap();
        let other = producer.send("b", vec![msg("2")]).await.unwrap();

        assert_eq!(first, vec![0, 1]);
        assert_eq!(second, vec![2]);
        assert_eq!(other, vec![0]);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let db = db::open_in_memory().unwrap();
        let producer = Producer::new(db);
        assert!(producer.send("a", vec![]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn capture_batches_in_the_same_second_get_distinct_timestamps() {
        let db = db::open_in_memory().unwrap();
        let producer = Producer::new(db);
        let capture = Capture {
            data: "aGk=".into(),
            display: crate::types::Display {
                id: 1,
                name: "display-0".into(),
            },
        };

        let first = producer.publish_captures("a", &[capture.clone()]).await.unwrap();
        let second = producer.publish_captures("a", &[capture.clone()]).await.unwrap();
        let third = producer.publish_captures("a", &[capture]).await.unwrap();

        let stamps: Vec<i64> = [first, second, third].iter().map(|t| t.parse().unwrap()).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]), "{stamps:?}");
    }

    #[tokio::test]
    async fn unparseable_previous_timestamp_falls_back_to_now() {
        let db = db::open_in_memory().unwrap();
        let producer = Producer::new(db);
        producer.send("a", vec![msg("garbage")]).await.unwrap();

        let before = chrono::Utc::now().timestamp();
        let stamped: i64 = producer.publish_captures("a", &[]).await.unwrap().parse().unwrap();
        assert!(stamped >= before);
    }
}
