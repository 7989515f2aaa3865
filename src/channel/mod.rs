//! Durable publish/subscribe channel between the recorder and the describer.
//!
//! The log lives in SQLite (`channel_messages`), one lane per topic. Producers
//! append batches with dense offsets; consumers read one message at a time and
//! persist their position per consumer group in `consumer_offsets` only when
//! the handler seeks. Delivery is therefore at-least-once.

pub mod consumer;
pub mod producer;

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

use crate::db::{self, Db};
use crate::types::{parse_unix_seconds, Capture, ChannelMessage};

pub use consumer::{Consumer, ConsumerControls, EachMessagePayload, MessageHandler};
pub use producer::Producer;

/// The single lane every topic is written to.
pub const DEFAULT_PARTITION: i32 = 0;

/// A message as handed to the producer.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub value: Option<Vec<u8>>,
    pub timestamp: String,
}

/// A message as read back from the log.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub value: Option<Vec<u8>>,
    pub timestamp: String,
}

/// Address used by `seek`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPartitionOffset {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Why a record could not be turned into a [`ChannelMessage`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message has no value")]
    MissingValue,
    #[error("message has no timestamp")]
    MissingTimestamp,
    #[error("message timestamp {0:?} is not unix seconds")]
    InvalidTimestamp(String),
    #[error("message value is not a capture: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

impl ChannelMessage {
    /// Serialize a capture into a message stamped with `timestamp`.
    pub fn encode(capture: &Capture, timestamp: &str) -> Result<OutgoingMessage> {
        Ok(OutgoingMessage {
            value: Some(serde_json::to_vec(capture)?),
            timestamp: timestamp.to_string(),
        })
    }

    /// Parse a record from the log. Anything missing a capture or a usable
    /// timestamp is malformed.
    pub fn decode(record: &Record) -> Result<Self, DecodeError> {
        let value = record.value.as_deref().ok_or(DecodeError::MissingValue)?;
        if record.timestamp.trim().is_empty() {
            return Err(DecodeError::MissingTimestamp);
        }
        if parse_unix_seconds(&record.timestamp).is_none() {
            return Err(DecodeError::InvalidTimestamp(record.timestamp.clone()));
        }
        let capture: Capture = serde_json::from_slice(value)?;
        Ok(Self {
            capture,
            timestamp: record.timestamp.clone(),
        })
    }
}

/// Read the committed offset for a consumer group, if any.
pub(crate) fn committed_offset(
    conn: &Connection,
    group_id: &str,
    topic: &str,
    partition: i32,
) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT committed_offset FROM consumer_offsets WHERE group_id = ?1 AND topic = ?2 AND partition_id = ?3",
        params![group_id, topic, partition],
        |row| row.get(0),
    )
    .optional()
}

/// Offset the next appended message will receive.
pub(crate) fn log_end_offset(conn: &Connection, topic: &str, partition: i32) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(msg_offset) + 1, 0) FROM channel_messages WHERE topic = ?1 AND partition_id = ?2",
        params![topic, partition],
        |row| row.get(0),
    )
}

/// Consumer-group progress on a topic.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Lag {
    pub committed: Option<i64>,
    pub log_end: i64,
    pub retained: i64,
    pub backlog: i64,
}

/// Report how far a consumer group is behind the log end.
pub async fn lag(db: &Db, group_id: &str, topic: &str) -> Result<Lag> {
    let group_id = group_id.to_string();
    let topic = topic.to_string();
    db::with_conn(db, move |conn| {
        let committed = committed_offset(conn, &group_id, &topic, DEFAULT_PARTITION)?;
        let log_end = log_end_offset(conn, &topic, DEFAULT_PARTITION)?;
        let retained: i64 = conn.query_row(
            "SELECT COUNT(*) FROM channel_messages WHERE topic = ?1 AND partition_id = ?2",
            params![topic, DEFAULT_PARTITION],
            |row| row.get(0),
        )?;
        Ok(Lag {
            committed,
            log_end,
            retained,
            backlog: log_end - committed.unwrap_or(0),
        })
    })
    .await
}
