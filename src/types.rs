//! Records that flow through the pipeline.
//!
//! A [`Capture`] is produced per display, wrapped in a [`ChannelMessage`] when
//! published, and ends up inside a [`Document`] once described and embedded.

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};

/// A physical screen, as reported by the operating environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Display {
    pub id: u32,
    pub name: String,
}

/// One still image of one display, base64-encoded JPEG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    pub data: String,
    pub display: Display,
}

/// Unit of transport between the recorder and the describer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub capture: Capture,
    /// Unix seconds, assigned once at publish time.
    pub timestamp: String,
}

impl ChannelMessage {
    /// Deterministic document id: `timestamp-displayName-displayId`.
    pub fn document_id(&self) -> String {
        format!(
            "{}-{}-{}",
            self.timestamp, self.capture.display.name, self.capture.display.id
        )
    }

    /// Publish time as a local date-time, if the timestamp parses.
    pub fn captured_at(&self) -> Option<DateTime<Local>> {
        parse_unix_seconds(&self.timestamp)
    }
}

/// What gets persisted next to the embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPayload {
    pub capture: Capture,
    /// Description prefixed with `DATE-AND-TIME: ..., DESCRIPTION: `.
    pub description: String,
}

/// A persisted record in a vector store collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub embedding: Vec<f32>,
    pub payload: DocumentPayload,
}

impl Document {
    /// Build the document for a described message.
    pub fn from_message(message: &ChannelMessage, description: &str, embedding: Vec<f32>) -> Self {
        let description = match message.captured_at() {
            Some(at) => timestamped(&at, description),
            None => timestamped(&Local::now(), description),
        };
        Self {
            id: message.document_id(),
            embedding,
            payload: DocumentPayload {
                capture: message.capture.clone(),
                description,
            },
        }
    }
}

/// Format shared by stored descriptions and query prompts so both land in the
/// same region of the embedding space.
pub fn timestamped<Tz: TimeZone>(at: &DateTime<Tz>, text: &str) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "DATE-AND-TIME: {}, DESCRIPTION: {}",
        at.format("%Y-%m-%d %H:%M:%S"),
        text
    )
}

pub fn parse_unix_seconds(raw: &str) -> Option<DateTime<Local>> {
    let secs: i64 = raw.trim().parse().ok()?;
    Local.timestamp_opt(secs, 0).single()
}
