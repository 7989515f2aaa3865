//! Local recall: remember what happened on screen and answer questions about it.
//!
//! A recorder captures every display on a fixed interval and publishes the
//! images to a durable channel. A describer consumes that channel one
//! message at a time, asks a local vision model to describe each image,
//! embeds the description and stores it in a vector collection. Queries
//! embed a question, retrieve the closest descriptions and stream an answer
//! interpreted from them.
//!
//! # Architecture
//!
//! - **Storage**: one SQLite file holds the channel log, consumer offsets and
//!   the [sqlite-vec](https://github.com/asg017/sqlite-vec) collections
//! - **Models**: any [Ollama](https://ollama.com/) host for vision,
//!   embedding and text generation
//! - **Capture**: native screenshots of every attached display
//!
//! # Modules
//!
//! - [`config`] - Configuration loading from TOML files and environment variables
//! - [`db`] - SQLite initialization and schema
//! - [`channel`] - Durable producer/consumer log with pause, resume and seek
//! - [`capture`] - Screen capture and image transforms
//! - [`model`] - Model service contract and the Ollama client
//! - [`store`] - Vector collections
//! - [`pipeline`] - Recording, describe-and-store, and query orchestrators
//! - [`types`] - Captures, channel messages and documents

pub mod capture;
pub mod channel;
pub mod config;
pub mod db;
pub mod model;
pub mod pipeline;
pub mod store;
pub mod types;
