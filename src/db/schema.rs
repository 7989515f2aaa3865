//! SQL DDL for the channel log and the vector store.
//!
//! Defines `channel_messages`, `consumer_offsets`, `collections` and
//! `documents`. Per-collection `vec0` tables are created lazily by the
//! store because their dimension is only known at the first upsert. All DDL
//! uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Durable single-partition message log
CREATE TABLE IF NOT EXISTS channel_messages (
    topic TEXT NOT NULL,
    partition_id INTEGER NOT NULL DEFAULT 0,
    msg_offset INTEGER NOT NULL,
    value BLOB,
    timestamp TEXT NOT NULL,
    PRIMARY KEY (topic, partition_id, msg_offset)
);

-- Committed read positions per consumer group
CREATE TABLE IF NOT EXISTS consumer_offsets (
    group_id TEXT NOT NULL,
    topic TEXT NOT NULL,
    partition_id INTEGER NOT NULL DEFAULT 0,
    committed_offset INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (group_id, topic, partition_id)
);

-- Vector store namespaces
CREATE TABLE IF NOT EXISTS collections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    dimensions INTEGER,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
    collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    id TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (collection_id, id)
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}

/// Name of the vec0 table holding embeddings for a collection.
pub fn vec_table_name(collection_id: i64) -> String {
    format!("vec_{collection_id}")
}

/// DDL for a collection's vec0 table.
pub fn vec_table_sql(collection_id: i64, dimensions: usize) -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING vec0(
            id TEXT PRIMARY KEY,
            embedding FLOAT[{dimensions}]
        );",
        vec_table_name(collection_id)
    )
}
