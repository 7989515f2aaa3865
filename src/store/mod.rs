//! Vector store: named collections of documents with nearest-neighbour search.
//!
//! Payloads live in `documents`; embeddings live in a per-collection sqlite-vec
//! `vec0` table created on the first upsert, sized to that first embedding.
//! Upserts replace by id, which is what makes redelivered channel messages
//! harmless.

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;

use crate::db::{self, embedding_to_bytes, schema, Db};
use crate::types::{Document, DocumentPayload};

#[derive(Clone)]
pub struct VectorStore {
    db: Db,
}

/// Handle to one named collection.
#[derive(Clone)]
pub struct Collection {
    db: Db,
    id: i64,
    name: String,
}

/// A query hit, ordered by ascending distance.
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    pub id: String,
    pub distance: f64,
    pub payload: DocumentPayload,
}

struct CollectionRow {
    id: i64,
    dimensions: Option<usize>,
}

impl VectorStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Open a collection, creating it if it does not exist.
    pub async fn get_or_create_collection(&self, name: &str) -> Result<Collection> {
        let owned = name.to_string();
        let id = db::with_conn(&self.db, move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO collections (name, created_at) VALUES (?1, ?2)",
                params![owned, chrono::Utc::now().to_rfc3339()],
            )?;
            let id: i64 = conn.query_row(
                "SELECT id FROM collections WHERE name = ?1",
                params![owned],
                |row| row.get(0),
            )?;
            Ok(id)
        })
        .await
        .with_context(|| format!("failed to open collection {name}"))?;

        tracing::debug!(collection = name, id, "collection ready");
        Ok(Collection {
            db: self.db.clone(),
            id,
            name: name.to_string(),
        })
    }

    /// Drop a collection with all its documents. Returns `false` if there was
    /// nothing to drop.
    pub async fn delete_collection(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        db::with_conn(&self.db, move |conn| {
            let tx = conn.transaction()?;
            let Some(row) = find_collection(&tx, &name)? else {
                return Ok(false);
            };
            tx.execute_batch(&format!(
                "DROP TABLE IF EXISTS {}",
                schema::vec_table_name(row.id)
            ))?;
            tx.execute("DELETE FROM documents WHERE collection_id = ?1", params![row.id])?;
            tx.execute("DELETE FROM collections WHERE id = ?1", params![row.id])?;
            tx.commit()?;
            tracing::info!(collection = %name, "collection deleted");
            Ok(true)
        })
        .await
    }
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert or replace documents by id, atomically.
    pub async fn upsert(&self, documents: Vec<Document>) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let id = self.id;
        let name = self.name.clone();
        db::with_conn(&self.db, move |conn| {
            let tx = conn.transaction()?;
            let row = current(&tx, id, &name)?;
            let dimensions = match row.dimensions {
                Some(d) => d,
                None => init_vectors(&tx, id, documents[0].embedding.len())?,
            };

            let vec_table = schema::vec_table_name(id);
            let now = chrono::Utc::now().to_rfc3339();
            for doc in &documents {
                if doc.embedding.len() != dimensions {
                    bail!(
                        "document {} has {} dimensions, collection {name} expects {dimensions}",
                        doc.id,
                        doc.embedding.len()
                    );
                }
                let payload = serde_json::to_string(&doc.payload)?;
                tx.execute(
                    "INSERT OR REPLACE INTO documents (collection_id, id, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![id, doc.id, payload, now],
                )?;
                // vec0 has no upsert
                tx.execute(&format!("DELETE FROM {vec_table} WHERE id = ?1"), params![doc.id])?;
                tx.execute(
                    &format!("INSERT INTO {vec_table} (id, embedding) VALUES (?1, ?2)"),
                    params![doc.id, embedding_to_bytes(&doc.embedding)],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .with_context(|| format!("failed to upsert into collection {}", self.name))
    }

    /// The `n_results` nearest documents, closest first.
    pub async fn query(&self, embedding: &[f32], n_results: usize) -> Result<Vec<Match>> {
        if n_results == 0 {
            return Ok(Vec::new());
        }
        let id = self.id;
        let name = self.name.clone();
        let embedding = embedding.to_vec();
        db::with_conn(&self.db, move |conn| {
            let row = current(conn, id, &name)?;
            let Some(dimensions) = row.dimensions else {
                return Ok(Vec::new());
            };
            if embedding.len() != dimensions {
                bail!(
                    "query has {} dimensions, collection {name} expects {dimensions}",
                    embedding.len()
                );
            }

            let mut stmt = conn.prepare(&format!(
                "SELECT id, distance FROM {} WHERE embedding MATCH ?1 AND k = ?2 ORDER BY distance",
                schema::vec_table_name(id)
            ))?;
            let hits: Vec<(String, f64)> = stmt
                .query_map(params![embedding_to_bytes(&embedding), n_results as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut matches = Vec::with_capacity(hits.len());
            for (doc_id, distance) in hits {
                if let Some(payload) = load_payload(conn, id, &doc_id)? {
                    matches.push(Match {
                        id: doc_id,
                        distance,
                        payload,
                    });
                }
            }
            Ok(matches)
        })
        .await
        .with_context(|| format!("failed to query collection {}", self.name))
    }

    /// Fetch one document payload by id.
    pub async fn get(&self, doc_id: &str) -> Result<Option<DocumentPayload>> {
        let id = self.id;
        let doc_id = doc_id.to_string();
        db::with_conn(&self.db, move |conn| load_payload(conn, id, &doc_id)).await
    }

    pub async fn count(&self) -> Result<usize> {
        let id = self.id;
        db::with_conn(&self.db, move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE collection_id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }
}

fn find_collection(conn: &Connection, name: &str) -> Result<Option<CollectionRow>> {
    let row = conn
        .query_row(
            "SELECT id, dimensions FROM collections WHERE name = ?1",
            params![name],
            |row| {
                Ok(CollectionRow {
                    id: row.get(0)?,
                    dimensions: row.get::<_, Option<i64>>(1)?.map(|d| d as usize),
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Re-read the collection row; it may have been reset by another handle.
fn current(conn: &Connection, id: i64, name: &str) -> Result<CollectionRow> {
    match find_collection(conn, name)? {
        Some(row) if row.id == id => Ok(row),
        _ => bail!("collection {name} was deleted; open it again"),
    }
}

fn init_vectors(tx: &Transaction, id: i64, dimensions: usize) -> Result<usize> {
    if dimensions == 0 {
        bail!("cannot store an empty embedding");
    }
    tx.execute_batch(&schema::vec_table_sql(id, dimensions))?;
    tx.execute(
        "UPDATE collections SET dimensions = ?1 WHERE id = ?2",
        params![dimensions as i64, id],
    )?;
    tracing::info!(collection_id = id, dimensions, "vector table created");
    Ok(dimensions)
}

fn load_payload(conn: &Connection, collection_id: i64, doc_id: &str) -> Result<Option<DocumentPayload>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT payload FROM documents WHERE collection_id = ?1 AND id = ?2",
            params![collection_id, doc_id],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|raw| serde_json::from_str(&raw).context("corrupt document payload"))
        .transpose()
}
