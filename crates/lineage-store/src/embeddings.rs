//! SQLite-backed embedding store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tokio_rusqlite::Connection;

use lineage_core::{
    Embedding, EmbeddingRecord, EmbeddingStore, Error, Result, EMBEDDING_DIM,
};

use crate::codec::{decode_vector, encode_vector};
use crate::crypto::VaultKey;
use crate::db::storage_err;

/// One row as it comes off the wire, before decryption and decoding.
struct RawRow {
    person_id: String,
    blob: Vec<u8>,
    encrypted: bool,
    nonce: Option<Vec<u8>>,
    model_version: Option<String>,
    updated_at: String,
}

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        person_id: row.get(0)?,
        blob: row.get(1)?,
        encrypted: row.get(2)?,
        nonce: row.get(3)?,
        model_version: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

const SELECT_COLUMNS: &str =
    "person_id, vector, encrypted, nonce, model_version, updated_at";

/// Durable embedding store. Each `put` is a single upsert statement, so
/// replacement is atomic; readers see the old row or the new one.
#[derive(Clone)]
pub struct SqliteEmbeddingStore {
    conn: Connection,
    key: Option<Arc<VaultKey>>,
}

impl SqliteEmbeddingStore {
    /// `key` enables AES-256-GCM sealing of vector blobs. Rows written
    /// without a key stay readable after one is configured.
    pub fn new(conn: Connection, key: Option<VaultKey>) -> Self {
        Self {
            conn,
            key: key.map(Arc::new),
        }
    }

    fn decode_row(&self, row: RawRow) -> Result<EmbeddingRecord> {
        let bytes = if row.encrypted {
            let key = self.key.as_deref().ok_or_else(|| {
                Error::StorageUnavailable(format!(
                    "embedding for {} is encrypted but no vault key is configured",
                    row.person_id
                ))
            })?;
            let nonce = row.nonce.ok_or_else(|| {
                Error::StorageUnavailable(format!(
                    "encrypted embedding for {} has no nonce",
                    row.person_id
                ))
            })?;
            key.open(&row.blob, &nonce)?
        } else {
            row.blob
        };

        let values = decode_vector(&bytes)?;
        let updated_at = DateTime::parse_from_rfc3339(&row.updated_at)
            .map_err(|err| Error::StorageUnavailable(format!("corrupt timestamp: {err}")))?
            .with_timezone(&Utc);

        Ok(EmbeddingRecord {
            person_id: row.person_id,
            embedding: Embedding {
                values,
                model_version: row.model_version,
            },
            updated_at,
        })
    }
}

impl EmbeddingStore for SqliteEmbeddingStore {
    async fn put(&self, person_id: &str, embedding: Embedding) -> Result<()> {
        let stored = embedding.into_stored()?;
        let plaintext = encode_vector(&stored.values);
        let (blob, nonce, encrypted) = match &self.key {
            Some(key) => {
                let (ciphertext, nonce) = key.seal(&plaintext)?;
                (ciphertext, Some(nonce.to_vec()), true)
            }
            None => (plaintext, None, false),
        };

        let person_id = person_id.to_string();
        let model_version = stored.model_version;
        let updated_at = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO face_embeddings
                        (person_id, dimension, vector, encrypted, nonce, model_version, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(person_id) DO UPDATE SET
                        dimension = excluded.dimension,
                        vector = excluded.vector,
                        encrypted = excluded.encrypted,
                        nonce = excluded.nonce,
                        model_version = excluded.model_version,
                        updated_at = excluded.updated_at",
                    params![
                        person_id,
                        EMBEDDING_DIM as i64,
                        blob,
                        encrypted,
                        nonce,
                        model_version,
                        updated_at
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    async fn get(&self, person_id: &str) -> Result<Option<EmbeddingRecord>> {
        let person_id = person_id.to_string();
        let raw = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        &format!(
                            "SELECT {SELECT_COLUMNS} FROM face_embeddings WHERE person_id = ?1"
                        ),
                        params![person_id],
                        read_raw,
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(storage_err)?;

        raw.map(|row| self.decode_row(row)).transpose()
    }

    async fn scan(&self) -> Result<Vec<EmbeddingRecord>> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!("SELECT {SELECT_COLUMNS} FROM face_embeddings"))?;
                let rows = stmt
                    .query_map([], read_raw)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(storage_err)?;

        rows.into_iter().map(|row| self.decode_row(row)).collect()
    }

    async fn delete(&self, person_id: &str) -> Result<()> {
        let person_id = person_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM face_embeddings WHERE person_id = ?1",
                    params![person_id],
                )?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_database, testutil::TempDb};

    fn unit(idx: usize) -> Embedding {
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[idx] = 1.0;
        Embedding::new(values)
    }

    #[tokio::test]
    async fn put_get_round_trip_plain() {
        let tmp = TempDb::new();
        let conn = open_database(&tmp.path).await.unwrap();
        let store = SqliteEmbeddingStore::new(conn, None);

        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[0] = 3.0;
        values[1] = 4.0;
        store.put("p1", Embedding::new(values)).await.unwrap();

        let record = store.get("p1").await.unwrap().unwrap();
        assert!(record.embedding.is_unit_norm());
        assert!((record.embedding.values[0] - 0.6).abs() < 1e-6);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_get_round_trip_encrypted() {
        let tmp = TempDb::new();
        let conn = open_database(&tmp.path).await.unwrap();
        let key_path = tmp.path.with_extension("key");
        let key = VaultKey::load_or_create(&key_path).unwrap();
        let store = SqliteEmbeddingStore::new(conn.clone(), Some(key.clone()));

        store.put("p1", unit(2)).await.unwrap();
        let record = store.get("p1").await.unwrap().unwrap();
        assert_eq!(record.embedding.values[2], 1.0);

        // The same rows are unreadable without the key.
        let keyless = SqliteEmbeddingStore::new(conn, None);
        assert!(keyless.get("p1").await.is_err());

        let _ = std::fs::remove_file(key_path);
    }

    #[tokio::test]
    async fn put_replaces_atomically() {
        let tmp = TempDb::new();
        let conn = open_database(&tmp.path).await.unwrap();
        let store = SqliteEmbeddingStore::new(conn, None);

        store.put("p1", unit(0)).await.unwrap();
        store.put("p1", unit(1)).await.unwrap();

        let records = store.scan().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].embedding.values[1], 1.0);
        assert_eq!(records[0].embedding.values[0], 0.0);
    }

    #[tokio::test]
    async fn scan_returns_every_record() {
        let tmp = TempDb::new();
        let conn = open_database(&tmp.path).await.unwrap();
        let store = SqliteEmbeddingStore::new(conn, None);

        for i in 0..5 {
            store.put(&format!("p{i}"), unit(i)).await.unwrap();
        }
        let records = store.scan().await.unwrap();
        assert_eq!(records.len(), 5);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let tmp = TempDb::new();
        let conn = open_database(&tmp.path).await.unwrap();
        let store = SqliteEmbeddingStore::new(conn, None);

        store.put("p1", unit(0)).await.unwrap();
        store.delete("p1").await.unwrap();
        store.delete("p1").await.unwrap();
        assert!(store.get("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_invalid_vectors() {
        let tmp = TempDb::new();
        let conn = open_database(&tmp.path).await.unwrap();
        let store = SqliteEmbeddingStore::new(conn, None);

        let err = store.put("p1", Embedding::new(vec![1.0])).await.unwrap_err();
        assert!(matches!(err, Error::InvalidVector(_)));
        let err = store
            .put("p1", Embedding::new(vec![0.0; EMBEDDING_DIM]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidVector(_)));
    }
}
