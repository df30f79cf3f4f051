//! Connection management and schema.

use std::fmt::Display;
use std::path::Path;

use lineage_core::{Error, Result};
use tokio_rusqlite::Connection;

/// Map any storage-layer failure onto the transient storage error of the
/// core taxonomy.
pub(crate) fn storage_err(err: impl Display) -> Error {
    Error::StorageUnavailable(err.to_string())
}

/// Open (or create) the database at `path`, apply pragmas, and run the
/// schema batch. The parent directory is created if missing.
pub async fn open_database(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(storage_err)?;
    }

    let conn = Connection::open(path.to_path_buf())
        .await
        .map_err(storage_err)?;
    conn.call(|conn| {
        // journal_mode returns its new value as a row.
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "foreign_keys", 1)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    })
    .await
    .map_err(storage_err)?;

    tracing::info!(path = %path.display(), "database opened");
    Ok(conn)
}

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS face_embeddings (
    person_id TEXT PRIMARY KEY,
    dimension INTEGER NOT NULL,
    vector BLOB NOT NULL,
    encrypted INTEGER NOT NULL DEFAULT 0,
    nonce BLOB,
    model_version TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS persons (
    person_id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    contact_key TEXT NOT NULL UNIQUE,
    profile_ref TEXT,
    tree_membership TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS family_trees (
    tree_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_by TEXT NOT NULL,
    document TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_family_trees_created_by
    ON family_trees(created_by);
";

#[cfg(test)]
pub(crate) mod testutil {
    use std::path::PathBuf;

    /// Temp database path removed on drop (WAL sidecars included).
    pub struct TempDb {
        pub path: PathBuf,
    }

    impl TempDb {
        pub fn new() -> Self {
            let path = std::env::temp_dir()
                .join(format!("lineage-test-{}.db", uuid::Uuid::new_v4()));
            Self { path }
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            for suffix in ["", "-wal", "-shm"] {
                let mut os = self.path.clone().into_os_string();
                os.push(suffix);
                let _ = std::fs::remove_file(os);
            }
        }
    }
}
