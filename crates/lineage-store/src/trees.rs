//! SQLite-backed family-tree store.
//!
//! Each tree is one row holding the full document — root node graph and
//! linked-tree set — as JSON, with `created_by` broken out into an
//! indexed column for the enrichment lookup.

use std::collections::BTreeSet;

use rusqlite::{params, OptionalExtension};
use tokio_rusqlite::Connection;

use lineage_core::{Error, FamilyTree, Result, TreeStore};

use crate::db::storage_err;

#[derive(Clone)]
pub struct SqliteTreeStore {
    conn: Connection,
}

impl SqliteTreeStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

fn to_document(tree: &FamilyTree) -> Result<String> {
    serde_json::to_string(tree)
        .map_err(|err| Error::StorageUnavailable(format!("encode tree document: {err}")))
}

fn from_document(document: &str) -> Result<FamilyTree> {
    serde_json::from_str(document)
        .map_err(|err| Error::StorageUnavailable(format!("corrupt tree document: {err}")))
}

impl TreeStore for SqliteTreeStore {
    async fn insert(&self, tree: FamilyTree) -> Result<()> {
        let document = to_document(&tree)?;
        let created_at = tree.created_at.to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO family_trees (tree_id, name, created_by, document, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![tree.tree_id, tree.name, tree.created_by, document, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    async fn get(&self, tree_id: &str) -> Result<Option<FamilyTree>> {
        let tree_id = tree_id.to_string();
        let document = self
            .conn
            .call(move |conn| {
                let document: Option<String> = conn
                    .query_row(
                        "SELECT document FROM family_trees WHERE tree_id = ?1",
                        params![tree_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(document)
            })
            .await
            .map_err(storage_err)?;

        document.as_deref().map(from_document).transpose()
    }

    async fn update(&self, tree: &FamilyTree) -> Result<()> {
        let document = to_document(tree)?;
        let tree_id = tree.tree_id.clone();
        let name = tree.name.clone();
        let created_by = tree.created_by.clone();

        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE family_trees
                     SET name = ?2, created_by = ?3, document = ?4
                     WHERE tree_id = ?1",
                    params![tree_id, name, created_by, document],
                )?;
                Ok(changed)
            })
            .await
            .map_err(storage_err)?;

        if changed == 0 {
            return Err(Error::TreeNotFound(tree.tree_id.clone()));
        }
        Ok(())
    }

    async fn find_created_by(&self, person_id: &str) -> Result<BTreeSet<String>> {
        let person_id = person_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT tree_id FROM family_trees WHERE created_by = ?1")?;
                let ids = stmt
                    .query_map(params![person_id], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<BTreeSet<_>>>()?;
                Ok(ids)
            })
            .await
            .map_err(storage_err)
    }
}
