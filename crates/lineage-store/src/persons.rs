//! SQLite-backed person store.
//!
//! The single-tree membership invariant lives in the `tree_membership`
//! column: claiming is an `UPDATE … WHERE tree_membership IS NULL`, so
//! two concurrent claims for the same person cannot both succeed.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tokio_rusqlite::Connection;

use lineage_core::{Error, Person, PersonStore, Result};

use crate::db::storage_err;

#[derive(Clone)]
pub struct SqlitePersonStore {
    conn: Connection,
}

impl SqlitePersonStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

fn read_person(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Person, Option<String>)> {
    let created_at_raw: String = row.get(5)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })?
        .with_timezone(&Utc);

    let membership: Option<String> = row.get(4)?;
    Ok((
        Person {
            person_id: row.get(0)?,
            display_name: row.get(1)?,
            contact_key: row.get(2)?,
            profile_ref: row.get(3)?,
            tree_memberships: BTreeSet::new(),
            created_at,
        },
        membership,
    ))
}

fn with_membership((mut person, membership): (Person, Option<String>)) -> Person {
    if let Some(tree_id) = membership {
        person.tree_memberships.insert(tree_id);
    }
    person
}

const SELECT_COLUMNS: &str =
    "person_id, display_name, contact_key, profile_ref, tree_membership, created_at";

enum ClaimOutcome {
    Claimed,
    AlreadyMember,
    NoPerson,
}

impl PersonStore for SqlitePersonStore {
    async fn insert(&self, person: Person) -> Result<()> {
        let membership = person.tree_memberships.iter().next().cloned();
        let created_at = person.created_at.to_rfc3339();
        let contact_key = person.contact_key.clone();

        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let taken: bool = tx.query_row(
                    "SELECT EXISTS(
                        SELECT 1 FROM persons
                        WHERE contact_key = ?1 AND person_id != ?2
                     )",
                    params![person.contact_key, person.person_id],
                    |row| row.get(0),
                )?;
                if taken {
                    return Ok(false);
                }
                tx.execute(
                    "INSERT INTO persons
                        (person_id, display_name, contact_key, profile_ref, tree_membership, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(person_id) DO UPDATE SET
                        display_name = excluded.display_name,
                        contact_key = excluded.contact_key,
                        profile_ref = excluded.profile_ref",
                    params![
                        person.person_id,
                        person.display_name,
                        person.contact_key,
                        person.profile_ref,
                        membership,
                        created_at
                    ],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await
            .map_err(storage_err)?;

        if !inserted {
            return Err(Error::ContactKeyInUse(contact_key));
        }
        Ok(())
    }

    async fn get(&self, person_id: &str) -> Result<Option<Person>> {
        let person_id = person_id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {SELECT_COLUMNS} FROM persons WHERE person_id = ?1"),
                        params![person_id],
                        read_person,
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(storage_err)?;
        Ok(row.map(with_membership))
    }

    async fn find_by_contact_key(&self, contact_key: &str) -> Result<Option<Person>> {
        let contact_key = contact_key.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {SELECT_COLUMNS} FROM persons WHERE contact_key = ?1"),
                        params![contact_key],
                        read_person,
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(storage_err)?;
        Ok(row.map(with_membership))
    }

    async fn claim_membership(&self, person_id: &str, tree_id: &str) -> Result<()> {
        let id = person_id.to_string();
        let tree = tree_id.to_string();

        let outcome = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE persons SET tree_membership = ?1
                     WHERE person_id = ?2 AND tree_membership IS NULL",
                    params![tree, id],
                )?;
                if changed == 1 {
                    return Ok(ClaimOutcome::Claimed);
                }
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM persons WHERE person_id = ?1)",
                    params![id],
                    |row| row.get(0),
                )?;
                Ok(if exists {
                    ClaimOutcome::AlreadyMember
                } else {
                    ClaimOutcome::NoPerson
                })
            })
            .await
            .map_err(storage_err)?;

        match outcome {
            ClaimOutcome::Claimed => Ok(()),
            ClaimOutcome::AlreadyMember => Err(Error::AlreadyMember(person_id.to_string())),
            ClaimOutcome::NoPerson => Err(Error::PersonNotFound(person_id.to_string())),
        }
    }

    async fn release_membership(&self, person_id: &str, tree_id: &str) -> Result<()> {
        let person_id = person_id.to_string();
        let tree_id = tree_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE persons SET tree_membership = NULL
                     WHERE person_id = ?1 AND tree_membership = ?2",
                    params![person_id, tree_id],
                )?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    async fn delete(&self, person_id: &str) -> Result<()> {
        let person_id = person_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM persons WHERE person_id = ?1", params![person_id])?;
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

    fn person(id: &str, contact: &str) -> Person {
        Person {
            person_id: id.to_string(),
            display_name: format!("Person {id}"),
            contact_key: contact.to_string(),
            profile_ref: None,
            tree_memberships: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_get_round_trip() {
        let tmp = TempDb::new();
        let store = SqlitePersonStore::new(open_database(&tmp.path).await.unwrap());

        store.insert(person("a", "a@example.com")).await.unwrap();
        let fetched = store.get("a").await.unwrap().unwrap();
        assert_eq!(fetched.display_name, "Person a");
        assert!(fetched.tree_memberships.is_empty());

        let by_contact = store
            .find_by_contact_key("a@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_contact.person_id, "a");
    }

    #[tokio::test]
    async fn duplicate_contact_key_rejected() {
        let tmp = TempDb::new();
        let store = SqlitePersonStore::new(open_database(&tmp.path).await.unwrap());

        store.insert(person("a", "same@example.com")).await.unwrap();
        let err = store
            .insert(person("b", "same@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ContactKeyInUse(_)));
    }

    #[tokio::test]
    async fn claim_is_single_shot_and_release_is_idempotent() {
        let tmp = TempDb::new();
        let store = SqlitePersonStore::new(open_database(&tmp.path).await.unwrap());
        store.insert(person("a", "a@example.com")).await.unwrap();

        store.claim_membership("a", "t1").await.unwrap();
        let fetched = store.get("a").await.unwrap().unwrap();
        assert!(fetched.tree_memberships.contains("t1"));

        let err = store.claim_membership("a", "t2").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyMember(_)));

        store.release_membership("a", "t1").await.unwrap();
        store.release_membership("a", "t1").await.unwrap();
        store.claim_membership("a", "t2").await.unwrap();
    }

    #[tokio::test]
    async fn claim_for_unknown_person() {
        let tmp = TempDb::new();
        let store = SqlitePersonStore::new(open_database(&tmp.path).await.unwrap());
        let err = store.claim_membership("ghost", "t1").await.unwrap_err();
        assert!(matches!(err, Error::PersonNotFound(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let tmp = TempDb::new();
        let store = SqlitePersonStore::new(open_database(&tmp.path).await.unwrap());
        store.insert(person("a", "a@example.com")).await.unwrap();
        store.delete("a").await.unwrap();
        store.delete("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }
}
