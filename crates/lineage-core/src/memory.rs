//! In-memory reference implementations of the storage contracts.
//!
//! Used by unit tests and embeddable deployments that do not need
//! durability. Each store is a cheaply clonable handle onto shared
//! state; writes swap whole records, so readers observe either the old
//! or the new value, never a mix.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use crate::error::{Error, Result};
use crate::store::{EmbeddingStore, PersonStore, TreeStore};
use crate::tree::FamilyTree;
use crate::types::{Embedding, EmbeddingRecord, Person};

fn read<'a, T>(lock: &'a RwLock<T>, what: &str) -> Result<RwLockReadGuard<'a, T>> {
    lock.read()
        .map_err(|_| Error::StorageUnavailable(format!("{what} lock poisoned")))
}

fn write<'a, T>(lock: &'a RwLock<T>, what: &str) -> Result<RwLockWriteGuard<'a, T>> {
    lock.write()
        .map_err(|_| Error::StorageUnavailable(format!("{what} lock poisoned")))
}

#[derive(Clone, Default)]
pub struct MemoryEmbeddingStore {
    records: Arc<RwLock<HashMap<String, EmbeddingRecord>>>,
}

impl EmbeddingStore for MemoryEmbeddingStore {
    async fn put(&self, person_id: &str, embedding: Embedding) -> Result<()> {
        let stored = embedding.into_stored()?;
        let record = EmbeddingRecord {
            person_id: person_id.to_string(),
            embedding: stored,
            updated_at: Utc::now(),
        };
        write(&self.records, "embedding store")?.insert(person_id.to_string(), record);
        Ok(())
    }

    async fn get(&self, person_id: &str) -> Result<Option<EmbeddingRecord>> {
        Ok(read(&self.records, "embedding store")?.get(person_id).cloned())
    }

    async fn scan(&self) -> Result<Vec<EmbeddingRecord>> {
        Ok(read(&self.records, "embedding store")?.values().cloned().collect())
    }

    async fn delete(&self, person_id: &str) -> Result<()> {
        write(&self.records, "embedding store")?.remove(person_id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryPersonStore {
    persons: Arc<RwLock<HashMap<String, Person>>>,
}

impl PersonStore for MemoryPersonStore {
    async fn insert(&self, person: Person) -> Result<()> {
        let mut map = write(&self.persons, "person store")?;
        if map
            .values()
            .any(|p| p.contact_key == person.contact_key && p.person_id != person.person_id)
        {
            return Err(Error::ContactKeyInUse(person.contact_key));
        }
        map.insert(person.person_id.clone(), person);
        Ok(())
    }

    async fn get(&self, person_id: &str) -> Result<Option<Person>> {
        Ok(read(&self.persons, "person store")?.get(person_id).cloned())
    }

    async fn find_by_contact_key(&self, contact_key: &str) -> Result<Option<Person>> {
        Ok(read(&self.persons, "person store")?
            .values()
            .find(|p| p.contact_key == contact_key)
            .cloned())
    }

    async fn claim_membership(&self, person_id: &str, tree_id: &str) -> Result<()> {
        let mut map = write(&self.persons, "person store")?;
        let person = map
            .get_mut(person_id)
            .ok_or_else(|| Error::PersonNotFound(person_id.to_string()))?;
        if !person.tree_memberships.is_empty() {
            return Err(Error::AlreadyMember(person_id.to_string()));
        }
        person.tree_memberships.insert(tree_id.to_string());
        Ok(())
    }

    async fn release_membership(&self, person_id: &str, tree_id: &str) -> Result<()> {
        if let Some(person) = write(&self.persons, "person store")?.get_mut(person_id) {
            person.tree_memberships.remove(tree_id);
        }
        Ok(())
    }

    async fn delete(&self, person_id: &str) -> Result<()> {
        write(&self.persons, "person store")?.remove(person_id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryTreeStore {
    trees: Arc<RwLock<HashMap<String, FamilyTree>>>,
}

impl TreeStore for MemoryTreeStore {
    async fn insert(&self, tree: FamilyTree) -> Result<()> {
        write(&self.trees, "tree store")?.insert(tree.tree_id.clone(), tree);
        Ok(())
    }

    async fn get(&self, tree_id: &str) -> Result<Option<FamilyTree>> {
        Ok(read(&self.trees, "tree store")?.get(tree_id).cloned())
    }

    async fn update(&self, tree: &FamilyTree) -> Result<()> {
        let mut map = write(&self.trees, "tree store")?;
        if !map.contains_key(&tree.tree_id) {
            return Err(Error::TreeNotFound(tree.tree_id.clone()));
        }
        map.insert(tree.tree_id.clone(), tree.clone());
        Ok(())
    }

    async fn find_created_by(&self, person_id: &str) -> Result<BTreeSet<String>> {
        Ok(read(&self.trees, "tree store")?
            .values()
            .filter(|t| t.created_by == person_id)
            .map(|t| t.tree_id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EMBEDDING_DIM;

    fn unit(idx: usize) -> Embedding {
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[idx] = 1.0;
        Embedding::new(values)
    }

    #[tokio::test]
    async fn put_normalizes_before_storing() {
        let store = MemoryEmbeddingStore::default();
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[0] = 5.0;
        store.put("p1", Embedding::new(values)).await.unwrap();

        let record = store.get("p1").await.unwrap().unwrap();
        assert!(record.embedding.is_unit_norm());
    }

    #[tokio::test]
    async fn put_replaces_whole_record() {
        let store = MemoryEmbeddingStore::default();
        store.put("p1", unit(0)).await.unwrap();
        store.put("p1", unit(1)).await.unwrap();

        let record = store.get("p1").await.unwrap().unwrap();
        assert_eq!(record.embedding.values[1], 1.0);
        assert_eq!(store.scan().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryEmbeddingStore::default();
        store.put("p1", unit(0)).await.unwrap();
        store.delete("p1").await.unwrap();
        store.delete("p1").await.unwrap();
        assert!(store.get("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_contact_key_rejected() {
        let store = MemoryPersonStore::default();
        let mut a = Person {
            person_id: "a".into(),
            display_name: "A".into(),
            contact_key: "a@example.com".into(),
            profile_ref: None,
            tree_memberships: BTreeSet::new(),
            created_at: Utc::now(),
        };
        store.insert(a.clone()).await.unwrap();

        a.person_id = "b".into();
        let err = store.insert(a).await.unwrap_err();
        assert!(matches!(err, Error::ContactKeyInUse(_)));
    }

    #[tokio::test]
    async fn claim_membership_is_single_shot() {
        let store = MemoryPersonStore::default();
        store
            .insert(Person {
                person_id: "a".into(),
                display_name: "A".into(),
                contact_key: "a@example.com".into(),
                profile_ref: None,
                tree_memberships: BTreeSet::new(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        store.claim_membership("a", "t1").await.unwrap();
        let err = store.claim_membership("a", "t2").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyMember(_)));

        store.release_membership("a", "t1").await.unwrap();
        store.claim_membership("a", "t2").await.unwrap();
    }
}
