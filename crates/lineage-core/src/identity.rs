//! Identity lifecycle: registration, re-enrollment, lookup, deletion.
//!
//! Callers arrive with an embedding already extracted by the face-model
//! collaborator — this module never sees image bytes.

use std::collections::BTreeSet;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{EmbeddingStore, PersonStore};
use crate::types::{Embedding, Person};

pub struct IdentityService<E, P> {
    embeddings: E,
    persons: P,
}

impl<E: Clone, P: Clone> Clone for IdentityService<E, P> {
    fn clone(&self) -> Self {
        Self {
            embeddings: self.embeddings.clone(),
            persons: self.persons.clone(),
        }
    }
}

impl<E: EmbeddingStore, P: PersonStore> IdentityService<E, P> {
    pub fn new(embeddings: E, persons: P) -> Self {
        Self { embeddings, persons }
    }

    /// Register a new identity with a biometric embedding.
    ///
    /// The embedding is validated and L2-normalized by the store. Fails
    /// with `ContactKeyInUse` if the contact key is taken.
    pub async fn register(
        &self,
        display_name: &str,
        contact_key: &str,
        profile_ref: Option<String>,
        embedding: Embedding,
    ) -> Result<Person> {
        if self.persons.find_by_contact_key(contact_key).await?.is_some() {
            return Err(Error::ContactKeyInUse(contact_key.to_string()));
        }

        let person_id = Uuid::new_v4().to_string();
        self.embeddings.put(&person_id, embedding).await?;

        let person = Person {
            person_id: person_id.clone(),
            display_name: display_name.to_string(),
            contact_key: contact_key.to_string(),
            profile_ref,
            tree_memberships: BTreeSet::new(),
            created_at: Utc::now(),
        };
        if let Err(err) = self.persons.insert(person.clone()).await {
            // Do not leave an orphaned embedding behind.
            let _ = self.embeddings.delete(&person_id).await;
            return Err(err);
        }

        tracing::info!(%person_id, "identity registered");
        Ok(person)
    }

    /// Create a person record without an embedding — used when a tree
    /// member is added on someone's behalf before they enroll.
    pub async fn create_person(
        &self,
        display_name: &str,
        contact_key: &str,
        profile_ref: Option<String>,
    ) -> Result<Person> {
        if self.persons.find_by_contact_key(contact_key).await?.is_some() {
            return Err(Error::ContactKeyInUse(contact_key.to_string()));
        }

        let person = Person {
            person_id: Uuid::new_v4().to_string(),
            display_name: display_name.to_string(),
            contact_key: contact_key.to_string(),
            profile_ref,
            tree_memberships: BTreeSet::new(),
            created_at: Utc::now(),
        };
        self.persons.insert(person.clone()).await?;
        Ok(person)
    }

    /// Replace the stored embedding for an existing identity. The swap is
    /// atomic: a concurrent search observes the old vector or the new
    /// one, never a mix.
    pub async fn re_enroll(&self, person_id: &str, embedding: Embedding) -> Result<()> {
        if self.persons.get(person_id).await?.is_none() {
            return Err(Error::PersonNotFound(person_id.to_string()));
        }
        self.embeddings.put(person_id, embedding).await?;
        tracing::info!(person_id, "embedding re-enrolled");
        Ok(())
    }

    pub async fn get_person(&self, person_id: &str) -> Result<Person> {
        self.persons
            .get(person_id)
            .await?
            .ok_or_else(|| Error::PersonNotFound(person_id.to_string()))
    }

    /// Delete an identity: embedding, tree membership, person record.
    ///
    /// Idempotent — deleting an unknown id succeeds. Member nodes
    /// referencing the deleted person stay in their tree documents; the
    /// coordinator tolerates such dangling references.
    pub async fn delete_identity(&self, person_id: &str) -> Result<()> {
        self.embeddings.delete(person_id).await?;

        if let Some(person) = self.persons.get(person_id).await? {
            for tree_id in &person.tree_memberships {
                self.persons.release_membership(person_id, tree_id).await?;
            }
            self.persons.delete(person_id).await?;
            tracing::info!(person_id, "identity deleted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryEmbeddingStore, MemoryPersonStore};
    use crate::types::EMBEDDING_DIM;

    fn unit(idx: usize) -> Embedding {
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[idx] = 1.0;
        Embedding::new(values)
    }

    fn service() -> (
        IdentityService<MemoryEmbeddingStore, MemoryPersonStore>,
        MemoryEmbeddingStore,
        MemoryPersonStore,
    ) {
        let embeddings = MemoryEmbeddingStore::default();
        let persons = MemoryPersonStore::default();
        (
            IdentityService::new(embeddings.clone(), persons.clone()),
            embeddings,
            persons,
        )
    }

    #[tokio::test]
    async fn register_stores_embedding_and_person() {
        let (service, embeddings, _) = service();
        let person = service
            .register("Ada", "ada@example.com", None, unit(0))
            .await
            .unwrap();

        let record = embeddings.get(&person.person_id).await.unwrap().unwrap();
        assert!(record.embedding.is_unit_norm());
        let fetched = service.get_person(&person.person_id).await.unwrap();
        assert_eq!(fetched.contact_key, "ada@example.com");
    }

    #[tokio::test]
    async fn register_rejects_duplicate_contact_key() {
        let (service, _, _) = service();
        service
            .register("Ada", "ada@example.com", None, unit(0))
            .await
            .unwrap();
        let err = service
            .register("Imposter", "ada@example.com", None, unit(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ContactKeyInUse(_)));
    }

    #[tokio::test]
    async fn register_rejects_invalid_embedding_without_person_record() {
        let (service, _, persons) = service();
        let err = service
            .register("Ada", "ada@example.com", None, Embedding::new(vec![1.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidVector(_)));
        assert!(persons
            .find_by_contact_key("ada@example.com")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn re_enroll_replaces_vector() {
        let (service, embeddings, _) = service();
        let person = service
            .register("Ada", "ada@example.com", None, unit(0))
            .await
            .unwrap();
        service.re_enroll(&person.person_id, unit(1)).await.unwrap();

        let record = embeddings.get(&person.person_id).await.unwrap().unwrap();
        assert_eq!(record.embedding.values[1], 1.0);
    }

    #[tokio::test]
    async fn re_enroll_unknown_person() {
        let (service, _, _) = service();
        let err = service.re_enroll("ghost", unit(0)).await.unwrap_err();
        assert!(matches!(err, Error::PersonNotFound(_)));
    }

    #[tokio::test]
    async fn delete_identity_cascades_and_is_idempotent() {
        let (service, embeddings, persons) = service();
        let person = service
            .register("Ada", "ada@example.com", None, unit(0))
            .await
            .unwrap();
        persons
            .claim_membership(&person.person_id, "t1")
            .await
            .unwrap();

        service.delete_identity(&person.person_id).await.unwrap();
        assert!(embeddings.get(&person.person_id).await.unwrap().is_none());
        assert!(persons.get(&person.person_id).await.unwrap().is_none());

        // Second delete is a quiet success.
        service.delete_identity(&person.person_id).await.unwrap();
    }
}
