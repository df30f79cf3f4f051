//! Storage contracts.
//!
//! The engines are written against these traits so the durable backend is
//! an injected collaborator, not a process-wide singleton. Futures are
//! declared `Send` so engine calls stay request-parallel on a
//! multi-threaded runtime; the storage boundary is the only suspension
//! point.

use std::collections::BTreeSet;
use std::future::Future;

use crate::error::Result;
use crate::tree::FamilyTree;
use crate::types::{Embedding, EmbeddingRecord, Person};

/// Durable mapping from person id to a unit-normalized embedding.
pub trait EmbeddingStore: Send + Sync {
    /// Validate, L2-normalize, and store `embedding` under `person_id`,
    /// replacing any existing record atomically. A concurrent `scan`
    /// observes either the old or the new vector, never a mix.
    ///
    /// Fails with `InvalidVector` on wrong dimensionality or a zero
    /// vector.
    fn put(
        &self,
        person_id: &str,
        embedding: Embedding,
    ) -> impl Future<Output = Result<()>> + Send;

    fn get(
        &self,
        person_id: &str,
    ) -> impl Future<Output = Result<Option<EmbeddingRecord>>> + Send;

    /// Point-in-time snapshot of every stored record, restartable on each
    /// call. Ordering is unspecified; the search engine imposes its own.
    fn scan(&self) -> impl Future<Output = Result<Vec<EmbeddingRecord>>> + Send;

    /// Idempotent delete — a missing record is not an error.
    fn delete(&self, person_id: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Registered identities and their tree memberships.
pub trait PersonStore: Send + Sync {
    /// Fails with `ContactKeyInUse` if another person already holds the
    /// same contact key.
    fn insert(&self, person: Person) -> impl Future<Output = Result<()>> + Send;

    fn get(&self, person_id: &str) -> impl Future<Output = Result<Option<Person>>> + Send;

    fn find_by_contact_key(
        &self,
        contact_key: &str,
    ) -> impl Future<Output = Result<Option<Person>>> + Send;

    /// Atomically record that `person_id` joined `tree_id`.
    ///
    /// Fails with `AlreadyMember` if the person already belongs to any
    /// tree, and `PersonNotFound` if the person is unknown. The check and
    /// the write are a single atomic step — two concurrent claims for the
    /// same person cannot both succeed.
    fn claim_membership(
        &self,
        person_id: &str,
        tree_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Idempotent release of a membership recorded by `claim_membership`.
    fn release_membership(
        &self,
        person_id: &str,
        tree_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Idempotent delete of the person record.
    fn delete(&self, person_id: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Family trees, each stored as one document embedding its full node tree.
pub trait TreeStore: Send + Sync {
    fn insert(&self, tree: FamilyTree) -> impl Future<Output = Result<()>> + Send;

    fn get(&self, tree_id: &str) -> impl Future<Output = Result<Option<FamilyTree>>> + Send;

    /// Replace the stored document for `tree.tree_id`. Fails with
    /// `TreeNotFound` if no such tree exists.
    fn update(&self, tree: &FamilyTree) -> impl Future<Output = Result<()>> + Send;

    /// Ids of every tree whose `created_by` is `person_id`.
    fn find_created_by(
        &self,
        person_id: &str,
    ) -> impl Future<Output = Result<BTreeSet<String>>> + Send;
}
