//! Search-then-enrich orchestration.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::search::SearchEngine;
use crate::store::{EmbeddingStore, PersonStore, TreeStore};
use crate::tree::TreeEngine;
use crate::types::{Embedding, EnrichedHit};

/// Composes the search engine with tree-membership lookups.
pub struct Coordinator<S, T, P> {
    search: SearchEngine<S>,
    trees: TreeEngine<T, P>,
}

impl<S: Clone, T: Clone, P: Clone> Clone for Coordinator<S, T, P> {
    fn clone(&self) -> Self {
        Self {
            search: self.search.clone(),
            trees: self.trees.clone(),
        }
    }
}

impl<S, T, P> Coordinator<S, T, P>
where
    S: EmbeddingStore,
    T: TreeStore,
    P: PersonStore,
{
    pub fn new(search: SearchEngine<S>, trees: TreeEngine<T, P>) -> Self {
        Self { search, trees }
    }

    /// Rank the store against `query`, then attach the trees each matched
    /// identity created.
    ///
    /// A failed tree lookup for one hit (a dangling reference, say)
    /// yields an empty `owned_tree_ids` for that hit instead of failing
    /// the whole batch — a single missing cross-reference must not sink
    /// an otherwise-valid ranked result set.
    pub async fn search_and_enrich(
        &self,
        query: &Embedding,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<EnrichedHit>> {
        let hits = self.search.search(query, top_k, min_score).await?;

        let mut enriched = Vec::with_capacity(hits.len());
        for hit in hits {
            let owned_tree_ids = match self.trees.find_trees_created_by(&hit.person_id).await {
                Ok(ids) => ids,
                Err(err) => {
                    tracing::warn!(
                        person_id = %hit.person_id,
                        error = %err,
                        "tree lookup failed for hit; emitting empty tree set"
                    );
                    BTreeSet::new()
                }
            };
            enriched.push(EnrichedHit {
                person_id: hit.person_id,
                score: hit.score,
                owned_tree_ids,
            });
        }
        Ok(enriched)
    }
}
