//! Similarity search engine.
//!
//! Ranks a query embedding against every stored record by dot product
//! over unit-normalized vectors (cosine similarity). A linear scan over
//! the store snapshot is the reference implementation: O(N·D) per query
//! for N records of fixed dimension D = 512.

use crate::error::{Error, Result};
use crate::store::EmbeddingStore;
use crate::types::{Embedding, SearchHit, EMBEDDING_DIM};

pub struct SearchEngine<S> {
    store: S,
}

impl<S: Clone> Clone for SearchEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: EmbeddingStore> SearchEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Rank the store against `query`.
    ///
    /// Returns at most `top_k` hits with `score > min_score` (strict),
    /// descending by score; equal scores order by `person_id` ascending
    /// so results are reproducible.
    ///
    /// A query with a non-unit norm is re-normalized before scoring — raw
    /// vectors are never scored against the normalized store, so one
    /// metric applies to every record. A zero or wrongly-dimensioned
    /// query fails with `InvalidQuery`. `min_score` is taken as-is; any
    /// value below -1 simply disables the threshold.
    ///
    /// Pure read: the result is a function of the store snapshot at call
    /// time plus the tie-break rule.
    pub async fn search(
        &self,
        query: &Embedding,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<SearchHit>> {
        if query.dim() != EMBEDDING_DIM {
            return Err(Error::InvalidQuery(format!(
                "expected {EMBEDDING_DIM} dimensions, got {}",
                query.dim()
            )));
        }
        let query = if query.is_unit_norm() {
            query.clone()
        } else {
            query
                .normalized()
                .map_err(|_| Error::InvalidQuery("zero query vector".to_string()))?
        };

        if top_k == 0 {
            return Ok(Vec::new());
        }

        let records = self.store.scan().await?;
        let scanned = records.len();

        let mut hits: Vec<SearchHit> = records
            .into_iter()
            .map(|record| SearchHit {
                score: query.dot(&record.embedding),
                person_id: record.person_id,
            })
            .filter(|hit| hit.score > min_score)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.person_id.cmp(&b.person_id))
        });
        hits.truncate(top_k);

        tracing::debug!(
            scanned,
            returned = hits.len(),
            top_k,
            min_score = f64::from(min_score),
            "search complete"
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEmbeddingStore;

    fn basis(idx: usize) -> Embedding {
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[idx] = 1.0;
        Embedding::new(values)
    }

    /// Unit vector at a chosen cosine similarity to `basis(0)`.
    fn at_similarity(score: f32) -> Embedding {
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[0] = score;
        values[1] = (1.0 - score * score).sqrt();
        Embedding::new(values)
    }

    async fn engine_with(
        records: &[(&str, Embedding)],
    ) -> SearchEngine<MemoryEmbeddingStore> {
        let store = MemoryEmbeddingStore::default();
        for (id, embedding) in records {
            store.put(id, embedding.clone()).await.unwrap();
        }
        SearchEngine::new(store)
    }

    #[tokio::test]
    async fn empty_store_returns_empty() {
        let engine = engine_with(&[]).await;
        let hits = engine.search(&basis(0), 10, -1.0).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn top_k_zero_returns_empty() {
        let engine = engine_with(&[("a", basis(0))]).await;
        let hits = engine.search(&basis(0), 0, -1.0).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn dimension_mismatch_is_invalid_query() {
        let engine = engine_with(&[("a", basis(0))]).await;
        let err = engine
            .search(&Embedding::new(vec![1.0, 0.0]), 5, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn zero_query_is_invalid_query() {
        let engine = engine_with(&[("a", basis(0))]).await;
        let err = engine
            .search(&Embedding::new(vec![0.0; EMBEDDING_DIM]), 5, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn non_unit_query_is_renormalized() {
        let engine = engine_with(&[("a", basis(0))]).await;
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[0] = 10.0; // same direction as the stored record
        let hits = engine
            .search(&Embedding::new(values), 5, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn min_score_threshold_is_strict() {
        // An orthogonal record scores exactly 0.0, which is not > 0.0.
        let engine = engine_with(&[("at", basis(1)), ("above", basis(0))]).await;
        let hits = engine.search(&basis(0), 10, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].person_id, "above");
    }

    #[tokio::test]
    async fn scores_descend_and_respect_top_k() {
        let engine = engine_with(&[
            ("low", at_similarity(0.2)),
            ("high", at_similarity(0.95)),
            ("mid", at_similarity(0.6)),
        ])
        .await;

        let hits = engine.search(&basis(0), 2, -1.0).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].person_id, "high");
        assert_eq!(hits[1].person_id, "mid");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn equal_scores_tie_break_by_person_id_ascending() {
        // Store of 3 with scores {A: 0.9, B: 0.9, C: 0.5}; top_k = 2,
        // min_score = 0.0 must return exactly [A, B].
        let engine = engine_with(&[
            ("C", at_similarity(0.5)),
            ("B", at_similarity(0.9)),
            ("A", at_similarity(0.9)),
        ])
        .await;

        let hits = engine.search(&basis(0), 2, 0.0).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.person_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn negative_similarity_filtered_by_default_threshold() {
        let mut values = vec![0.0f32; EMBEDDING_DIM];
        values[0] = -1.0;
        let engine = engine_with(&[("opposite", Embedding::new(values))]).await;

        let hits = engine.search(&basis(0), 10, 0.0).await.unwrap();
        assert!(hits.is_empty());

        // A threshold below -1 disables filtering entirely.
        let hits = engine.search(&basis(0), 10, -1.1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score + 1.0).abs() < 1e-5);
    }
}
