//! Second-pass reordering of retrieved hits.
//!
//! The pipeline calls a [`Reranker`] after retrieval. A cross-encoder or a
//! remote reranking service can implement the trait; the in-core
//! [`WeightedReranker`] rescores every hit with the hybrid relevance formula.
//! When the semantic term cannot be recomputed (no query vector, or a
//! document without an embedding) the hit's retrieval-time
//! `semantic_score` is kept.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::SearchHit;
use crate::search::{combined_relevance, score_document, sort_by_score};

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Return `hits` in a new order. Implementations may rewrite scores but
    /// must not add documents.
    async fn rerank(
        &self,
        query: &str,
        query_vec: Option<&[f32]>,
        hits: &[SearchHit],
    ) -> Result<Vec<SearchHit>>;
}

/// Rescores with `0.7 × semantic + 0.2 × keyword + 0.1 × title`.
///
/// Equal scores keep their retrieval order.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedReranker;

#[async_trait]
impl Reranker for WeightedReranker {
    async fn rerank(
        &self,
        query: &str,
        query_vec: Option<&[f32]>,
        hits: &[SearchHit],
    ) -> Result<Vec<SearchHit>> {
        let mut rescored: Vec<SearchHit> = hits
            .iter()
            .map(|hit| {
                let mut rescored = score_document(query, query_vec, &hit.document);
                if query_vec.is_none() || hit.document.embedding.is_none() {
                    rescored.semantic_score = hit.semantic_score;
                    rescored.score = combined_relevance(
                        hit.semantic_score,
                        rescored.keyword_score,
                        rescored.title_score,
                    );
                }
                rescored
            })
            .collect();
        sort_by_score(&mut rescored);
        Ok(rescored)
    }
}
