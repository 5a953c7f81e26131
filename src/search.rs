//! Semantic, hybrid and diversity-aware retrieval.
//!
//! The [`Retriever`] operates entirely through the [`VectorStore`] trait.
//! Callers embed the query themselves (or let the
//! [`RagPipeline`](crate::pipeline::RagPipeline) do it) and pass the vector in.
//!
//! # Hybrid Scoring
//!
//! ```text
//! relevance = 0.7 × semantic + 0.2 × body_keyword + 0.1 × title_keyword
//! ```
//!
//! `semantic` is the cosine similarity between query and document
//! embeddings, or `0.0` when either is missing. The keyword terms are
//! [`lexical_score`] against the body and the title. Documents with no
//! signal at all are dropped; `threshold` applies to the combined score.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cache::QueryCache;
use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::mmr;
use crate::models::{Document, SearchHit};
use crate::store::{SearchFilter, VectorStore};

pub const SEMANTIC_WEIGHT: f32 = 0.7;
pub const KEYWORD_WEIGHT: f32 = 0.2;
pub const TITLE_WEIGHT: f32 = 0.1;

/// Fraction of lower-cased whitespace-separated query terms that occur as
/// substrings of the lower-cased `text`. An empty query scores `0.0`.
pub fn lexical_score(query: &str, text: &str) -> f64 {
    let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
    if terms.is_empty() {
        return 0.0;
    }
    let haystack = text.to_lowercase();
    let found = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    found as f64 / terms.len() as f64
}

/// Weighted blend of the three relevance signals.
pub fn combined_relevance(semantic: f32, keyword: f32, title: f32) -> f32 {
    SEMANTIC_WEIGHT * semantic + KEYWORD_WEIGHT * keyword + TITLE_WEIGHT * title
}

/// Score one document against a query for hybrid retrieval.
pub(crate) fn score_document(query: &str, query_vec: Option<&[f32]>, doc: &Document) -> SearchHit {
    let semantic = match (query_vec, doc.embedding.as_deref()) {
        (Some(q), Some(e)) => cosine_similarity(q, e),
        _ => 0.0,
    };
    let keyword = lexical_score(query, &doc.content) as f32;
    let title = lexical_score(query, &doc.title) as f32;
    SearchHit {
        document: doc.clone(),
        score: combined_relevance(semantic, keyword, title),
        semantic_score: semantic,
        keyword_score: keyword,
        title_score: title,
    }
}

pub(crate) fn sort_by_score(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Runs semantic, hybrid and MMR searches against a [`VectorStore`].
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    query_cache: Option<Arc<QueryCache>>,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            query_cache: None,
        }
    }

    /// Memoize [`retrieve`](Retriever::retrieve) results in `cache`.
    ///
    /// Entries are keyed on the store generation, so a write to the store
    /// makes earlier entries unreachable.
    pub fn with_query_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.query_cache = Some(cache);
        self
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Top-`top_k` documents by cosine similarity, all scoring at least
    /// `threshold`. Ties keep insertion order.
    pub async fn retrieve(
        &self,
        query_vec: &[f32],
        top_k: usize,
        threshold: f32,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        let key = self
            .query_cache
            .as_ref()
            .map(|_| query_key(self.store.generation(), query_vec, top_k, threshold, filter));
        if let (Some(cache), Some(key)) = (&self.query_cache, &key) {
            if let Some(hits) = cache.get(key) {
                debug!(top_k, "query cache hit");
                return Ok(hits);
            }
        }

        let hits = self
            .store
            .vector_search(query_vec, top_k, threshold, filter)
            .await?;
        debug!(top_k, threshold, returned = hits.len(), "vector retrieval");

        if let (Some(cache), Some(key)) = (&self.query_cache, key) {
            cache.put_default(key, hits.clone());
        }
        Ok(hits)
    }

    /// Blend semantic similarity with body and title keyword matches.
    ///
    /// Works without a query embedding; the semantic term is then `0.0`.
    pub async fn hybrid_retrieve(
        &self,
        query: &str,
        query_vec: Option<&[f32]>,
        top_k: usize,
        threshold: f32,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let docs = self.store.scan_documents(filter).await?;
        let scanned = docs.len();

        let mut hits: Vec<SearchHit> = docs
            .iter()
            .map(|doc| score_document(query, query_vec, doc))
            .filter(|hit| {
                hit.semantic_score != 0.0 || hit.keyword_score > 0.0 || hit.title_score > 0.0
            })
            .filter(|hit| hit.score >= threshold)
            .collect();

        sort_by_score(&mut hits);
        hits.truncate(top_k);
        debug!(
            scanned,
            returned = hits.len(),
            semantic = query_vec.is_some(),
            "hybrid retrieval"
        );
        Ok(hits)
    }

    /// Fetch `fetch_k` candidates by similarity (default `2 × top_k`), then
    /// pick `top_k` of them with maximal marginal relevance.
    pub async fn retrieve_mmr(
        &self,
        query_vec: &[f32],
        top_k: usize,
        fetch_k: Option<usize>,
        lambda: f32,
        threshold: f32,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        let fetch_k = fetch_k.unwrap_or(top_k.saturating_mul(2)).max(top_k);
        let candidates = self.retrieve(query_vec, fetch_k, threshold, filter).await?;
        Ok(mmr::select(query_vec, &candidates, top_k, lambda))
    }
}

fn query_key(
    generation: u64,
    query_vec: &[f32],
    top_k: usize,
    threshold: f32,
    filter: Option<&SearchFilter>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(generation.to_le_bytes());
    for x in query_vec {
        hasher.update(x.to_le_bytes());
    }
    hasher.update(top_k.to_le_bytes());
    hasher.update(threshold.to_le_bytes());
    if let Some(f) = filter {
        hasher.update(f.fingerprint().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::time::Duration;

    async fn seeded() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        let docs = vec![
            Document::new("rust", "Rust ownership", "Borrowing and lifetimes in Rust")
                .with_embedding(vec![1.0, 0.0, 0.0])
                .with_language("en"),
            Document::new("go", "Go channels", "Goroutines talk over channels")
                .with_embedding(vec![0.0, 1.0, 0.0])
                .with_language("en"),
            Document::new("plain", "Cooking notes", "Rust on cast iron pans")
                .with_language("en"),
            Document::new("de", "Rust Handbuch", "Eigentum und Leihen")
                .with_embedding(vec![0.9, 0.1, 0.0])
                .with_language("de"),
        ];
        for d in docs {
            store.upsert_document(d).await.unwrap();
        }
        store
    }

    #[test]
    fn test_lexical_score() {
        assert_eq!(lexical_score("", "anything"), 0.0);
        assert_eq!(lexical_score("rust borrow", "Rust BORROWING rules"), 1.0);
        assert_eq!(lexical_score("rust python", "rust only"), 0.5);
        assert_eq!(lexical_score("zig", "rust"), 0.0);
    }

    #[test]
    fn test_combined_relevance_weights() {
        assert!((combined_relevance(1.0, 1.0, 1.0) - 1.0).abs() < 1e-6);
        assert!((combined_relevance(1.0, 0.0, 0.0) - 0.7).abs() < 1e-6);
        assert!((combined_relevance(0.0, 0.5, 1.0) - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_retrieve_ranks_and_filters() {
        let store = seeded().await;
        let retriever = Retriever::new(store);
        let hits = retriever
            .retrieve(&[1.0, 0.0, 0.0], 2, 0.0, None)
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.document.id.as_str()).collect();
        assert_eq!(ids, vec!["rust", "de"]);

        let filter = SearchFilter::language("en");
        let hits = retriever
            .retrieve(&[1.0, 0.0, 0.0], 5, 0.5, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.id, "rust");
    }

    #[tokio::test]
    async fn test_hybrid_without_embedding_is_lexical() {
        let store = seeded().await;
        let retriever = Retriever::new(store);
        let hits = retriever
            .hybrid_retrieve("rust", None, 10, 0.0, None)
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.document.id.as_str()).collect();
        // body+title beats body-only, go has no signal
        assert_eq!(ids[0], "rust");
        assert!(ids.contains(&"plain"));
        assert!(!ids.contains(&"go"));
        assert!(hits.iter().all(|h| h.semantic_score == 0.0));
    }

    #[tokio::test]
    async fn test_hybrid_threshold_on_combined_score() {
        let store = seeded().await;
        let retriever = Retriever::new(store);
        let hits = retriever
            .hybrid_retrieve("rust", Some(&[1.0, 0.0, 0.0]), 10, 0.75, None)
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.score >= 0.75));
        assert_eq!(hits[0].document.id, "rust");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_query_cache_memoizes() {
        let store = seeded().await;
        let cache = Arc::new(QueryCache::new(8, Duration::from_secs(60)).unwrap());
        let retriever = Retriever::new(store).with_query_cache(cache.clone());
        let q = [0.0, 1.0, 0.0];
        let first = retriever.retrieve(&q, 1, 0.0, None).await.unwrap();
        let second = retriever.retrieve(&q, 1, 0.0, None).await.unwrap();
        assert_eq!(first[0].document.id, second[0].document.id);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_query_cache_sees_store_writes() {
        let store = seeded().await;
        let cache = Arc::new(QueryCache::new(8, Duration::from_secs(300)).unwrap());
        let retriever = Retriever::new(store.clone()).with_query_cache(cache);
        let q = [0.0, 1.0, 0.0];

        let before = retriever.retrieve(&q, 2, 0.5, None).await.unwrap();
        let ids: Vec<&str> = before.iter().map(|h| h.document.id.as_str()).collect();
        assert_eq!(ids, vec!["go"]);

        store.mark_deleted("go").await.unwrap();
        store
            .upsert_document(
                Document::new("elixir", "Elixir processes", "Mailboxes")
                    .with_embedding(vec![0.0, 1.0, 0.1]),
            )
            .await
            .unwrap();

        let after = retriever.retrieve(&q, 2, 0.5, None).await.unwrap();
        let ids: Vec<&str> = after.iter().map(|h| h.document.id.as_str()).collect();
        assert_eq!(ids, vec!["elixir"]);
        assert!(after.iter().all(|h| h.document.is_active()));
    }

    #[tokio::test]
    async fn test_retrieve_mmr_respects_top_k() {
        let store = seeded().await;
        let retriever = Retriever::new(store);
        let hits = retriever
            .retrieve_mmr(&[1.0, 0.0, 0.0], 2, None, 0.3, -1.0, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.id, "rust");
        // near-duplicate "de" loses to the dissimilar "go"
        assert_eq!(hits[1].document.id, "go");
    }
}
