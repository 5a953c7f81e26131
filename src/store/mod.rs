//! Storage abstraction for indexed documents.
//!
//! The [`VectorStore`] trait defines the operations the retriever and the
//! ingestion pipeline need, so an external vector database can stand in
//! for the in-core [`InMemoryStore`](memory::InMemoryStore).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Document, DocumentChunk, SearchHit};

pub use memory::InMemoryStore;

/// Restricts which documents a search may return.
///
/// Logically deleted documents never match.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub language: Option<String>,
    /// Every pair must be present in the document's metadata.
    pub metadata: HashMap<String, String>,
    /// When set, only these document ids are eligible.
    pub document_ids: Option<Vec<String>>,
}

impl SearchFilter {
    pub fn language(language: impl Into<String>) -> Self {
        Self {
            language: Some(language.into()),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        if !doc.is_active() {
            return false;
        }
        if let Some(lang) = &self.language {
            if doc.language.as_deref() != Some(lang.as_str()) {
                return false;
            }
        }
        if let Some(ids) = &self.document_ids {
            if !ids.iter().any(|id| id == &doc.id) {
                return false;
            }
        }
        self.metadata
            .iter()
            .all(|(k, v)| doc.metadata.get(k) == Some(v))
    }

    /// Stable textual form, used in query cache keys.
    pub(crate) fn fingerprint(&self) -> String {
        let mut meta: Vec<_> = self.metadata.iter().collect();
        meta.sort();
        format!("{:?}|{:?}|{:?}", self.language, meta, self.document_ids)
    }
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_document`](VectorStore::upsert_document) | Insert or update a document |
/// | [`get_document`](VectorStore::get_document) | Fetch a document by id |
/// | [`mark_deleted`](VectorStore::mark_deleted) | Logically delete a document |
/// | [`replace_chunks`](VectorStore::replace_chunks) | Replace all chunks for a document |
/// | [`get_chunks`](VectorStore::get_chunks) | Chunks of a document, by index |
/// | [`vector_search`](VectorStore::vector_search) | Cosine similarity search |
/// | [`scan_documents`](VectorStore::scan_documents) | All documents matching a filter |
/// | [`generation`](VectorStore::generation) | Write counter for cache invalidation |
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert_document(&self, doc: Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    async fn mark_deleted(&self, id: &str) -> Result<()>;

    async fn replace_chunks(&self, document_id: &str, chunks: Vec<DocumentChunk>) -> Result<()>;

    async fn get_chunks(&self, document_id: &str) -> Result<Vec<DocumentChunk>>;

    /// Documents with embeddings, sorted by descending cosine similarity.
    ///
    /// Returns at most `limit` hits, every one scoring at least `threshold`.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        threshold: f32,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>>;

    /// Active documents matching `filter`, in insertion order.
    async fn scan_documents(&self, filter: Option<&SearchFilter>) -> Result<Vec<Document>>;

    /// Number of active documents.
    async fn document_count(&self) -> Result<usize>;

    /// Counter that changes whenever stored documents or chunks change.
    ///
    /// Query caches key on it, so any write invalidates earlier results.
    fn generation(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches() {
        let doc = Document::new("d1", "T", "body")
            .with_language("en")
            .with_metadata("team", "search");
        assert!(SearchFilter::default().matches(&doc));
        assert!(SearchFilter::language("en").matches(&doc));
        assert!(!SearchFilter::language("de").matches(&doc));
        assert!(SearchFilter::default()
            .with_metadata("team", "search")
            .matches(&doc));
        assert!(!SearchFilter::default()
            .with_metadata("team", "infra")
            .matches(&doc));
    }

    #[test]
    fn test_filter_rejects_deleted() {
        let mut doc = Document::new("d1", "T", "body");
        doc.status = crate::models::DocumentStatus::Deleted;
        assert!(!SearchFilter::default().matches(&doc));
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = SearchFilter::default()
            .with_metadata("a", "1")
            .with_metadata("b", "2");
        let b = SearchFilter::default()
            .with_metadata("b", "2")
            .with_metadata("a", "1");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
