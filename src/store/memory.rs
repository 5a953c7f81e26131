//! In-memory [`VectorStore`] implementation.
//!
//! Uses `HashMap`s behind a single `parking_lot::RwLock`. Vector search is
//! a sequential brute-force cosine scan over every embedded document;
//! ties keep insertion order.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::models::{Document, DocumentChunk, DocumentStatus, SearchHit};

use super::{SearchFilter, VectorStore};

#[derive(Default)]
struct Inner {
    docs: HashMap<String, Document>,
    /// Document ids in first-insertion order.
    order: Vec<String>,
    chunks: HashMap<String, Vec<DocumentChunk>>,
    /// Bumped by every successful write.
    generation: u64,
}

impl Inner {
    fn ordered(&self) -> impl Iterator<Item = &Document> {
        self.order.iter().filter_map(|id| self.docs.get(id))
    }
}

/// In-memory store for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn passes(filter: Option<&SearchFilter>, doc: &Document) -> bool {
    match filter {
        Some(f) => f.matches(doc),
        None => doc.is_active(),
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert_document(&self, mut doc: Document) -> Result<()> {
        if doc.id.trim().is_empty() {
            return Err(RagError::Validation("document id must not be empty".into()));
        }
        let mut inner = self.inner.write();
        match inner.docs.get(&doc.id) {
            Some(existing) => {
                doc.created_at = existing.created_at;
                doc.updated_at = Utc::now();
            }
            None => inner.order.push(doc.id.clone()),
        }
        inner.docs.insert(doc.id.clone(), doc);
        inner.generation += 1;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.inner.read().docs.get(id).cloned())
    }

    async fn mark_deleted(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let doc = inner
            .docs
            .get_mut(id)
            .ok_or_else(|| RagError::not_found("document", id))?;
        doc.status = DocumentStatus::Deleted;
        doc.updated_at = Utc::now();
        inner.generation += 1;
        Ok(())
    }

    async fn replace_chunks(&self, document_id: &str, chunks: Vec<DocumentChunk>) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.docs.contains_key(document_id) {
            return Err(RagError::not_found("document", document_id));
        }
        inner.chunks.insert(document_id.to_string(), chunks);
        inner.generation += 1;
        Ok(())
    }

    async fn get_chunks(&self, document_id: &str) -> Result<Vec<DocumentChunk>> {
        let inner = self.inner.read();
        let mut chunks = inner.chunks.get(document_id).cloned().unwrap_or_default();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        threshold: f32,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let inner = self.inner.read();
        let mut hits: Vec<SearchHit> = inner
            .ordered()
            .filter(|doc| passes(filter, doc))
            .filter_map(|doc| {
                let embedding = doc.embedding.as_deref()?;
                let sim = cosine_similarity(query_vec, embedding);
                (sim >= threshold).then(|| SearchHit::semantic(doc.clone(), sim))
            })
            .collect();
        drop(inner);

        // sort_by is stable, so equal scores keep insertion order
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scan_documents(&self, filter: Option<&SearchFilter>) -> Result<Vec<Document>> {
        let inner = self.inner.read();
        Ok(inner
            .ordered()
            .filter(|doc| passes(filter, doc))
            .cloned()
            .collect())
    }

    async fn document_count(&self) -> Result<usize> {
        Ok(self.inner.read().docs.values().filter(|d| d.is_active()).count())
    }

    fn generation(&self) -> u64 {
        self.inner.read().generation
    }
}
