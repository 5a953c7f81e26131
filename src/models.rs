//! Core data models used throughout the retrieval core.
//!
//! These types represent the documents, chunks, search hits and graph
//! records that flow through ingestion, retrieval and graph queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle flag for an indexed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    #[default]
    Active,
    Deleted,
}

/// A caller-owned document. `embedding` is attached once computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            language: None,
            embedding: None,
            metadata: HashMap::new(),
            status: DocumentStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == DocumentStatus::Active
    }
}

/// A contiguous, possibly overlapping segment of a document's text.
///
/// Offsets are character offsets into the text handed to the chunker, with
/// `start_offset < end_offset`. The one exception is the single chunk of an
/// empty text, where both offsets are 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub chunk_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    /// SHA-256 of `content`, used to detect stale embeddings.
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

/// A retrieved document with its scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub document: Document,
    /// Score used for ordering (cosine similarity or combined relevance).
    pub score: f32,
    /// Raw cosine similarity to the query, 0.0 when no embedding was available.
    pub semantic_score: f32,
    /// Fraction of query terms found in the body.
    pub keyword_score: f32,
    /// Fraction of query terms found in the title.
    pub title_score: f32,
}

impl SearchHit {
    pub fn semantic(document: Document, similarity: f32) -> Self {
        Self {
            document,
            score: similarity,
            semantic_score: similarity,
            keyword_score: 0.0,
            title_score: 0.0,
        }
    }
}

/// A node in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            entity_type: entity_type.into(),
            description: String::new(),
            aliases: Vec::new(),
            embedding: None,
            confidence: 1.0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

/// A directed, typed edge between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub from_entity: String,
    pub to_entity: String,
    pub relation_type: String,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    pub fn new(
        id: impl Into<String>,
        from_entity: impl Into<String>,
        to_entity: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            from_entity: from_entity.into(),
            to_entity: to_entity.into(),
            relation_type: relation_type.into(),
            confidence: 1.0,
            created_at: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// The endpoint opposite `entity_id`, if this relationship touches it.
    pub fn other_end(&self, entity_id: &str) -> Option<&str> {
        if self.from_entity == entity_id {
            Some(&self.to_entity)
        } else if self.to_entity == entity_id {
            Some(&self.from_entity)
        } else {
            None
        }
    }
}

/// A simple path through the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Path {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    /// Number of hops.
    pub length: usize,
    /// Mean relationship confidence along the path.
    pub weight: f32,
}

/// Entities within some radius of a centre plus the edges between them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subgraph {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

/// Per-stage wall-clock timings in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timing {
    pub embed_ms: u64,
    pub retrieve_ms: u64,
    pub rerank_ms: u64,
    pub generate_ms: u64,
    pub total_ms: u64,
}

/// Output of [`RagPipeline::retrieve`](crate::pipeline::RagPipeline::retrieve).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub documents: Vec<SearchHit>,
    pub context: String,
    pub timing: Timing,
}

/// A `Document N` reference found in generated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based position in `sources`.
    pub number: usize,
    pub document_id: String,
    pub title: String,
}

/// Output of [`RagPipeline::pipeline`](crate::pipeline::RagPipeline::pipeline).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResponse {
    pub text: String,
    pub sources: Vec<SearchHit>,
    pub citations: Vec<Citation>,
    pub confidence: f32,
    pub timing: Timing,
}
