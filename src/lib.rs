//! # Context Retrieval
//!
//! The retrieval and knowledge-graph core of a retrieval-augmented
//! generation system.
//!
//! Documents are chunked, embedded through a pluggable provider (with a
//! memoizing cache in front of it), indexed in a vector store and
//! retrieved by semantic, hybrid or diversity-aware (MMR) search. A
//! separate in-memory knowledge graph answers path, neighbourhood and
//! centrality queries over entities and typed relationships.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────────┐   ┌─────────────┐
//! │ Documents │──▶│  Ingestor   │──▶│ VectorStore │
//! └───────────┘   │ Chunk+Embed │   └──────┬──────┘
//!                 └──────┬──────┘          │
//!                        │          ┌──────▼──────┐   ┌───────────┐
//!                 ┌──────▼──────┐   │  Retriever  │──▶│ Reranker  │
//!                 │ Embedding   │   │ hybrid/MMR  │   └─────┬─────┘
//!                 │   Cache     │   └─────────────┘         │
//!                 └─────────────┘                    ┌──────▼──────┐
//!                                                    │ RagPipeline │──▶ Generator
//!                                                    └─────────────┘
//! ```
//!
//! Embedding providers, generators, rerankers and stores are traits;
//! wire clients for concrete services live outside this crate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and stage tagging |
//! | [`models`] | Core data types |
//! | [`chunk`] | Text chunking strategies |
//! | [`cache`] | LRU + TTL memo caches |
//! | [`embedding`] | Embedding provider abstraction and cosine similarity |
//! | [`store`] | Vector store trait and in-memory implementation |
//! | [`search`] | Semantic, hybrid and MMR retrieval |
//! | [`mmr`] | Maximal marginal relevance selection |
//! | [`rerank`] | Post-retrieval reordering |
//! | [`graph`] | Knowledge graph and traversal queries |
//! | [`ingest`] | Single and batch document ingestion |
//! | [`pipeline`] | Query orchestration and answer assembly |
//! | [`cancel`] | Cancellation and deadline guard |

pub mod cache;
pub mod cancel;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod mmr;
pub mod models;
pub mod pipeline;
pub mod rerank;
pub mod search;
pub mod store;

pub use error::{RagError, Result, Stage};
