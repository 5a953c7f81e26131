//! TOML configuration for the retrieval core.
//!
//! Every section is optional; missing keys fall back to the defaults
//! below. [`load_config`] reads and validates a file, [`Config::from_toml_str`]
//! does the same for an in-memory string.
//!
//! ```toml
//! [chunking]
//! strategy = "recursive"
//! chunk_size = 1000
//! overlap = 200
//!
//! [cache]
//! max_size = 10000
//! ttl_secs = 3600
//!
//! [retrieval]
//! top_k = 5
//! threshold = 0.0
//! use_mmr = true
//! mmr_lambda = 0.5
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::chunk::ChunkStrategy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub strategy: ChunkStrategy,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::default(),
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_query_cache_size")]
    pub query_cache_size: usize,
    #[serde(default = "default_query_ttl_secs")]
    pub query_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            ttl_secs: default_cache_ttl_secs(),
            query_cache_size: default_query_cache_size(),
            query_ttl_secs: default_query_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn query_ttl(&self) -> Duration {
        Duration::from_secs(self.query_ttl_secs)
    }
}

fn default_cache_max_size() -> usize {
    10_000
}
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_query_cache_size() -> usize {
    1000
}
fn default_query_ttl_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub threshold: f32,
    #[serde(default)]
    pub fetch_k: Option<usize>,
    #[serde(default = "default_true")]
    pub hybrid: bool,
    #[serde(default)]
    pub use_mmr: bool,
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
    #[serde(default = "default_true")]
    pub rerank: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            threshold: 0.0,
            fetch_k: None,
            hybrid: true,
            use_mmr: false,
            mmr_lambda: default_mmr_lambda(),
            rerank: true,
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_mmr_lambda() -> f32 {
    0.5
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,
    /// Per-request deadline applied to collaborator calls. `None` disables it.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_context_length: default_max_context_length(),
            timeout_secs: None,
        }
    }
}

impl PipelineConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn default_max_context_length() -> usize {
    4000
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).with_context(|| "Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.overlap,
                self.chunking.chunk_size
            );
        }

        if self.cache.max_size == 0 {
            bail!("cache.max_size must be > 0");
        }
        if self.cache.query_cache_size == 0 {
            bail!("cache.query_cache_size must be > 0");
        }

        if self.retrieval.top_k < 1 {
            bail!("retrieval.top_k must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.retrieval.mmr_lambda) {
            bail!("retrieval.mmr_lambda must be in [0.0, 1.0]");
        }
        if !(-1.0..=1.0).contains(&self.retrieval.threshold) {
            bail!("retrieval.threshold must be in [-1.0, 1.0]");
        }
        if let Some(fetch_k) = self.retrieval.fetch_k {
            if fetch_k < self.retrieval.top_k {
                bail!("retrieval.fetch_k must be >= retrieval.top_k");
            }
        }

        if self.ingest.concurrency < 1 {
            bail!("ingest.concurrency must be >= 1");
        }

        if self.pipeline.max_context_length == 0 {
            bail!("pipeline.max_context_length must be > 0");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml_str(&content)
}
