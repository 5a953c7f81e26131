//! Retrieval-augmented generation orchestrator.
//!
//! [`RagPipeline`] wires the collaborators together for one query:
//!
//! ```text
//! query ──► embed ──► retrieve ──► rerank ──► context ──► generate
//!            │          │            │                       │
//!            ▼          ▼            ▼                       ▼
//!       lexical-only  hybrid /    keep order           confidence +
//!       on failure   semantic /   on failure            citations
//!                       MMR
//! ```
//!
//! Every awaited call runs under the caller's `CancellationToken` and the
//! optional per-request deadline. Cancellation and deadlines always
//! propagate; embedding and rerank failures degrade with a warning; all
//! other failures carry the stage they came from.

use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::guard;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, Stage, StageExt};
use crate::models::{Citation, RagResponse, RetrievalResult, SearchHit, Timing};
use crate::rerank::Reranker;
use crate::search::Retriever;
use crate::store::SearchFilter;

static CITATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bDocument (\d+)\b").expect("valid regex"));

const ELLIPSIS: &str = "...";

// ============ Collaborators ============

/// Sampling parameters forwarded to the [`Generator`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// External language-model call.
#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    /// Produce an answer for `prompt`, grounded in `context_docs`.
    async fn generate(
        &self,
        prompt: &str,
        context_docs: &[SearchHit],
        options: &GenerateOptions,
    ) -> Result<String>;
}

// ============ Options ============

/// Per-request overrides of the `[retrieval]` config section.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    pub top_k: Option<usize>,
    pub threshold: Option<f32>,
    pub fetch_k: Option<usize>,
    pub hybrid: Option<bool>,
    pub use_mmr: Option<bool>,
    pub mmr_lambda: Option<f32>,
    pub rerank: Option<bool>,
    pub filter: Option<SearchFilter>,
    /// Overrides `pipeline.timeout_secs`.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub retrieve: RetrieveOptions,
    pub generate: GenerateOptions,
}

/// `RetrieveOptions` merged with config defaults.
struct Resolved<'a> {
    top_k: usize,
    threshold: f32,
    fetch_k: Option<usize>,
    hybrid: bool,
    use_mmr: bool,
    mmr_lambda: f32,
    rerank: bool,
    filter: Option<&'a SearchFilter>,
    deadline: Option<tokio::time::Instant>,
}

// ============ Pipeline ============

/// Query orchestrator: embed, retrieve, rerank, build context, generate.
pub struct RagPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    retriever: Retriever,
    reranker: Option<Arc<dyn Reranker>>,
    generator: Arc<dyn Generator>,
    config: Config,
}

impl RagPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        retriever: Retriever,
        reranker: Option<Arc<dyn Reranker>>,
        generator: Arc<dyn Generator>,
        config: Config,
    ) -> Self {
        Self {
            embedder,
            retriever,
            reranker,
            generator,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn resolve<'a>(&self, options: &'a RetrieveOptions) -> Resolved<'a> {
        let defaults = &self.config.retrieval;
        let timeout = options.timeout.or_else(|| self.config.pipeline.timeout());
        Resolved {
            top_k: options.top_k.unwrap_or(defaults.top_k),
            threshold: options.threshold.unwrap_or(defaults.threshold),
            fetch_k: options.fetch_k.or(defaults.fetch_k),
            hybrid: options.hybrid.unwrap_or(defaults.hybrid),
            use_mmr: options.use_mmr.unwrap_or(defaults.use_mmr),
            mmr_lambda: options.mmr_lambda.unwrap_or(defaults.mmr_lambda),
            rerank: options.rerank.unwrap_or(defaults.rerank),
            filter: options.filter.as_ref(),
            deadline: timeout.map(|t| tokio::time::Instant::now() + t),
        }
    }

    /// Embed, retrieve, rerank and assemble the context for `query`.
    pub async fn retrieve(
        &self,
        query: &str,
        options: &RetrieveOptions,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResult> {
        let started = Instant::now();
        let opts = self.resolve(options);
        let result = self.retrieve_resolved(query, &opts, cancel).await;
        result.map(|(documents, context, mut timing)| {
            timing.total_ms = elapsed_ms(started);
            RetrievalResult {
                documents,
                context,
                timing,
            }
        })
    }

    /// Full retrieval-augmented answer for `query`.
    pub async fn pipeline(
        &self,
        query: &str,
        options: &PipelineOptions,
        cancel: &CancellationToken,
    ) -> Result<RagResponse> {
        let started = Instant::now();
        let opts = self.resolve(&options.retrieve);
        let (sources, context, mut timing) = self.retrieve_resolved(query, &opts, cancel).await?;

        let step = Instant::now();
        let prompt = build_prompt(query, &context);
        let text = guard(
            cancel,
            opts.deadline,
            self.generator.generate(&prompt, &sources, &options.generate),
        )
        .await
        .stage(Stage::Generate)?;
        timing.generate_ms = elapsed_ms(step);

        let confidence = confidence(sources.len(), &text);
        let citations = extract_citations(&text, &sources);
        timing.total_ms = elapsed_ms(started);

        info!(
            sources = sources.len(),
            citations = citations.len(),
            confidence,
            total_ms = timing.total_ms,
            "pipeline finished"
        );
        Ok(RagResponse {
            text,
            sources,
            citations,
            confidence,
            timing,
        })
    }

    async fn retrieve_resolved(
        &self,
        query: &str,
        opts: &Resolved<'_>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<SearchHit>, String, Timing)> {
        let mut timing = Timing::default();

        let step = Instant::now();
        let query_vec = match guard(cancel, opts.deadline, self.embedder.embed(query)).await {
            Ok(v) => Some(v),
            Err(e) if e.is_abort() => return Err(e.at(Stage::Embed)),
            Err(e) => {
                warn!(error = %e, "query embedding failed, falling back to lexical retrieval");
                None
            }
        };
        timing.embed_ms = elapsed_ms(step);

        let step = Instant::now();
        let mut hits = guard(cancel, opts.deadline, self.search(query, query_vec.as_deref(), opts))
            .await
            .stage(Stage::Retrieve)?;
        timing.retrieve_ms = elapsed_ms(step);

        let step = Instant::now();
        if let (true, Some(reranker)) = (opts.rerank, &self.reranker) {
            let outcome =
                guard(cancel, opts.deadline, reranker.rerank(query, query_vec.as_deref(), &hits)).await;
            match outcome {
                Ok(reranked) => hits = reranked,
                Err(e) if e.is_abort() => return Err(e.at(Stage::Rerank)),
                Err(e) => warn!(error = %e, "rerank failed, keeping retrieval order"),
            }
        }
        timing.rerank_ms = elapsed_ms(step);

        let context = build_context(&hits, self.config.pipeline.max_context_length);
        debug!(
            hits = hits.len(),
            context_chars = context.chars().count(),
            semantic = query_vec.is_some(),
            "retrieval complete"
        );
        Ok((hits, context, timing))
    }

    async fn search(
        &self,
        query: &str,
        query_vec: Option<&[f32]>,
        opts: &Resolved<'_>,
    ) -> Result<Vec<SearchHit>> {
        match query_vec {
            Some(vec) if opts.use_mmr => {
                self.retriever
                    .retrieve_mmr(vec, opts.top_k, opts.fetch_k, opts.mmr_lambda, opts.threshold, opts.filter)
                    .await
            }
            Some(vec) if !opts.hybrid => {
                self.retriever
                    .retrieve(vec, opts.top_k, opts.threshold, opts.filter)
                    .await
            }
            _ => {
                self.retriever
                    .hybrid_retrieve(query, query_vec, opts.top_k, opts.threshold, opts.filter)
                    .await
            }
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

fn build_prompt(query: &str, context: &str) -> String {
    format!(
        "Answer the question using the documents below. Cite sources as \"Document N\".\n\n{}Question: {}\nAnswer:",
        context, query
    )
}

/// Concatenate `"Document N: {title}\n{content}\n\n"` blocks up to
/// `max_len` characters. The first block that does not fit is cut and
/// suffixed with `"..."`; later blocks are dropped.
pub fn build_context(hits: &[SearchHit], max_len: usize) -> String {
    let mut context = String::new();
    let mut used = 0usize;

    for (i, hit) in hits.iter().enumerate() {
        let block = format!(
            "Document {}: {}\n{}\n\n",
            i + 1,
            hit.document.title,
            hit.document.content
        );
        let len = block.chars().count();
        if used + len <= max_len {
            context.push_str(&block);
            used += len;
            continue;
        }

        let room = max_len - used;
        if room > ELLIPSIS.len() {
            context.extend(block.chars().take(room - ELLIPSIS.len()));
            context.push_str(ELLIPSIS);
        }
        break;
    }
    context
}

/// `min(1, 0.5 + 0.1 × min(sources, 4) + 0.1 × [len(text) > 100])`.
pub fn confidence(source_count: usize, text: &str) -> f32 {
    let long_answer = if text.chars().count() > 100 { 0.1 } else { 0.0 };
    (0.5 + 0.1 * source_count.min(4) as f32 + long_answer).min(1.0)
}

/// `Document N` references in `text`, mapped to `sources[N - 1]`.
///
/// First-mention order, no duplicates; numbers outside the source list
/// are ignored.
pub fn extract_citations(text: &str, sources: &[SearchHit]) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();
    for caps in CITATION_RE.captures_iter(text) {
        let Some(number) = caps.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) else {
            continue;
        };
        if number == 0 || citations.iter().any(|c| c.number == number) {
            continue;
        }
        if let Some(hit) = sources.get(number - 1) {
            citations.push(Citation {
                number,
                document_id: hit.document.id.clone(),
                title: hit.document.title.clone(),
            });
        }
    }
    citations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;

    fn hits(n: usize) -> Vec<SearchHit> {
        (1..=n)
            .map(|i| {
                SearchHit::semantic(
                    Document::new(format!("d{}", i), format!("T{}", i), "x".repeat(10)),
                    1.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_context_keeps_whole_blocks() {
        // each block: "Document 1: T1\n" (15) + 10 + "\n\n" (2) = 27 chars
        let ctx = build_context(&hits(2), 1000);
        assert_eq!(ctx.chars().count(), 54);
        assert!(ctx.starts_with("Document 1: T1\nxxxxxxxxxx\n\n"));
    }

    #[test]
    fn test_context_truncates_overflowing_block() {
        let ctx = build_context(&hits(3), 40);
        assert!(ctx.starts_with("Document 1: T1\nxxxxxxxxxx\n\n"));
        assert!(ctx.ends_with("..."));
        assert_eq!(ctx.chars().count(), 40);
        assert!(!ctx.contains("Document 3"));
    }

    #[test]
    fn test_context_empty() {
        assert_eq!(build_context(&[], 100), "");
    }

    #[test]
    fn test_confidence() {
        assert!((confidence(0, "short") - 0.5).abs() < 1e-6);
        assert!((confidence(2, "short") - 0.7).abs() < 1e-6);
        assert!((confidence(10, "short") - 0.9).abs() < 1e-6);
        assert!((confidence(10, &"y".repeat(101)) - 1.0).abs() < 1e-6);
        assert!((confidence(1, &"y".repeat(100)) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_citations_first_mention_order() {
        let sources = hits(3);
        let text = "Per Document 2 and Document 1, again Document 2. Document 9 is bogus, Document 0 too.";
        let cites = extract_citations(text, &sources);
        let numbers: Vec<usize> = cites.iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec![2, 1]);
        assert_eq!(cites[0].document_id, "d2");
        assert_eq!(cites[1].title, "T1");
    }

    #[test]
    fn test_citations_none() {
        assert!(extract_citations("no references here", &hits(2)).is_empty());
    }
}
