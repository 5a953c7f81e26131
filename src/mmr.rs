//! Maximal Marginal Relevance selection.
//!
//! ```text
//! MMR = λ × relevance(query, doc) − (1 − λ) × max(similarity(doc, selected))
//! ```
//!
//! λ = 1.0: pure relevance (same order as plain top-K)
//! λ = 0.0: pure diversity
//!
//! Relevance is the cosine similarity between the query and the
//! candidate's embedding, falling back to the hit's score when the
//! candidate has none. A candidate without an embedding is never
//! considered redundant.

use crate::embedding::cosine_similarity;
use crate::models::SearchHit;

fn relevance(query: &[f32], hit: &SearchHit) -> f32 {
    match hit.document.embedding.as_deref() {
        Some(e) => cosine_similarity(query, e),
        None => hit.score,
    }
}

fn similarity(a: &SearchHit, b: &SearchHit) -> f32 {
    match (a.document.embedding.as_deref(), b.document.embedding.as_deref()) {
        (Some(x), Some(y)) => cosine_similarity(x, y),
        _ => 0.0,
    }
}

/// Greedily pick up to `top_k` diverse hits from `candidates`.
///
/// `lambda` is clamped to `[0, 1]`. Ties go to the earlier candidate.
pub fn select(query: &[f32], candidates: &[SearchHit], top_k: usize, lambda: f32) -> Vec<SearchHit> {
    if candidates.is_empty() || top_k == 0 {
        return Vec::new();
    }
    let lambda = if lambda.is_nan() { 0.5 } else { lambda.clamp(0.0, 1.0) };
    let relevances: Vec<f32> = candidates.iter().map(|c| relevance(query, c)).collect();

    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut selected: Vec<usize> = Vec::with_capacity(top_k.min(candidates.len()));

    while selected.len() < top_k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (pos, &idx) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&s| similarity(&candidates[idx], &candidates[s]))
                .fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |a| a.max(s))))
                .unwrap_or(0.0);
            let score = lambda * relevances[idx] - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        selected.push(remaining.remove(best_pos));
    }

    selected.into_iter().map(|i| candidates[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;

    fn hit(id: &str, embedding: Option<Vec<f32>>, score: f32) -> SearchHit {
        let mut doc = Document::new(id, id, id);
        doc.embedding = embedding;
        SearchHit::semantic(doc, score)
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.document.id.as_str()).collect()
    }

    fn candidates() -> Vec<SearchHit> {
        vec![
            hit("a", Some(vec![1.0, 0.0]), 1.0),
            hit("a2", Some(vec![0.99, 0.05]), 0.99),
            hit("b", Some(vec![0.6, 0.8]), 0.6),
        ]
    }

    #[test]
    fn test_empty_inputs() {
        assert!(select(&[1.0], &[], 3, 0.5).is_empty());
        assert!(select(&[1.0, 0.0], &candidates(), 0, 0.5).is_empty());
    }

    #[test]
    fn test_lambda_one_matches_relevance_order() {
        let picked = select(&[1.0, 0.0], &candidates(), 3, 1.0);
        assert_eq!(ids(&picked), vec!["a", "a2", "b"]);
    }

    #[test]
    fn test_diversity_skips_near_duplicate() {
        let picked = select(&[1.0, 0.0], &candidates(), 2, 0.3);
        assert_eq!(ids(&picked), vec!["a", "b"]);
    }

    #[test]
    fn test_lambda_is_clamped() {
        let high = select(&[1.0, 0.0], &candidates(), 3, 7.0);
        assert_eq!(ids(&high), vec!["a", "a2", "b"]);
        let low = select(&[1.0, 0.0], &candidates(), 2, -3.0);
        assert_eq!(ids(&low), ids(&select(&[1.0, 0.0], &candidates(), 2, 0.0)));
    }

    #[test]
    fn test_pure_diversity_bounds_pairwise_similarity() {
        let query = [1.0, 0.0, 0.0];
        let pool = vec![
            hit("lead", Some(vec![0.8, 0.6, 0.0]), 0.8),
            hit("dup1", Some(vec![0.79, 0.61, 0.05]), 0.79),
            hit("dup2", Some(vec![0.78, 0.6, 0.1]), 0.78),
            hit("side", Some(vec![0.3, 0.0, 0.95]), 0.3),
            hit("away", Some(vec![0.2, -0.98, 0.0]), 0.2),
        ];
        let picked = select(&query, &pool, 3, 0.0);
        assert_eq!(picked.len(), 3);
        assert_eq!(picked[0].document.id, "lead");
        assert!(!ids(&picked).contains(&"dup1"));
        assert!(!ids(&picked).contains(&"dup2"));

        let emb = |h: &SearchHit| h.document.embedding.clone().unwrap();
        let bound = cosine_similarity(&query, &emb(&picked[0]));
        for (i, a) in picked.iter().enumerate() {
            for b in &picked[i + 1..] {
                let sim = cosine_similarity(&emb(a), &emb(b));
                assert!(
                    sim <= bound,
                    "{} and {} too similar: {} > {}",
                    a.document.id,
                    b.document.id,
                    sim,
                    bound
                );
            }
        }
    }

    #[test]
    fn test_ties_go_to_first_seen() {
        let same = vec![
            hit("x", Some(vec![1.0, 0.0]), 1.0),
            hit("y", Some(vec![1.0, 0.0]), 1.0),
        ];
        let picked = select(&[1.0, 0.0], &same, 1, 0.5);
        assert_eq!(ids(&picked), vec!["x"]);
    }

    #[test]
    fn test_missing_embedding_uses_score_and_no_redundancy() {
        let mixed = vec![
            hit("a", Some(vec![1.0, 0.0]), 1.0),
            hit("bare", None, 0.4),
            hit("a2", Some(vec![1.0, 0.01]), 0.99),
        ];
        let picked = select(&[1.0, 0.0], &mixed, 2, 0.5);
        assert_eq!(ids(&picked), vec!["a", "bare"]);
    }

    #[test]
    fn test_stops_when_exhausted() {
        let picked = select(&[1.0, 0.0], &candidates(), 10, 0.5);
        assert_eq!(picked.len(), 3);
    }
}
