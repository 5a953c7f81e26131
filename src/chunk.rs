//! Multi-strategy text chunker.
//!
//! Splits document text into [`DocumentChunk`]s no longer than `chunk_size`
//! characters, with up to `overlap` characters shared between neighbours.
//! Five interchangeable strategies are selected by [`ChunkStrategy`]:
//!
//! | Strategy | Boundaries | Overlap |
//! |----------|-----------|---------|
//! | `fixed` | none, sliding window of `chunk_size - overlap` | exact |
//! | `sentence` | `.`/`!`/`?` followed by whitespace | tail of prior sentences |
//! | `paragraph` | blank lines | one paragraph |
//! | `recursive` | `\n\n`, `\n`, sentence, space, character | tail of prior pieces |
//! | `semantic` | same as `sentence` | same as `sentence` |
//!
//! All lengths and offsets count `char`s, not bytes.
//!
//! Each chunk receives a fresh UUID, a contiguous index starting at 0, and
//! a SHA-256 hash of its content for staleness detection in the embedding
//! pipeline.
//!
//! # Example
//!
//! ```rust
//! use context_retrieval::chunk::{chunk_text, ChunkStrategy};
//!
//! let chunks = chunk_text("doc-1", "Hello world. Second sentence.", ChunkStrategy::Sentence, 700, 50).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use chrono::Utc;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::error::{RagError, Result};
use crate::models::{Document, DocumentChunk};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    Fixed,
    Sentence,
    Paragraph,
    #[default]
    Recursive,
    /// Placeholder for embedding-driven boundaries; behaves like `Sentence`.
    Semantic,
}

/// Half-open range of char offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    fn len(&self) -> usize {
        self.end - self.start
    }
}

/// How much of a flushed chunk is carried into the next one.
#[derive(Debug, Clone, Copy)]
enum Carry {
    /// As many trailing segments as fit within `overlap`.
    Tail,
    /// The last segment whenever overlap is enabled; dropped later if it
    /// leaves no room for the incoming segment.
    One,
}

#[derive(Debug, Clone, Copy)]
enum Separator {
    Literal(&'static str),
    Sentence,
}

const RECURSIVE_SEPARATORS: [Separator; 4] = [
    Separator::Literal("\n\n"),
    Separator::Literal("\n"),
    Separator::Sentence,
    Separator::Literal(" "),
];

/// A configured chunker. Construction validates `overlap < chunk_size`.
#[derive(Debug, Clone)]
pub struct Chunker {
    strategy: ChunkStrategy,
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(strategy: ChunkStrategy, chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::Validation("chunk_size must be > 0".into()));
        }
        if overlap >= chunk_size {
            return Err(RagError::Validation(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self {
            strategy,
            chunk_size,
            overlap,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.strategy, config.chunk_size, config.overlap)
    }

    pub fn strategy(&self) -> ChunkStrategy {
        self.strategy
    }

    /// Split `text` into chunks belonging to `document_id`.
    ///
    /// # Guarantees
    ///
    /// - At least one chunk is returned (an empty text yields one empty chunk).
    /// - Text of at most `chunk_size` chars yields exactly one chunk equal to it.
    /// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
    /// - No chunk exceeds `chunk_size` chars.
    pub fn chunk(&self, document_id: &str, text: &str) -> Vec<DocumentChunk> {
        let chars: Vec<char> = text.chars().collect();
        let whole = Span::new(0, chars.len());

        if chars.len() <= self.chunk_size {
            return vec![make_chunk(document_id, 0, &chars, whole)];
        }

        let mut spans = match self.strategy {
            ChunkStrategy::Fixed => self.windows(whole, self.overlap),
            ChunkStrategy::Sentence | ChunkStrategy::Semantic => {
                let sentences = sentence_spans(&chars, whole);
                self.accumulate(&sentences, Carry::Tail)
            }
            ChunkStrategy::Paragraph => {
                let paragraphs = paragraph_spans(&chars);
                self.accumulate(&paragraphs, Carry::One)
            }
            ChunkStrategy::Recursive => {
                let mut pieces = Vec::new();
                self.split_recursive(&chars, whole, 0, &mut pieces);
                self.accumulate(&pieces, Carry::Tail)
            }
        };

        if spans.is_empty() {
            // Whitespace-only input longer than chunk_size has no segments.
            spans = self.windows(whole, self.overlap);
        }

        spans
            .into_iter()
            .enumerate()
            .map(|(i, span)| make_chunk(document_id, i, &chars, span))
            .collect()
    }

    /// Sliding windows over `span`, each at most `chunk_size` long.
    fn windows(&self, span: Span, overlap: usize) -> Vec<Span> {
        let step = self.chunk_size - overlap;
        let mut out = Vec::new();
        let mut start = span.start;
        loop {
            let end = (start + self.chunk_size).min(span.end);
            out.push(Span::new(start, end));
            if end >= span.end {
                break;
            }
            start += step;
        }
        out
    }

    /// Greedily pack segments into chunks of at most `chunk_size` chars.
    fn accumulate(&self, segments: &[Span], carry: Carry) -> Vec<Span> {
        let mut out = Vec::new();
        let mut current: Vec<Span> = Vec::new();

        for &segment in segments {
            if segment.len() > self.chunk_size {
                if let Some(merged) = merge(&current) {
                    out.push(merged);
                }
                current.clear();
                out.extend(self.windows(segment, self.overlap));
                continue;
            }

            if let Some(first) = current.first() {
                if segment.end - first.start > self.chunk_size {
                    if let Some(merged) = merge(&current) {
                        out.push(merged);
                    }
                    let mut carried = self.carry_over(&current, carry);
                    while carried
                        .first()
                        .is_some_and(|f| segment.end - f.start > self.chunk_size)
                    {
                        carried.remove(0);
                    }
                    current = carried;
                }
            }

            current.push(segment);
        }

        if let Some(merged) = merge(&current) {
            out.push(merged);
        }
        out
    }

    fn carry_over(&self, flushed: &[Span], carry: Carry) -> Vec<Span> {
        let Some(last) = flushed.last() else {
            return Vec::new();
        };
        match carry {
            Carry::One if self.overlap > 0 => vec![*last],
            Carry::One => Vec::new(),
            Carry::Tail => {
                let taken = flushed
                    .iter()
                    .rev()
                    .take_while(|s| last.end - s.start <= self.overlap)
                    .count();
                flushed[flushed.len() - taken..].to_vec()
            }
        }
    }

    fn split_recursive(&self, chars: &[char], span: Span, level: usize, out: &mut Vec<Span>) {
        if span.len() <= self.chunk_size {
            out.push(span);
            return;
        }

        let Some(separator) = RECURSIVE_SEPARATORS.get(level) else {
            // Raw characters: always terminates.
            out.extend(self.windows(span, 0));
            return;
        };

        let pieces = match separator {
            Separator::Literal(sep) => split_literal(chars, span, sep),
            Separator::Sentence => sentence_spans(chars, span),
        };

        if pieces.len() <= 1 {
            let next = pieces.first().copied().unwrap_or(span);
            self.split_recursive(chars, next, level + 1, out);
            return;
        }

        for piece in pieces {
            self.split_recursive(chars, piece, level + 1, out);
        }
    }
}

/// Chunk `text` with an ad-hoc chunker.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    strategy: ChunkStrategy,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<DocumentChunk>> {
    let chunker = Chunker::new(strategy, chunk_size, overlap)?;
    Ok(chunker.chunk(document_id, text))
}

/// Chunk a document's content.
pub fn chunk_document(
    doc: &Document,
    strategy: ChunkStrategy,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<DocumentChunk>> {
    chunk_text(&doc.id, &doc.content, strategy, chunk_size, overlap)
}

fn merge(segments: &[Span]) -> Option<Span> {
    let first = segments.first()?;
    let last = segments.last()?;
    Some(Span::new(first.start, last.end))
}

fn trim(chars: &[char], span: Span) -> Span {
    let mut start = span.start;
    let mut end = span.end;
    while start < end && chars[start].is_whitespace() {
        start += 1;
    }
    while end > start && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    Span::new(start, end)
}

/// Sentences end after `.`, `!` or `?` followed by whitespace.
fn sentence_spans(chars: &[char], span: Span) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start = span.start;
    for i in span.start..span.end {
        let boundary = matches!(chars[i], '.' | '!' | '?')
            && i + 1 < span.end
            && chars[i + 1].is_whitespace();
        if boundary {
            let sentence = trim(chars, Span::new(start, i + 1));
            if sentence.len() > 0 {
                spans.push(sentence);
            }
            start = i + 1;
        }
    }
    let rest = trim(chars, Span::new(start, span.end));
    if rest.len() > 0 {
        spans.push(rest);
    }
    spans
}

/// Paragraphs are maximal runs of non-blank lines.
fn paragraph_spans(chars: &[char]) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut para_start: Option<usize> = None;
    let mut para_end = 0;
    let mut line_start = 0;

    for i in 0..=chars.len() {
        if i < chars.len() && chars[i] != '\n' {
            continue;
        }
        let blank = chars[line_start..i].iter().all(|c| c.is_whitespace());
        if blank {
            if let Some(start) = para_start.take() {
                spans.push(trim(chars, Span::new(start, para_end)));
            }
        } else {
            para_start.get_or_insert(line_start);
            para_end = i;
        }
        line_start = i + 1;
    }

    if let Some(start) = para_start {
        spans.push(trim(chars, Span::new(start, para_end)));
    }
    spans
}

fn split_literal(chars: &[char], span: Span, sep: &str) -> Vec<Span> {
    let sep: Vec<char> = sep.chars().collect();
    let mut pieces = Vec::new();
    let mut piece_start = span.start;
    let mut i = span.start;

    while i + sep.len() <= span.end {
        if chars[i..i + sep.len()] == sep[..] {
            pieces.push(Span::new(piece_start, i));
            i += sep.len();
            piece_start = i;
        } else {
            i += 1;
        }
    }
    pieces.push(Span::new(piece_start, span.end));

    pieces
        .into_iter()
        .map(|p| trim(chars, p))
        .filter(|p| p.len() > 0)
        .collect()
}

fn make_chunk(document_id: &str, index: usize, chars: &[char], span: Span) -> DocumentChunk {
    let content: String = chars[span.start..span.end].iter().collect();

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    DocumentChunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        content,
        chunk_index: index,
        start_offset: span.start,
        end_offset: span.end,
        hash,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ALL: [ChunkStrategy; 5] = [
        ChunkStrategy::Fixed,
        ChunkStrategy::Sentence,
        ChunkStrategy::Paragraph,
        ChunkStrategy::Recursive,
        ChunkStrategy::Semantic,
    ];

    fn sample_text() -> String {
        (0..40)
            .map(|i| {
                if i % 5 == 4 {
                    format!("Sentence number {} ends a paragraph.\n\n", i)
                } else {
                    format!("Sentence number {} is here. ", i)
                }
            })
            .collect()
    }

    fn assert_well_formed(chunks: &[DocumentChunk], text: &str, chunk_size: usize) {
        let len = text.chars().count();
        assert!(!chunks.is_empty());
        let ids: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), chunks.len(), "chunk ids must be unique");
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i, "Index mismatch at position {}", i);
            assert!(c.start_offset < c.end_offset);
            assert!(c.end_offset <= len);
            assert!(c.content.chars().count() <= chunk_size);
            let expected: String = text
                .chars()
                .skip(c.start_offset)
                .take(c.end_offset - c.start_offset)
                .collect();
            assert_eq!(c.content, expected);
        }
    }

    #[test]
    fn test_short_text_single_chunk_all_strategies() {
        let text = "Hello, world! Short text.";
        for strategy in ALL {
            let chunks = chunk_text("doc1", text, strategy, 100, 10).unwrap();
            assert_eq!(chunks.len(), 1, "{:?}", strategy);
            assert_eq!(chunks[0].content, text);
            assert_eq!(chunks[0].start_offset, 0);
            assert_eq!(chunks[0].end_offset, text.chars().count());
        }
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("doc1", "", ChunkStrategy::Recursive, 100, 10).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "");
        assert_eq!((chunks[0].start_offset, chunks[0].end_offset), (0, 0));
    }

    #[test]
    fn test_overlap_not_smaller_than_size_rejected() {
        for overlap in [10, 11, 50] {
            let err = chunk_text("doc1", "abc", ChunkStrategy::Fixed, 10, overlap).unwrap_err();
            assert!(matches!(err, RagError::Validation(_)));
        }
        assert!(Chunker::new(ChunkStrategy::Fixed, 0, 0).is_err());
    }

    #[test]
    fn test_fixed_chunk_count() {
        for (len, size, overlap) in [(25, 10, 2), (26, 10, 2), (27, 10, 2), (100, 7, 3), (11, 10, 0)] {
            let text: String = "x".repeat(len);
            let chunks = chunk_text("doc1", &text, ChunkStrategy::Fixed, size, overlap).unwrap();
            let expected = (len - overlap).div_ceil(size - overlap);
            assert_eq!(chunks.len(), expected, "len={} size={} overlap={}", len, size, overlap);
            assert_well_formed(&chunks, &text, size);
        }
    }

    #[test]
    fn test_fixed_windows_overlap_exactly() {
        let text: String = ('a'..='z').collect();
        let chunks = chunk_text("doc1", &text, ChunkStrategy::Fixed, 10, 3).unwrap();
        assert_eq!(chunks[0].content, "abcdefghij");
        assert_eq!(chunks[1].content, "hijklmnopq");
        assert_eq!(chunks[1].start_offset, 7);
        assert_eq!(chunks.last().unwrap().end_offset, 26);
    }

    #[test]
    fn test_fixed_multibyte_offsets_are_chars() {
        let text = "héllo wörld ünïcode".repeat(3);
        let chunks = chunk_text("doc1", &text, ChunkStrategy::Fixed, 8, 2).unwrap();
        assert_well_formed(&chunks, &text, 8);
    }

    #[test]
    fn test_sentence_keeps_sentences_whole() {
        let text = "Alpha is first. Beta is second! Gamma is third? Delta is fourth. Epsilon is fifth.";
        let chunks = chunk_text("doc1", text, ChunkStrategy::Sentence, 35, 0).unwrap();
        assert!(chunks.len() > 1);
        assert_well_formed(&chunks, text, 35);
        for c in &chunks {
            assert!(
                c.content.ends_with('.') || c.content.ends_with('!') || c.content.ends_with('?'),
                "chunk does not end on a sentence: {:?}",
                c.content
            );
        }
    }

    #[test]
    fn test_sentence_carries_tail_overlap() {
        let text = "One two three. Four five six. Seven eight nine. Ten eleven twelve.";
        let chunks = chunk_text("doc1", text, ChunkStrategy::Sentence, 32, 16).unwrap();
        assert!(chunks.len() > 1);
        assert_well_formed(&chunks, text, 32);
        assert!(chunks[1].start_offset < chunks[0].end_offset, "expected overlap");
        assert!(chunks[1].content.starts_with("Four five six."));
    }

    #[test]
    fn test_semantic_matches_sentence() {
        let text = sample_text();
        let a = chunk_text("doc1", &text, ChunkStrategy::Sentence, 120, 30).unwrap();
        let b = chunk_text("doc1", &text, ChunkStrategy::Semantic, 120, 30).unwrap();
        let a: Vec<_> = a.iter().map(|c| (c.start_offset, c.end_offset)).collect();
        let b: Vec<_> = b.iter().map(|c| (c.start_offset, c.end_offset)).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_paragraph_carries_one_paragraph() {
        let text = "First para.\n\nSecond para.\n\nThird para.\n\nFourth para.";
        let chunks = chunk_text("doc1", text, ChunkStrategy::Paragraph, 30, 12).unwrap();
        assert_well_formed(&chunks, text, 30);
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].content, "First para.\n\nSecond para.");
        assert!(chunks[1].content.starts_with("Second para."));
    }

    #[test]
    fn test_paragraph_carries_paragraph_longer_than_overlap() {
        let para = |c: char| c.to_string().repeat(60);
        let text = format!("{}\n\n{}\n\n{}", para('a'), para('b'), para('c'));
        let chunks = chunk_text("doc1", &text, ChunkStrategy::Paragraph, 130, 20).unwrap();
        assert_well_formed(&chunks, &text, 130);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, format!("{}\n\n{}", para('a'), para('b')));
        assert_eq!(chunks[1].content, format!("{}\n\n{}", para('b'), para('c')));
        assert_eq!((chunks[1].start_offset, chunks[1].end_offset), (62, 184));
    }

    #[test]
    fn test_paragraph_zero_overlap_carries_nothing() {
        let text = "Alpha\n\nBeta\n\nGamma";
        let chunks = chunk_text("doc1", text, ChunkStrategy::Paragraph, 12, 0).unwrap();
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["Alpha\n\nBeta", "Gamma"]);
    }

    #[test]
    fn test_paragraph_drops_carry_without_room() {
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird paragraph here.";
        let chunks = chunk_text("doc1", text, ChunkStrategy::Paragraph, 30, 5).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].content, "Second paragraph here.");
    }

    #[test]
    fn test_recursive_prefers_paragraphs() {
        let text = "Short one.\n\nShort two.\n\nShort three.";
        let chunks = chunk_text("doc1", text, ChunkStrategy::Recursive, 25, 0).unwrap();
        assert_well_formed(&chunks, text, 25);
        assert_eq!(chunks[0].content, "Short one.\n\nShort two.");
        assert_eq!(chunks[1].content, "Short three.");
    }

    #[test]
    fn test_recursive_falls_through_to_characters() {
        let text = "a".repeat(95);
        let chunks = chunk_text("doc1", &text, ChunkStrategy::Recursive, 20, 5).unwrap();
        assert_well_formed(&chunks, &text, 20);
        assert_eq!(chunks.len(), 5);
    }

    #[test]
    fn test_all_strategies_well_formed_on_long_text() {
        let text = sample_text();
        for strategy in ALL {
            let chunks = chunk_text("doc1", &text, strategy, 90, 20).unwrap();
            assert!(chunks.len() > 1, "{:?}", strategy);
            assert_well_formed(&chunks, &text, 90);
            assert_eq!(chunks[0].start_offset, 0);
        }
    }

    #[test]
    fn test_oversized_sentence_is_hard_split() {
        let text = format!("{}. Tiny.", "word ".repeat(40));
        let chunks = chunk_text("doc1", &text, ChunkStrategy::Sentence, 50, 10).unwrap();
        assert_well_formed(&chunks, &text, 50);
    }

    #[test]
    fn test_whitespace_only_long_text() {
        let text = " ".repeat(30);
        let chunks = chunk_text("doc1", &text, ChunkStrategy::Sentence, 10, 0).unwrap();
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_text("doc1", text, ChunkStrategy::Paragraph, 12, 0).unwrap();
        let c2 = chunk_text("doc1", text, ChunkStrategy::Paragraph, 12, 0).unwrap();
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.content, b.content);
            assert_eq!(a.hash, b.hash);
            assert_ne!(a.id, b.id);
        }
    }

    #[test]
    fn test_chunk_document_uses_document_id() {
        let doc = Document::new("doc-42", "Title", "Some content here.");
        let chunks = chunk_document(&doc, ChunkStrategy::Fixed, 100, 0).unwrap();
        assert_eq!(chunks[0].document_id, "doc-42");
    }
}
