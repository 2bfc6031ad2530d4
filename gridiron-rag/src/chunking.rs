//! Document chunking.
//!
//! This module provides the [`Chunker`] trait and [`BoundaryChunker`], which
//! cuts documents into windows of at most `max_len` characters that overlap
//! their predecessor by exactly `overlap` characters. Within each window the
//! cut point snaps to the highest-precedence natural boundary available
//! (paragraph, sentence, line break, whitespace by default) and falls back to
//! a hard character cut when the window has none.

use serde::{Deserialize, Serialize};

use crate::document::{Document, Segment};
use crate::error::{RagError, Result};

/// A strategy for splitting documents into segments.
///
/// Implementations must be deterministic: the same document always yields the
/// same segments, which keeps rebuilt indexes reproducible.
pub trait Chunker: Send + Sync {
    /// Split a document into segments.
    ///
    /// Returns an empty `Vec` if the document has empty text.
    fn chunk(&self, document: &Document) -> Vec<Segment>;
}

/// A natural place to end a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// Just after a blank line (`\n\n`).
    Paragraph,
    /// Just after `.`, `!` or `?` followed by whitespace.
    Sentence,
    /// Just after a single line break.
    Line,
    /// Just after any whitespace character.
    Whitespace,
}

impl Boundary {
    /// The precedence used when none is configured.
    pub const DEFAULT_PRECEDENCE: [Boundary; 4] =
        [Boundary::Paragraph, Boundary::Sentence, Boundary::Line, Boundary::Whitespace];

    /// Whether a cut at `cut` (exclusive end) lands right after this boundary.
    fn ends_at(self, chars: &[char], cut: usize) -> bool {
        if cut == 0 {
            return false;
        }
        let last = chars[cut - 1];
        match self {
            Boundary::Paragraph => cut >= 2 && last == '\n' && chars[cut - 2] == '\n',
            Boundary::Sentence => {
                cut >= 2 && last.is_whitespace() && matches!(chars[cut - 2], '.' | '!' | '?')
            }
            Boundary::Line => last == '\n',
            Boundary::Whitespace => last.is_whitespace(),
        }
    }
}

/// Splits text into overlapping windows, preferring natural boundaries.
///
/// Segment IDs are generated as `{source_id}#{sequence}`.
///
/// # Example
///
/// ```rust,ignore
/// use gridiron_rag::{BoundaryChunker, Chunker};
///
/// let chunker = BoundaryChunker::new(500, 100)?;
/// let segments = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryChunker {
    max_len: usize,
    overlap: usize,
    precedence: Vec<Boundary>,
}

impl BoundaryChunker {
    /// Create a chunker with the default boundary precedence.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] if either value is zero or
    /// `overlap >= max_len`.
    pub fn new(max_len: usize, overlap: usize) -> Result<Self> {
        Self::with_precedence(max_len, overlap, Boundary::DEFAULT_PRECEDENCE.to_vec())
    }

    /// Create a chunker that only makes hard character cuts.
    pub fn fixed_size(max_len: usize, overlap: usize) -> Result<Self> {
        Self::with_precedence(max_len, overlap, Vec::new())
    }

    /// Create a chunker with an explicit boundary precedence, highest first.
    pub fn with_precedence(
        max_len: usize,
        overlap: usize,
        precedence: Vec<Boundary>,
    ) -> Result<Self> {
        if max_len == 0 || overlap == 0 {
            return Err(RagError::InvalidConfig(format!(
                "max_len ({max_len}) and overlap ({overlap}) must both be positive"
            )));
        }
        if overlap >= max_len {
            return Err(RagError::InvalidConfig(format!(
                "overlap ({overlap}) must be less than max_len ({max_len})"
            )));
        }
        Ok(Self { max_len, overlap, precedence })
    }

    /// Maximum segment length in characters.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Overlap between consecutive segments in characters.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Compute `(start, end)` character spans for a text.
    fn spans(&self, chars: &[char]) -> Vec<(usize, usize)> {
        let len = chars.len();
        let mut spans = Vec::new();
        if len == 0 {
            return spans;
        }

        let mut start = 0;
        loop {
            if len - start <= self.max_len {
                spans.push((start, len));
                return spans;
            }
            let window_end = start + self.max_len;
            let cut = self.find_cut(chars, start, window_end).unwrap_or(window_end);
            spans.push((start, cut));
            // cut > start + overlap, so every step makes progress
            start = cut - self.overlap;
        }
    }

    /// Find the latest boundary in the window, trying each kind in precedence order.
    ///
    /// Cuts are only accepted in the back half of the window and past the
    /// overlap region, which keeps segments from degenerating into slivers.
    fn find_cut(&self, chars: &[char], start: usize, window_end: usize) -> Option<usize> {
        let floor = (start + self.overlap + 1).max(start + self.max_len / 2);
        self.precedence.iter().find_map(|boundary| {
            (floor..=window_end).rev().find(|&cut| boundary.ends_at(chars, cut))
        })
    }
}

impl Chunker for BoundaryChunker {
    fn chunk(&self, document: &Document) -> Vec<Segment> {
        if document.text.is_empty() {
            return Vec::new();
        }

        let text = &document.text;
        let chars: Vec<char> = text.chars().collect();
        let byte_at: Vec<usize> =
            text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();

        self.spans(&chars)
            .into_iter()
            .enumerate()
            .map(|(sequence, (start, end))| Segment {
                id: format!("{}#{sequence}", document.source_id),
                text: text[byte_at[start]..byte_at[end]].to_string(),
                source_id: document.source_id.clone(),
                start_offset: start,
                sequence,
            })
            .collect()
    }
}

/// Chunk a single document with the default boundary precedence.
///
/// # Errors
///
/// Returns [`RagError::InvalidConfig`] for an invalid `max_len`/`overlap` pair.
pub fn chunk(document: &Document, max_len: usize, overlap: usize) -> Result<Vec<Segment>> {
    Ok(BoundaryChunker::new(max_len, overlap)?.chunk(document))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Document {
        Document::new("https://example.com/a", text).unwrap()
    }

    #[test]
    fn rejects_invalid_configs() {
        assert!(BoundaryChunker::new(100, 100).is_err());
        assert!(BoundaryChunker::new(100, 150).is_err());
        assert!(BoundaryChunker::new(0, 0).is_err());
        assert!(BoundaryChunker::new(100, 0).is_err());
        assert!(BoundaryChunker::new(100, 99).is_ok());
    }

    #[test]
    fn segment_counts_for_reference_lengths() {
        let chunker = BoundaryChunker::new(500, 100).unwrap();
        assert_eq!(chunker.chunk(&doc(&"x".repeat(1200))).len(), 3);
        assert_eq!(chunker.chunk(&doc(&"x".repeat(50))).len(), 1);
        assert_eq!(chunker.chunk(&doc("")).len(), 0);
    }

    #[test]
    fn hard_cuts_step_by_len_minus_overlap() {
        let chunker = BoundaryChunker::new(500, 100).unwrap();
        let segments = chunker.chunk(&doc(&"x".repeat(1200)));
        let offsets: Vec<usize> = segments.iter().map(|s| s.start_offset).collect();
        assert_eq!(offsets, vec![0, 400, 800]);
        assert_eq!(segments[2].text.len(), 400);
    }

    #[test]
    fn short_document_is_a_single_segment_at_zero() {
        let chunker = BoundaryChunker::new(500, 100).unwrap();
        let segments = chunker.chunk(&doc("Short camp note."));
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start_offset, 0);
        assert_eq!(segments[0].sequence, 0);
        assert_eq!(segments[0].id, "https://example.com/a#0");
    }

    #[test]
    fn prefers_paragraph_over_sentence_boundaries() {
        let first = "a".repeat(60);
        let text = format!("{first}\n\nSecond para. More words here and there to fill out space");
        let chunker = BoundaryChunker::new(80, 10).unwrap();
        let segments = chunker.chunk(&doc(&text));
        assert_eq!(segments[0].text, format!("{first}\n\n"));
        assert_eq!(segments[1].start_offset, 62 - 10);
    }

    #[test]
    fn custom_precedence_changes_cut() {
        let text = format!("{}. {}\n{}", "a".repeat(50), "b".repeat(20), "c".repeat(40));
        let sentence_first =
            BoundaryChunker::with_precedence(80, 5, vec![Boundary::Sentence, Boundary::Line])
                .unwrap();
        let line_first =
            BoundaryChunker::with_precedence(80, 5, vec![Boundary::Line, Boundary::Sentence])
                .unwrap();
        assert_eq!(sentence_first.chunk(&doc(&text))[0].text.chars().count(), 52);
        assert_eq!(line_first.chunk(&doc(&text))[0].text.chars().count(), 73);
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let text = "é".repeat(30);
        let chunker = BoundaryChunker::new(10, 2).unwrap();
        let segments = chunker.chunk(&doc(&text));
        assert!(segments.iter().all(|s| s.text.chars().count() <= 10));
        assert_eq!(segments.last().unwrap().end_offset(), 30);
    }
}
