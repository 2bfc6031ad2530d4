//! Data types for documents, segments and search results.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// A scraped source document. Immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Source URL or other stable identifier.
    pub source_id: String,
    /// The text content of the document.
    pub text: String,
    /// When the scraper collected the document.
    pub collected_at: DateTime<Utc>,
    /// Article title, when the scraper found one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Publish date as reported by the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    /// Free-form key-value metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Document {
    /// Create a document collected now.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidDocument`] if `source_id` is blank.
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Result<Self> {
        let source_id = source_id.into();
        if source_id.trim().is_empty() {
            return Err(RagError::InvalidDocument("source_id must not be empty".to_string()));
        }
        Ok(Self {
            source_id,
            text: text.into(),
            collected_at: Utc::now(),
            title: None,
            published: None,
            metadata: HashMap::new(),
        })
    }

    /// Set the collection timestamp.
    pub fn with_collected_at(mut self, at: DateTime<Utc>) -> Self {
        self.collected_at = at;
        self
    }

    /// Set the article title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Number of characters in the document text.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// A loosely typed article row as produced by the scraper.
///
/// Every field is optional on the wire; [`Document::try_from`] rejects rows
/// without a URL or body text so nothing downstream deals with gaps.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArticleRecord {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub publish_date: Option<String>,
    #[serde(default)]
    pub collected_at: Option<DateTime<Utc>>,
}

/// Placeholder values the scraper writes when extraction fails.
const SCRAPER_PLACEHOLDERS: [&str; 3] = ["No text found", "No title found", "No date found"];

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !SCRAPER_PLACEHOLDERS.contains(&v.as_str()))
}

impl TryFrom<ArticleRecord> for Document {
    type Error = RagError;

    fn try_from(record: ArticleRecord) -> Result<Self> {
        let url = present(record.url)
            .ok_or_else(|| RagError::InvalidDocument("article has no url".to_string()))?;
        let body = present(record.text).ok_or_else(|| {
            RagError::InvalidDocument(format!("article '{url}' has no body text"))
        })?;
        let title = present(record.title);
        let published = present(record.publish_date);

        let text = format!(
            "Title: {}\n\nText: {body}\n\nURL: {url}",
            title.as_deref().unwrap_or("Untitled")
        );

        Ok(Document {
            source_id: url,
            text,
            collected_at: record.collected_at.unwrap_or_else(Utc::now),
            title,
            published,
            metadata: HashMap::new(),
        })
    }
}

/// A contiguous, overlapping window of a [`Document`]'s text.
///
/// Offsets and lengths are measured in characters, not bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Segment {
    /// Unique identifier, `{source_id}#{sequence}`.
    pub id: String,
    /// The segment text.
    pub text: String,
    /// The `source_id` of the parent document.
    pub source_id: String,
    /// Character offset of the segment start within the document.
    pub start_offset: usize,
    /// Position of the segment within its document, starting at 0.
    pub sequence: usize,
}

impl Segment {
    /// Character offset one past the end of the segment.
    pub fn end_offset(&self) -> usize {
        self.start_offset + self.text.chars().count()
    }

    /// Provenance of this segment for citations.
    pub fn citation(&self) -> Citation {
        Citation {
            source_id: self.source_id.clone(),
            start_offset: self.start_offset,
            sequence: self.sequence,
        }
    }
}

/// A vector paired with the segment it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// The embedding vector.
    pub embedding: Vec<f32>,
    /// The embedded segment.
    pub segment: Segment,
}

/// A retrieved [`Segment`] paired with its cosine similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredSegment {
    /// The retrieved segment.
    pub segment: Segment,
    /// Cosine similarity (higher is more relevant).
    pub score: f32,
}

/// Where a piece of grounding context came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    /// Source URL or identifier of the document.
    pub source_id: String,
    /// Character offset of the cited segment.
    pub start_offset: usize,
    /// Sequence index of the cited segment.
    pub sequence: usize,
}
