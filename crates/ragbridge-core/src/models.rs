//! Core data types shared by the orchestrator, providers, and tool layer.
//!
//! Everything here is built fresh for a single query or tool call and
//! dropped once the response is emitted. The only long-lived records
//! ([`Workspace`] and the vector namespace behind it) are owned by the
//! provider implementations.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Default number of vector results when neither the caller nor the
/// workspace specifies one.
pub const DEFAULT_TOP_N: usize = 4;

/// Default minimum similarity score for vector results.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.25;

/// How the vector search for a workspace ranks its candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorSearchMode {
    /// Plain similarity ranking.
    #[default]
    Default,
    /// Similarity candidates followed by a rerank pass.
    Rerank,
}

impl VectorSearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorSearchMode::Default => "default",
            VectorSearchMode::Rerank => "rerank",
        }
    }

    /// Parse a stored mode. Unknown values fall back to [`VectorSearchMode::Default`].
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "rerank" => VectorSearchMode::Rerank,
            _ => VectorSearchMode::Default,
        }
    }
}

impl fmt::Display for VectorSearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workspace record with its retrieval defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Workspace {
    pub name: String,
    pub slug: String,
    pub chat_provider: Option<String>,
    pub chat_model: Option<String>,
    pub top_n: Option<usize>,
    pub similarity_threshold: Option<f64>,
    pub vector_search_mode: VectorSearchMode,
}

impl Workspace {
    /// Build a workspace with no overrides (all settings inherited).
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slug: slug.into(),
            chat_provider: None,
            chat_model: None,
            top_n: None,
            similarity_threshold: None,
            vector_search_mode: VectorSearchMode::Default,
        }
    }

    /// The vector namespace backing this workspace.
    pub fn namespace(&self) -> &str {
        &self.slug
    }
}

/// Opaque, stable key for a document's source.
///
/// Two passages that come from the same source document compare equal no
/// matter what text they carry. Nothing in this crate looks inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical identity of a source document.
///
/// Pinned documents and vector chunks that were cut from the same
/// document share this identity, which is what makes dedup possible.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocumentSource {
    pub title: Option<String>,
    pub published: Option<String>,
    pub url: Option<String>,
    pub doc_path: Option<String>,
}

impl DocumentSource {
    /// Derive the identifier for this source.
    ///
    /// Built from the title and publication stamp only, so re-embedding
    /// or re-pinning the same document always yields the same key.
    pub fn identifier(&self) -> Identifier {
        Identifier(format!(
            "title:{}-timestamp:{}",
            self.title.as_deref().unwrap_or_default(),
            self.published.as_deref().unwrap_or_default()
        ))
    }
}

/// A document pinned to a workspace, as returned by the pinned provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PinnedDocument {
    pub source: DocumentSource,
    /// Full document text.
    pub page_content: String,
    /// Provider metadata (without the page content).
    pub metadata: Map<String, Value>,
}

/// Where a passage came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceOrigin {
    Pinned,
    Vector,
}

impl SourceOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceOrigin::Pinned => "pinned",
            SourceOrigin::Vector => "vector",
        }
    }
}

/// A unit of retrieved context.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePassage {
    pub text: String,
    pub title: Option<String>,
    pub url: Option<String>,
    /// Similarity score in `[0, 1]`; only ever set on vector passages.
    pub score: Option<f64>,
    pub origin: SourceOrigin,
    pub identifier: Identifier,
    pub metadata: Map<String, Value>,
}

impl SourcePassage {
    /// Build a vector-origin passage. The score is clamped to `[0, 1]`.
    pub fn vector(
        identifier: Identifier,
        text: impl Into<String>,
        score: Option<f64>,
        metadata: Map<String, Value>,
    ) -> Self {
        let title = metadata
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string);
        let url = metadata
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            text: text.into(),
            title,
            url,
            score: score.map(|s| s.clamp(0.0, 1.0)),
            origin: SourceOrigin::Vector,
            identifier,
            metadata,
        }
    }
}

/// Response of a [`SearchProvider`](crate::provider::SearchProvider).
#[derive(Debug, Clone, PartialEq)]
pub enum SearchResult {
    /// The backend reported a failure instead of results.
    Failed { message: String },
    /// Ranked passages (similarity descending) and their raw context texts.
    Found {
        sources: Vec<SourcePassage>,
        context_texts: Vec<String>,
    },
}

impl SearchResult {
    pub fn empty() -> Self {
        SearchResult::Found {
            sources: Vec::new(),
            context_texts: Vec::new(),
        }
    }
}

/// Options for a single retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalOptions {
    pub top_n: usize,
    pub threshold: f64,
    pub include_pinned: bool,
    /// Force a rerank pass. A workspace whose search mode is
    /// [`VectorSearchMode::Rerank`] reranks either way.
    pub rerank: bool,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            include_pinned: false,
            rerank: false,
        }
    }
}

/// Orchestrator output: pinned passages first, then vector passages.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergedContext {
    pub passages: Vec<SourcePassage>,
    /// Raw texts in the same order as `passages`.
    pub context_texts: Vec<String>,
    pub pinned_count: usize,
    pub vector_count: usize,
}

impl MergedContext {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn pinned(&self) -> &[SourcePassage] {
        &self.passages[..self.pinned_count]
    }

    pub fn vector(&self) -> &[SourcePassage] {
        &self.passages[self.pinned_count..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_ignores_content() {
        let source = DocumentSource {
            title: Some("install.md".to_string()),
            published: Some("2024-01-02".to_string()),
            url: Some("file:///a".to_string()),
            doc_path: None,
        };
        let mut moved = source.clone();
        moved.url = Some("file:///b".to_string());
        assert_eq!(source.identifier(), moved.identifier());
    }

    #[test]
    fn test_vector_passage_reads_title_and_url() {
        let mut meta = Map::new();
        meta.insert("title".into(), Value::from("Guide"));
        meta.insert("url".into(), Value::from("https://example.com/guide"));
        let p = SourcePassage::vector(Identifier::new("g"), "body", Some(1.7), meta);
        assert_eq!(p.title.as_deref(), Some("Guide"));
        assert_eq!(p.url.as_deref(), Some("https://example.com/guide"));
        assert_eq!(p.score, Some(1.0));
        assert_eq!(p.origin, SourceOrigin::Vector);
    }

    #[test]
    fn test_search_mode_parse() {
        assert_eq!(VectorSearchMode::parse("rerank"), VectorSearchMode::Rerank);
        assert_eq!(VectorSearchMode::parse("RERANK "), VectorSearchMode::Rerank);
        assert_eq!(VectorSearchMode::parse("default"), VectorSearchMode::Default);
        assert_eq!(VectorSearchMode::parse("weird"), VectorSearchMode::Default);
    }
}
