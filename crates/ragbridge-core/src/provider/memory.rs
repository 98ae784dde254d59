//! In-memory providers for tests and embedding.
//!
//! [`InMemoryBackend`] implements every lookup/search/pinned trait over
//! plain collections behind `std::sync::RwLock`. Vectors are produced by
//! [`hash_embed`], and search is brute-force cosine similarity.
//!
//! [`FixedConnector`] is a connector with a fixed window and the
//! chars-per-token encoder.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::budget::ApproxTokenEncoder;
use crate::embedding::{cosine_similarity, hash_embed, HASH_EMBED_DIMS};
use crate::models::{
    DocumentSource, Identifier, PinnedDocument, SearchResult, SourcePassage, Workspace,
};
use crate::ranking::{select, Candidate};

use super::{
    ConnectorFactory, ConnectorSpec, LlmConnector, PinnedDocumentProvider, SearchProvider,
    SearchRequest, TokenEncoder, WorkspaceLookup,
};

struct StoredVector {
    identifier: Identifier,
    text: String,
    metadata: Map<String, Value>,
    vector: Vec<f32>,
}

/// What a search was asked for, captured for assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSearch {
    pub namespace: String,
    pub input: String,
    pub top_n: usize,
    pub similarity_threshold: f64,
    pub filter_identifiers: Vec<Identifier>,
    pub rerank: bool,
    pub connector_model: String,
}

/// In-memory workspace, pinned-document, and vector store.
pub struct InMemoryBackend {
    workspaces: RwLock<Vec<Workspace>>,
    pinned: RwLock<HashMap<String, Vec<PinnedDocument>>>,
    vectors: RwLock<HashMap<String, Vec<StoredVector>>>,
    failures: RwLock<HashMap<String, String>>,
    searches: RwLock<Vec<RecordedSearch>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            workspaces: RwLock::new(Vec::new()),
            pinned: RwLock::new(HashMap::new()),
            vectors: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
            searches: RwLock::new(Vec::new()),
        }
    }

    pub fn add_workspace(&self, workspace: Workspace) -> Result<()> {
        let mut ws = self.workspaces.write().map_err(|_| poisoned())?;
        ws.retain(|w| w.slug != workspace.slug);
        ws.push(workspace);
        Ok(())
    }

    /// Pin a document to the workspace with `slug`.
    pub fn pin_document(&self, slug: &str, source: DocumentSource, content: &str) -> Result<()> {
        let mut metadata = source_metadata(&source);
        metadata.insert(
            "token_count_estimate".to_string(),
            Value::from(ApproxTokenEncoder::default().count_tokens(content)?),
        );
        self.pinned
            .write()
            .map_err(|_| poisoned())?
            .entry(slug.to_string())
            .or_default()
            .push(PinnedDocument {
                source,
                page_content: content.to_string(),
                metadata,
            });
        Ok(())
    }

    /// Embed `text` as one chunk of `source` into `namespace`.
    pub fn add_chunk(&self, namespace: &str, source: &DocumentSource, text: &str) -> Result<()> {
        self.vectors
            .write()
            .map_err(|_| poisoned())?
            .entry(namespace.to_string())
            .or_default()
            .push(StoredVector {
                identifier: source.identifier(),
                text: text.to_string(),
                metadata: source_metadata(source),
                vector: hash_embed(text, HASH_EMBED_DIMS),
            });
        Ok(())
    }

    /// Make every search against `namespace` report `message`.
    pub fn fail_searches(&self, namespace: &str, message: &str) -> Result<()> {
        self.failures
            .write()
            .map_err(|_| poisoned())?
            .insert(namespace.to_string(), message.to_string());
        Ok(())
    }

    /// Searches seen so far, oldest first.
    pub fn recorded_searches(&self) -> Vec<RecordedSearch> {
        self.searches
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("in-memory backend lock poisoned")
}

fn source_metadata(source: &DocumentSource) -> Map<String, Value> {
    let mut metadata = Map::new();
    if let Some(title) = &source.title {
        metadata.insert("title".to_string(), Value::from(title.as_str()));
    }
    if let Some(url) = &source.url {
        metadata.insert("url".to_string(), Value::from(url.as_str()));
    }
    if let Some(published) = &source.published {
        metadata.insert("published".to_string(), Value::from(published.as_str()));
    }
    if let Some(path) = &source.doc_path {
        metadata.insert("docpath".to_string(), Value::from(path.as_str()));
    }
    metadata
}

#[async_trait]
impl WorkspaceLookup for InMemoryBackend {
    async fn get(&self, slug: &str) -> Result<Option<Workspace>> {
        let ws = self.workspaces.read().map_err(|_| poisoned())?;
        Ok(ws.iter().find(|w| w.slug == slug).cloned())
    }

    async fn list(&self) -> Result<Vec<Workspace>> {
        Ok(self.workspaces.read().map_err(|_| poisoned())?.clone())
    }
}

#[async_trait]
impl SearchProvider for InMemoryBackend {
    async fn has_namespace(&self, namespace: &str) -> Result<bool> {
        Ok(self
            .vectors
            .read()
            .map_err(|_| poisoned())?
            .contains_key(namespace))
    }

    async fn namespace_count(&self, namespace: &str) -> Result<usize> {
        Ok(self
            .vectors
            .read()
            .map_err(|_| poisoned())?
            .get(namespace)
            .map(Vec::len)
            .unwrap_or(0))
    }

    async fn similarity_search(&self, request: &SearchRequest<'_>) -> Result<SearchResult> {
        {
            let mut filter: Vec<Identifier> = request.filter_identifiers.iter().cloned().collect();
            filter.sort();
            self.searches
                .write()
                .map_err(|_| poisoned())?
                .push(RecordedSearch {
                    namespace: request.namespace.to_string(),
                    input: request.input.to_string(),
                    top_n: request.top_n,
                    similarity_threshold: request.similarity_threshold,
                    filter_identifiers: filter,
                    rerank: request.rerank,
                    connector_model: request.connector.model().to_string(),
                });
        }

        if let Some(message) = self
            .failures
            .read()
            .map_err(|_| poisoned())?
            .get(request.namespace)
        {
            return Ok(SearchResult::Failed {
                message: message.clone(),
            });
        }

        let query_vec = hash_embed(request.input, HASH_EMBED_DIMS);
        let vectors = self.vectors.read().map_err(|_| poisoned())?;
        let Some(stored) = vectors.get(request.namespace) else {
            return Ok(SearchResult::empty());
        };

        let candidates: Vec<Candidate> = stored
            .iter()
            .map(|sv| {
                let similarity = cosine_similarity(&query_vec, &sv.vector) as f64;
                let mut metadata = sv.metadata.clone();
                metadata.insert("score".to_string(), Value::from(similarity));
                Candidate {
                    passage: SourcePassage::vector(
                        sv.identifier.clone(),
                        sv.text.clone(),
                        Some(similarity),
                        metadata,
                    ),
                    context_text: sv.text.clone(),
                }
            })
            .collect();

        Ok(select(candidates, request, stored.len()))
    }
}

#[async_trait]
impl PinnedDocumentProvider for InMemoryBackend {
    async fn pinned_docs(
        &self,
        workspace: &Workspace,
        max_tokens: usize,
    ) -> Result<Vec<PinnedDocument>> {
        let pinned = self.pinned.read().map_err(|_| poisoned())?;
        let Some(docs) = pinned.get(&workspace.slug) else {
            return Ok(Vec::new());
        };

        let mut used = 0usize;
        let mut out = Vec::new();
        for doc in docs {
            let tokens = doc
                .metadata
                .get("token_count_estimate")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            if used + tokens > max_tokens {
                continue;
            }
            used += tokens;
            out.push(doc.clone());
        }
        Ok(out)
    }
}

/// Connector with a fixed prompt window and approximate token counting.
#[derive(Debug, Clone)]
pub struct FixedConnector {
    provider: String,
    model: String,
    window: usize,
}

impl FixedConnector {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, window: usize) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            window,
        }
    }
}

impl LlmConnector for FixedConnector {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn prompt_window_limit(&self) -> usize {
        self.window
    }

    fn token_encoder(&self) -> Result<Box<dyn TokenEncoder>> {
        Ok(Box::new(ApproxTokenEncoder::default()))
    }
}

/// Builds [`FixedConnector`]s that all share one window size.
#[derive(Debug, Clone)]
pub struct FixedConnectorFactory {
    window: usize,
}

impl FixedConnectorFactory {
    pub fn new(window: usize) -> Self {
        Self { window }
    }
}

impl ConnectorFactory for FixedConnectorFactory {
    fn connect(&self, spec: &ConnectorSpec) -> Result<Arc<dyn LlmConnector>> {
        Ok(Arc::new(FixedConnector::new(
            spec.provider.clone(),
            spec.model.clone().unwrap_or_else(|| "default".to_string()),
            self.window,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn source(title: &str) -> DocumentSource {
        DocumentSource {
            title: Some(title.to_string()),
            published: Some("2024-05-01".to_string()),
            url: Some(format!("file:///{}", title)),
            doc_path: None,
        }
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let backend = InMemoryBackend::new();
        backend
            .add_chunk("docs", &source("install.md"), "install steps for the server")
            .unwrap();
        backend
            .add_chunk("docs", &source("pricing.md"), "pricing tiers and billing")
            .unwrap();

        let connector = FixedConnector::new("test", "m", 4096);
        let excluded = HashSet::new();
        let result = backend
            .similarity_search(&SearchRequest {
                namespace: "docs",
                input: "install steps",
                connector: &connector,
                similarity_threshold: 0.0,
                top_n: 2,
                filter_identifiers: &excluded,
                rerank: false,
            })
            .await
            .unwrap();

        let SearchResult::Found { sources, context_texts } = result else {
            panic!("expected results");
        };
        assert_eq!(sources[0].title.as_deref(), Some("install.md"));
        assert_eq!(sources.len(), context_texts.len());
        assert_eq!(backend.recorded_searches().len(), 1);
    }

    #[tokio::test]
    async fn test_pinned_docs_respect_budget() {
        let backend = InMemoryBackend::new();
        backend
            .add_workspace(Workspace::new("Docs", "docs"))
            .unwrap();
        backend
            .pin_document("docs", source("a.md"), &"a".repeat(400))
            .unwrap();
        backend
            .pin_document("docs", source("b.md"), &"b".repeat(4000))
            .unwrap();
        backend
            .pin_document("docs", source("c.md"), &"c".repeat(40))
            .unwrap();

        let ws = Workspace::new("Docs", "docs");
        let docs = backend.pinned_docs(&ws, 200).await.unwrap();
        let titles: Vec<_> = docs
            .iter()
            .map(|d| d.source.title.clone().unwrap_or_default())
            .collect();
        assert_eq!(titles, vec!["a.md", "c.md"]);
    }

    #[tokio::test]
    async fn test_resolve_by_name() {
        let backend = InMemoryBackend::new();
        backend
            .add_workspace(Workspace::new("Product Docs", "product-docs"))
            .unwrap();
        let ws = backend.resolve("product docs").await.unwrap().unwrap();
        assert_eq!(ws.slug, "product-docs");
        assert!(backend.resolve("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_namespace_counts() {
        let backend = InMemoryBackend::new();
        assert!(!backend.has_namespace("docs").await.unwrap());
        assert_eq!(backend.namespace_count("docs").await.unwrap(), 0);
        backend.add_chunk("docs", &source("a.md"), "alpha").unwrap();
        assert!(backend.has_namespace("docs").await.unwrap());
        assert_eq!(backend.namespace_count("docs").await.unwrap(), 1);
    }
}
