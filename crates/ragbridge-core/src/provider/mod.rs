//! Interfaces to the external collaborators of the orchestrator.
//!
//! The orchestrator never talks to a database, vector index, or model
//! directly. It goes through the traits below, which lets the same
//! retrieval logic run against SQLite in the application, against
//! [`memory::InMemoryBackend`] in tests, or against anything else that
//! implements them.
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`WorkspaceLookup`] | Resolve a slug to a [`Workspace`] and list workspaces |
//! | [`SearchProvider`] | Namespace stats and similarity search |
//! | [`PinnedDocumentProvider`] | Documents pinned to a workspace |
//! | [`ConnectorFactory`] | Build an [`LlmConnector`] for a provider/model pair |
//!
//! Implementations must be `Send + Sync`; a single instance serves every
//! in-flight tool call of the protocol server.

pub mod memory;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Identifier, PinnedDocument, SearchResult, Workspace};

/// Resolves workspace records.
#[async_trait]
pub trait WorkspaceLookup: Send + Sync {
    /// Look a workspace up by its slug.
    async fn get(&self, slug: &str) -> Result<Option<Workspace>>;

    /// All workspaces, in a stable order.
    async fn list(&self) -> Result<Vec<Workspace>>;

    /// Look a workspace up by slug, falling back to a case-insensitive
    /// name match.
    async fn resolve(&self, slug_or_name: &str) -> Result<Option<Workspace>> {
        if let Some(ws) = self.get(slug_or_name).await? {
            return Ok(Some(ws));
        }
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|ws| ws.name.eq_ignore_ascii_case(slug_or_name)))
    }
}

/// Inputs for a single similarity search.
pub struct SearchRequest<'a> {
    /// Vector namespace (the workspace slug).
    pub namespace: &'a str,
    /// Free-text query.
    pub input: &'a str,
    /// Connector resolved for the workspace.
    pub connector: &'a dyn LlmConnector,
    /// Minimum similarity score to keep a result.
    pub similarity_threshold: f64,
    /// Maximum number of results.
    pub top_n: usize,
    /// Identifiers that must not be returned (already pinned).
    pub filter_identifiers: &'a HashSet<Identifier>,
    /// Run a rerank pass over the candidates.
    pub rerank: bool,
}

/// The vector index.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Whether the namespace exists at all.
    async fn has_namespace(&self, namespace: &str) -> Result<bool>;

    /// Number of vectors stored in the namespace (0 if it doesn't exist).
    async fn namespace_count(&self, namespace: &str) -> Result<usize>;

    /// Run a similarity search.
    ///
    /// Backend failures that should be shown to the caller verbatim are
    /// returned as [`SearchResult::Failed`]; `Err` is reserved for
    /// transport or storage faults.
    async fn similarity_search(&self, request: &SearchRequest<'_>) -> Result<SearchResult>;
}

/// Documents pinned to a workspace.
#[async_trait]
pub trait PinnedDocumentProvider: Send + Sync {
    /// Pinned documents for `workspace`, in pin order, fitting within
    /// `max_tokens`.
    async fn pinned_docs(&self, workspace: &Workspace, max_tokens: usize)
        -> Result<Vec<PinnedDocument>>;
}

/// Counts tokens in the encoding scheme of a model.
///
/// Encoders may hold heavyweight resources; callers acquire one per
/// analysis and drop it when done.
pub trait TokenEncoder: Send {
    fn count_tokens(&self, text: &str) -> Result<usize>;
}

/// The capabilities the orchestrator needs from a language-model connector.
pub trait LlmConnector: Send + Sync {
    fn provider(&self) -> &str;
    fn model(&self) -> &str;
    /// Maximum number of input tokens the model accepts.
    fn prompt_window_limit(&self) -> usize;
    /// Acquire a token encoder for this model.
    fn token_encoder(&self) -> Result<Box<dyn TokenEncoder>>;
}

/// Provider/model pair a connector is built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorSpec {
    pub provider: String,
    pub model: Option<String>,
}

/// Builds connectors.
pub trait ConnectorFactory: Send + Sync {
    fn connect(&self, spec: &ConnectorSpec) -> Result<Arc<dyn LlmConnector>>;
}

/// The full set of providers an orchestrator works against.
#[derive(Clone)]
pub struct Providers {
    pub workspaces: Arc<dyn WorkspaceLookup>,
    pub search: Arc<dyn SearchProvider>,
    pub pinned: Arc<dyn PinnedDocumentProvider>,
    pub connectors: Arc<dyn ConnectorFactory>,
}

impl Providers {
    /// Use one backend for lookup, search, and pinned documents.
    pub fn from_backend<B>(backend: Arc<B>, connectors: Arc<dyn ConnectorFactory>) -> Self
    where
        B: WorkspaceLookup + SearchProvider + PinnedDocumentProvider + 'static,
    {
        Self {
            workspaces: backend.clone(),
            search: backend.clone(),
            pinned: backend,
            connectors,
        }
    }
}
