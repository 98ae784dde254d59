//! Retrieval orchestration: pinned documents + similarity search → one
//! merged, deduplicated context.
//!
//! # Pipeline
//!
//! 1. Resolve the workspace and check that its namespace has vectors.
//! 2. Resolve the LLM connector (workspace settings, then process defaults).
//! 3. If requested, load pinned documents within the connector's prompt
//!    window and collect their identifiers into an exclusion set.
//! 4. Run the similarity search with that exclusion set. The pinned phase
//!    always finishes first.
//! 5. Merge: pinned passages, then vector passages, each in provider order.
//!
//! Both the CLI and the tool layer go through [`Orchestrator::query`] (or
//! [`Orchestrator::query_workspace`] once a workspace is resolved).

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{
    Identifier, MergedContext, PinnedDocument, RetrievalOptions, SearchResult, SourceOrigin,
    SourcePassage, VectorSearchMode, Workspace,
};
use crate::provider::{ConnectorSpec, LlmConnector, Providers, SearchRequest};

/// Pinned passages keep at most this many characters of their text.
pub const PINNED_PREVIEW_CHARS: usize = 1000;

/// Appended to a pinned passage whose text was cut.
pub const CONTINUATION_MARKER: &str = "...continued on in source document...";

/// Process-wide connector defaults, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorDefaults {
    pub llm_provider: String,
    pub chat_model: Option<String>,
}

/// Whether a workspace's namespace exists and how many vectors it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceStats {
    pub has_namespace: bool,
    pub vector_count: usize,
}

impl NamespaceStats {
    pub fn has_embeddings(&self) -> bool {
        self.has_namespace && self.vector_count > 0
    }
}

/// A completed retrieval.
pub struct Retrieval {
    pub context: MergedContext,
    /// Connector used for the search; reuse it for budget analysis.
    pub connector: Arc<dyn LlmConnector>,
    /// Whether the search ran with rerank.
    pub rerank: bool,
}

/// What a query against a resolved workspace produced.
pub enum QueryOutcome {
    /// The workspace has no vectors; nothing was searched.
    EmptyNamespace,
    Retrieved(Retrieval),
}

pub struct QueryReport {
    pub workspace: Workspace,
    pub total_embeddings: usize,
    pub outcome: QueryOutcome,
}

/// The retrieval orchestrator.
///
/// Cheap to clone; holds only `Arc`s to read-only providers, so one
/// instance can serve concurrent calls.
#[derive(Clone)]
pub struct Orchestrator {
    providers: Providers,
    defaults: ConnectorDefaults,
}

impl Orchestrator {
    pub fn new(providers: Providers, defaults: ConnectorDefaults) -> Self {
        Self {
            providers,
            defaults,
        }
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    pub fn defaults(&self) -> &ConnectorDefaults {
        &self.defaults
    }

    /// Look a workspace up by exact slug.
    pub async fn find_workspace(&self, slug: &str) -> Result<Workspace> {
        self.providers
            .workspaces
            .get(slug)
            .await?
            .ok_or_else(|| Error::WorkspaceNotFound(slug.to_string()))
    }

    /// Look a workspace up by slug, then by name.
    pub async fn resolve_workspace(&self, slug_or_name: &str) -> Result<Workspace> {
        self.providers
            .workspaces
            .resolve(slug_or_name)
            .await?
            .ok_or_else(|| Error::WorkspaceNotFound(slug_or_name.to_string()))
    }

    pub async fn namespace_stats(&self, workspace: &Workspace) -> Result<NamespaceStats> {
        let ns = workspace.namespace();
        let has_namespace = self.providers.search.has_namespace(ns).await?;
        let vector_count = if has_namespace {
            self.providers.search.namespace_count(ns).await?
        } else {
            0
        };
        Ok(NamespaceStats {
            has_namespace,
            vector_count,
        })
    }

    /// Connector for `workspace`: its own provider/model, else the defaults.
    pub fn connector_for(&self, workspace: &Workspace) -> Result<Arc<dyn LlmConnector>> {
        let spec = ConnectorSpec {
            provider: workspace
                .chat_provider
                .clone()
                .unwrap_or_else(|| self.defaults.llm_provider.clone()),
            model: workspace
                .chat_model
                .clone()
                .or_else(|| self.defaults.chat_model.clone()),
        };
        Ok(self.providers.connectors.connect(&spec)?)
    }

    /// Resolve `slug` and run a query against it.
    pub async fn query(
        &self,
        slug: &str,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<QueryReport> {
        validate(query, options)?;
        let workspace = self.find_workspace(slug).await?;
        self.query_workspace(workspace, query, options).await
    }

    /// Run a query against an already-resolved workspace.
    pub async fn query_workspace(
        &self,
        workspace: Workspace,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<QueryReport> {
        validate(query, options)?;
        let stats = self.namespace_stats(&workspace).await?;
        if !stats.has_embeddings() {
            debug!(workspace = %workspace.slug, "namespace is empty");
            return Ok(QueryReport {
                workspace,
                total_embeddings: stats.vector_count,
                outcome: QueryOutcome::EmptyNamespace,
            });
        }

        let retrieval = self.retrieve(&workspace, query, options).await?;
        Ok(QueryReport {
            workspace,
            total_embeddings: stats.vector_count,
            outcome: QueryOutcome::Retrieved(retrieval),
        })
    }

    /// Retrieve and merge context for `query` in `workspace`.
    pub async fn retrieve(
        &self,
        workspace: &Workspace,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<Retrieval> {
        validate(query, options)?;
        let connector = self.connector_for(workspace)?;

        let mut pinned_passages = Vec::new();
        let mut pinned_texts = Vec::new();
        let mut exclusions: HashSet<Identifier> = HashSet::new();

        if options.include_pinned {
            let docs = self
                .providers
                .pinned
                .pinned_docs(workspace, connector.prompt_window_limit())
                .await?;
            debug!(workspace = %workspace.slug, count = docs.len(), "loaded pinned documents");
            for doc in docs {
                let passage = pinned_passage(&doc);
                exclusions.insert(passage.identifier.clone());
                pinned_passages.push(passage);
                pinned_texts.push(doc.page_content);
            }
        }

        let rerank =
            options.rerank || workspace.vector_search_mode == VectorSearchMode::Rerank;

        let request = SearchRequest {
            namespace: workspace.namespace(),
            input: query,
            connector: connector.as_ref(),
            similarity_threshold: options.threshold,
            top_n: options.top_n,
            filter_identifiers: &exclusions,
            rerank,
        };

        let (sources, context_texts) =
            match self.providers.search.similarity_search(&request).await? {
                SearchResult::Failed { message } => return Err(Error::Retrieval(message)),
                SearchResult::Found {
                    sources,
                    context_texts,
                } => (sources, context_texts),
            };

        let context = merge(
            pinned_passages,
            pinned_texts,
            sources,
            context_texts,
            &exclusions,
            options.top_n,
        );

        Ok(Retrieval {
            context,
            connector,
            rerank,
        })
    }
}

fn validate(query: &str, options: &RetrievalOptions) -> Result<()> {
    if query.trim().is_empty() {
        return Err(Error::InvalidArguments("query must not be empty".to_string()));
    }
    if options.top_n == 0 {
        return Err(Error::InvalidArguments(
            "topN must be a positive integer".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&options.threshold) {
        return Err(Error::InvalidArguments(
            "threshold must be between 0 and 1".to_string(),
        ));
    }
    Ok(())
}

/// First [`PINNED_PREVIEW_CHARS`] characters of `content`, with the
/// continuation marker when anything was cut.
pub fn preview_text(content: &str) -> String {
    match content.char_indices().nth(PINNED_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}{}", &content[..cut], CONTINUATION_MARKER),
        None => content.to_string(),
    }
}

fn pinned_passage(doc: &PinnedDocument) -> SourcePassage {
    let mut metadata = doc.metadata.clone();
    metadata.insert("isPinned".to_string(), Value::Bool(true));
    SourcePassage {
        text: preview_text(&doc.page_content),
        title: doc.source.title.clone(),
        url: doc.source.url.clone(),
        score: None,
        origin: SourceOrigin::Pinned,
        identifier: doc.source.identifier(),
        metadata,
    }
}

fn merge(
    pinned: Vec<SourcePassage>,
    pinned_texts: Vec<String>,
    sources: Vec<SourcePassage>,
    context_texts: Vec<String>,
    exclusions: &HashSet<Identifier>,
    top_n: usize,
) -> MergedContext {
    let pinned_count = pinned.len();
    let mut passages = pinned;
    let mut texts = pinned_texts;

    let mut vector_count = 0;
    for (i, mut passage) in sources.into_iter().enumerate() {
        if exclusions.contains(&passage.identifier) {
            warn!(identifier = %passage.identifier, "search returned a pinned document; dropping it");
            continue;
        }
        if vector_count == top_n {
            warn!(top_n, "search returned more results than requested; truncating");
            break;
        }
        passage.origin = SourceOrigin::Vector;
        let text = context_texts
            .get(i)
            .cloned()
            .unwrap_or_else(|| passage.text.clone());
        passages.push(passage);
        texts.push(text);
        vector_count += 1;
    }

    MergedContext {
        passages,
        context_texts: texts,
        pinned_count,
        vector_count,
    }
}
