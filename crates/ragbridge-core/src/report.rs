//! Serializable payloads shared by the tool layer and the CLI's JSON mode.
//!
//! All payloads use camelCase keys.

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::models::{MergedContext, SourceOrigin, SourcePassage, VectorSearchMode, Workspace};
use crate::orchestrator::{NamespaceStats, Orchestrator};

/// Title used when a passage carries none.
pub const UNTITLED: &str = "Untitled";

/// Message reported for a workspace whose namespace has no vectors.
pub const EMPTY_NAMESPACE_MESSAGE: &str = "This workspace has no embedded documents";

/// Echo of the settings a search ran with, as the caller requested them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSettings {
    pub top_n: usize,
    pub threshold: f64,
    pub rerank: bool,
    pub include_pinned: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchStats {
    pub total_embeddings: usize,
    pub results_found: usize,
    pub pinned_docs: usize,
    pub vector_results: usize,
}

/// One entry of `search_embeddings` results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEntry {
    /// 1-based position in the merged context.
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: SourceOrigin,
    /// Always present; `null` for pinned passages.
    pub score: Option<f64>,
    pub title: String,
    pub url: Option<String>,
    pub text: String,
    pub metadata: Map<String, Value>,
}

impl ResultEntry {
    pub fn from_passage(index: usize, passage: &SourcePassage) -> Self {
        Self {
            index,
            kind: passage.origin,
            score: passage.score,
            title: passage
                .title
                .clone()
                .unwrap_or_else(|| UNTITLED.to_string()),
            url: passage.url.clone(),
            text: passage.text.clone(),
            metadata: passage.metadata.clone(),
        }
    }
}

/// Success payload of `search_embeddings`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPayload {
    pub query: String,
    /// Workspace display name.
    pub workspace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub settings: SearchSettings,
    pub stats: SearchStats,
    pub results: Vec<ResultEntry>,
}

impl SearchPayload {
    pub fn empty_namespace(
        query: &str,
        workspace: &Workspace,
        settings: SearchSettings,
        total_embeddings: usize,
    ) -> Self {
        Self {
            query: query.to_string(),
            workspace: workspace.name.clone(),
            message: Some(EMPTY_NAMESPACE_MESSAGE.to_string()),
            settings,
            stats: SearchStats {
                total_embeddings,
                ..Default::default()
            },
            results: Vec::new(),
        }
    }

    pub fn from_context(
        query: &str,
        workspace: &Workspace,
        settings: SearchSettings,
        total_embeddings: usize,
        context: &MergedContext,
    ) -> Self {
        let results = context
            .passages
            .iter()
            .enumerate()
            .map(|(i, p)| ResultEntry::from_passage(i + 1, p))
            .collect::<Vec<_>>();
        Self {
            query: query.to_string(),
            workspace: workspace.name.clone(),
            message: None,
            settings,
            stats: SearchStats {
                total_embeddings,
                results_found: results.len(),
                pinned_docs: context.pinned_count,
                vector_results: context.vector_count,
            },
            results,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSummary {
    pub name: String,
    pub slug: String,
    pub vector_count: usize,
    pub has_embeddings: bool,
}

/// Payload of `list_workspaces`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceList {
    pub total_workspaces: usize,
    pub workspaces: Vec<WorkspaceSummary>,
}

impl WorkspaceList {
    /// List every workspace with its vector count.
    ///
    /// Namespace lookups run concurrently; the first failure aborts the
    /// listing.
    pub async fn collect(orchestrator: &Orchestrator) -> Result<Self> {
        let workspaces = orchestrator.providers().workspaces.list().await?;
        let summaries = try_join_all(workspaces.iter().map(|ws| async move {
            let stats = orchestrator.namespace_stats(ws).await?;
            Ok::<_, crate::Error>(WorkspaceSummary {
                name: ws.name.clone(),
                slug: ws.slug.clone(),
                vector_count: stats.vector_count,
                has_embeddings: stats.has_embeddings(),
            })
        }))
        .await?;

        Ok(Self {
            total_workspaces: workspaces.len(),
            workspaces: summaries,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSettings {
    pub chat_provider: Option<String>,
    pub chat_model: Option<String>,
    pub top_n: Option<usize>,
    pub similarity_threshold: Option<f64>,
    pub vector_search_mode: VectorSearchMode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStats {
    pub has_embeddings: bool,
    pub vector_count: usize,
}

/// Payload of `workspace_info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkspaceInfo {
    pub name: String,
    pub slug: String,
    pub settings: WorkspaceSettings,
    pub stats: WorkspaceStats,
}

impl WorkspaceInfo {
    pub fn new(workspace: &Workspace, stats: NamespaceStats) -> Self {
        Self {
            name: workspace.name.clone(),
            slug: workspace.slug.clone(),
            settings: WorkspaceSettings {
                chat_provider: workspace.chat_provider.clone(),
                chat_model: workspace.chat_model.clone(),
                top_n: workspace.top_n,
                similarity_threshold: workspace.similarity_threshold,
                vector_search_mode: workspace.vector_search_mode,
            },
            stats: WorkspaceStats {
                has_embeddings: stats.has_embeddings(),
                vector_count: stats.vector_count,
            },
        }
    }

    /// Look up `slug` and describe it.
    pub async fn collect(orchestrator: &Orchestrator, slug: &str) -> Result<Self> {
        let workspace = orchestrator.find_workspace(slug).await?;
        let stats = orchestrator.namespace_stats(&workspace).await?;
        Ok(Self::new(&workspace, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Identifier;

    fn settings() -> SearchSettings {
        SearchSettings {
            top_n: 4,
            threshold: 0.25,
            rerank: false,
            include_pinned: true,
        }
    }

    #[test]
    fn test_result_entry_defaults() {
        let passage = SourcePassage::vector(Identifier::new("x"), "body", Some(0.0), Map::new());
        let entry = ResultEntry::from_passage(1, &passage);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["title"], UNTITLED);
        assert_eq!(json["type"], "vector");
        assert_eq!(json["score"], 0.0);
        assert!(json["url"].is_null());
    }

    #[test]
    fn test_empty_namespace_payload() {
        let ws = Workspace::new("Docs", "docs");
        let payload = SearchPayload::empty_namespace("hi", &ws, settings(), 0);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["workspace"], "Docs");
        assert_eq!(json["message"], EMPTY_NAMESPACE_MESSAGE);
        assert_eq!(json["stats"]["resultsFound"], 0);
        assert_eq!(json["settings"]["includePinned"], true);
        assert!(json["results"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_message_omitted_when_results_present() {
        let ws = Workspace::new("Docs", "docs");
        let payload =
            SearchPayload::from_context("hi", &ws, settings(), 3, &MergedContext::default());
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("message").is_none());
        assert_eq!(json["stats"]["totalEmbeddings"], 3);
    }

    #[test]
    fn test_workspace_info_settings_keys() {
        let mut ws = Workspace::new("Docs", "docs");
        ws.top_n = Some(6);
        let info = WorkspaceInfo::new(
            &ws,
            NamespaceStats {
                has_namespace: true,
                vector_count: 0,
            },
        );
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["settings"]["topN"], 6);
        assert!(json["settings"]["chatProvider"].is_null());
        assert_eq!(json["settings"]["vectorSearchMode"], "default");
        assert_eq!(json["stats"]["hasEmbeddings"], false);
    }
}
