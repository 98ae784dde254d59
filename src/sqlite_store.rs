//! SQLite-backed workspace, pinned-document, and vector providers.
//!
//! Reads the schema created by [`crate::migrate`]. Retrieval never writes.
//! Similarity search is brute-force cosine over the namespace's vectors;
//! threshold, exclusion, and rerank are applied by
//! [`ragbridge_core::ranking::select`].

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use ragbridge_core::embedding::{blob_to_vec, cosine_similarity};
use ragbridge_core::models::{
    DocumentSource, PinnedDocument, SearchResult, SourcePassage, VectorSearchMode, Workspace,
};
use ragbridge_core::provider::{
    PinnedDocumentProvider, SearchProvider, SearchRequest, WorkspaceLookup,
};
use ragbridge_core::ranking::{select, Candidate};

use crate::embedding::EmbeddingProvider;

const WORKSPACE_COLUMNS: &str = "name, slug, chat_provider, chat_model, top_n, \
                                 similarity_threshold, vector_search_mode";

pub struct SqliteBackend {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SqliteBackend {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { pool, embedder }
    }
}

fn workspace_from_row(row: &SqliteRow) -> Workspace {
    let mode: String = row.get("vector_search_mode");
    Workspace {
        name: row.get("name"),
        slug: row.get("slug"),
        chat_provider: row.get("chat_provider"),
        chat_model: row.get("chat_model"),
        top_n: row
            .get::<Option<i64>, _>("top_n")
            .filter(|n| *n > 0)
            .map(|n| n as usize),
        similarity_threshold: row.get("similarity_threshold"),
        vector_search_mode: VectorSearchMode::parse(&mode),
    }
}

fn source_from_row(row: &SqliteRow) -> DocumentSource {
    DocumentSource {
        title: row.get("title"),
        published: row.get("published"),
        url: row.get("url"),
        doc_path: row.get("doc_path"),
    }
}

/// Stored metadata merged with the source columns.
fn metadata_from_row(row: &SqliteRow, source: &DocumentSource) -> Map<String, Value> {
    let raw: String = row.get("metadata_json");
    let mut metadata = match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => map,
        _ => {
            warn!("ignoring malformed metadata_json");
            Map::new()
        }
    };
    let fields = [
        ("title", &source.title),
        ("published", &source.published),
        ("url", &source.url),
        ("docpath", &source.doc_path),
    ];
    for (key, value) in fields {
        if let Some(v) = value {
            metadata.insert(key.to_string(), Value::from(v.as_str()));
        }
    }
    metadata
}

#[async_trait]
impl WorkspaceLookup for SqliteBackend {
    async fn get(&self, slug: &str) -> Result<Option<Workspace>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM workspaces WHERE slug = ?",
            WORKSPACE_COLUMNS
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up workspace")?;

        Ok(row.as_ref().map(workspace_from_row))
    }

    async fn list(&self) -> Result<Vec<Workspace>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM workspaces ORDER BY id",
            WORKSPACE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list workspaces")?;

        Ok(rows.iter().map(workspace_from_row).collect())
    }
}

#[async_trait]
impl SearchProvider for SqliteBackend {
    async fn has_namespace(&self, namespace: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM document_vectors WHERE namespace = ?)",
        )
        .bind(namespace)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn namespace_count(&self, namespace: &str) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_vectors WHERE namespace = ?")
                .bind(namespace)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }

    async fn similarity_search(&self, request: &SearchRequest<'_>) -> Result<SearchResult> {
        let query_vec = self.embedder.embed_query(request.input).await?;

        let rows = sqlx::query(
            r#"
            SELECT title, published, url, doc_path, text, metadata_json, embedding
            FROM document_vectors
            WHERE namespace = ?
            "#,
        )
        .bind(request.namespace)
        .fetch_all(&self.pool)
        .await?;

        let mut skipped = 0usize;
        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob);
            if vector.len() != query_vec.len() {
                skipped += 1;
                continue;
            }

            let source = source_from_row(row);
            let text: String = row.get("text");
            let similarity = cosine_similarity(&query_vec, &vector) as f64;
            let mut metadata = metadata_from_row(row, &source);
            metadata.insert("score".to_string(), Value::from(similarity));

            candidates.push(Candidate {
                passage: SourcePassage::vector(
                    source.identifier(),
                    text.clone(),
                    Some(similarity),
                    metadata,
                ),
                context_text: text,
            });
        }

        if skipped > 0 {
            warn!(
                namespace = request.namespace,
                skipped,
                dims = query_vec.len(),
                "skipped vectors with mismatched dimensions"
            );
        }
        debug!(
            namespace = request.namespace,
            candidates = candidates.len(),
            rerank = request.rerank,
            "scored namespace"
        );

        Ok(select(candidates, request, rows.len()))
    }
}

#[async_trait]
impl PinnedDocumentProvider for SqliteBackend {
    async fn pinned_docs(
        &self,
        workspace: &Workspace,
        max_tokens: usize,
    ) -> Result<Vec<PinnedDocument>> {
        let rows = sqlx::query(
            r#"
            SELECT title, published, url, doc_path, page_content, token_count, metadata_json
            FROM workspace_documents
            WHERE workspace_slug = ? AND pinned = 1
            ORDER BY id
            "#,
        )
        .bind(&workspace.slug)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load pinned documents")?;

        let mut used = 0usize;
        let mut docs = Vec::new();
        for row in &rows {
            let tokens = row.get::<i64, _>("token_count").max(0) as usize;
            let source = source_from_row(row);
            if used + tokens > max_tokens {
                debug!(
                    title = source.title.as_deref().unwrap_or_default(),
                    tokens, "pinned document does not fit the window"
                );
                continue;
            }
            used += tokens;

            let mut metadata = metadata_from_row(row, &source);
            metadata.insert("token_count_estimate".to_string(), Value::from(tokens));
            docs.push(PinnedDocument {
                page_content: row.get("page_content"),
                source,
                metadata,
            });
        }
        Ok(docs)
    }
}
