//! Idempotent schema setup.
//!
//! | Table | Contents |
//! |-------|----------|
//! | `workspaces` | Workspace records and their retrieval defaults |
//! | `workspace_documents` | Documents attached to a workspace; `pinned = 1` marks pinned ones |
//! | `document_vectors` | One embedded chunk per row, partitioned by `namespace` (workspace slug) |

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index that does not exist yet.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workspaces (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            chat_provider TEXT,
            chat_model TEXT,
            top_n INTEGER,
            similarity_threshold REAL,
            vector_search_mode TEXT NOT NULL DEFAULT 'default',
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workspace_documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            workspace_slug TEXT NOT NULL,
            doc_path TEXT,
            title TEXT,
            published TEXT,
            url TEXT,
            page_content TEXT NOT NULL,
            token_count INTEGER NOT NULL DEFAULT 0,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            pinned INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (workspace_slug) REFERENCES workspaces(slug)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_vectors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            namespace TEXT NOT NULL,
            title TEXT,
            published TEXT,
            url TEXT,
            doc_path TEXT,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_workspace_documents_pinned \
         ON workspace_documents(workspace_slug, pinned)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_vectors_namespace ON document_vectors(namespace)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
