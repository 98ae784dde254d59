//! Wires config, database, embedder, and connectors into an [`Orchestrator`].

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::info;

use ragbridge_core::provider::Providers;
use ragbridge_core::Orchestrator;

use crate::config::Config;
use crate::connector::ConfiguredConnectorFactory;
use crate::db;
use crate::embedding::create_provider;
use crate::sqlite_store::SqliteBackend;

/// Build the orchestrator every command and the MCP server share.
///
/// Fails early when the database has not been initialized.
pub async fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let pool = db::connect(config).await?;

    let initialized: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'workspaces'",
    )
    .fetch_one(&pool)
    .await?;
    if !initialized {
        bail!(
            "Database {} is not initialized. Run `ragbridge init` first.",
            config.db.path.display()
        );
    }

    let embedder = create_provider(&config.embedding)?;
    info!(
        provider = %config.embedding.provider,
        model = embedder.model_name(),
        "embedding provider ready"
    );

    let backend = Arc::new(SqliteBackend::new(pool, embedder));
    let connectors = Arc::new(ConfiguredConnectorFactory::from_config(config));

    Ok(Orchestrator::new(
        Providers::from_backend(backend, connectors),
        config.connector_defaults(),
    ))
}
