//! Error taxonomy for retrieval and tool dispatch.

use thiserror::Error;

/// Everything that can go wrong while answering a query or a tool call.
///
/// Each surface converts these into its own representation at its outer
/// boundary: the CLI prints and exits 1, the tool layer wraps the message
/// in an error envelope.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested slug does not resolve to a workspace.
    #[error("Workspace \"{0}\" not found")]
    WorkspaceNotFound(String),

    /// The workspace exists but has nothing indexed.
    #[error("This workspace has no embedded documents")]
    EmptyNamespace(String),

    /// The search provider reported a failure message.
    #[error("{0}")]
    Retrieval(String),

    /// Token counting failed. Advisory only.
    #[error("token budget analysis failed: {0}")]
    BudgetAnalysis(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Malformed arguments, rejected before any provider is touched.
    #[error("{0}")]
    InvalidArguments(String),

    /// Storage, transport, or connector failure from a provider adapter.
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            Error::WorkspaceNotFound("ghost".into()).to_string(),
            "Workspace \"ghost\" not found"
        );
        assert_eq!(
            Error::UnknownTool("nope".into()).to_string(),
            "Unknown tool: nope"
        );
        assert_eq!(
            Error::Retrieval("backend unavailable".into()).to_string(),
            "backend unavailable"
        );
    }

    #[test]
    fn test_provider_error_is_transparent() {
        let err: Error = anyhow::anyhow!("disk on fire").into();
        assert_eq!(err.to_string(), "disk on fire");
    }
}
