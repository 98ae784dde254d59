//! # ragbridge-core
//!
//! Retrieval orchestration, token budgeting, and tool dispatch for
//! ragbridge. This crate does no I/O of its own: storage, vector search,
//! and model access come in through the traits in [`provider`].
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Workspace, passage, and result types |
//! | [`provider`] | Collaborator traits + an in-memory implementation |
//! | [`orchestrator`] | Pinned + similarity retrieval, dedup, merge |
//! | [`ranking`] | Threshold, cap, and rerank selection for providers |
//! | [`budget`] | Token usage against a prompt window |
//! | [`report`] | JSON payloads for tools and the CLI |
//! | [`tools`] | Tool registry, schema validation, dispatch |
//! | [`embedding`] | Vector math and the hashing embedder |
//! | [`error`] | Error taxonomy |

pub mod budget;
pub mod embedding;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod ranking;
pub mod report;
pub mod tools;

pub use error::{Error, Result};
pub use orchestrator::{ConnectorDefaults, Orchestrator, QueryOutcome, QueryReport};
pub use tools::ToolDispatch;
