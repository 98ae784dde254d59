//! # RAG Bridge
//!
//! Query a document-retrieval workspace from the command line or over MCP.
//!
//! Workspaces, pinned documents, and embedded chunks live in SQLite. A
//! query resolves a workspace, gathers its pinned documents, runs a
//! similarity search over the workspace's vector namespace, and merges the
//! two into one deduplicated context. The same pipeline backs the CLI and
//! the MCP tools.
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │   CLI    │──▶│              │──▶│ SQLite store │
//! └──────────┘   │ Orchestrator │   └──────────────┘
//! ┌──────────┐   │  (core)      │   ┌──────────────┐
//! │   MCP    │──▶│              │──▶│  Connectors  │
//! └──────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`embedding`] | Query embedding providers |
//! | [`sqlite_store`] | SQLite-backed workspace, search, and pinned providers |
//! | [`connector`] | LLM connectors: prompt windows and token counting |
//! | [`backend`] | Wiring into an [`Orchestrator`](ragbridge_core::Orchestrator) |
//! | [`query`] | CLI commands |
//! | [`mcp`] | MCP server over stdio |

pub mod backend;
pub mod config;
pub mod connector;
pub mod db;
pub mod embedding;
pub mod mcp;
pub mod migrate;
pub mod query;
pub mod sqlite_store;
