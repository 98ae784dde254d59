//! # RAG Bridge CLI (`ragbridge`)
//!
//! Query a retrieval workspace from the terminal, or serve the same
//! retrieval to MCP clients over stdio.
//!
//! ## Usage
//!
//! ```bash
//! ragbridge --config ./config/ragbridge.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragbridge init` | Create the SQLite database and run schema migrations |
//! | `ragbridge workspaces` | List workspaces and their vector counts |
//! | `ragbridge info <slug>` | Show a workspace's settings and stats |
//! | `ragbridge query -w <ws> -q "<query>"` | Similarity search in a workspace |
//! | `ragbridge rag -w <ws> -q "<query>"` | Full RAG context assembly with token analysis |
//! | `ragbridge tools` | Print the MCP tool list |
//! | `ragbridge serve mcp` | Serve MCP over stdio |
//!
//! ## Examples
//!
//! ```bash
//! ragbridge query -w docs -q "how do I install" --scores
//! ragbridge rag -w docs -q "deployment" --include-pinned --show-context --token-count
//! ragbridge rag -w docs -q "deployment" --json --include-pinned
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ragbridge::config;
use ragbridge::mcp;
use ragbridge::migrate;
use ragbridge::query::{self, QueryArgs, RagArgs};
use ragbridge_core::Error as CoreError;

/// RAG Bridge: query retrieval workspaces from the CLI or over MCP.
///
/// All commands except `tools` read a TOML configuration file given by
/// `--config`. See `config/ragbridge.example.toml`.
#[derive(Parser)]
#[command(
    name = "ragbridge",
    about = "Query a document-retrieval workspace from the command line or over MCP",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragbridge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// List workspaces with their vector counts.
    Workspaces {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show a workspace's settings and embedding stats.
    Info {
        /// Workspace slug.
        slug: String,

        /// Print JSON.
        #[arg(long)]
        json: bool,
    },

    /// Similarity search in a workspace.
    Query {
        /// Workspace slug or name.
        #[arg(short, long)]
        workspace: String,

        /// Search query.
        #[arg(short, long)]
        query: String,

        /// Number of results (defaults to `[defaults].top_n`).
        #[arg(short = 'n', long = "top-n")]
        top_n: Option<usize>,

        /// Minimum similarity in [0, 1] (defaults to `[defaults].similarity_threshold`).
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Print JSON.
        #[arg(long)]
        json: bool,

        /// Rerank the candidates.
        #[arg(long)]
        rerank: bool,

        /// Only show titles and sources, no text.
        #[arg(long)]
        citations_only: bool,

        /// Show similarity scores.
        #[arg(long)]
        scores: bool,
    },

    /// Assemble RAG context: pinned documents plus vector results.
    Rag {
        /// Workspace slug or name.
        #[arg(short, long)]
        workspace: String,

        /// Search query.
        #[arg(short, long)]
        query: String,

        /// Number of vector results (defaults to `[defaults].top_n`).
        #[arg(short = 'n', long = "top-n")]
        top_n: Option<usize>,

        /// Minimum similarity in [0, 1] (defaults to `[defaults].similarity_threshold`).
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Print JSON.
        #[arg(long)]
        json: bool,

        /// Rerank the candidates.
        #[arg(long)]
        rerank: bool,

        /// Put the workspace's pinned documents ahead of the vector results.
        #[arg(long)]
        include_pinned: bool,

        /// Print the full context as it would be sent to the LLM.
        #[arg(long)]
        show_context: bool,

        /// Count context tokens against the model window.
        #[arg(long)]
        token_count: bool,

        /// Only show titles and sources, no text.
        #[arg(long)]
        citations_only: bool,
    },

    /// Print the tools the MCP server advertises (JSON).
    Tools,

    /// Start a server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// Serve MCP tools over stdin/stdout.
    Mcp,
}

/// Logs go to stderr so stdout stays clean for JSON and the MCP transport.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<CoreError>() {
                Some(CoreError::EmptyNamespace(_)) => eprintln!("Warning: {}", e),
                _ => eprintln!("Error: {}", e),
            }
            if std::env::var_os("RAGBRIDGE_DEBUG").is_some()
                || std::env::var_os("RUST_BACKTRACE").is_some()
            {
                eprintln!("{:?}", e);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Commands that don't require config
    if let Commands::Tools = cli.command {
        return query::run_tools();
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Workspaces { json } => {
            query::run_workspaces(&cfg, json).await?;
        }
        Commands::Info { slug, json } => {
            query::run_info(&cfg, &slug, json).await?;
        }
        Commands::Query {
            workspace,
            query,
            top_n,
            threshold,
            json,
            rerank,
            citations_only,
            scores,
        } => {
            let args = QueryArgs {
                workspace,
                query,
                top_n,
                threshold,
                json,
                rerank,
                citations_only,
                scores,
            };
            query::run_query(&cfg, &args).await?;
        }
        Commands::Rag {
            workspace,
            query,
            top_n,
            threshold,
            json,
            rerank,
            include_pinned,
            show_context,
            token_count,
            citations_only,
        } => {
            let args = RagArgs {
                workspace,
                query,
                top_n,
                threshold,
                json,
                rerank,
                include_pinned,
                show_context,
                token_count,
                citations_only,
            };
            query::run_rag(&cfg, &args).await?;
        }
        Commands::Serve { service } => match service {
            ServeService::Mcp => {
                mcp::run_stdio(&cfg).await?;
            }
        },
        Commands::Tools => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
