//! CLI query commands: `query`, `rag`, `workspaces`, `info`, `tools`.
//!
//! Every command goes through the same [`Orchestrator`] as the MCP tools.
//! Human output goes to stdout; warnings go to stderr so `--json` output
//! stays parseable.

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};

use ragbridge_core::budget::{self, TokenBudget};
use ragbridge_core::models::{MergedContext, RetrievalOptions, SourceOrigin, Workspace};
use ragbridge_core::orchestrator::{QueryOutcome, Retrieval};
use ragbridge_core::report::{SearchSettings, WorkspaceInfo, WorkspaceList, UNTITLED};
use ragbridge_core::tools::ToolRegistry;
use ragbridge_core::{Error, Orchestrator};

use crate::backend::build_orchestrator;
use crate::config::Config;

/// Passage preview length for `rag`.
pub const RAG_PREVIEW_CHARS: usize = 150;
/// Passage preview length for `query`.
pub const QUERY_PREVIEW_CHARS: usize = 200;
/// Separator between context texts in `rag --show-context --json`.
pub const COMBINED_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone)]
pub struct QueryArgs {
    pub workspace: String,
    pub query: String,
    pub top_n: Option<usize>,
    pub threshold: Option<f64>,
    pub json: bool,
    pub rerank: bool,
    pub citations_only: bool,
    pub scores: bool,
}

#[derive(Debug, Clone)]
pub struct RagArgs {
    pub workspace: String,
    pub query: String,
    pub top_n: Option<usize>,
    pub threshold: Option<f64>,
    pub json: bool,
    pub rerank: bool,
    pub include_pinned: bool,
    pub show_context: bool,
    pub token_count: bool,
    pub citations_only: bool,
}

fn retrieval_options(
    config: &Config,
    top_n: Option<usize>,
    threshold: Option<f64>,
    include_pinned: bool,
    rerank: bool,
) -> RetrievalOptions {
    RetrievalOptions {
        top_n: top_n.unwrap_or(config.defaults.top_n),
        threshold: threshold.unwrap_or(config.defaults.similarity_threshold),
        include_pinned,
        rerank,
    }
}

/// Resolve the workspace (slug, then name) and run the retrieval.
///
/// An empty namespace becomes [`Error::EmptyNamespace`]: on the CLI it is
/// a failure.
async fn retrieve(
    orchestrator: &Orchestrator,
    workspace: &str,
    query: &str,
    options: &RetrievalOptions,
) -> Result<(Workspace, usize, Retrieval)> {
    let workspace = orchestrator.resolve_workspace(workspace).await?;
    let slug = workspace.slug.clone();
    let report = orchestrator
        .query_workspace(workspace, query, options)
        .await?;
    match report.outcome {
        QueryOutcome::EmptyNamespace => Err(Error::EmptyNamespace(slug).into()),
        QueryOutcome::Retrieved(retrieval) => {
            Ok((report.workspace, report.total_embeddings, retrieval))
        }
    }
}

/// Shorten `text` to `max` characters, marking the cut with `...`.
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// `12345` → `"12,345"`.
pub fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn percent(score: f64) -> String {
    format!("{:.1}%", score * 100.0)
}

// ═══════════════════════════════════════════════════════════════════════
// query
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct QueryOutput<'a> {
    query: &'a str,
    workspace: &'a str,
    results: Vec<QueryResult>,
}

#[derive(Debug, Serialize)]
struct QueryResult {
    index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
    title: Option<String>,
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    metadata: Map<String, Value>,
}

pub async fn run_query(config: &Config, args: &QueryArgs) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let options = retrieval_options(config, args.top_n, args.threshold, false, args.rerank);
    let (workspace, total, retrieval) =
        retrieve(&orchestrator, &args.workspace, &args.query, &options).await?;

    if args.json {
        let output = query_json(args, &workspace, &retrieval.context);
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", render_query(args, &workspace, total, &retrieval.context));
    }
    Ok(())
}

fn query_json<'a>(
    args: &'a QueryArgs,
    workspace: &'a Workspace,
    context: &MergedContext,
) -> QueryOutput<'a> {
    QueryOutput {
        query: &args.query,
        workspace: &workspace.name,
        results: context
            .passages
            .iter()
            .enumerate()
            .map(|(i, p)| QueryResult {
                index: i + 1,
                score: if args.scores { p.score } else { None },
                title: p.title.clone(),
                url: p.url.clone(),
                text: (!args.citations_only).then(|| p.text.clone()),
                metadata: p.metadata.clone(),
            })
            .collect(),
    }
}

fn render_query(
    args: &QueryArgs,
    workspace: &Workspace,
    total: usize,
    context: &MergedContext,
) -> String {
    let mut lines = vec![
        format!("Searching in workspace: {}", workspace.name),
        format!("Total embeddings: {}", total),
        format!("Query: \"{}\"", args.query),
        String::new(),
    ];

    if context.is_empty() {
        lines.push("No relevant documents found for your query.".to_string());
        return lines.join("\n");
    }

    lines.push(format!(
        "Found {} relevant documents:",
        context.passages.len()
    ));
    lines.push(String::new());
    for (i, p) in context.passages.iter().enumerate() {
        lines.push(format!(
            "[{}] {}",
            i + 1,
            p.title.as_deref().unwrap_or("Untitled Document")
        ));
        if let Some(url) = &p.url {
            lines.push(format!("    Source: {}", url));
        }
        if args.scores {
            if let Some(score) = p.score {
                lines.push(format!("    Score: {}", percent(score)));
            }
        }
        if !args.citations_only {
            lines.push(format!(
                "    Content: {}",
                preview(&p.text, QUERY_PREVIEW_CHARS)
            ));
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

// ═══════════════════════════════════════════════════════════════════════
// rag
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RagOutput<'a> {
    query: &'a str,
    workspace: &'a str,
    settings: SearchSettings,
    results: RagResults,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<ContextDump>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_count: Option<TokenBudget>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RagResults {
    total_sources: usize,
    pinned_sources: usize,
    vector_sources: usize,
    sources: Vec<RagSource>,
}

#[derive(Debug, Serialize)]
struct RagSource {
    index: usize,
    #[serde(rename = "type")]
    kind: SourceOrigin,
    score: Option<f64>,
    title: String,
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct ContextDump {
    texts: Vec<String>,
    combined: String,
}

pub async fn run_rag(config: &Config, args: &RagArgs) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let options = retrieval_options(
        config,
        args.top_n,
        args.threshold,
        args.include_pinned,
        args.rerank,
    );
    let (workspace, total, retrieval) =
        retrieve(&orchestrator, &args.workspace, &args.query, &options).await?;

    let context = &retrieval.context;
    let wants_budget = args.token_count && (args.json || !context.context_texts.is_empty());
    let token_budget = if wants_budget {
        match budget::analyze(&context.context_texts, retrieval.connector.as_ref()) {
            Ok(b) => Some(b),
            Err(e) => {
                eprintln!("Warning: {}", e);
                None
            }
        }
    } else {
        None
    };

    if args.json {
        let settings = SearchSettings {
            top_n: options.top_n,
            threshold: options.threshold,
            rerank: args.rerank,
            include_pinned: args.include_pinned,
        };
        let output = rag_json(args, &workspace, settings, context, token_budget);
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "{}",
            render_rag(args, &workspace, total, context, token_budget.as_ref())
        );
    }
    Ok(())
}

fn rag_json<'a>(
    args: &'a RagArgs,
    workspace: &'a Workspace,
    settings: SearchSettings,
    context: &MergedContext,
    token_count: Option<TokenBudget>,
) -> RagOutput<'a> {
    let sources = context
        .passages
        .iter()
        .enumerate()
        .map(|(i, p)| RagSource {
            index: i + 1,
            kind: p.origin,
            score: p.score,
            title: p.title.clone().unwrap_or_else(|| UNTITLED.to_string()),
            url: p.url.clone(),
            text: (!args.citations_only).then(|| p.text.clone()),
        })
        .collect();

    RagOutput {
        query: &args.query,
        workspace: &workspace.name,
        settings,
        results: RagResults {
            total_sources: context.passages.len(),
            pinned_sources: context.pinned_count,
            vector_sources: context.vector_count,
            sources,
        },
        context: args.show_context.then(|| ContextDump {
            texts: context.context_texts.clone(),
            combined: context.context_texts.join(COMBINED_SEPARATOR),
        }),
        token_count,
    }
}

fn render_rag(
    args: &RagArgs,
    workspace: &Workspace,
    total: usize,
    context: &MergedContext,
    token_budget: Option<&TokenBudget>,
) -> String {
    let mut lines = vec![
        String::new(),
        "=== RAG Query Analysis ===".to_string(),
        format!("Workspace: {}", workspace.name),
        format!("Total embeddings: {}", total),
        format!("Query: \"{}\"", args.query),
    ];

    if context.pinned_count > 0 {
        lines.push(String::new());
        lines.push(format!("Found {} pinned documents", context.pinned_count));
    }

    lines.push(String::new());
    lines.push("=== Search Results ===".to_string());

    if !context.pinned().is_empty() {
        lines.push(String::new());
        lines.push(format!("Pinned Documents ({}):", context.pinned_count));
        for (i, p) in context.pinned().iter().enumerate() {
            lines.push(format!(
                "[P{}] {}",
                i + 1,
                p.title.as_deref().unwrap_or(UNTITLED)
            ));
            if let Some(url) = &p.url {
                lines.push(format!("    {}", url));
            }
            if !args.citations_only {
                lines.push(format!("    {}", preview(&p.text, RAG_PREVIEW_CHARS)));
            }
        }
    }

    if !context.vector().is_empty() {
        lines.push(String::new());
        lines.push(format!("Vector Search Results ({}):", context.vector_count));
        for (i, p) in context.vector().iter().enumerate() {
            let score = p
                .score
                .map(|s| format!(" ({})", percent(s)))
                .unwrap_or_default();
            lines.push(format!(
                "[V{}] {}{}",
                i + 1,
                p.title.as_deref().unwrap_or(UNTITLED),
                score
            ));
            if let Some(url) = &p.url {
                lines.push(format!("    {}", url));
            }
            if !args.citations_only {
                lines.push(format!("    {}", preview(&p.text, RAG_PREVIEW_CHARS)));
            }
        }
    }

    if context.is_empty() {
        lines.push(String::new());
        lines.push("No relevant documents found.".to_string());
    }

    if args.show_context && !context.context_texts.is_empty() {
        lines.push(String::new());
        lines.push("=== Full Context (as would be sent to LLM) ===".to_string());
        lines.push("--- START CONTEXT ---".to_string());
        for (i, text) in context.context_texts.iter().enumerate() {
            lines.push(String::new());
            lines.push(format!("[Document {}]", i + 1));
            lines.push(text.clone());
            lines.push(String::new());
            lines.push("---".to_string());
        }
        lines.push("--- END CONTEXT ---".to_string());
    }

    if let Some(b) = token_budget {
        lines.push(String::new());
        lines.push("=== Token Analysis ===".to_string());
        lines.push(format!("Total context tokens: {}", group_thousands(b.total)));
        lines.push(format!(
            "Model window limit: {}",
            group_thousands(b.window_limit)
        ));
        lines.push(format!("Usage: {} of context window", b.percent_display()));
        if b.over_budget_warning {
            lines.push(
                "Warning: Context is using >80% of the model's token window".to_string(),
            );
        }
    }

    lines.join("\n")
}

// ═══════════════════════════════════════════════════════════════════════
// workspaces / info / tools
// ═══════════════════════════════════════════════════════════════════════

pub async fn run_workspaces(config: &Config, json: bool) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let list = WorkspaceList::collect(&orchestrator).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    if list.workspaces.is_empty() {
        println!("No workspaces.");
        return Ok(());
    }

    println!("{:<24} {:<32} {:>8}", "SLUG", "NAME", "VECTORS");
    for ws in &list.workspaces {
        println!("{:<24} {:<32} {:>8}", ws.slug, ws.name, ws.vector_count);
    }
    Ok(())
}

pub async fn run_info(config: &Config, slug: &str, json: bool) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let info = WorkspaceInfo::collect(&orchestrator, slug).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("{}", render_info(&info, &orchestrator));
    }
    Ok(())
}

fn render_info(info: &WorkspaceInfo, orchestrator: &Orchestrator) -> String {
    let defaults = orchestrator.defaults();
    let s = &info.settings;
    let inherited = "(default)";
    [
        format!("Name:                 {}", info.name),
        format!("Slug:                 {}", info.slug),
        format!(
            "Chat provider:        {}",
            s.chat_provider
                .clone()
                .unwrap_or_else(|| format!("{} {}", defaults.llm_provider, inherited))
        ),
        format!(
            "Chat model:           {}",
            s.chat_model.clone().unwrap_or_else(|| inherited.to_string())
        ),
        format!(
            "Top N:                {}",
            s.top_n
                .map(|n| n.to_string())
                .unwrap_or_else(|| inherited.to_string())
        ),
        format!(
            "Similarity threshold: {}",
            s.similarity_threshold
                .map(|t| t.to_string())
                .unwrap_or_else(|| inherited.to_string())
        ),
        format!("Vector search mode:   {}", s.vector_search_mode),
        format!("Has embeddings:       {}", info.stats.has_embeddings),
        format!("Vector count:         {}", info.stats.vector_count),
    ]
    .join("\n")
}

/// Print the advertised tool list. Needs no config or database.
pub fn run_tools() -> Result<()> {
    let tools = ToolRegistry::with_builtins().descriptors();
    println!("{}", serde_json::to_string_pretty(&tools)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragbridge_core::models::{Identifier, SourcePassage};

    fn context() -> MergedContext {
        let mut meta = Map::new();
        meta.insert("title".into(), Value::from("Install Guide"));
        meta.insert("url".into(), Value::from("https://docs.example.com/install"));
        let pinned = SourcePassage {
            text: "Pinned handbook".into(),
            title: Some("Handbook".into()),
            url: None,
            score: None,
            origin: SourceOrigin::Pinned,
            identifier: Identifier::new("handbook"),
            metadata: Map::new(),
        };
        let vector = SourcePassage::vector(
            Identifier::new("install"),
            "x".repeat(300),
            Some(0.873),
            meta,
        );
        MergedContext {
            passages: vec![pinned, vector],
            context_texts: vec!["Pinned handbook full".into(), "x".repeat(300)],
            pinned_count: 1,
            vector_count: 1,
        }
    }

    fn rag_args() -> RagArgs {
        RagArgs {
            workspace: "docs".into(),
            query: "how to install".into(),
            top_n: None,
            threshold: None,
            json: false,
            rerank: false,
            include_pinned: true,
            show_context: true,
            token_count: true,
            citations_only: false,
        }
    }

    #[test]
    fn test_preview_and_grouping() {
        assert_eq!(preview("short", 150), "short");
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(1234567), "1,234,567");
    }

    #[test]
    fn test_render_rag_sections() {
        let budget = TokenBudget::from_counts(9_000, 10_000).unwrap();
        let out = render_rag(
            &rag_args(),
            &Workspace::new("Docs", "docs"),
            10,
            &context(),
            Some(&budget),
        );
        assert!(out.contains("Total embeddings: 10"));
        assert!(out.contains("[P1] Handbook"));
        assert!(out.contains("[V1] Install Guide (87.3%)"));
        assert!(out.contains(&format!("    {}...", "x".repeat(RAG_PREVIEW_CHARS))));
        assert!(out.contains("--- START CONTEXT ---"));
        assert!(out.contains("Total context tokens: 9,000"));
        assert!(out.contains("Usage: 90.0% of context window"));
        assert!(out.contains(">80%"));
    }

    #[test]
    fn test_render_rag_empty() {
        let out = render_rag(
            &rag_args(),
            &Workspace::new("Docs", "docs"),
            3,
            &MergedContext::default(),
            None,
        );
        assert!(out.contains("No relevant documents found."));
        assert!(!out.contains("START CONTEXT"));
    }

    #[test]
    fn test_rag_json_shape() {
        let mut args = rag_args();
        args.citations_only = true;
        let settings = SearchSettings {
            top_n: 4,
            threshold: 0.25,
            rerank: false,
            include_pinned: true,
        };
        let ws = Workspace::new("Docs", "docs");
        let budget = TokenBudget::from_counts(10, 100).unwrap();
        let output = rag_json(&args, &ws, settings, &context(), Some(budget));
        let json = serde_json::to_value(&output).unwrap();

        assert_eq!(json["results"]["totalSources"], 2);
        assert_eq!(json["results"]["pinnedSources"], 1);
        assert_eq!(json["results"]["sources"][0]["type"], "pinned");
        assert!(json["results"]["sources"][0]["score"].is_null());
        assert!(json["results"]["sources"][0].get("text").is_none());
        assert_eq!(
            json["context"]["combined"],
            format!("Pinned handbook full{}{}", COMBINED_SEPARATOR, "x".repeat(300))
        );
        assert_eq!(json["tokenCount"]["percentOfWindow"], "10.0%");
        assert_eq!(json["settings"]["includePinned"], true);
    }

    #[test]
    fn test_query_json_flags() {
        let args = QueryArgs {
            workspace: "docs".into(),
            query: "install".into(),
            top_n: None,
            threshold: None,
            json: true,
            rerank: false,
            citations_only: false,
            scores: false,
        };
        let ws = Workspace::new("Docs", "docs");
        let ctx = context();
        let json = serde_json::to_value(query_json(&args, &ws, &ctx)).unwrap();
        assert!(json["results"][1].get("score").is_none());
        assert!(json["results"][1]["text"].is_string());

        let args = QueryArgs {
            scores: true,
            citations_only: true,
            ..args
        };
        let json = serde_json::to_value(query_json(&args, &ws, &ctx)).unwrap();
        let score = json["results"][1]["score"].as_f64().unwrap();
        assert!((score - 0.873).abs() < 1e-9);
        assert!(json["results"][1].get("text").is_none());
    }

    #[test]
    fn test_render_query() {
        let args = QueryArgs {
            workspace: "docs".into(),
            query: "install".into(),
            top_n: None,
            threshold: None,
            json: false,
            rerank: false,
            citations_only: false,
            scores: true,
        };
        let out = render_query(&args, &Workspace::new("Docs", "docs"), 2, &context());
        assert!(out.contains("Found 2 relevant documents:"));
        assert!(out.contains("[2] Install Guide"));
        assert!(out.contains("    Source: https://docs.example.com/install"));
        assert!(out.contains("    Score: 87.3%"));
        assert!(out.contains(&format!("    Content: {}...", "x".repeat(QUERY_PREVIEW_CHARS))));
    }
}
