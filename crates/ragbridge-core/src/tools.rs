//! Tool dispatch for the protocol server.
//!
//! Three read-only tools are exposed over the orchestrator:
//!
//! | Tool | Description |
//! |------|-------------|
//! | `search_embeddings` | Pinned + similarity retrieval for a query |
//! | `list_workspaces` | Every workspace with its vector count |
//! | `workspace_info` | Settings and stats of one workspace |
//!
//! [`ToolDispatch::call`] never fails: every error, including an unknown
//! tool name or a schema violation, comes back as an error envelope
//! (`isError: true`, text `Error: <message>`).

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::RetrievalOptions;
use crate::orchestrator::{Orchestrator, QueryOutcome};
use crate::report::{SearchPayload, SearchSettings, WorkspaceInfo, WorkspaceList};

// ═══════════════════════════════════════════════════════════════════════
// Tool Trait
// ═══════════════════════════════════════════════════════════════════════

/// A callable tool advertised by the protocol server.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores, e.g. `"workspace_info"`.
    fn name(&self) -> &str;

    /// One-line description for client discovery.
    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) for the arguments.
    fn parameters_schema(&self) -> Value;

    /// Run the tool with arguments already validated against
    /// [`parameters_schema`](Tool::parameters_schema), defaults injected.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// What a tool can reach while executing.
#[derive(Clone)]
pub struct ToolContext {
    orchestrator: Orchestrator,
}

impl ToolContext {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in Tools
// ═══════════════════════════════════════════════════════════════════════

pub struct SearchEmbeddingsTool;

#[async_trait]
impl Tool for SearchEmbeddingsTool {
    fn name(&self) -> &str {
        "search_embeddings"
    }

    fn description(&self) -> &str {
        "Search for relevant documents in a workspace using semantic similarity"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query text"
                },
                "workspace": {
                    "type": "string",
                    "description": "The workspace slug to search in"
                },
                "topN": {
                    "type": "number",
                    "description": "Number of results to return (default: 4)",
                    "default": 4
                },
                "threshold": {
                    "type": "number",
                    "description": "Similarity threshold 0-1 (default: 0.25)",
                    "default": 0.25
                },
                "includePinned": {
                    "type": "boolean",
                    "description": "Include pinned documents in results",
                    "default": false
                },
                "rerank": {
                    "type": "boolean",
                    "description": "Use reranking for better results",
                    "default": false
                }
            },
            "required": ["query", "workspace"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = str_param(&params, "query")?;
        let slug = str_param(&params, "workspace")?;
        let options = RetrievalOptions {
            top_n: top_n_param(&params)?,
            threshold: params["threshold"].as_f64().unwrap_or_default(),
            include_pinned: params["includePinned"].as_bool().unwrap_or(false),
            rerank: params["rerank"].as_bool().unwrap_or(false),
        };
        let settings = SearchSettings {
            top_n: options.top_n,
            threshold: options.threshold,
            rerank: options.rerank,
            include_pinned: options.include_pinned,
        };

        let report = ctx.orchestrator().query(slug, query, &options).await?;
        let payload = match report.outcome {
            QueryOutcome::EmptyNamespace => SearchPayload::empty_namespace(
                query,
                &report.workspace,
                settings,
                report.total_embeddings,
            ),
            QueryOutcome::Retrieved(retrieval) => SearchPayload::from_context(
                query,
                &report.workspace,
                settings,
                report.total_embeddings,
                &retrieval.context,
            ),
        };
        to_value(&payload)
    }
}

pub struct ListWorkspacesTool;

#[async_trait]
impl Tool for ListWorkspacesTool {
    fn name(&self) -> &str {
        "list_workspaces"
    }

    fn description(&self) -> &str {
        "List all available workspaces"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        to_value(&WorkspaceList::collect(ctx.orchestrator()).await?)
    }
}

pub struct WorkspaceInfoTool;

#[async_trait]
impl Tool for WorkspaceInfoTool {
    fn name(&self) -> &str {
        "workspace_info"
    }

    fn description(&self) -> &str {
        "Get information about a specific workspace"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "workspace": {
                    "type": "string",
                    "description": "The workspace slug"
                }
            },
            "required": ["workspace"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let slug = str_param(&params, "workspace")?;
        to_value(&WorkspaceInfo::collect(ctx.orchestrator(), slug).await?)
    }
}

fn str_param<'a>(params: &'a Value, name: &str) -> Result<&'a str> {
    params[name]
        .as_str()
        .ok_or_else(|| Error::InvalidArguments(format!("missing required parameter: {}", name)))
}

/// `topN` arrives as a JSON number; only positive whole numbers are accepted.
fn top_n_param(params: &Value) -> Result<usize> {
    let value = &params["topN"];
    if let Some(n) = value.as_u64() {
        if n > 0 {
            return Ok(n as usize);
        }
    } else if let Some(f) = value.as_f64() {
        if f >= 1.0 && f.fract() == 0.0 {
            return Ok(f as usize);
        }
    }
    Err(Error::InvalidArguments(format!(
        "parameter 'topN' must be a positive integer, got {}",
        value
    )))
}

fn to_value<T: Serialize>(payload: &T) -> Result<Value> {
    serde_json::to_value(payload).map_err(|e| Error::Provider(e.into()))
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Ordered set of tools. Order is the advertised order.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with `search_embeddings`, `list_workspaces`, `workspace_info`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchEmbeddingsTool));
        registry.register(Box::new(ListWorkspacesTool));
        registry.register(Box::new(WorkspaceInfoTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    /// Name, description, and schema of every tool, in registration order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|t| ToolDescriptor {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parameter Validation
// ═══════════════════════════════════════════════════════════════════════

/// Check `params` against a tool schema and inject declared defaults.
///
/// Rejects missing required fields and values whose JSON type does not
/// match the declared `type`. Unknown fields pass through untouched.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let provided = match params {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(Error::InvalidArguments(format!(
                "arguments must be an object, got {}",
                json_type_name(other)
            )))
        }
    };

    let empty = Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !provided.contains_key(field) {
                return Err(Error::InvalidArguments(format!(
                    "missing required parameter: {}",
                    field
                )));
            }
        }
    }

    let mut result = provided.clone();
    for (name, prop) in properties {
        match provided.get(name) {
            Some(value) => {
                let Some(expected) = prop.get("type").and_then(Value::as_str) else {
                    continue;
                };
                let type_ok = match expected {
                    "string" => value.is_string(),
                    "integer" => value.is_i64() || value.is_u64(),
                    "number" => value.is_number(),
                    "boolean" => value.is_boolean(),
                    "array" => value.is_array(),
                    "object" => value.is_object(),
                    _ => true,
                };
                if !type_ok {
                    return Err(Error::InvalidArguments(format!(
                        "parameter '{}' must be of type '{}', got {}",
                        name,
                        expected,
                        json_type_name(value)
                    )));
                }
            }
            None => {
                if let Some(default) = prop.get("default") {
                    result.insert(name.clone(), default.clone());
                }
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Dispatch
// ═══════════════════════════════════════════════════════════════════════

/// A tool as advertised in a tools listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// Uniform tool-call response envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResponse {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolResponse {
    pub fn success(text: String) -> Self {
        Self {
            content: vec![ToolContent {
                kind: "text".to_string(),
                text,
            }],
            is_error: false,
        }
    }

    pub fn error(err: &Error) -> Self {
        Self {
            content: vec![ToolContent {
                kind: "text".to_string(),
                text: format!("Error: {}", err),
            }],
            is_error: true,
        }
    }

    /// Text of the first content block.
    pub fn text(&self) -> &str {
        self.content.first().map(|c| c.text.as_str()).unwrap_or("")
    }
}

/// Routes tool calls to the registered tools.
pub struct ToolDispatch {
    registry: ToolRegistry,
    ctx: ToolContext,
}

impl ToolDispatch {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            registry: ToolRegistry::with_builtins(),
            ctx: ToolContext::new(orchestrator),
        }
    }

    /// The static tool list. Does not depend on workspace state.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.registry.descriptors()
    }

    /// Run a tool and wrap the outcome in a response envelope.
    pub async fn call(&self, name: &str, arguments: Option<Value>) -> ToolResponse {
        match self.try_call(name, arguments).await {
            Ok(payload) => match serde_json::to_string_pretty(&payload) {
                Ok(text) => ToolResponse::success(text),
                Err(e) => ToolResponse::error(&Error::Provider(e.into())),
            },
            Err(e) => {
                warn!(tool = name, error = %e, "tool call failed");
                ToolResponse::error(&e)
            }
        }
    }

    /// Run a tool and return its raw payload.
    pub async fn try_call(&self, name: &str, arguments: Option<Value>) -> Result<Value> {
        let tool = self
            .registry
            .find(name)
            .ok_or_else(|| Error::UnknownTool(name.to_string()))?;
        let params = validate_params(
            &tool.parameters_schema(),
            &arguments.unwrap_or(Value::Null),
        )?;
        debug!(tool = name, "executing tool");
        tool.execute(params, &self.ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentSource, Workspace};
    use crate::orchestrator::ConnectorDefaults;
    use crate::provider::memory::{FixedConnectorFactory, InMemoryBackend};
    use crate::provider::Providers;
    use crate::report::WorkspaceList;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn source(title: &str) -> DocumentSource {
        DocumentSource {
            title: Some(title.to_string()),
            published: Some("2024-02-02".to_string()),
            url: None,
            doc_path: None,
        }
    }

    fn dispatch(backend: Arc<InMemoryBackend>) -> ToolDispatch {
        ToolDispatch::new(Orchestrator::new(
            Providers::from_backend(backend, Arc::new(FixedConnectorFactory::new(8192))),
            ConnectorDefaults {
                llm_provider: "openai".to_string(),
                chat_model: None,
            },
        ))
    }

    fn backend() -> Arc<InMemoryBackend> {
        let backend = Arc::new(InMemoryBackend::new());
        backend.add_workspace(Workspace::new("Docs", "docs")).unwrap();
        backend.add_workspace(Workspace::new("Empty", "empty")).unwrap();
        for i in 0..10 {
            backend
                .add_chunk(
                    "docs",
                    &source(&format!("chunk-{}", i)),
                    &format!("deploy the service step {}", i),
                )
                .unwrap();
        }
        backend
    }

    fn payload(resp: &ToolResponse) -> Value {
        assert!(!resp.is_error, "unexpected error: {}", resp.text());
        serde_json::from_str(resp.text()).unwrap()
    }

    #[test]
    fn test_validate_params_injects_defaults() {
        let schema = SearchEmbeddingsTool.parameters_schema();
        let params = validate_params(&schema, &json!({"query": "q", "workspace": "w"})).unwrap();
        assert_eq!(params["topN"], 4);
        assert_eq!(params["threshold"], 0.25);
        assert_eq!(params["includePinned"], false);
        assert_eq!(params["rerank"], false);
    }

    #[test]
    fn test_validate_params_errors() {
        let schema = SearchEmbeddingsTool.parameters_schema();
        let err = validate_params(&schema, &json!({"query": "q"})).unwrap_err();
        assert_eq!(err.to_string(), "missing required parameter: workspace");

        let err = validate_params(&schema, &json!({"query": "q", "workspace": "w", "topN": "3"}))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "parameter 'topN' must be of type 'number', got string"
        );

        assert!(validate_params(&schema, &json!(["q"])).is_err());
    }

    #[test]
    fn test_tool_list_is_static() {
        let d = dispatch(Arc::new(InMemoryBackend::new()));
        let tools = d.list_tools();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["search_embeddings", "list_workspaces", "workspace_info"]
        );
        let json = serde_json::to_value(&tools[0]).unwrap();
        assert_eq!(json["inputSchema"]["required"], json!(["query", "workspace"]));
        assert_eq!(tools, dispatch(backend()).list_tools());
    }

    #[tokio::test]
    async fn test_search_on_empty_workspace_succeeds_with_message() {
        let d = dispatch(backend());
        let resp = d
            .call(
                "search_embeddings",
                Some(json!({"query": "hello", "workspace": "empty"})),
            )
            .await;
        let p = payload(&resp);
        assert_eq!(p["stats"]["resultsFound"], 0);
        assert_eq!(p["message"], "This workspace has no embedded documents");
        assert_eq!(p["workspace"], "Empty");
    }

    #[tokio::test]
    async fn test_search_vector_only() {
        let d = dispatch(backend());
        let resp = d
            .call(
                "search_embeddings",
                Some(json!({"query": "deploy the service", "workspace": "docs", "topN": 3})),
            )
            .await;
        let p = payload(&resp);
        let results = p["results"].as_array().unwrap();
        assert!(!results.is_empty() && results.len() <= 3);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r["index"], i + 1);
            assert_eq!(r["type"], "vector");
            let score = r["score"].as_f64().unwrap();
            assert!((0.0..=1.0).contains(&score));
        }
        assert_eq!(p["stats"]["totalEmbeddings"], 10);
        assert_eq!(p["settings"]["topN"], 3);
    }

    #[tokio::test]
    async fn test_search_with_pinned() {
        let backend = backend();
        backend
            .pin_document("docs", source("chunk-0"), "pinned deploy guide")
            .unwrap();
        backend
            .pin_document("docs", source("chunk-1"), "pinned deploy checklist")
            .unwrap();
        let d = dispatch(backend);
        let resp = d
            .call(
                "search_embeddings",
                Some(json!({
                    "query": "deploy the service",
                    "workspace": "docs",
                    "topN": 3,
                    "includePinned": true
                })),
            )
            .await;
        let p = payload(&resp);
        let results = p["results"].as_array().unwrap();
        assert_eq!(results[0]["type"], "pinned");
        assert_eq!(results[1]["type"], "pinned");
        assert!(results[0]["score"].is_null());
        assert_eq!(results[0]["metadata"]["isPinned"], true);
        assert!(results[2..].iter().all(|r| r["type"] == "vector"));
        assert!(results.len() <= 5);
        assert_eq!(p["stats"]["pinnedDocs"], 2);

        let titles: Vec<_> = results.iter().map(|r| r["title"].as_str().unwrap()).collect();
        let unique: HashSet<_> = titles.iter().collect();
        assert_eq!(unique.len(), titles.len());
    }

    #[tokio::test]
    async fn test_workspace_info_unknown() {
        let d = dispatch(backend());
        let resp = d
            .call("workspace_info", Some(json!({"workspace": "ghost"})))
            .await;
        assert!(resp.is_error);
        assert!(resp.text().starts_with("Error: "));
        assert!(resp.text().contains("not found"));
    }

    #[tokio::test]
    async fn test_workspace_info_known() {
        let d = dispatch(backend());
        let resp = d
            .call("workspace_info", Some(json!({"workspace": "docs"})))
            .await;
        let p = payload(&resp);
        assert_eq!(p["stats"]["vectorCount"], 10);
        assert_eq!(p["stats"]["hasEmbeddings"], true);
    }

    #[tokio::test]
    async fn test_list_workspaces_round_trip() {
        let d = dispatch(backend());
        let resp = d.call("list_workspaces", None).await;
        let list: WorkspaceList = serde_json::from_str(resp.text()).unwrap();
        assert_eq!(list.total_workspaces, 2);
        assert_eq!(list.workspaces.len(), list.total_workspaces);
        let empty = list.workspaces.iter().find(|w| w.slug == "empty").unwrap();
        assert!(!empty.has_embeddings);
        assert_eq!(empty.vector_count, 0);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let d = dispatch(backend());
        let resp = d.call("delete_everything", None).await;
        assert!(resp.is_error);
        assert_eq!(resp.text(), "Error: Unknown tool: delete_everything");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["isError"], true);
        assert_eq!(json["content"][0]["type"], "text");
    }

    #[tokio::test]
    async fn test_missing_arguments_and_bad_top_n() {
        let d = dispatch(backend());
        let resp = d.call("search_embeddings", None).await;
        assert_eq!(resp.text(), "Error: missing required parameter: query");

        let resp = d
            .call(
                "search_embeddings",
                Some(json!({"query": "q", "workspace": "docs", "topN": 2.5})),
            )
            .await;
        assert!(resp.is_error);
        assert!(resp.text().contains("topN"));
    }

    #[tokio::test]
    async fn test_provider_failure_becomes_envelope() {
        let backend = backend();
        backend.fail_searches("docs", "index offline").unwrap();
        let d = dispatch(backend);
        let resp = d
            .call(
                "search_embeddings",
                Some(json!({"query": "q", "workspace": "docs"})),
            )
            .await;
        assert!(resp.is_error);
        assert_eq!(resp.text(), "Error: index offline");
    }

    #[test]
    fn test_success_envelope_omits_is_error() {
        let json = serde_json::to_value(ToolResponse::success("{}".into())).unwrap();
        assert!(json.get("isError").is_none());
    }
}
