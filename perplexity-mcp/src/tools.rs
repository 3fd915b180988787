//! Tool registry and the Perplexity tools exposed over MCP.
//!
//! Every tool call resolves to a [`CallToolResult`]. API failures, missing
//! arguments and failed research jobs become results with `isError: true`;
//! only an unknown tool name is a protocol error.

use async_trait::async_trait;
use perplexity_core::citations;
use perplexity_core::config::ResearchConfig;
use perplexity_core::{
    ApiError, JobOutcome, MODEL_ASK, MODEL_REASON, PerplexityApi, Query, wait_for_research,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::McpError;
use crate::middleware::LoggedTool;
use crate::protocol::{CallToolResult, McpTool};
use crate::session::ClientLogger;

pub const ASK_TOOL: &str = "perplexity_ask";
pub const REASON_TOOL: &str = "perplexity_reason";
pub const RESEARCH_START_TOOL: &str = "perplexity_research_start";
pub const RESEARCH_RESULT_TOOL: &str = "perplexity_research_result";
pub const RESEARCH_WAIT_TOOL: &str = "perplexity_research_wait";

const ASK_SYSTEM_PROMPT: &str = "You are a helpful search assistant. Provide accurate, concise \
     answers with relevant information from the web.";
const REASON_SYSTEM_PROMPT: &str = "You are a reasoning assistant. Think step by step, show your \
     work, and provide well-reasoned conclusions.";

const NO_CONTENT: &str = "Research completed but no content returned";

/// A named operation callable through `tools/call`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's arguments.
    fn input_schema(&self) -> Value;

    async fn call(&self, args: Value, ctx: &ToolContext) -> CallToolResult;
}

/// What a tool call gets besides its arguments.
///
/// `cancel` fires when the client cancels the request or the server shuts
/// down. `logger` reaches the client through `notifications/message`.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    cancel: CancellationToken,
    logger: ClientLogger,
}

impl ToolContext {
    pub fn new(cancel: CancellationToken, logger: ClientLogger) -> Self {
        Self { cancel, logger }
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn logger(&self) -> &ClientLogger {
        &self.logger
    }
}

/// Registered tools, listed in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if the name is taken.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), McpError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(McpError::InternalError {
                message: format!("tool already registered: {}", name),
            });
        }
        debug!(tool = %name, "Registering tool");
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<McpTool> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| McpTool {
                name: tool.name().to_string(),
                description: Some(tool.description().to_string()),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Call a tool by name.
    pub async fn call(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<CallToolResult, McpError> {
        let tool = self.get(name).ok_or_else(|| McpError::ToolNotFound {
            name: name.to_string(),
        })?;
        Ok(tool.call(args, ctx).await)
    }
}

/// Register the five Perplexity tools, each wrapped in [`LoggedTool`].
pub fn register_perplexity_tools(
    registry: &mut ToolRegistry,
    api: Arc<dyn PerplexityApi>,
    research: ResearchConfig,
) -> Result<(), McpError> {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(QueryTool::ask(api.clone())),
        Arc::new(ResearchStartTool { api: api.clone() }),
        Arc::new(ResearchResultTool { api: api.clone() }),
        Arc::new(ResearchWaitTool {
            api: api.clone(),
            research,
        }),
        Arc::new(QueryTool::reason(api)),
    ];
    for tool in tools {
        registry.register(Arc::new(LoggedTool::new(tool)))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn required_str(args: &Value, key: &str) -> Result<String, CallToolResult> {
    match args.get(key).and_then(Value::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
        _ => Err(CallToolResult::error(format!(
            "missing required argument: {}",
            key
        ))),
    }
}

fn optional_secs(args: &Value, key: &str) -> Result<Option<i64>, CallToolResult> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| {
                CallToolResult::error(format!("{} must be a number of seconds", key))
            }),
    }
}

fn string_schema(key: &str, description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            key: {"type": "string", "description": description}
        },
        "required": [key]
    })
}

/// Turn one observation of a research job into a tool result.
pub fn render_outcome(outcome: &JobOutcome) -> CallToolResult {
    match outcome {
        JobOutcome::Completed(result) => CallToolResult::text(citations::render(result)),
        JobOutcome::CompletedEmpty => CallToolResult::text(NO_CONTENT),
        JobOutcome::Failed { reason } => CallToolResult::error(
            ApiError::JobFailed {
                reason: reason.clone(),
            }
            .to_string(),
        ),
        JobOutcome::Pending | JobOutcome::InProgress => CallToolResult::text(format!(
            "Status: {}. Research is still in progress. Check again later.",
            outcome.status()
        )),
    }
}

// ---------------------------------------------------------------------------
// perplexity_ask / perplexity_reason
// ---------------------------------------------------------------------------

/// A synchronous query against one model tier with a fixed system prompt.
pub struct QueryTool {
    name: &'static str,
    description: &'static str,
    query_description: &'static str,
    model: &'static str,
    system_prompt: &'static str,
    api: Arc<dyn PerplexityApi>,
}

impl QueryTool {
    pub fn ask(api: Arc<dyn PerplexityApi>) -> Self {
        Self {
            name: ASK_TOOL,
            description: "Answer a question using Perplexity AI web search",
            query_description: "Question to answer using web search",
            model: MODEL_ASK,
            system_prompt: ASK_SYSTEM_PROMPT,
            api,
        }
    }

    pub fn reason(api: Arc<dyn PerplexityApi>) -> Self {
        Self {
            name: REASON_TOOL,
            description: "Solve problems using step-by-step reasoning with Perplexity AI",
            query_description: "Problem or question requiring step-by-step reasoning",
            model: MODEL_REASON,
            system_prompt: REASON_SYSTEM_PROMPT,
            api,
        }
    }
}

#[async_trait]
impl Tool for QueryTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn input_schema(&self) -> Value {
        string_schema("query", self.query_description)
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> CallToolResult {
        let query = match required_str(&args, "query") {
            Ok(q) => q,
            Err(result) => return result,
        };
        match self
            .api
            .query(&Query::new(self.model, self.system_prompt, query))
            .await
        {
            Ok(result) => CallToolResult::text(citations::render(&result)),
            Err(e) => CallToolResult::error(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// perplexity_research_start
// ---------------------------------------------------------------------------

pub struct ResearchStartTool {
    api: Arc<dyn PerplexityApi>,
}

#[async_trait]
impl Tool for ResearchStartTool {
    fn name(&self) -> &str {
        RESEARCH_START_TOOL
    }

    fn description(&self) -> &str {
        "Start deep research on a topic (async). Returns request_id to check results later."
    }

    fn input_schema(&self) -> Value {
        string_schema("query", "Topic to research in depth")
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> CallToolResult {
        let query = match required_str(&args, "query") {
            Ok(q) => q,
            Err(result) => return result,
        };
        match self.api.start_research(&query).await {
            Ok(id) => CallToolResult::text(format!("Research started. Request ID: {}", id)),
            Err(e) => CallToolResult::error(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// perplexity_research_result
// ---------------------------------------------------------------------------

pub struct ResearchResultTool {
    api: Arc<dyn PerplexityApi>,
}

#[async_trait]
impl Tool for ResearchResultTool {
    fn name(&self) -> &str {
        RESEARCH_RESULT_TOOL
    }

    fn description(&self) -> &str {
        "Get results of async deep research by request_id"
    }

    fn input_schema(&self) -> Value {
        string_schema("request_id", "Request ID from perplexity_research_start")
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> CallToolResult {
        let request_id = match required_str(&args, "request_id") {
            Ok(id) => id,
            Err(result) => return result,
        };
        match self.api.get_research(&request_id).await {
            Ok(job) => render_outcome(&job.outcome()),
            Err(e) => CallToolResult::error(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// perplexity_research_wait
// ---------------------------------------------------------------------------

pub struct ResearchWaitTool {
    api: Arc<dyn PerplexityApi>,
    research: ResearchConfig,
}

#[async_trait]
impl Tool for ResearchWaitTool {
    fn name(&self) -> &str {
        RESEARCH_WAIT_TOOL
    }

    fn description(&self) -> &str {
        "Wait for async deep research to complete (blocking). Returns result when done or times out."
    }

    fn input_schema(&self) -> Value {
        let bounds = self.research.wait_bounds();
        json!({
            "type": "object",
            "properties": {
                "request_id": {
                    "type": "string",
                    "description": "Request ID from perplexity_research_start"
                },
                "timeout": {
                    "type": "integer",
                    "description": format!(
                        "Timeout in seconds (default {}, max {})",
                        bounds.default.as_secs(),
                        bounds.max.as_secs()
                    )
                }
            },
            "required": ["request_id"]
        })
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> CallToolResult {
        let request_id = match required_str(&args, "request_id") {
            Ok(id) => id,
            Err(result) => return result,
        };
        let requested = match optional_secs(&args, "timeout") {
            Ok(secs) => secs,
            Err(result) => return result,
        };

        let options = self.research.wait_options(requested);
        match wait_for_research(self.api.as_ref(), &request_id, options, ctx.cancel()).await {
            Ok(job) => render_outcome(&job.outcome()),
            Err(ApiError::DeadlineExceeded { waited_secs }) => CallToolResult::text(format!(
                "Research is still in progress after {}s. Check again later with {}.",
                waited_secs, RESEARCH_RESULT_TOOL
            )),
            Err(e) => CallToolResult::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perplexity_core::{AsyncJob, Citation, MockApi, QueryResult};
    use perplexity_core::types::{ChatResponse, Choice, ChoiceMessage};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn job(started: bool, completed: bool, failed: bool) -> AsyncJob {
        AsyncJob {
            id: "req_1".into(),
            created_at: Some(1),
            started_at: started.then_some(2),
            completed_at: completed.then_some(3),
            failed_at: failed.then_some(4),
            ..AsyncJob::default()
        }
    }

    fn with_answer(mut job: AsyncJob, content: &str) -> AsyncJob {
        job.response = Some(ChatResponse {
            choices: Some(vec![Choice {
                message: ChoiceMessage {
                    content: content.into(),
                },
            }]),
            citations: Some(vec!["https://src".into()]),
            search_results: None,
        });
        job
    }

    fn ctx() -> ToolContext {
        ToolContext::default()
    }

    fn registry(api: Arc<MockApi>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        register_perplexity_tools(&mut registry, api, ResearchConfig::default()).unwrap();
        registry
    }

    #[test]
    fn test_registry_lists_tools_in_order() {
        let registry = registry(Arc::new(MockApi::new()));
        let names: Vec<String> = registry.list().into_iter().map(|t| t.name).collect();
        let expected: Vec<String> = [
            "perplexity_ask",
            "perplexity_research_start",
            "perplexity_research_result",
            "perplexity_research_wait",
            "perplexity_reason",
        ]
        .map(String::from)
        .to_vec();
        assert_eq!(names, expected);
        for tool in registry.list() {
            assert_eq!(tool.input_schema["type"], "object");
            assert!(tool.input_schema["required"].is_array());
        }
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let api: Arc<dyn PerplexityApi> = Arc::new(MockApi::new());
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(QueryTool::ask(api.clone()))).unwrap();
        assert!(registry.register(Arc::new(QueryTool::ask(api))).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_protocol_error() {
        let registry = registry(Arc::new(MockApi::new()));
        let err = registry.call("perplexity_nope", json!({}), &ctx()).await.unwrap_err();
        assert_eq!(err.error_code(), -32000);
    }

    #[tokio::test]
    async fn test_ask_renders_answer_with_sources() {
        let api = Arc::new(MockApi::new());
        api.queue_query(Ok(QueryResult {
            content: "Rust 1.88 is out.".into(),
            citations: vec![Citation::from_url("https://blog.rust-lang.org")],
        }));
        let registry = registry(api.clone());

        let result = registry
            .call(ASK_TOOL, json!({"query": "latest rust?"}), &ctx())
            .await
            .unwrap();
        assert!(!result.is_error());
        assert_eq!(
            result.joined_text(),
            "Rust 1.88 is out.\n\n---\n**Sources:**\n1. https://blog.rust-lang.org\n"
        );

        let seen = api.seen_queries();
        assert_eq!(seen[0].model(), "sonar");
        assert_eq!(seen[0].system_prompt(), ASK_SYSTEM_PROMPT);
        assert_eq!(seen[0].user_query(), "latest rust?");
    }

    #[tokio::test]
    async fn test_reason_uses_reasoning_tier() {
        let api = Arc::new(MockApi::new());
        api.queue_query(Ok(QueryResult {
            content: "42".into(),
            citations: vec![],
        }));
        let registry = registry(api.clone());

        let result = registry
            .call(REASON_TOOL, json!({"query": "why?"}), &ctx())
            .await
            .unwrap();
        assert_eq!(result.joined_text(), "42");
        assert_eq!(api.seen_queries()[0].model(), "sonar-reasoning");
    }

    #[tokio::test]
    async fn test_missing_argument_is_error_result() {
        let registry = registry(Arc::new(MockApi::new()));
        for (tool, args) in [
            (ASK_TOOL, json!({})),
            (REASON_TOOL, json!({"query": 5})),
            (RESEARCH_START_TOOL, json!({"query": ""})),
            (RESEARCH_RESULT_TOOL, json!({})),
            (RESEARCH_WAIT_TOOL, json!({"timeout": 10})),
        ] {
            let result = registry.call(tool, args, &ctx()).await.unwrap();
            assert!(result.is_error(), "{tool} should reject missing arguments");
            assert!(result.joined_text().starts_with("missing required argument"));
        }
    }

    #[tokio::test]
    async fn test_api_error_becomes_error_result() {
        let api = Arc::new(MockApi::new());
        api.queue_query(Err(ApiError::RemoteApi {
            status: 401,
            body: "unauthorized".into(),
        }));
        let registry = registry(api);

        let result = registry
            .call(ASK_TOOL, json!({"query": "q"}), &ctx())
            .await
            .unwrap();
        assert!(result.is_error());
        assert_eq!(result.joined_text(), "API error (status 401): unauthorized");
    }

    #[tokio::test]
    async fn test_research_start_reports_id() {
        let api = Arc::new(MockApi::new());
        api.queue_start(Ok("req_99".into()));
        let registry = registry(api);

        let result = registry
            .call(RESEARCH_START_TOOL, json!({"query": "fusion"}), &ctx())
            .await
            .unwrap();
        assert_eq!(result.joined_text(), "Research started. Request ID: req_99");
    }

    #[tokio::test]
    async fn test_research_result_pending_and_in_progress() {
        let api = Arc::new(MockApi::new());
        api.queue_poll(Ok(job(false, false, false)))
            .queue_poll(Ok(job(true, false, false)));
        let registry = registry(api);
        let args = json!({"request_id": "req_1"});

        let first = registry.call(RESEARCH_RESULT_TOOL, args.clone(), &ctx()).await.unwrap();
        assert_eq!(
            first.joined_text(),
            "Status: pending. Research is still in progress. Check again later."
        );
        let second = registry.call(RESEARCH_RESULT_TOOL, args, &ctx()).await.unwrap();
        assert!(!second.is_error());
        assert!(second.joined_text().starts_with("Status: in_progress."));
    }

    #[tokio::test]
    async fn test_research_result_completed_renders_report() {
        let api = Arc::new(MockApi::new());
        api.queue_poll(Ok(with_answer(job(true, true, false), "report")));
        let registry = registry(api);

        let result = registry
            .call(RESEARCH_RESULT_TOOL, json!({"request_id": "req_1"}), &ctx())
            .await
            .unwrap();
        assert_eq!(
            result.joined_text(),
            "report\n\n---\n**Sources:**\n1. https://src\n"
        );
    }

    #[tokio::test]
    async fn test_completed_empty_differs_from_failed() {
        let api = Arc::new(MockApi::new());
        let mut empty = job(true, true, false);
        empty.response = Some(ChatResponse::default());
        let mut failed = job(true, false, true);
        failed.error = Some("model overloaded".into());
        api.queue_poll(Ok(empty)).queue_poll(Ok(failed));
        let registry = registry(api);
        let args = json!({"request_id": "req_1"});

        let empty = registry.call(RESEARCH_RESULT_TOOL, args.clone(), &ctx()).await.unwrap();
        assert!(!empty.is_error());
        assert_eq!(empty.joined_text(), NO_CONTENT);

        let failed = registry.call(RESEARCH_RESULT_TOOL, args, &ctx()).await.unwrap();
        assert!(failed.is_error());
        assert_eq!(failed.joined_text(), "research failed: model overloaded");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_deadline_is_not_an_error() {
        let api = Arc::new(MockApi::new());
        api.queue_poll(Ok(job(true, false, false)));
        let registry = registry(api);

        let result = registry
            .call(RESEARCH_WAIT_TOOL, json!({"request_id": "req_1", "timeout": 12}), &ctx())
            .await
            .unwrap();
        assert!(!result.is_error());
        assert!(result.joined_text().contains("still in progress after 12s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_clamps_non_positive_timeout_to_default() {
        let api = Arc::new(MockApi::new());
        api.queue_poll(Ok(job(false, false, false)));
        let registry = registry(api);

        let result = registry
            .call(RESEARCH_WAIT_TOOL, json!({"request_id": "req_1", "timeout": 0}), &ctx())
            .await
            .unwrap();
        assert!(result.joined_text().contains("after 300s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_completed_report() {
        let api = Arc::new(MockApi::new());
        api.queue_poll(Ok(job(true, false, false)))
            .queue_poll(Ok(with_answer(job(true, true, false), "done")));
        let registry = registry(api.clone());

        let result = registry
            .call(RESEARCH_WAIT_TOOL, json!({"request_id": "req_1"}), &ctx())
            .await
            .unwrap();
        assert!(result.joined_text().starts_with("done"));
        assert_eq!(api.poll_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_stops_on_poll_failure() {
        let api = Arc::new(MockApi::new());
        api.queue_poll(Err(ApiError::RemoteApi {
            status: 500,
            body: "boom".into(),
        }))
        .queue_poll(Ok(job(true, true, false)));
        let registry = registry(api.clone());

        let result = registry
            .call(RESEARCH_WAIT_TOOL, json!({"request_id": "req_1"}), &ctx())
            .await
            .unwrap();
        assert!(result.is_error());
        assert_eq!(result.joined_text(), "API error (status 500): boom");
        assert_eq!(api.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_aborts_when_call_is_cancelled() {
        let api = Arc::new(MockApi::new());
        api.queue_poll(Ok(job(true, false, false)));
        let registry = registry(api.clone());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(6)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let ctx = ToolContext::new(cancel, ClientLogger::disabled());
        let result = registry
            .call(RESEARCH_WAIT_TOOL, json!({"request_id": "req_1", "timeout": 600}), &ctx)
            .await
            .unwrap();
        assert!(result.is_error());
        assert!(result.joined_text().contains("cancelled"));
        assert!(started.elapsed() < Duration::from_secs(7));
        assert_eq!(api.poll_count(), 2);
    }

    #[tokio::test]
    async fn test_wait_rejects_non_numeric_timeout() {
        let registry = registry(Arc::new(MockApi::new()));
        let result = registry
            .call(RESEARCH_WAIT_TOOL, json!({"request_id": "r", "timeout": "soon"}), &ctx())
            .await
            .unwrap();
        assert!(result.is_error());
    }
}
