//! MCP request handlers: routes JSON-RPC methods to tools and prompts.

use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::error::McpError;
use crate::prompts;
use crate::protocol::{
    CallToolParams, GetPromptParams, InitializeParams, InitializeResult, ListChangedCapability,
    ListPromptsResult, ListToolsResult, MCP_PROTOCOL_VERSION, ServerCapabilities, ServerInfo,
    SetLevelParams,
};
use crate::session::ClientLogLevel;
use crate::tools::{ToolContext, ToolRegistry};

pub const SERVER_NAME: &str = "perplexity-mcp";

/// Handles MCP requests.
///
/// Takes `&self` throughout so one handler can serve concurrent HTTP requests.
pub struct RequestHandler {
    tools: Arc<ToolRegistry>,
    initialized: AtomicBool,
    log_level: Arc<ClientLogLevel>,
    server_info: ServerInfo,
}

impl RequestHandler {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            initialized: AtomicBool::new(false),
            log_level: Arc::new(ClientLogLevel::default()),
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// The level set by `logging/setLevel`, shared with client loggers.
    pub fn log_level(&self) -> Arc<ClientLogLevel> {
        Arc::clone(&self.log_level)
    }

    fn ensure_initialized(&self) -> Result<(), McpError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(McpError::NotInitialized)
        }
    }

    pub fn handle_initialize(&self, params: InitializeParams) -> Result<Value, McpError> {
        info!(
            client = %params.client_info.name,
            client_version = ?params.client_info.version,
            protocol_version = %params.protocol_version,
            "MCP client connecting"
        );
        self.initialized.store(true, Ordering::Release);

        to_value(
            InitializeResult {
                protocol_version: MCP_PROTOCOL_VERSION.to_string(),
                capabilities: ServerCapabilities {
                    tools: Some(ListChangedCapability {
                        list_changed: Some(false),
                    }),
                    prompts: Some(ListChangedCapability {
                        list_changed: Some(false),
                    }),
                    logging: Some(json!({})),
                },
                server_info: self.server_info.clone(),
            },
            "initialize result",
        )
    }

    pub fn handle_tools_list(&self) -> Result<Value, McpError> {
        self.ensure_initialized()?;
        let tools = self.tools.list();
        debug!(count = tools.len(), "Listing tools");
        to_value(ListToolsResult { tools }, "tools list")
    }

    pub async fn handle_tools_call(
        &self,
        params: CallToolParams,
        ctx: &ToolContext,
    ) -> Result<Value, McpError> {
        self.ensure_initialized()?;
        let arguments = params.arguments.unwrap_or_else(|| json!({}));
        let result = self.tools.call(&params.name, arguments, ctx).await?;
        to_value(result, "tool result")
    }

    pub fn handle_prompts_list(&self) -> Result<Value, McpError> {
        self.ensure_initialized()?;
        to_value(
            ListPromptsResult {
                prompts: prompts::list_prompts(),
            },
            "prompts list",
        )
    }

    pub fn handle_prompts_get(&self, params: GetPromptParams) -> Result<Value, McpError> {
        self.ensure_initialized()?;
        debug!(prompt = %params.name, "Expanding prompt");
        let result = prompts::get_prompt(&params.name, &params.arguments)?;
        to_value(result, "prompt")
    }

    pub fn handle_set_level(&self, params: SetLevelParams) -> Result<Value, McpError> {
        self.ensure_initialized()?;
        info!(level = ?params.level, "Client set log level");
        self.log_level.set(params.level);
        Ok(json!({}))
    }

    /// Route a JSON-RPC method to its handler.
    pub async fn route(
        &self,
        method: &str,
        params: Value,
        ctx: &ToolContext,
    ) -> Result<Value, McpError> {
        match method {
            "initialize" => self.handle_initialize(parse_params(method, params)?),
            "notifications/initialized" => {
                info!("MCP client initialized");
                Ok(Value::Null)
            }
            // Connections that track in-flight requests handle this before routing.
            "notifications/cancelled" => {
                debug!("Cancellation without a tracked request ignored");
                Ok(Value::Null)
            }
            "ping" => Ok(json!({})),
            "tools/list" => self.handle_tools_list(),
            "tools/call" => {
                let params = parse_params(method, params)?;
                self.handle_tools_call(params, ctx).await
            }
            "prompts/list" => self.handle_prompts_list(),
            "prompts/get" => self.handle_prompts_get(parse_params(method, params)?),
            "logging/setLevel" => self.handle_set_level(parse_params(method, params)?),
            _ => Err(McpError::MethodNotFound {
                method: method.to_string(),
            }),
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(method: &str, params: Value) -> Result<T, McpError> {
    serde_json::from_value(params)
        .map_err(|e| McpError::invalid_params(format!("Invalid {} params: {}", method, e)))
}

fn to_value<T: Serialize>(value: T, what: &str) -> Result<Value, McpError> {
    serde_json::to_value(value).map_err(|e| McpError::InternalError {
        message: format!("Failed to serialize {}: {}", what, e),
    })
}
