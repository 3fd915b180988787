//! `ask` subcommand: a minimal MCP client for a server running in HTTP mode.
//!
//! Performs the initialize handshake, then calls `perplexity_ask` once.

use anyhow::{Context, anyhow, bail};
use perplexity_mcp::http::SESSION_HEADER;
use perplexity_mcp::protocol::{
    CallToolResult, JSONRPC_VERSION, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION,
};
use perplexity_mcp::tools::ASK_TOOL;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::process::ExitCode;
use tracing::debug;

pub const DEFAULT_URL: &str = "http://localhost:8080";

/// JSON-RPC over HTTP POST, carrying the session id once assigned.
pub struct AskClient {
    http: reqwest::Client,
    url: String,
    session: Option<String>,
    next_id: i64,
}

impl AskClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            session: None,
            next_id: 1,
        }
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    fn post(&self, body: &impl serde::Serialize) -> reqwest::RequestBuilder {
        let request = self.http.post(&self.url).json(body);
        match &self.session {
            Some(id) => request.header(SESSION_HEADER, id),
            None => request,
        }
    }

    async fn request(&mut self, method: &str, params: Value) -> anyhow::Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let response = self
            .post(&JsonRpcRequest::new(id, method, params))
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.url))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            debug!(session_id = %session, "Server assigned session");
            self.session = Some(session.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            bail!("{} returned HTTP {}", method, status);
        }

        let reply: JsonRpcResponse = response
            .json()
            .await
            .with_context(|| format!("invalid {} response", method))?;
        if let Some(err) = reply.error {
            bail!("{} failed ({}): {}", method, err.code, err.message);
        }
        reply
            .result
            .ok_or_else(|| anyhow!("{} response has no result", method))
    }

    async fn notify(&self, method: &str) -> anyhow::Result<()> {
        let body = json!({"jsonrpc": JSONRPC_VERSION, "method": method});
        let response = self.post(&body).send().await?;
        if response.status() != StatusCode::ACCEPTED && !response.status().is_success() {
            bail!("{} returned HTTP {}", method, response.status());
        }
        Ok(())
    }

    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": "perplexity-ask", "version": env!("CARGO_PKG_VERSION")}
                }),
            )
            .await?;
        debug!(server = %result["serverInfo"]["name"], "Initialized");
        self.notify("notifications/initialized").await
    }

    pub async fn ask(&mut self, question: &str) -> anyhow::Result<CallToolResult> {
        let result = self
            .request(
                "tools/call",
                json!({"name": ASK_TOOL, "arguments": {"query": question}}),
            )
            .await?;
        serde_json::from_value(result).context("invalid tool result")
    }
}

/// Run the subcommand: answer on stdout, tool errors on stderr with a failing exit code.
pub async fn run(url: &str, question: &str) -> anyhow::Result<ExitCode> {
    let mut client = AskClient::new(url);
    client.initialize().await?;
    let result = client.ask(question).await?;

    if result.is_error() {
        eprintln!("Error: {}", result.joined_text());
        return Ok(ExitCode::FAILURE);
    }
    println!("{}", result.joined_text());
    Ok(ExitCode::SUCCESS)
}
