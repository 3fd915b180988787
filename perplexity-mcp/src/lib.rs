//! # Perplexity MCP
//!
//! Model Context Protocol server exposing Perplexity search, reasoning and
//! asynchronous deep research as tools, plus a catalog of research prompts.
//!
//! ## Architecture
//!
//! ```text
//! Client <-> Transport (stdio/channel) <-> McpServer <-> RequestHandler
//! Client <-> HTTP (axum)              <--'               |-- ToolRegistry (LoggedTool -> tools -> PerplexityApi)
//!                                                        +-- prompts
//! ```
//!
//! Over a transport, [`McpServer::run`] handles each request in its own task
//! and tracks it in [`session::InFlight`] so `notifications/cancelled` can
//! abort it. Tool calls report to the client through [`session::ClientLogger`].

pub mod error;
pub mod handlers;
pub mod http;
pub mod middleware;
pub mod prompts;
pub mod protocol;
pub mod session;
pub mod tools;
pub mod transport;

use error::McpError;
use handlers::RequestHandler;
use protocol::{CancelledParams, IncomingMessage, JSONRPC_VERSION, JsonRpcResponse, RequestId};
use serde::Serialize;
use session::{ClientLogger, InFlight};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tools::{ToolContext, ToolRegistry};
use tracing::{debug, error, info, warn};
use transport::Transport;

pub use tools::register_perplexity_tools;

/// Processes JSON-RPC messages from a transport or from HTTP requests.
pub struct McpServer {
    handler: RequestHandler,
    shutdown: CancellationToken,
}

/// Outbound side of a served transport.
struct Connection {
    in_flight: Arc<InFlight>,
    logger: ClientLogger,
    outbound: mpsc::UnboundedSender<String>,
}

impl McpServer {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            handler: RequestHandler::new(tools),
            shutdown: CancellationToken::new(),
        }
    }

    /// Parent of the cancellation token of every request handled outside
    /// [`McpServer::run`]. Cancelling it aborts in-flight HTTP tool calls.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Serve a transport until EOF, a read error, or `shutdown`.
    ///
    /// Requests run as concurrent tasks, so a long research wait never blocks
    /// `ping`, other calls, or `notifications/cancelled` for itself. Responses
    /// and client log messages are written as they become ready, through one
    /// outbound queue owned by this loop.
    pub async fn run<T: Transport>(
        self: Arc<Self>,
        transport: &mut T,
        shutdown: &CancellationToken,
    ) -> Result<(), McpError> {
        info!("MCP server starting");

        let (outbound, mut pending) = mpsc::unbounded_channel::<String>();
        let connection = Connection {
            in_flight: Arc::new(InFlight::new()),
            logger: ClientLogger::new(outbound.clone(), self.handler.log_level()),
            outbound,
        };
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping MCP server");
                    break;
                }
                Some(message) = pending.recv() => {
                    debug!(message = %message, "Sending MCP message");
                    transport.write_message(&message).await?;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "MCP request task failed");
                    }
                }
                read = transport.read_message() => {
                    let message = match read {
                        Ok(Some(msg)) => msg,
                        Ok(None) => {
                            info!("Transport closed (EOF), shutting down MCP server");
                            break;
                        }
                        Err(e) => {
                            error!(error = %e, "Transport read error");
                            break;
                        }
                    };
                    if message.trim().is_empty() {
                        continue;
                    }
                    debug!(message = %message, "Received MCP message");
                    self.accept(&message, shutdown, &connection, &mut tasks).await;
                }
            }
        }

        // Abort what is still running, then deliver whatever it produced.
        connection.in_flight.cancel_all();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "MCP request task failed");
            }
        }
        drop(connection);
        while let Ok(message) = pending.try_recv() {
            if let Err(e) = transport.write_message(&message).await {
                warn!(error = %e, "Dropping MCP messages after transport failure");
                break;
            }
        }

        transport.close().await?;
        info!("MCP server stopped");
        Ok(())
    }

    /// Handle one raw message from [`McpServer::run`].
    ///
    /// Requests are spawned onto `tasks` with a token registered under their
    /// id; notifications are handled inline.
    async fn accept(
        self: &Arc<Self>,
        raw: &str,
        shutdown: &CancellationToken,
        connection: &Connection,
        tasks: &mut JoinSet<()>,
    ) {
        let incoming = match Self::parse_message(raw) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!(error = %e, "Rejecting malformed MCP message");
                send(
                    &connection.outbound,
                    &JsonRpcResponse::from_mcp_error(RequestId::Null, e),
                );
                return;
            }
        };

        let Some(id) = incoming.id.clone() else {
            if incoming.method == "notifications/cancelled" {
                match serde_json::from_value::<CancelledParams>(incoming.params) {
                    Ok(params) => {
                        info!(
                            request_id = ?params.request_id,
                            reason = ?params.reason,
                            "Client cancelled request"
                        );
                        connection.in_flight.cancel(&params.request_id);
                    }
                    Err(e) => warn!(error = %e, "Ignoring malformed cancellation"),
                }
            } else {
                let ctx = ToolContext::new(shutdown.child_token(), connection.logger.clone());
                self.dispatch_with(incoming, &ctx).await;
            }
            return;
        };

        let token = shutdown.child_token();
        connection.in_flight.begin(id.clone(), token.clone());
        let ctx = ToolContext::new(token, connection.logger.clone());
        let server = Arc::clone(self);
        let in_flight = Arc::clone(&connection.in_flight);
        let outbound = connection.outbound.clone();
        tasks.spawn(async move {
            let response = server.dispatch_with(incoming, &ctx).await;
            in_flight.finish(&id);
            if let Some(response) = response {
                send(&outbound, &response);
            }
        });
    }

    /// Handle one raw message. Returns `None` for notifications.
    pub async fn handle_message(&self, raw: &str) -> Option<JsonRpcResponse> {
        match Self::parse_message(raw) {
            Ok(incoming) => self.dispatch(incoming).await,
            Err(e) => {
                warn!(error = %e, "Rejecting malformed MCP message");
                Some(JsonRpcResponse::from_mcp_error(RequestId::Null, e))
            }
        }
    }

    /// Decode a message and check its JSON-RPC version.
    pub fn parse_message(raw: &str) -> Result<IncomingMessage, McpError> {
        let incoming: IncomingMessage =
            serde_json::from_str(raw).map_err(|e| McpError::ParseError {
                message: format!("Invalid JSON-RPC message: {}", e),
            })?;

        if incoming.jsonrpc != JSONRPC_VERSION {
            return Err(McpError::InvalidRequest {
                message: format!("Expected jsonrpc version 2.0, got: {}", incoming.jsonrpc),
            });
        }
        Ok(incoming)
    }

    /// Route a decoded message outside a streaming connection: cancelled only
    /// by [`McpServer::shutdown_token`], with no client logging.
    pub async fn dispatch(&self, incoming: IncomingMessage) -> Option<JsonRpcResponse> {
        let ctx = ToolContext::new(self.shutdown.child_token(), ClientLogger::disabled());
        self.dispatch_with(incoming, &ctx).await
    }

    /// Route a decoded message. Notifications never produce a response.
    pub async fn dispatch_with(
        &self,
        incoming: IncomingMessage,
        ctx: &ToolContext,
    ) -> Option<JsonRpcResponse> {
        let result = self
            .handler
            .route(&incoming.method, incoming.params, ctx)
            .await;

        match incoming.id {
            None => {
                if let Err(e) = result {
                    warn!(method = %incoming.method, error = %e, "Notification handler error");
                }
                None
            }
            Some(id) => Some(match result {
                Ok(value) => JsonRpcResponse::success(id, value),
                Err(e) => {
                    debug!(method = %incoming.method, error = %e, "Request failed");
                    JsonRpcResponse::from_mcp_error(id, e)
                }
            }),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.handler.is_initialized()
    }
}

fn send<T: Serialize>(outbound: &mpsc::UnboundedSender<String>, message: &T) {
    match serde_json::to_string(message) {
        Ok(json) => {
            if outbound.send(json).is_err() {
                debug!("Connection closed before message could be sent");
            }
        }
        Err(e) => error!(error = %e, "Failed to encode MCP message"),
    }
}
