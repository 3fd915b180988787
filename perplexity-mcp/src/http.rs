//! HTTP mode: one JSON-RPC message per POST, served by axum.
//!
//! Requests are handled concurrently; the server is shared behind an `Arc`.
//! There is no server-to-client stream, so client logging is off. A request
//! is cancelled when its client disconnects or the server shuts down;
//! `notifications/cancelled` is accepted and ignored.

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::McpServer;
use crate::error::McpError;
use crate::protocol::{JsonRpcResponse, RequestId};

/// Response header carrying the session id assigned on `initialize`.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Build the router: `GET /health`, and `POST /` or `POST /mcp` for JSON-RPC.
pub fn router(server: Arc<McpServer>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/", post(rpc_handler))
        .route("/mcp", post(rpc_handler))
        .with_state(server)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn rpc_handler(State(server): State<Arc<McpServer>>, body: String) -> Response {
    let incoming = match McpServer::parse_message(&body) {
        Ok(incoming) => incoming,
        Err(e) => {
            debug!(error = %e, "Rejecting malformed HTTP JSON-RPC body");
            return Json(JsonRpcResponse::from_mcp_error(RequestId::Null, e)).into_response();
        }
    };

    let is_initialize = incoming.method == "initialize";
    let Some(reply) = server.dispatch(incoming).await else {
        return StatusCode::ACCEPTED.into_response();
    };

    let session = (is_initialize && reply.error.is_none()).then(|| Uuid::new_v4().to_string());
    let mut response = Json(reply).into_response();
    if let Some(id) = session
        && let Ok(value) = HeaderValue::from_str(&id)
    {
        debug!(session_id = %id, "Assigned MCP session");
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

/// Bind `addr` and serve until `shutdown` is cancelled.
pub async fn serve(
    server: Arc<McpServer>,
    addr: &str,
    shutdown: CancellationToken,
) -> Result<(), McpError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| McpError::TransportError {
            message: format!("failed to bind {}: {}", addr, e),
        })?;
    info!(addr = %listener.local_addr()?, "MCP HTTP server listening");

    let requests = server.shutdown_token().clone();
    axum::serve(listener, router(server))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            requests.cancel();
        })
        .await?;

    info!("MCP HTTP server stopped");
    Ok(())
}
