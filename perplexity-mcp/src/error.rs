//! MCP-specific error types.

/// Errors that can occur during MCP server operation.
///
/// Each variant maps to a JSON-RPC error code. Tool failures are not in here:
/// they travel inside a successful response as a result with `isError: true`.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("JSON-RPC parse error: {message}")]
    ParseError { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },

    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("Prompt not found: {name}")]
    PromptNotFound { name: String },

    #[error("Transport error: {message}")]
    TransportError { message: String },

    #[error("Server not initialized")]
    NotInitialized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Convert to a JSON-RPC error code.
    pub fn error_code(&self) -> i64 {
        match self {
            McpError::ParseError { .. } => -32700,
            McpError::InvalidRequest { .. } => -32600,
            McpError::MethodNotFound { .. } => -32601,
            McpError::InvalidParams { .. } => -32602,
            McpError::InternalError { .. } => -32603,
            McpError::ToolNotFound { .. } => -32000,
            McpError::PromptNotFound { .. } => -32001,
            McpError::TransportError { .. } => -32002,
            McpError::NotInitialized => -32003,
            McpError::Io(_) => -32603,
            McpError::Json(_) => -32700,
        }
    }

    pub(crate) fn invalid_params(message: impl Into<String>) -> Self {
        McpError::InvalidParams {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let cases = [
            (McpError::ParseError { message: "x".into() }, -32700),
            (McpError::InvalidRequest { message: "x".into() }, -32600),
            (McpError::MethodNotFound { method: "x".into() }, -32601),
            (McpError::invalid_params("x"), -32602),
            (McpError::InternalError { message: "x".into() }, -32603),
            (McpError::ToolNotFound { name: "x".into() }, -32000),
            (McpError::PromptNotFound { name: "x".into() }, -32001),
            (McpError::TransportError { message: "x".into() }, -32002),
            (McpError::NotInitialized, -32003),
        ];
        for (err, code) in cases {
            assert_eq!(err.error_code(), code, "{err}");
        }
    }

    #[test]
    fn test_error_display() {
        let err = McpError::PromptNotFound {
            name: "summarize".into(),
        };
        assert_eq!(err.to_string(), "Prompt not found: summarize");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let mcp_err: McpError = io_err.into();
        assert!(matches!(mcp_err, McpError::Io(_)));
        assert_eq!(mcp_err.error_code(), -32603);
    }
}
