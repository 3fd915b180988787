//! Logging decorator for tools.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::protocol::{CallToolResult, LoggingLevel};
use crate::tools::{Tool, ToolContext};

/// Wraps a [`Tool`] and logs every call, failure and success.
///
/// Each entry goes to `tracing` and, when the client has set a log level,
/// to the client as `notifications/message`. The wrapped tool is unaware of it.
pub struct LoggedTool {
    inner: Arc<dyn Tool>,
}

impl LoggedTool {
    pub fn new(inner: Arc<dyn Tool>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Tool for LoggedTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn input_schema(&self) -> Value {
        self.inner.input_schema()
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> CallToolResult {
        let name = self.inner.name();
        info!(tool = %name, input = %args, "{} called", name);
        ctx.logger().log(
            LoggingLevel::Info,
            json!({"msg": format!("{} called", name), "input": &args}),
        );

        let started = Instant::now();
        let result = self.inner.call(args, ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if result.is_error() {
            let message = result.joined_text();
            error!(tool = %name, elapsed_ms, error = %message, "{} failed", name);
            ctx.logger().log(
                LoggingLevel::Error,
                json!({"msg": format!("{} failed", name), "error": message}),
            );
        } else {
            debug!(tool = %name, elapsed_ms, "{} succeeded", name);
            ctx.logger().log(
                LoggingLevel::Debug,
                json!({"msg": format!("{} succeeded", name), "elapsed_ms": elapsed_ms}),
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ClientLogLevel, ClientLogger};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct CountingTool {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "counting"
        }

        fn description(&self) -> &str {
            "Counts calls"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}, "required": []})
        }

        async fn call(&self, _args: Value, _ctx: &ToolContext) -> CallToolResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                CallToolResult::error("nope")
            } else {
                CallToolResult::text("ok")
            }
        }
    }

    #[tokio::test]
    async fn test_logged_tool_is_transparent() {
        let inner = Arc::new(CountingTool {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let logged = LoggedTool::new(inner.clone());

        assert_eq!(logged.name(), "counting");
        assert_eq!(logged.description(), "Counts calls");
        assert_eq!(logged.input_schema(), inner.input_schema());

        let result = logged.call(json!({"x": 1}), &ToolContext::default()).await;
        assert_eq!(result, CallToolResult::text("ok"));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_logged_tool_passes_errors_through() {
        let logged = LoggedTool::new(Arc::new(CountingTool {
            calls: AtomicUsize::new(0),
            fail: true,
        }));
        let result = logged.call(json!({}), &ToolContext::default()).await;
        assert!(result.is_error());
        assert_eq!(result.joined_text(), "nope");
    }

    #[tokio::test]
    async fn test_logged_tools_nest() {
        let inner: Arc<dyn Tool> = Arc::new(CountingTool {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let twice = LoggedTool::new(Arc::new(LoggedTool::new(inner)));
        assert_eq!(twice.call(json!({}), &ToolContext::default()).await.joined_text(), "ok");
    }

    #[tokio::test]
    async fn test_logged_tool_reports_to_client() {
        let level = Arc::new(ClientLogLevel::default());
        level.set(LoggingLevel::Info);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = ToolContext::new(CancellationToken::new(), ClientLogger::new(tx, level));

        let logged = LoggedTool::new(Arc::new(CountingTool {
            calls: AtomicUsize::new(0),
            fail: true,
        }));
        logged.call(json!({"query": "q"}), &ctx).await;

        let called: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(called["params"]["level"], "info");
        assert_eq!(called["params"]["data"]["msg"], "counting called");
        assert_eq!(called["params"]["data"]["input"]["query"], "q");

        let failed: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(failed["params"]["level"], "error");
        assert_eq!(failed["params"]["data"]["error"], "nope");
        assert!(rx.try_recv().is_err());
    }
}
