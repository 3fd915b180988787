//! Per-connection state: in-flight request cancellation and client logging.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::{JsonRpcNotification, LoggingLevel, LoggingMessageParams, RequestId};

/// Logger name carried on every `notifications/message`.
pub const LOGGER_NAME: &str = "perplexity-mcp";

/// Minimum level the client asked for via `logging/setLevel`.
///
/// Unset until the client asks; nothing is sent before then.
#[derive(Debug, Default)]
pub struct ClientLogLevel(AtomicU8);

impl ClientLogLevel {
    pub fn set(&self, level: LoggingLevel) {
        self.0.store(level as u8 + 1, Ordering::Release);
    }

    pub fn get(&self) -> Option<LoggingLevel> {
        match self.0.load(Ordering::Acquire) {
            0 => None,
            n => LoggingLevel::ALL.get(usize::from(n - 1)).copied(),
        }
    }

    pub fn enabled(&self, level: LoggingLevel) -> bool {
        self.get().is_some_and(|min| level >= min)
    }
}

/// Sends `notifications/message` to the connected client.
///
/// A disabled logger (no outbound channel) drops everything; HTTP mode has
/// no channel for server-initiated messages.
#[derive(Debug, Clone, Default)]
pub struct ClientLogger {
    sink: Option<LogSink>,
}

#[derive(Debug, Clone)]
struct LogSink {
    outbound: mpsc::UnboundedSender<String>,
    level: Arc<ClientLogLevel>,
}

impl ClientLogger {
    pub fn new(outbound: mpsc::UnboundedSender<String>, level: Arc<ClientLogLevel>) -> Self {
        Self {
            sink: Some(LogSink { outbound, level }),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Queue a log message. Returns whether it was sent.
    pub fn log(&self, level: LoggingLevel, data: Value) -> bool {
        let Some(sink) = &self.sink else {
            return false;
        };
        if !sink.level.enabled(level) {
            return false;
        }

        let params = LoggingMessageParams {
            level,
            logger: Some(LOGGER_NAME.to_string()),
            data,
        };
        let message = match serde_json::to_value(params) {
            Ok(params) => JsonRpcNotification::new("notifications/message", params),
            Err(e) => {
                warn!(error = %e, "Failed to encode client log message");
                return false;
            }
        };
        match serde_json::to_string(&message) {
            Ok(json) => sink.outbound.send(json).is_ok(),
            Err(e) => {
                warn!(error = %e, "Failed to encode client log message");
                false
            }
        }
    }
}

/// Requests currently being handled on one connection, by id.
#[derive(Debug, Default)]
pub struct InFlight {
    requests: Mutex<HashMap<RequestId, CancellationToken>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, id: RequestId, token: CancellationToken) {
        lock(&self.requests).insert(id, token);
    }

    pub fn finish(&self, id: &RequestId) {
        lock(&self.requests).remove(id);
    }

    /// Cancel one request. Unknown or finished ids are ignored.
    pub fn cancel(&self, id: &RequestId) -> bool {
        match lock(&self.requests).remove(id) {
            Some(token) => {
                debug!(request_id = ?id, "Cancelling in-flight request");
                token.cancel();
                true
            }
            None => {
                debug!(request_id = ?id, "Cancellation for unknown request ignored");
                false
            }
        }
    }

    pub fn cancel_all(&self) {
        for (_, token) in lock(&self.requests).drain() {
            token.cancel();
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
