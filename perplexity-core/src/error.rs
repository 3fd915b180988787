//! Error types for the Perplexity client core.
//!
//! Uses `thiserror` for the public error taxonomy. Every failure from the
//! synchronous query client and the async job client is an [`ApiError`];
//! configuration loading failures are a [`ConfigError`].

use std::time::Duration;

/// Errors from the remote Perplexity API.
///
/// None of these are retried internally. They propagate unmodified to the
/// caller, which decides how to render them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Network, DNS, timeout or cancellation failure before a response arrived.
    #[error("request failed: {message}")]
    Transport { message: String },

    /// The remote API answered with a non-success HTTP status.
    #[error("API error (status {status}): {body}")]
    RemoteApi { status: u16, body: String },

    /// A success status whose body is missing the content we need.
    #[error("{message}")]
    EmptyResponse { message: String },

    /// A wait reached its deadline before the job became terminal.
    ///
    /// This is an expected outcome of waiting, not a failure of the job.
    #[error("research still in progress after {waited_secs}s")]
    DeadlineExceeded { waited_secs: u64 },

    /// The remote system reported that the research job failed.
    #[error("research failed: {reason}")]
    JobFailed { reason: String },
}

impl ApiError {
    pub(crate) fn transport(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("timed out: {}", err)
        } else if err.is_connect() {
            format!("connection failed: {}", err)
        } else {
            err.to_string()
        };
        ApiError::Transport { message }
    }

    pub(crate) fn deadline(waited: Duration) -> Self {
        ApiError::DeadlineExceeded {
            waited_secs: waited.as_secs(),
        }
    }

    /// Whether this error is the non-exceptional "still running" outcome of a wait.
    pub fn is_deadline(&self) -> bool {
        matches!(self, ApiError::DeadlineExceeded { .. })
    }

    /// HTTP status of a remote API error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::RemoteApi { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} environment variable is required")]
    MissingApiKey { var: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {0}")]
    Parse(#[from] Box<figment::Error>),
}

pub type Result<T, E = ApiError> = std::result::Result<T, E>;
