//! # Perplexity Core
//!
//! Client core for the Perplexity API: synchronous chat queries, async
//! deep-research jobs with bounded waiting, citation normalization and
//! rendering, and layered configuration.

pub mod citations;
pub mod client;
pub mod config;
pub mod error;
pub mod research;
pub mod types;

// Re-export commonly used types at the crate root.
pub use client::{MockApi, PerplexityApi, PerplexityClient, RESEARCH_SYSTEM_PROMPT};
pub use config::{PerplexityConfig, TransportMode, load_config};
pub use error::{ApiError, ConfigError, Result};
pub use research::{AsyncJob, JobOutcome, JobStatus, WaitBounds, WaitOptions, wait_for_research};
pub use types::{Citation, MODEL_ASK, MODEL_DEEP_RESEARCH, MODEL_REASON, Query, QueryResult};
