//! HTTP client for the Perplexity chat completion and async research endpoints.
//!
//! [`PerplexityApi`] is the seam the MCP tools depend on; [`PerplexityClient`]
//! is the `reqwest` implementation. The client holds no per-job state, so one
//! instance is shared across concurrent tool calls.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error};

use crate::config::ApiConfig;
use crate::error::{ApiError, Result};
use crate::research::AsyncJob;
use crate::types::{AsyncChatRequest, ChatResponse, MODEL_DEEP_RESEARCH, Query, QueryResult};

pub const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";

/// System instruction sent with every deep-research job.
pub const RESEARCH_SYSTEM_PROMPT: &str = "You are a research assistant. Provide comprehensive, \
     well-structured analysis with citations and multiple perspectives.";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Operations against the remote API.
///
/// None of these retry. Dropping a returned future aborts its request.
#[async_trait]
pub trait PerplexityApi: Send + Sync {
    /// Run one synchronous chat completion.
    async fn query(&self, query: &Query) -> Result<QueryResult>;

    /// Submit a deep-research job and return its id.
    async fn start_research(&self, query: &str) -> Result<String>;

    /// Fetch the current state of a research job.
    async fn get_research(&self, request_id: &str) -> Result<AsyncJob>;
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    #[serde(default)]
    id: String,
}

/// `reqwest`-backed Perplexity client.
#[derive(Debug, Clone)]
pub struct PerplexityClient {
    http: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl PerplexityClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Build a client from configuration with an already-resolved API key.
    pub fn from_config(config: &ApiConfig, api_key: impl Into<String>) -> Self {
        Self::new(api_key)
            .with_base_url(&config.base_url)
            .with_timeout(config.request_timeout())
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Status URL for a job. The id is percent-encoded as a single path segment.
    fn job_url(&self, request_id: &str) -> Result<Url> {
        let invalid = |reason: String| ApiError::Transport {
            message: format!("invalid base URL {}: {}", self.base_url, reason),
        };
        let mut url = Url::parse(&self.url("/async/chat/completions"))
            .map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid("cannot carry a path".to_string()))?
            .push(request_id);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder, endpoint: &str) -> Result<Response> {
        request
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                error!(endpoint, error = %e, "Perplexity request failed");
                ApiError::transport(e)
            })
    }

    /// Read the body, mapping any status outside `accepted` to [`ApiError::RemoteApi`].
    async fn read_body(
        &self,
        response: Response,
        endpoint: &str,
        accepted: &[StatusCode],
    ) -> Result<String> {
        let status = response.status();
        let body = response.text().await.map_err(|e| {
            error!(endpoint, error = %e, "Failed to read response body");
            ApiError::transport(e)
        })?;

        if !accepted.contains(&status) {
            error!(endpoint, status = status.as_u16(), body = %body, "Perplexity API error");
            return Err(ApiError::RemoteApi {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    fn decode<T: DeserializeOwned>(body: &str, endpoint: &str) -> Result<T> {
        serde_json::from_str(body).map_err(|e| {
            error!(endpoint, error = %e, body = %body, "Malformed response body");
            ApiError::EmptyResponse {
                message: format!("malformed response from {}: {}", endpoint, e),
            }
        })
    }
}

#[async_trait]
impl PerplexityApi for PerplexityClient {
    async fn query(&self, query: &Query) -> Result<QueryResult> {
        const ENDPOINT: &str = "/chat/completions";
        debug!(model = %query.model(), "Sending chat completion");

        let request = self.http.post(self.url(ENDPOINT)).json(&query.to_request());
        let response = self.send(request, ENDPOINT).await?;
        let body = self.read_body(response, ENDPOINT, &[StatusCode::OK]).await?;
        let parsed: ChatResponse = Self::decode(&body, ENDPOINT)?;

        parsed.to_query_result().ok_or_else(|| ApiError::EmptyResponse {
            message: "no response from Perplexity API".to_string(),
        })
    }

    async fn start_research(&self, query: &str) -> Result<String> {
        const ENDPOINT: &str = "/async/chat/completions";
        let payload = AsyncChatRequest {
            request: Query::new(MODEL_DEEP_RESEARCH, RESEARCH_SYSTEM_PROMPT, query).to_request(),
        };

        let request = self.http.post(self.url(ENDPOINT)).json(&payload);
        let response = self.send(request, ENDPOINT).await?;
        let body = self
            .read_body(response, ENDPOINT, &[StatusCode::OK, StatusCode::ACCEPTED])
            .await?;
        let started: StartResponse = Self::decode(&body, ENDPOINT)?;

        if started.id.is_empty() {
            return Err(ApiError::EmptyResponse {
                message: "no request id returned".to_string(),
            });
        }
        debug!(request_id = %started.id, "Research job started");
        Ok(started.id)
    }

    async fn get_research(&self, request_id: &str) -> Result<AsyncJob> {
        const ENDPOINT: &str = "/async/chat/completions/{id}";
        let url = self.job_url(request_id)?;

        let response = self.send(self.http.get(url), ENDPOINT).await?;
        let body = self.read_body(response, ENDPOINT, &[StatusCode::OK]).await?;
        Self::decode(&body, ENDPOINT)
    }
}

/// In-memory [`PerplexityApi`] with queued responses, for tests.
///
/// Queued query and start responses are consumed in order. Poll responses are
/// consumed in order too, except that the last one repeats forever, which
/// models a job stuck in one state.
#[derive(Debug, Default)]
pub struct MockApi {
    queries: Mutex<VecDeque<Result<QueryResult>>>,
    starts: Mutex<VecDeque<Result<String>>>,
    polls: Mutex<VecDeque<Result<AsyncJob>>>,
    seen_queries: Mutex<Vec<Query>>,
    poll_count: AtomicUsize,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_query(&self, response: Result<QueryResult>) -> &Self {
        lock(&self.queries).push_back(response);
        self
    }

    pub fn queue_start(&self, response: Result<String>) -> &Self {
        lock(&self.starts).push_back(response);
        self
    }

    pub fn queue_poll(&self, response: Result<AsyncJob>) -> &Self {
        lock(&self.polls).push_back(response);
        self
    }

    /// Every query received so far, in order.
    pub fn seen_queries(&self) -> Vec<Query> {
        lock(&self.seen_queries).clone()
    }

    pub fn poll_count(&self) -> usize {
        self.poll_count.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl PerplexityApi for MockApi {
    async fn query(&self, query: &Query) -> Result<QueryResult> {
        lock(&self.seen_queries).push(query.clone());
        lock(&self.queries)
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::EmptyResponse {
                message: "no queued query response".to_string(),
            }))
    }

    async fn start_research(&self, _query: &str) -> Result<String> {
        lock(&self.starts)
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::EmptyResponse {
                message: "no request id returned".to_string(),
            }))
    }

    async fn get_research(&self, _request_id: &str) -> Result<AsyncJob> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        let mut polls = lock(&self.polls);
        let next = if polls.len() > 1 {
            polls.pop_front()
        } else {
            polls.front().cloned()
        };
        next.unwrap_or_else(|| {
            Err(ApiError::Transport {
                message: "no queued research job".to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::{JobStatus, WaitOptions, wait_for_research};
    use crate::types::{Citation, MODEL_ASK};
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base_url: &str) -> PerplexityClient {
        PerplexityClient::new("pplx-test").with_base_url(base_url)
    }

    #[tokio::test]
    async fn test_query_success_with_structured_citations() {
        let router = Router::new().route(
            "/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer pplx-test");
                assert_eq!(body["model"], "sonar");
                assert_eq!(body["messages"][0]["role"], "system");
                assert_eq!(body["messages"][1]["content"], "what is tokio?");
                Json(json!({
                    "id": "cmpl-1",
                    "choices": [{"message": {"role": "assistant", "content": "An async runtime."}}],
                    "citations": ["https://legacy.example"],
                    "search_results": [{"url": "https://tokio.rs", "title": "Tokio"}]
                }))
            }),
        );
        let base = serve(router).await;

        let result = client(&base)
            .query(&Query::new(MODEL_ASK, "be brief", "what is tokio?"))
            .await
            .unwrap();
        assert_eq!(result.content, "An async runtime.");
        assert_eq!(result.citations.len(), 1);
        assert_eq!(result.citations[0].url, "https://tokio.rs");
        assert_eq!(result.citations[0].title.as_deref(), Some("Tokio"));
    }

    #[tokio::test]
    async fn test_query_legacy_citations() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async {
                Json(json!({
                    "choices": [{"message": {"content": "ok"}}],
                    "citations": ["https://a", "https://b"]
                }))
            }),
        );
        let base = serve(router).await;

        let result = client(&base)
            .query(&Query::new(MODEL_ASK, "", "q"))
            .await
            .unwrap();
        assert_eq!(
            result.citations,
            vec![Citation::from_url("https://a"), Citation::from_url("https://b")]
        );
    }

    #[tokio::test]
    async fn test_query_non_success_carries_raw_body() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (AxumStatus::INTERNAL_SERVER_ERROR, "upstream exploded") }),
        );
        let base = serve(router).await;

        let err = client(&base)
            .query(&Query::new(MODEL_ASK, "", "q"))
            .await
            .unwrap_err();
        match err {
            ApiError::RemoteApi { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "upstream exploded");
            }
            other => panic!("expected RemoteApi, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_without_choices_is_empty_response() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { Json(json!({"choices": []})) }),
        );
        let base = serve(router).await;

        let err = client(&base)
            .query(&Query::new(MODEL_ASK, "", "q"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::EmptyResponse { .. }));
    }

    #[tokio::test]
    async fn test_query_malformed_body_is_empty_response() {
        let router = Router::new().route("/chat/completions", post(|| async { "not json" }));
        let base = serve(router).await;

        let err = client(&base)
            .query(&Query::new(MODEL_ASK, "", "q"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::EmptyResponse { .. }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{}", addr))
            .query(&Query::new(MODEL_ASK, "", "q"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Transport { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_start_research_accepts_202() {
        let router = Router::new().route(
            "/async/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["request"]["model"], "sonar-deep-research");
                assert_eq!(body["request"]["messages"][0]["content"], RESEARCH_SYSTEM_PROMPT);
                assert_eq!(body["request"]["messages"][1]["content"], "quantum error correction");
                (AxumStatus::ACCEPTED, Json(json!({"id": "req_42", "status": "CREATED"})))
            }),
        );
        let base = serve(router).await;

        let id = client(&base)
            .start_research("quantum error correction")
            .await
            .unwrap();
        assert_eq!(id, "req_42");
    }

    #[tokio::test]
    async fn test_start_research_without_id_is_empty_response() {
        let router = Router::new().route("/async/chat/completions", post(|| async { Json(json!({})) }));
        let base = serve(router).await;

        let err = client(&base).start_research("topic").await.unwrap_err();
        assert!(matches!(err, ApiError::EmptyResponse { .. }));
    }

    #[tokio::test]
    async fn test_get_research_decodes_job() {
        let router = Router::new().route(
            "/async/chat/completions/{id}",
            get(|Path(id): Path<String>| async move {
                Json(json!({
                    "id": id,
                    "created_at": 1,
                    "started_at": 2,
                    "completed_at": 3,
                    "response": {"choices": [{"message": {"content": "report"}}]}
                }))
            }),
        );
        let base = serve(router).await;

        let job = client(&base).get_research("req_7").await.unwrap();
        assert_eq!(job.id, "req_7");
        assert_eq!(job.status(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_get_research_escapes_request_id() {
        let router = Router::new().route(
            "/async/chat/completions/{id}",
            get(|Path(id): Path<String>| async move { Json(json!({"id": id, "created_at": 1})) }),
        );
        let base = serve(router).await;

        let job = client(&base).get_research("req/../x?y#z").await.unwrap();
        assert_eq!(job.id, "req/../x?y#z");
        assert_eq!(job.status(), JobStatus::Pending);

        let url = client("http://localhost:1234").job_url("a/b").unwrap();
        assert_eq!(url.as_str(), "http://localhost:1234/async/chat/completions/a%2Fb");
    }

    #[test]
    fn test_job_url_rejects_unusable_base() {
        let err = client("not a url").job_url("req_1").unwrap_err();
        assert!(matches!(err, ApiError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_wait_stops_on_status_endpoint_error() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/async/chat/completions/{id}",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (AxumStatus::INTERNAL_SERVER_ERROR, "boom")
                }),
            )
            .with_state(hits.clone());
        let base = serve(router).await;

        let options = WaitOptions {
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
        };
        let err = wait_for_research(&client(&base), "req_1", options, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_from_config_trims_trailing_slash() {
        let config = ApiConfig {
            base_url: "http://localhost:1234/".into(),
            ..ApiConfig::default()
        };
        let client = PerplexityClient::from_config(&config, "k");
        assert_eq!(client.base_url(), "http://localhost:1234");
        assert_eq!(client.url("/chat/completions"), "http://localhost:1234/chat/completions");
    }
}
