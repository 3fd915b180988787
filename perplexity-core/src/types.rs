//! Wire and domain types shared by the query and research clients.

use serde::{Deserialize, Serialize};

/// Model tier used by the `ask` tool.
pub const MODEL_ASK: &str = "sonar";
/// Model tier used by the `reason` tool.
pub const MODEL_REASON: &str = "sonar-reasoning";
/// Deep-research tier, only reachable through the async job endpoints.
pub const MODEL_DEEP_RESEARCH: &str = "sonar-deep-research";

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in an outgoing chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// One question for the remote model: model tier, system instruction, user query.
///
/// The model tier is passed through as-is; validation happens remote-side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    model: String,
    system_prompt: String,
    user_query: String,
}

impl Query {
    pub fn new(
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        user_query: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            user_query: user_query.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn user_query(&self) -> &str {
        &self.user_query
    }

    /// Build the two-message (system, then user) request body.
    pub fn to_request(&self) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(&self.system_prompt),
                Message::user(&self.user_query),
            ],
        }
    }
}

/// Body of `POST /chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
}

/// Body of `POST /async/chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncChatRequest {
    pub request: ChatRequest,
}

/// The message inside a response choice. Only the content is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: ChoiceMessage,
}

/// A chat completion response as returned by the remote API.
///
/// Sources arrive in one of two shapes: `citations` (legacy, bare URLs) or
/// `search_results` (structured). See [`crate::citations::normalize`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Option<Vec<Choice>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_results: Option<Vec<Citation>>,
}

impl ChatResponse {
    pub fn choices(&self) -> &[Choice] {
        self.choices.as_deref().unwrap_or_default()
    }

    /// Content of the first choice plus normalized citations.
    ///
    /// Returns `None` when the response carries no choices.
    pub fn to_query_result(&self) -> Option<QueryResult> {
        let first = self.choices().first()?;
        Some(QueryResult {
            content: first.message.content.clone(),
            citations: crate::citations::normalize(self),
        })
    }
}

/// A single evidentiary source backing part of an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl Citation {
    /// A citation carrying only a URL, as produced from the legacy shape.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            date: None,
            snippet: None,
        }
    }
}

/// Final answer text plus its ordered sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub content: String,
    pub citations: Vec<Citation>,
}
