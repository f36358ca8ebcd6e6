use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-query switches forwarded to the server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Ask the router to consider web search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_web_search: Option<bool>,
    /// Force retrieval from the document index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_rag: Option<bool>,
    /// Ask the server to run a reflection pass before answering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_reflection: Option<bool>,
    /// Conversation to continue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl QueryOptions {
    pub fn web_search(mut self, enabled: bool) -> Self {
        self.use_web_search = Some(enabled);
        self
    }

    pub fn force_rag(mut self, enabled: bool) -> Self {
        self.force_rag = Some(enabled);
        self
    }

    pub fn reflection(mut self, enabled: bool) -> Self {
        self.enable_reflection = Some(enabled);
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Body of `POST /query/stream`. Re-sent unchanged on every retry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_web_search: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_rag: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_reflection: Option<bool>,
    pub stream: bool,
}

impl StreamRequest {
    pub fn new(question: impl Into<String>, options: &QueryOptions) -> Self {
        Self {
            question: question.into(),
            session_id: options.session_id.clone(),
            use_web_search: options.use_web_search,
            use_rag: options.force_rag,
            enable_reflection: options.enable_reflection,
            stream: true,
        }
    }
}

/// One retrieved source backing the answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

/// Router decision reported at the start of a stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingInfo {
    pub intent: String,
    pub use_rag: bool,
    pub use_web: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Final assistant message assembled from a completed stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: uuid::Uuid,
    pub role: Role,
    pub content: String,
    pub sources: Vec<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_process: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_info: Option<RoutingInfo>,
    pub created_at: DateTime<Utc>,
}

/// Non-error result of a top-level query.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryOutcome {
    /// The stream ran to the end.
    Completed(Message),
    /// The query was cancelled (by the caller or by the first-byte timeout).
    Cancelled,
}

impl QueryOutcome {
    /// Returns the message for completed queries.
    pub fn into_message(self) -> Option<Message> {
        match self {
            QueryOutcome::Completed(message) => Some(message),
            QueryOutcome::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryOutcome::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_request_omits_unset_options_and_maps_force_rag() {
        let options = QueryOptions::default().force_rag(true).session("s-1");
        let body = serde_json::to_value(StreamRequest::new("what is rust?", &options))
            .expect("serialize");
        assert_eq!(
            body,
            serde_json::json!({
                "question": "what is rust?",
                "session_id": "s-1",
                "use_rag": true,
                "stream": true
            })
        );
    }
}
