//! Classification of `data:` payloads from the query stream.
//!
//! The server does not tag its frames; the kind is decided by which fields are
//! present, checked in the order of [`Frame`]'s variants.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::model::{RoutingInfo, Source};

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// `{error}`; ends the stream.
    Error(String),
    /// `{status: "started"}`.
    RoutingStarted,
    /// `{intent, use_rag, use_web, ...}`.
    Routing(RoutingInfo),
    /// `{type: "rag", results?}`; `results` is the number of retrieved documents.
    RagSearch { results: Option<usize> },
    /// `{type: "web", found?}`.
    WebSearch { found: Option<bool> },
    /// `{conversation_id, sources?, content?}`; last frame of a successful stream.
    ///
    /// `text` holds answer text that arrived on the same frame.
    Complete {
        conversation_id: String,
        sources: Option<Vec<Source>>,
        text: Option<String>,
    },
    /// `{content, is_thought?}`.
    Content { text: String, is_thought: bool },
    /// `{source_type, ...}`.
    Source(Source),
    /// Valid JSON that matches none of the above.
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
struct WireFrame {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient")]
    status: Option<String>,
    #[serde(default)]
    intent: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    use_rag: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    use_web: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    reasoning: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    latency_ms: Option<f64>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    results: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient")]
    found: Option<bool>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    is_thought: Option<bool>,
    #[serde(default)]
    source_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    content_preview: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    similarity_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    url: Option<String>,
    #[serde(default)]
    document_id: Option<serde_json::Value>,
    #[serde(default, alias = "conversationId")]
    conversation_id: Option<serde_json::Value>,
    #[serde(default)]
    sources: Option<Vec<serde_json::Value>>,
}

/// Optional metadata of the wrong JSON type is dropped instead of failing the frame.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// Parses one `data:` payload.
///
/// Fails only when the payload is not a JSON object or a core field has the wrong type.
pub fn parse_frame(data: &str) -> Result<Frame, serde_json::Error> {
    let wire: WireFrame = serde_json::from_str(data)?;
    Ok(classify(wire))
}

fn classify(mut wire: WireFrame) -> Frame {
    if let Some(error) = wire.error.take().filter(|v| !v.is_null()) {
        return Frame::Error(error_text(&error));
    }
    if wire.status.as_deref() == Some("started") && wire.intent.is_none() {
        return Frame::RoutingStarted;
    }
    if let Some(intent) = wire.intent.take() {
        // Only an explicit `false` means a search stage is skipped.
        return Frame::Routing(RoutingInfo {
            intent,
            use_rag: wire.use_rag.unwrap_or(true),
            use_web: wire.use_web.unwrap_or(true),
            confidence: wire.confidence,
            reasoning: wire.reasoning.take(),
            latency_ms: wire
                .latency_ms
                .filter(|ms| ms.is_finite() && *ms >= 0.0)
                .map(|ms| ms.round() as u64),
        });
    }
    match wire.kind.as_deref() {
        Some("rag") => {
            return Frame::RagSearch {
                results: wire.results.as_ref().and_then(result_count),
            };
        }
        Some("web") => return Frame::WebSearch { found: wire.found },
        _ => {}
    }
    if let Some(conversation_id) = wire.conversation_id.as_ref().and_then(scalar_text) {
        // Entries without a `source_type` are dropped rather than failing the frame.
        let sources = wire.sources.take().map(|items| {
            items
                .into_iter()
                .filter_map(|item| serde_json::from_value::<WireFrame>(item).ok())
                .filter_map(source_from_wire)
                .collect()
        });
        return Frame::Complete {
            conversation_id,
            sources,
            text: wire
                .content
                .take()
                .filter(|t| !t.is_empty() && wire.is_thought != Some(true)),
        };
    }
    if let Some(text) = wire.content.take() {
        return Frame::Content {
            text,
            is_thought: wire.is_thought.unwrap_or(false),
        };
    }
    if wire.source_type.is_some() {
        return source_from_wire(wire).map_or(Frame::Unknown, Frame::Source);
    }
    Frame::Unknown
}

fn source_from_wire(wire: WireFrame) -> Option<Source> {
    Some(Source {
        source_type: wire.source_type?,
        content_preview: wire.content_preview,
        similarity_score: wire.similarity_score,
        url: wire.url,
        document_id: wire.document_id.as_ref().and_then(scalar_text),
    })
}

fn error_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other
            .get("message")
            .or_else(|| other.get("detail"))
            .and_then(|v| v.as_str())
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| other.to_string()),
    }
}

fn result_count(value: &serde_json::Value) -> Option<usize> {
    match value {
        serde_json::Value::Array(items) => Some(items.len()),
        serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
        _ => None,
    }
}

fn scalar_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(text) if !text.is_empty() => Some(text.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
