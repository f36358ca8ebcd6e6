use tracing::debug;

use crate::frame::Frame;
use crate::model::{Message, Role, RoutingInfo, Source};
use crate::policy::StepRetryPolicy;
use crate::steps::{Stage, StepTracker};

const NOT_REQUIRED: &str = "not required";

/// Accumulated state of one top-level query.
///
/// Answer text, thought text, sources and routing belong to the current
/// attempt and restart on retry; the step tracker spans the whole query
/// unless [`StepRetryPolicy::Reset`] is used.
#[derive(Debug, Default)]
pub struct StreamSession {
    steps: StepTracker,
    content: String,
    thought: String,
    routing: Option<RoutingInfo>,
    sources: Vec<Source>,
    conversation_id: Option<String>,
}

impl StreamSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &StepTracker {
        &self.steps
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn thought(&self) -> &str {
        &self.thought
    }

    pub fn routing(&self) -> Option<&RoutingInfo> {
        self.routing.as_ref()
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Clears per-attempt data before a failed attempt is re-sent.
    pub fn begin_retry(&mut self, policy: StepRetryPolicy) {
        self.content.clear();
        self.thought.clear();
        self.routing = None;
        self.sources.clear();
        self.conversation_id = None;
        if policy == StepRetryPolicy::Reset {
            self.steps = StepTracker::new();
        }
    }

    /// Applies one frame. Returns whether anything observable changed.
    ///
    /// An error frame is returned as `Err` with the server's message.
    pub fn apply(&mut self, frame: Frame) -> Result<bool, String> {
        let changed = match frame {
            Frame::Error(message) => return Err(message),
            Frame::RoutingStarted => self.steps.start(Stage::Routing, None),
            Frame::Routing(info) => self.apply_routing(info),
            Frame::RagSearch { results } => {
                let started = self.steps.start(Stage::SearchRag, Some("searching documents".into()));
                let completed = match results {
                    Some(count) => self
                        .steps
                        .complete(Stage::SearchRag, Some(documents_found(count))),
                    None => false,
                };
                started || completed
            }
            Frame::WebSearch { found } => {
                let started = self.steps.start(Stage::SearchWeb, Some("searching the web".into()));
                let completed = match found {
                    Some(true) => self
                        .steps
                        .complete(Stage::SearchWeb, Some("Results found".into())),
                    Some(false) => self
                        .steps
                        .complete(Stage::SearchWeb, Some("No results found".into())),
                    None => false,
                };
                started || completed
            }
            Frame::Content { text, is_thought } if is_thought => {
                self.thought.push_str(&text);
                !text.is_empty()
            }
            Frame::Content { text, .. } => {
                if text.is_empty() {
                    false
                } else {
                    self.steps.start(Stage::Generating, None);
                    self.content.push_str(&text);
                    true
                }
            }
            Frame::Source(source) => {
                self.sources.push(source);
                true
            }
            Frame::Complete {
                conversation_id,
                sources,
                text,
            } => {
                if let Some(text) = text {
                    self.steps.start(Stage::Generating, None);
                    self.content.push_str(&text);
                }
                self.steps.complete(Stage::Generating, None);
                self.conversation_id = Some(conversation_id);
                if let Some(sources) = sources {
                    self.sources = sources;
                }
                true
            }
            Frame::Unknown => {
                debug!(event = "stream.frame_ignored");
                false
            }
        };
        Ok(changed)
    }

    fn apply_routing(&mut self, info: RoutingInfo) -> bool {
        let mut changed = self.steps.complete(Stage::Routing, Some(info.intent.clone()));
        if !info.use_rag {
            changed |= self
                .steps
                .complete(Stage::SearchRag, Some(NOT_REQUIRED.into()));
        }
        if !info.use_web {
            changed |= self
                .steps
                .complete(Stage::SearchWeb, Some(NOT_REQUIRED.into()));
        }
        if self.routing.is_none() {
            self.routing = Some(info);
            changed = true;
        }
        changed
    }

    /// Assembles the final assistant message.
    pub fn into_message(self) -> Message {
        Message {
            id: uuid::Uuid::new_v4(),
            role: Role::Assistant,
            content: self.content,
            sources: self.sources,
            conversation_id: self.conversation_id,
            thought_process: Some(self.thought).filter(|t| !t.is_empty()),
            routing_info: self.routing,
            created_at: chrono::Utc::now(),
        }
    }
}

fn documents_found(count: usize) -> String {
    match count {
        1 => "1 document found".to_string(),
        n => format!("{n} documents found"),
    }
}
