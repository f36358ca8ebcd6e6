use serde::Serialize;

use crate::model::{RoutingInfo, Source};
use crate::session::StreamSession;
use crate::steps::StepTracker;

/// Live view of the client, republished on every change.
///
/// This is what a UI renders while an answer streams in.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StreamSnapshot {
    /// True from call start until the query resolves, retries included.
    pub is_streaming: bool,
    /// True while waiting to re-send after a transient failure.
    pub is_reconnecting: bool,
    /// Automatic retries made for the current query.
    pub retry_count: u32,
    /// User-facing message of the last terminal failure.
    pub error: Option<String>,
    pub current_content: String,
    pub current_thought: String,
    pub steps: StepTracker,
    pub routing_info: Option<RoutingInfo>,
    pub sources: Vec<Source>,
    pub conversation_id: Option<String>,
}

impl StreamSnapshot {
    pub(crate) fn started() -> Self {
        Self {
            is_streaming: true,
            ..Self::default()
        }
    }

    pub(crate) fn sync_session(&mut self, session: &StreamSession) {
        self.current_content.clear();
        self.current_content.push_str(session.content());
        self.current_thought.clear();
        self.current_thought.push_str(session.thought());
        self.steps.clone_from(session.steps());
        self.routing_info = session.routing().cloned();
        self.sources = session.sources().to_vec();
        self.conversation_id = session.conversation_id().map(ToOwned::to_owned);
    }
}
