//! Four-stage progress tracker shown while a query streams.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-side pipeline stages, in display order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Routing,
    SearchRag,
    SearchWeb,
    Generating,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Routing,
        Stage::SearchRag,
        Stage::SearchWeb,
        Stage::Generating,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Routing => "routing",
            Stage::SearchRag => "search_rag",
            Stage::SearchWeb => "search_web",
            Stage::Generating => "generating",
        }
    }

    fn index(self) -> usize {
        match self {
            Stage::Routing => 0,
            Stage::SearchRag => 1,
            Stage::SearchWeb => 2,
            Stage::Generating => 3,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered so that `Pending < InProgress < Completed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub stage: Stage,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Forward-only state for the four stages.
///
/// Transitions that would move a stage backwards are ignored and reported as
/// `false`, so callers can apply server frames without checking order first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTracker {
    steps: [Step; 4],
}

impl Default for StepTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StepTracker {
    pub fn new() -> Self {
        Self {
            steps: Stage::ALL.map(|stage| Step {
                stage,
                status: StepStatus::Pending,
                details: None,
            }),
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn get(&self, stage: Stage) -> &Step {
        &self.steps[stage.index()]
    }

    pub fn status(&self, stage: Stage) -> StepStatus {
        self.get(stage).status
    }

    /// Marks a pending stage as in progress.
    pub fn start(&mut self, stage: Stage, details: Option<String>) -> bool {
        self.advance(stage, StepStatus::InProgress, details)
    }

    /// Marks a stage as completed unless it already is.
    pub fn complete(&mut self, stage: Stage, details: Option<String>) -> bool {
        self.advance(stage, StepStatus::Completed, details)
    }

    fn advance(&mut self, stage: Stage, to: StepStatus, details: Option<String>) -> bool {
        let step = &mut self.steps[stage.index()];
        if step.status >= to {
            return false;
        }
        step.status = to;
        if details.is_some() {
            step.details = details;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_tracker_has_four_pending_stages_in_order() {
        let tracker = StepTracker::new();
        let stages: Vec<Stage> = tracker.steps().iter().map(|s| s.stage).collect();
        assert_eq!(stages, Stage::ALL.to_vec());
        assert!(
            tracker
                .steps()
                .iter()
                .all(|s| s.status == StepStatus::Pending)
        );
    }

    #[test]
    fn stages_never_move_backwards() {
        let mut tracker = StepTracker::new();
        assert!(tracker.complete(Stage::Routing, Some("factual".into())));
        assert!(!tracker.start(Stage::Routing, None));
        assert!(!tracker.complete(Stage::Routing, Some("again".into())));
        let routing = tracker.get(Stage::Routing);
        assert_eq!(routing.status, StepStatus::Completed);
        assert_eq!(routing.details.as_deref(), Some("factual"));
    }

    #[test]
    fn start_then_complete_keeps_details_unless_replaced() {
        let mut tracker = StepTracker::new();
        assert!(tracker.start(Stage::SearchRag, Some("searching".into())));
        assert!(!tracker.start(Stage::SearchRag, None));
        assert!(tracker.complete(Stage::SearchRag, None));
        assert_eq!(
            tracker.get(Stage::SearchRag).details.as_deref(),
            Some("searching")
        );
    }
}
