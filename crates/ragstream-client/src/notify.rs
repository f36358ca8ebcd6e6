use std::time::Duration;

use tracing::{info, warn};

use crate::errors::QueryFailure;
use crate::model::Message;
use crate::state::StreamSnapshot;

/// User-facing notification raised by the client.
///
/// Successful completion raises none; the rendered message is the feedback.
#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    /// No API key could be resolved.
    MissingCredential,
    /// A transient failure is being retried.
    Retrying {
        attempt: u32,
        max_retries: u32,
        delay: Duration,
    },
    /// The query failed for good.
    Failed { message: String },
    /// The caller cancelled the query.
    Cancelled,
    /// No response arrived before the first-byte timeout.
    TimedOut { after: Duration },
    /// `retry()` was called with nothing to retry.
    NoPreviousRequest,
}

impl Notice {
    /// Short text suitable for a toast or status line.
    pub fn text(&self) -> String {
        match self {
            Notice::MissingCredential => {
                "No API key configured. Add your API key in settings first.".to_string()
            }
            Notice::Retrying {
                attempt,
                max_retries,
                delay,
            } => format!(
                "Connection problem, reconnecting in {:.1}s (attempt {attempt}/{max_retries})",
                delay.as_secs_f64()
            ),
            Notice::Failed { message } => message.clone(),
            Notice::Cancelled => "Query cancelled.".to_string(),
            Notice::TimedOut { after } => format!(
                "No response from the server after {}s; query cancelled.",
                after.as_secs()
            ),
            Notice::NoPreviousRequest => "Nothing to retry yet.".to_string(),
        }
    }
}

/// Sink for [`Notice`]s (toasts, status bars, logs).
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the tracing log.
#[derive(Clone, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match &notice {
            Notice::Failed { .. } | Notice::MissingCredential | Notice::TimedOut { .. } => {
                warn!(event = "notice", text = %notice.text());
            }
            _ => info!(event = "notice", text = %notice.text()),
        }
    }
}

/// Construction-time hooks for cross-cutting consumers (rendering, audit logs).
///
/// Per-query results are returned from `send_stream`; these hooks only mirror them.
pub trait StreamObserver: Send + Sync {
    /// Called after every published state change, in order.
    fn on_update(&self, _snapshot: &StreamSnapshot) {}

    /// Called once when a query completes.
    fn on_complete(&self, _message: &Message) {}

    /// Called once when a query fails terminally. Never called for cancellation.
    fn on_error(&self, _failure: &QueryFailure) {}
}

/// Observer that ignores everything.
#[derive(Clone, Debug, Default)]
pub struct NoopObserver;

impl StreamObserver for NoopObserver {}
