use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt as _;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::credentials::{CredentialStore, EnvCredentialStore};
use crate::errors::{QueryError, QueryFailure, TransportError};
use crate::frame::parse_frame;
use crate::model::{QueryOptions, QueryOutcome, StreamRequest};
use crate::notify::{NoopObserver, Notice, Notifier, StreamObserver, TracingNotifier};
use crate::policy::TimeoutBehavior;
use crate::session::StreamSession;
use crate::state::StreamSnapshot;
use crate::transport::sse::{LineDecoder, data_payload};
use crate::transport::{HttpTransport, QueryTransport};

/// Abort flag for the call in flight.
struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    /// Requests cancellation; the network read and any backoff wait stop at
    /// their next suspension point.
    fn abort(&self) {
        self.tx.send_replace(true);
    }
}

struct ActiveCall {
    generation: u64,
    abort: AbortHandle,
}

#[derive(Clone)]
struct LastRequest {
    question: String,
    options: QueryOptions,
}

#[derive(Default)]
struct Control {
    generation: u64,
    active: Option<ActiveCall>,
    last_request: Option<LastRequest>,
}

impl Control {
    fn is_current(&self, generation: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|call| call.generation == generation)
    }
}

/// Builder for [`StreamingQueryClient`].
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn QueryTransport>>,
    credentials: Arc<dyn CredentialStore>,
    notifier: Arc<dyn Notifier>,
    observer: Arc<dyn StreamObserver>,
}

impl ClientBuilder {
    /// Replaces the default reqwest transport.
    pub fn transport(mut self, transport: Arc<dyn QueryTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets where the API key is read from (default: `RAG_API_KEY`).
    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Sets the sink for user-facing notices (default: tracing log).
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn StreamObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn build(self) -> Result<StreamingQueryClient, TransportError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config)?),
        };
        let (state_tx, _) = watch::channel(StreamSnapshot::default());
        Ok(StreamingQueryClient {
            config: self.config,
            transport,
            credentials: self.credentials,
            notifier: self.notifier,
            observer: self.observer,
            state_tx,
            control: Mutex::new(Control::default()),
        })
    }
}

/// Sends queries to the streaming endpoint and tracks their progress.
///
/// One query runs at a time per client; a second `send_stream` while one is in
/// flight fails with [`QueryError::Busy`]. Progress is published through
/// [`subscribe`](Self::subscribe) and the configured [`StreamObserver`].
pub struct StreamingQueryClient {
    config: ClientConfig,
    transport: Arc<dyn QueryTransport>,
    credentials: Arc<dyn CredentialStore>,
    notifier: Arc<dyn Notifier>,
    observer: Arc<dyn StreamObserver>,
    state_tx: watch::Sender<StreamSnapshot>,
    control: Mutex<Control>,
}

enum AttemptResult {
    Finished,
    Aborted,
    TimedOut,
    Failed(AttemptError),
}

enum AttemptError {
    Transport(TransportError),
    Server(String),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Transport(err) => err.is_retryable(),
            AttemptError::Server(_) => false,
        }
    }

    fn into_failure(self, attempts: u32) -> QueryFailure {
        match self {
            AttemptError::Transport(err) => QueryFailure::from_transport(&err, attempts),
            AttemptError::Server(message) => QueryFailure::Server(message),
        }
    }
}

/// Releases the busy flag even if the `send_stream` future is dropped mid-flight.
struct CallGuard<'a> {
    client: &'a StreamingQueryClient,
    generation: u64,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        let _ = self.client.finish_call(self.generation, |_| {});
    }
}

impl StreamingQueryClient {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            credentials: Arc::new(EnvCredentialStore),
            notifier: Arc::new(TracingNotifier),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Receiver that sees every published [`StreamSnapshot`].
    pub fn subscribe(&self) -> watch::Receiver<StreamSnapshot> {
        self.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        self.state_tx.borrow().clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.state_tx.borrow().is_streaming
    }

    /// Sends one question and streams the answer.
    ///
    /// Returns `Completed` with the assembled message, `Cancelled` when
    /// aborted, or an error for invalid input, a missing API key, a busy
    /// client, or a terminal failure.
    pub async fn send_stream(
        &self,
        question: &str,
        options: QueryOptions,
    ) -> Result<QueryOutcome, QueryError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuestion);
        }
        let Some(api_key) = self.credentials.api_key() else {
            warn!(event = "stream.missing_credential");
            self.notifier.notify(Notice::MissingCredential);
            return Err(QueryError::MissingCredential);
        };

        let request = StreamRequest::new(question, &options);
        let (generation, abort_rx) = self.begin_call(question, options)?;
        let _guard = CallGuard {
            client: self,
            generation,
        };
        self.drive(generation, &request, &api_key, abort_rx).await
    }

    /// Re-sends the last question with a fresh retry budget.
    pub async fn retry(&self) -> Result<QueryOutcome, QueryError> {
        let last = self.lock_control().last_request.clone();
        let Some(last) = last else {
            self.notifier.notify(Notice::NoPreviousRequest);
            return Err(QueryError::NoPreviousRequest);
        };
        self.send_stream(&last.question, last.options).await
    }

    /// Aborts the query in flight, including a pending retry wait.
    ///
    /// Does nothing when no query is running.
    pub fn cancel_stream(&self) {
        let snapshot = {
            let mut control = self.lock_control();
            let Some(call) = control.active.take() else {
                return;
            };
            call.abort.abort();
            self.state_tx.send_modify(|s| {
                s.is_streaming = false;
                s.is_reconnecting = false;
            });
            self.state_tx.borrow().clone()
        };
        info!(event = "stream.cancelled");
        self.notifier.notify(Notice::Cancelled);
        self.observer.on_update(&snapshot);
    }

    /// Aborts anything in flight and forgets all query state, including the
    /// request remembered for [`retry`](Self::retry).
    pub fn reset(&self) {
        let snapshot = {
            let mut control = self.lock_control();
            if let Some(call) = control.active.take() {
                call.abort.abort();
            }
            control.last_request = None;
            self.state_tx.send_replace(StreamSnapshot::default());
            self.state_tx.borrow().clone()
        };
        debug!(event = "stream.reset");
        self.observer.on_update(&snapshot);
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_call(
        &self,
        question: &str,
        options: QueryOptions,
    ) -> Result<(u64, watch::Receiver<bool>), QueryError> {
        let (generation, snapshot, abort_rx) = {
            let mut control = self.lock_control();
            if control.active.is_some() {
                return Err(QueryError::Busy);
            }
            control.generation += 1;
            let generation = control.generation;
            let (abort, abort_rx) = AbortHandle::new();
            control.active = Some(ActiveCall { generation, abort });
            control.last_request = Some(LastRequest {
                question: question.to_string(),
                options,
            });
            self.state_tx.send_replace(StreamSnapshot::started());
            (generation, self.state_tx.borrow().clone(), abort_rx)
        };
        self.observer.on_update(&snapshot);
        Ok((generation, abort_rx))
    }

    /// Applies `update` if `generation` is still the active call.
    fn publish(&self, generation: u64, update: impl FnOnce(&mut StreamSnapshot)) {
        let snapshot = {
            let control = self.lock_control();
            if !control.is_current(generation) {
                return;
            }
            self.state_tx.send_modify(update);
            self.state_tx.borrow().clone()
        };
        self.observer.on_update(&snapshot);
    }

    /// Releases the call and publishes its final state.
    ///
    /// Returns `false` when the call was already released, i.e. cancelled or
    /// reset; the caller must then resolve as cancelled and fire no hook.
    fn finish_call(&self, generation: u64, update: impl FnOnce(&mut StreamSnapshot)) -> bool {
        let snapshot = {
            let mut control = self.lock_control();
            if !control.is_current(generation) {
                return false;
            }
            control.active = None;
            self.state_tx.send_modify(|s| {
                update(s);
                s.is_streaming = false;
                s.is_reconnecting = false;
            });
            self.state_tx.borrow().clone()
        };
        self.observer.on_update(&snapshot);
        true
    }

    async fn drive(
        &self,
        generation: u64,
        request: &StreamRequest,
        api_key: &str,
        mut abort_rx: watch::Receiver<bool>,
    ) -> Result<QueryOutcome, QueryError> {
        let policy = &self.config.retry_policy;
        let mut session = StreamSession::new();
        let mut retries_done = 0u32;
        loop {
            let attempt = retries_done + 1;
            debug!(event = "stream.attempt", attempt = attempt, max_retries = policy.max_retries);

            let error = match self
                .attempt(generation, request, api_key, &mut session, &mut abort_rx)
                .await
            {
                AttemptResult::Finished => {
                    if !self.finish_call(generation, |s| s.error = None) {
                        debug!(event = "stream.completed_after_cancel", attempt = attempt);
                        return Ok(QueryOutcome::Cancelled);
                    }
                    let message = session.into_message();
                    info!(
                        event = "stream.completed",
                        attempt = attempt,
                        content_len = message.content.len() as u64,
                        sources = message.sources.len() as u64,
                        has_conversation = message.conversation_id.is_some()
                    );
                    self.observer.on_complete(&message);
                    return Ok(QueryOutcome::Completed(message));
                }
                AttemptResult::Aborted => {
                    debug!(event = "stream.aborted", attempt = attempt);
                    return Ok(QueryOutcome::Cancelled);
                }
                AttemptResult::TimedOut
                    if self.config.timeout_behavior == TimeoutBehavior::Cancel =>
                {
                    warn!(
                        event = "stream.first_byte_timeout",
                        attempt = attempt,
                        timeout_ms = self.config.timeout.as_millis() as u64
                    );
                    if !self.finish_call(generation, |_| {}) {
                        return Ok(QueryOutcome::Cancelled);
                    }
                    self.notifier.notify(Notice::TimedOut {
                        after: self.config.timeout,
                    });
                    return Ok(QueryOutcome::Cancelled);
                }
                AttemptResult::TimedOut => AttemptError::Transport(TransportError::Timeout),
                AttemptResult::Failed(error) => error,
            };

            if *abort_rx.borrow() {
                return Ok(QueryOutcome::Cancelled);
            }

            let retryable = error.is_retryable();
            let can_retry = retryable && policy.can_retry(retries_done);
            debug!(
                event = "stream.attempt_failed",
                attempt = attempt,
                retryable = retryable,
                can_retry = can_retry
            );
            if can_retry {
                let delay = policy.backoff_duration(retries_done);
                retries_done += 1;
                info!(
                    event = "stream.retry_scheduled",
                    attempt = attempt,
                    next_attempt = attempt + 1,
                    backoff_ms = delay.as_millis() as u64
                );
                session.begin_retry(self.config.step_retry);
                self.publish(generation, |s| {
                    s.retry_count = retries_done;
                    s.is_reconnecting = true;
                    s.sync_session(&session);
                });
                self.notifier.notify(Notice::Retrying {
                    attempt: retries_done,
                    max_retries: policy.max_retries,
                    delay,
                });
                tokio::select! {
                    biased;
                    _ = wait_for_abort(&mut abort_rx) => {
                        debug!(event = "stream.retry_aborted", next_attempt = attempt + 1);
                        return Ok(QueryOutcome::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            let failure = error.into_failure(attempt);
            warn!(
                event = "stream.failed",
                attempts = attempt,
                retries = retries_done,
                error = %failure
            );
            let message = failure.to_string();
            if !self.finish_call(generation, |s| s.error = Some(message.clone())) {
                debug!(event = "stream.failed_after_cancel", attempts = attempt);
                return Ok(QueryOutcome::Cancelled);
            }
            self.notifier.notify(Notice::Failed { message });
            self.observer.on_error(&failure);
            return Err(failure.into());
        }
    }

    async fn attempt(
        &self,
        generation: u64,
        request: &StreamRequest,
        api_key: &str,
        session: &mut StreamSession,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> AttemptResult {
        let opened = tokio::select! {
            biased;
            _ = wait_for_abort(abort_rx) => return AttemptResult::Aborted,
            opened = tokio::time::timeout(self.config.timeout, self.transport.open(request, api_key)) => opened,
        };
        let mut body = match opened {
            Err(_) => return AttemptResult::TimedOut,
            Ok(Err(err)) => return AttemptResult::Failed(AttemptError::Transport(err)),
            Ok(Ok(body)) => body,
        };
        self.publish(generation, |s| s.is_reconnecting = false);

        let mut decoder = LineDecoder::with_limit(self.config.max_line_bytes);
        loop {
            let next = tokio::select! {
                biased;
                _ = wait_for_abort(abort_rx) => return AttemptResult::Aborted,
                next = body.next() => next,
            };
            let lines = match next {
                Some(Ok(chunk)) => match decoder.push(&chunk) {
                    Ok(lines) => lines,
                    Err(err) => {
                        warn!(
                            event = "stream.line_too_long",
                            limit = self.config.max_line_bytes as u64
                        );
                        return AttemptResult::Failed(AttemptError::Transport(err));
                    }
                },
                Some(Err(err)) => return AttemptResult::Failed(AttemptError::Transport(err)),
                None => {
                    if let Some(tail) = decoder.finish()
                        && let Err(message) = self.handle_line(generation, &tail, session)
                    {
                        return AttemptResult::Failed(AttemptError::Server(message));
                    }
                    return AttemptResult::Finished;
                }
            };
            for line in lines {
                if *abort_rx.borrow() {
                    return AttemptResult::Aborted;
                }
                if let Err(message) = self.handle_line(generation, &line, session) {
                    return AttemptResult::Failed(AttemptError::Server(message));
                }
            }
        }
    }

    fn handle_line(
        &self,
        generation: u64,
        line: &str,
        session: &mut StreamSession,
    ) -> Result<(), String> {
        let Some(data) = data_payload(line) else {
            return Ok(());
        };
        let frame = match parse_frame(data) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(
                    event = "stream.frame_skipped",
                    error = %err,
                    payload_len = data.len() as u64
                );
                return Ok(());
            }
        };
        if session.apply(frame)? {
            self.publish(generation, |s| s.sync_session(session));
        }
        Ok(())
    }
}

/// Resolves once the abort flag is set; never resolves if the sender is gone.
async fn wait_for_abort(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|aborted| *aborted).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
