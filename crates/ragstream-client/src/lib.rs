//! Streaming client for a retrieval-augmented question answering API.
//!
//! A question is sent to `POST {api_base}/query/stream` and the answer comes
//! back as server-sent events. The client decodes the event stream, tracks
//! the pipeline steps (routing, document search, web search, generation),
//! retries transient failures with exponential backoff and can be cancelled
//! at any point.
//!
//! ```no_run
//! use ragstream_client::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = StreamingQueryClient::builder(ClientConfig::from_env()).build()?;
//!
//! let mut progress = client.subscribe();
//! tokio::spawn(async move {
//!     while progress.changed().await.is_ok() {
//!         let snapshot = progress.borrow_and_update().clone();
//!         eprintln!("{} chars so far", snapshot.current_content.len());
//!     }
//! });
//!
//! match client
//!     .send_stream("What is in the onboarding guide?", QueryOptions::default())
//!     .await?
//! {
//!     QueryOutcome::Completed(message) => println!("{}", message.content),
//!     QueryOutcome::Cancelled => eprintln!("cancelled"),
//! }
//! # Ok(())
//! # }
//! ```

/// Query client state machine and its builder.
pub mod client;
/// Endpoint, timeout and retry settings.
pub mod config;
/// API key lookup and the settings file.
pub mod credentials;
pub mod errors;
/// Decoding of individual stream events.
pub mod frame;
pub mod model;
/// Process-wide tracing setup.
pub mod observability;
pub mod notify;
/// Retry and backoff policies.
pub mod policy;
/// Common imports for typical usage.
pub mod prelude;
pub mod session;
pub mod state;
/// Pipeline step tracking.
pub mod steps;
pub mod transport;

pub use client::{ClientBuilder, StreamingQueryClient};
pub use config::{ClientConfig, DEFAULT_API_BASE};
pub use credentials::{
    CredentialStore, EnvCredentialStore, SettingsError, SettingsFileStore, StaticCredential,
};
pub use errors::{QueryError, QueryFailure, TransportError};
pub use frame::{Frame, parse_frame};
pub use model::{Message, QueryOptions, QueryOutcome, Role, RoutingInfo, Source, StreamRequest};
pub use notify::{NoopObserver, Notice, Notifier, StreamObserver, TracingNotifier};
pub use observability::init_observability;
pub use policy::{RetryPolicy, StepRetryPolicy, TimeoutBehavior};
pub use session::StreamSession;
pub use state::StreamSnapshot;
pub use steps::{Stage, Step, StepStatus, StepTracker};
pub use transport::{ByteStream, HttpTransport, QueryTransport};
