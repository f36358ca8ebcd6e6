//! Transport seam between the client state machine and the network.
//!
//! A transport sends one request and hands back the raw body once a success
//! status has arrived. Every failure is reported as a typed [`TransportError`]
//! at the point where it happens.

mod http;
pub mod sse;

use std::pin::Pin;

use bytes::Bytes;

use crate::errors::TransportError;
use crate::model::StreamRequest;

pub use http::HttpTransport;

/// Response body as a stream of raw chunks.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<Bytes, TransportError>> + Send + 'static>>;

#[async_trait::async_trait]
pub trait QueryTransport: Send + Sync {
    /// Sends `request` authenticated with `api_key`.
    ///
    /// Resolves once response headers are in. A non-success status must be
    /// returned as [`TransportError::HttpStatus`] rather than a body.
    async fn open(
        &self,
        request: &StreamRequest,
        api_key: &str,
    ) -> Result<ByteStream, TransportError>;
}
