use futures::TryStreamExt as _;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::TransportError;
use crate::model::StreamRequest;

use super::{ByteStream, QueryTransport};

const API_KEY_HEADER: &str = "X-API-Key";
const MAX_ERROR_BODY: usize = 512;

/// `POST {api_base}/query/stream` over reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Builds a transport for `config.api_base`.
    ///
    /// No client-level timeout is set: the first-byte limit is enforced by the
    /// query client and the body may stream for as long as the server needs.
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            client,
            url: config.stream_url(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl QueryTransport for HttpTransport {
    async fn open(
        &self,
        request: &StreamRequest,
        api_key: &str,
    ) -> Result<ByteStream, TransportError> {
        debug!(
            event = "http.stream_request",
            url = %self.url,
            question_len = request.question.len() as u64,
            has_session = request.session_id.is_some()
        );
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .header(API_KEY_HEADER, api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::status(status.as_u16(), truncate(body)));
        }
        debug!(event = "http.stream_opened", status = status.as_u16());

        let body = response
            .bytes_stream()
            .map_err(|e| TransportError::ConnectionReset(format!("stream read failed: {e}")));
        Ok(Box::pin(body))
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("... [truncated]");
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let body = "é".repeat(400);
        let cut = truncate(body);
        assert!(cut.ends_with("... [truncated]"));
        assert!(cut.len() <= MAX_ERROR_BODY + "... [truncated]".len());
    }

    #[test]
    fn url_is_derived_from_api_base() {
        let transport =
            HttpTransport::new(&ClientConfig::new("http://127.0.0.1:9/api/v1")).expect("build");
        assert_eq!(transport.url(), "http://127.0.0.1:9/api/v1/query/stream");
    }
}
