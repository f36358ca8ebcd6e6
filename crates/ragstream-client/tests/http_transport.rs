use std::sync::Arc;

use ragstream_client::prelude::*;
use ragstream_client::{RetryPolicy, StaticCredential};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STREAM_PATH: &str = "/api/v1/query/stream";

fn sse(lines: &[&str]) -> ResponseTemplate {
    let body: String = lines.iter().map(|line| format!("data: {line}\n\n")).collect();
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

fn client_for(base: &str, retry: RetryPolicy) -> StreamingQueryClient {
    let config = ClientConfig::new(format!("{base}/api/v1")).retry_policy(retry);
    StreamingQueryClient::builder(config)
        .credentials(Arc::new(StaticCredential::new("sk-live")))
        .build()
        .expect("client builds")
}

fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy::exponential(max_retries, 10, 2.0)
}

#[tokio::test]
async fn request_carries_key_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .and(header("x-api-key", "sk-live"))
        .and(header("accept", "text/event-stream"))
        .and(body_json(json!({
            "question": "Where is the handbook?",
            "session_id": "sess-1",
            "use_web_search": true,
            "stream": true
        })))
        .respond_with(sse(&[r#"{"content":"In the wiki."}"#]))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), fast_retries(0));
    let outcome = client
        .send_stream(
            "  Where is the handbook?  ",
            QueryOptions::default().web_search(true).session("sess-1"),
        )
        .await
        .expect("query succeeds");
    assert_eq!(
        outcome.into_message().map(|m| m.content).as_deref(),
        Some("In the wiki.")
    );
}

#[tokio::test]
async fn full_event_stream_is_assembled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(sse(&[
            r#"{"status":"started"}"#,
            r#"{"intent":"document_search","use_rag":true,"use_web":false,"confidence":0.82,"latency_ms":41}"#,
            r#"{"type":"rag"}"#,
            r#"{"type":"rag","results":2}"#,
            r#"{"content":"Checking the guide.","is_thought":true}"#,
            r#"{"content":"Vacation requests go "}"#,
            r#"{"content":"through the HR portal."}"#,
            r#"{"conversationId":"conv-42","sources":[{"source_type":"document","document_id":"hr-7","similarity_score":0.91}]}"#,
            "[DONE]",
        ]))
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), fast_retries(0));
    let message = client
        .send_stream("How do I request vacation?", QueryOptions::default())
        .await
        .expect("query succeeds")
        .into_message()
        .expect("completed");

    assert_eq!(
        message.content,
        "Vacation requests go through the HR portal."
    );
    assert_eq!(message.thought_process.as_deref(), Some("Checking the guide."));
    assert_eq!(message.conversation_id.as_deref(), Some("conv-42"));
    assert_eq!(message.sources.len(), 1);
    assert_eq!(message.sources[0].document_id.as_deref(), Some("hr-7"));
    let routing = message.routing_info.expect("routing recorded");
    assert_eq!(routing.intent, "document_search");
    assert!(!routing.use_web);

    let snapshot = client.snapshot();
    assert!(!snapshot.is_streaming);
    assert!(
        snapshot
            .steps
            .steps()
            .iter()
            .all(|step| step.status == StepStatus::Completed)
    );
    assert_eq!(
        snapshot.steps.get(Stage::SearchRag).details.as_deref(),
        Some("2 documents found")
    );
}

#[tokio::test]
async fn unauthorized_maps_to_invalid_credential_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Invalid API key"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), fast_retries(3));
    let result = client.send_stream("hello", QueryOptions::default()).await;
    assert_eq!(
        result,
        Err(QueryError::Failed(QueryFailure::InvalidCredential))
    );
    assert_eq!(
        client.snapshot().error.as_deref(),
        Some("Invalid or expired API key. Check your API key in settings.")
    );
}

#[tokio::test]
async fn service_unavailable_recovers_on_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(sse(&[r#"{"content":"back online"}"#]))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), fast_retries(2));
    let message = client
        .send_stream("status?", QueryOptions::default())
        .await
        .expect("recovers")
        .into_message()
        .expect("completed");
    assert_eq!(message.content, "back online");
    assert_eq!(client.snapshot().retry_count, 1);
}

#[tokio::test]
async fn other_statuses_surface_the_server_detail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"detail": "vector store offline"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), fast_retries(3));
    let result = client.send_stream("hello", QueryOptions::default()).await;
    assert_eq!(
        result,
        Err(QueryError::Failed(QueryFailure::Http {
            status: 500,
            message: "vector store offline".into()
        }))
    );
}

#[tokio::test]
async fn refused_connection_exhausts_retries() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let client = client_for(&format!("http://127.0.0.1:{port}"), fast_retries(1));
    let result = client.send_stream("anyone there?", QueryOptions::default()).await;
    assert!(
        matches!(
            result,
            Err(QueryError::Failed(QueryFailure::Unreachable { attempts: 2, .. }))
        ),
        "unexpected result: {result:?}"
    );
    assert_eq!(client.snapshot().retry_count, 1);
}
