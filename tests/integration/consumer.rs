//! Stream consumer integration tests
//!
//! Runs the relay on a real local port and drives it with the client:
//! - deltas accumulate in arrival order and reach the caller before the
//!   provider finishes
//! - relay and transport failures surface as typed errors
//! - stopping a stream keeps the partial text and releases the provider

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pretty_assertions::assert_eq;
use serde_json::Value;
use threatlens::analysis::{CountryProfile, ANALYSIS_MAX_TOKENS};
use threatlens::client::{ConsumerError, SessionState, StreamConsumer};
use threatlens::completion::{ChatMessage, CompletionRequest, StreamChunk};
use threatlens::streaming::{format_sse_chunk, format_sse_done};
use threatlens::AppState;

use crate::common::{relay_client, test_config, LiveRelay, TEST_MODEL, TEST_NIM_API_KEY};
use crate::mocks::{provider_error, ChannelProvider, MockNim};

fn request(prompt: &str) -> CompletionRequest {
    CompletionRequest::streaming(TEST_MODEL, vec![ChatMessage::user(prompt)])
}

fn frame(text: &str) -> Result<Bytes, reqwest::Error> {
    Ok(format_sse_chunk(&StreamChunk::text(text)).unwrap())
}

fn estonia() -> CountryProfile {
    CountryProfile {
        code: "EE".to_string(),
        name: "Estonia".to_string(),
        capital: "Tallinn".to_string(),
        continent: "Europe".to_string(),
    }
}

async fn relay_over_nim(nim: &MockNim) -> LiveRelay {
    let state = AppState::new(test_config(&nim.base_url(), Some(TEST_NIM_API_KEY))).unwrap();
    LiveRelay::start(state).await
}

async fn relay_over_channel() -> (LiveRelay, Arc<ChannelProvider>, crate::mocks::ChunkSender) {
    let (provider, tx) = ChannelProvider::new();
    let provider = Arc::new(provider);
    let state = AppState::with_provider(
        test_config("http://unused.invalid/v1", Some(TEST_NIM_API_KEY)),
        provider.clone(),
    );
    (LiveRelay::start(state).await, provider, tx)
}

#[tokio::test]
async fn test_stream_accumulates_deltas_in_order() {
    let nim = MockNim::start().await;
    nim.mock_stream(&["Hello", ",", " world"]).await;
    let relay = relay_over_nim(&nim).await;

    let report = relay.client().start(request("hi")).finish().await;

    assert_eq!(report.state, SessionState::Completed);
    assert_eq!(report.text, "Hello, world");
    assert_eq!(report.deltas, 3);
    assert!(report.error.is_none());
}

#[tokio::test]
async fn test_same_provider_stream_yields_identical_text() {
    let nim = MockNim::start().await;
    nim.mock_stream(&["Ransomware", " activity", " is", " rising"]).await;
    let relay = relay_over_nim(&nim).await;
    let client = relay.client();

    let first = client.start(request("hi")).finish().await;
    let second = client.start(request("hi")).finish().await;

    assert_eq!(first.text, second.text);
    assert_eq!(first.text, "Ransomware activity is rising");
}

#[tokio::test]
async fn test_malformed_frame_is_skipped_end_to_end() {
    let nim = MockNim::start().await;
    nim.mock_raw_stream(concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n\n",
        ": keep-alive\n\n",
        "data: {broken\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"B\"}}]}\n\n",
        "data: [DONE]\n\n",
    ))
    .await;
    let relay = relay_over_nim(&nim).await;

    let report = relay.client().start(request("hi")).finish().await;

    assert_eq!(report.state, SessionState::Completed);
    assert_eq!(report.text, "AB");
    assert_eq!(report.skipped_frames, 1);
}

#[tokio::test]
async fn test_rate_limit_surfaces_as_upstream_error() {
    let nim = MockNim::start().await;
    nim.mock_error(429, provider_error("Rate limit exceeded", "rate_limit_error"))
        .await;
    let relay = relay_over_nim(&nim).await;

    let report = relay.client().start(request("hi")).finish().await;

    assert_eq!(report.state, SessionState::Failed);
    assert_eq!(report.text, "");
    assert_eq!(
        report.error,
        Some(ConsumerError::Upstream {
            status: 429,
            message: "Rate limit exceeded".to_string()
        })
    );
}

#[tokio::test]
async fn test_missing_credential_surfaces_relay_message() {
    let nim = MockNim::start().await;
    nim.expect_no_requests().await;
    let relay = LiveRelay::start(AppState::new(test_config(&nim.base_url(), None)).unwrap()).await;

    let report = relay.client().start(request("hi")).finish().await;

    assert_eq!(
        report.error,
        Some(ConsumerError::Upstream {
            status: 500,
            message: "Server NIM_API_KEY is not configured".to_string()
        })
    );
}

#[tokio::test]
async fn test_unreachable_relay_surfaces_transport_error() {
    let client = relay_client("http://127.0.0.1:1");

    let report = client.start(request("hi")).finish().await;

    assert_eq!(report.state, SessionState::Failed);
    assert!(matches!(report.error, Some(ConsumerError::Transport(_))));
}

#[tokio::test]
async fn test_deltas_arrive_before_provider_finishes() {
    let (relay, _provider, tx) = relay_over_channel().await;

    let session = relay.client().start(request("hi"));
    let mut text = session.subscribe_text();

    tx.unbounded_send(frame("Hello")).unwrap();
    tokio::time::timeout(Duration::from_secs(5), text.wait_for(|t| t == "Hello"))
        .await
        .expect("first delta was buffered by the relay")
        .unwrap();
    assert_eq!(session.state(), SessionState::Streaming);

    tx.unbounded_send(frame(" world")).unwrap();
    tx.unbounded_send(Ok(format_sse_done())).unwrap();

    let report = session.finish().await;
    assert_eq!(report.state, SessionState::Completed);
    assert_eq!(report.text, "Hello world");
}

#[tokio::test]
async fn test_cancel_keeps_partial_text_and_releases_provider() {
    let (relay, _provider, tx) = relay_over_channel().await;

    let session = relay.client().start(request("hi"));
    let mut text = session.subscribe_text();

    tx.unbounded_send(frame("Partial")).unwrap();
    text.wait_for(|t| t == "Partial").await.unwrap();

    session.cancel();
    let report = session.finish().await;

    assert_eq!(report.state, SessionState::Stopped);
    assert_eq!(report.error, Some(ConsumerError::AbortedByUser));
    assert_eq!(report.text, "Partial");

    // The relay notices the closed connection on its next writes and drops
    // the provider stream.
    let released = tokio::time::timeout(Duration::from_secs(5), async {
        while tx.unbounded_send(frame(" late")).is_ok() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "provider stream was not released");
}

#[tokio::test]
async fn test_consumer_analysis_publishes_and_sends_analysis_request() {
    let (relay, provider, tx) = relay_over_channel().await;
    let mut consumer = StreamConsumer::new(relay.client());

    tx.unbounded_send(frame("Risk is")).unwrap();
    tx.unbounded_send(frame(" elevated")).unwrap();
    tx.unbounded_send(Ok(format_sse_done())).unwrap();

    let report = consumer.analyze_threats(&estonia(), &[]).await;

    assert!(report.is_completed());
    assert_eq!(consumer.analysis(), "Risk is elevated");
    assert_eq!(consumer.error(), None);
    assert!(!consumer.is_streaming());

    let bodies = provider.bodies();
    assert_eq!(bodies.len(), 1);
    let sent: Value = serde_json::from_slice(&bodies[0]).unwrap();
    assert_eq!(sent["model"], TEST_MODEL);
    assert_eq!(sent["stream"], true);
    assert_eq!(sent["max_tokens"], ANALYSIS_MAX_TOKENS);
    assert_eq!(sent["messages"][0]["role"], "system");
    assert!(sent["messages"][1]["content"]
        .as_str()
        .unwrap()
        .contains("Estonia"));
}

#[tokio::test]
async fn test_consumer_stop_reports_stopped_by_user() {
    let (relay, _provider, tx) = relay_over_channel().await;
    let mut consumer = StreamConsumer::new(relay.client());
    let stop = consumer.stop_handle();
    let mut analysis = consumer.subscribe_analysis();

    tx.unbounded_send(frame("Partial")).unwrap();

    let country = estonia();
    let driver = async {
        analysis.wait_for(|t| t == "Partial").await.unwrap();
        assert!(stop.stop());
    };
    let (report, ()) = tokio::join!(consumer.analyze_threats(&country, &[]), driver);

    assert_eq!(report.state, SessionState::Stopped);
    assert_eq!(consumer.analysis(), "Partial");
    assert_eq!(consumer.error(), Some("Analysis was stopped by user"));
    assert!(!consumer.stop());
}

#[tokio::test]
async fn test_consumer_chat_leaves_analysis_untouched() {
    let nim = MockNim::start().await;
    nim.mock_stream(&["Phishing", " is", " social", " engineering"]).await;
    let relay = relay_over_nim(&nim).await;
    let mut consumer = StreamConsumer::new(relay.client());

    let reply = consumer
        .chat(vec![ChatMessage::user("What is phishing?")])
        .await
        .unwrap();

    assert_eq!(reply, "Phishing is social engineering");
    assert_eq!(consumer.analysis(), "");
}

#[tokio::test]
async fn test_consumer_chat_error_is_recorded() {
    let nim = MockNim::start().await;
    nim.mock_error(503, provider_error("Model is overloaded", "server_error"))
        .await;
    let relay = relay_over_nim(&nim).await;
    let mut consumer = StreamConsumer::new(relay.client());

    let result = consumer.chat(vec![ChatMessage::user("hi")]).await;

    assert_eq!(
        result,
        Err(ConsumerError::Upstream {
            status: 503,
            message: "Model is overloaded".to_string()
        })
    );
    assert_eq!(consumer.error(), Some("relay error 503: Model is overloaded"));
}
