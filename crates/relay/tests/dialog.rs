//! Aggregate dialog calls against an in-process mock upstream.

mod common;

use common::{MockUpstream, Reply};
use async_trait::async_trait;
use qingyan_auth::TokenCache;
use qingyan_relay::{AgentClient, DialogOnceClient, UpstreamHttp, sse};
use qingyan_types::{AgentCredentials, Credential, RelayError, TokenFetcher};
use std::{sync::Arc, time::Duration};

const BODY: &str = "data: {\"text\":\"he\"}\n\ndata: {\"text\":\"llo\"}\n\ndata: [DONE]\n\n";

#[tokio::test]
async fn test_returns_raw_body() {
    let mock = MockUpstream::start(Reply::Sse(BODY)).await;
    let client = AgentClient::from_config(&mock.config()).unwrap();

    let raw = client
        .send_dialog_once("agent-1", Some("conv-1"), "hello")
        .await
        .unwrap();
    assert_eq!(raw, BODY);
    assert_eq!(
        sse::data_payloads(&raw),
        vec![r#"{"text":"he"}"#, r#"{"text":"llo"}"#]
    );

    let req = &mock.requests()[0];
    assert_eq!(req.authorization.as_deref(), Some("Bearer tok-0"));
    assert_eq!(
        req.body,
        serde_json::json!({"assistant_id": "agent-1", "conversation_id": "conv-1", "prompt": "hello"})
    );
}

#[tokio::test]
async fn test_blank_message_sent_as_is() {
    let mock = MockUpstream::start(Reply::Sse(BODY)).await;
    let client = AgentClient::from_config(&mock.config()).unwrap();

    client.send_dialog_once("a", None, " ").await.unwrap();
    assert_eq!(mock.requests()[0].body["prompt"], " ");
}

#[tokio::test]
async fn test_http_error_keeps_status_and_truncates() {
    let mock = MockUpstream::start(Reply::Status(429, "y".repeat(5000))).await;
    let client = AgentClient::from_config(&mock.config()).unwrap();

    match client.send_dialog_once("a", None, "hi").await.unwrap_err() {
        RelayError::Upstream { status, body } => {
            assert_eq!(status, 429);
            assert_eq!(body.chars().count(), 2001);
            assert!(body.ends_with('…'));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_url_is_config_error() {
    let mock = MockUpstream::start(Reply::Sse(BODY)).await;
    let mut config = mock.config();
    config.agent.url = None;
    let client = AgentClient::from_config(&config).unwrap();

    let err = client.send_dialog_once("a", None, "hi").await.unwrap_err();
    assert!(matches!(err, RelayError::Config(_)), "{err:?}");
    assert_eq!(err.status(), 500);
    assert!(mock.requests().is_empty());
}

struct StaticFetcher;

#[async_trait]
impl TokenFetcher for StaticFetcher {
    async fn fetch(&self) -> qingyan_types::error::Result<Credential> {
        Ok(Credential::new("static", 0))
    }
}

#[tokio::test]
async fn test_connection_refused_is_http_error() {
    let source = Arc::new(AgentCredentials {
        base_url: Some("http://127.0.0.1:1".into()),
        ..AgentCredentials::default()
    });
    let tokens = Arc::new(TokenCache::new(Arc::new(StaticFetcher)));
    let dialog = DialogOnceClient::new(
        UpstreamHttp::new(reqwest::Client::new(), tokens, source),
        Duration::from_secs(5),
    );

    let err = dialog.send("a", None, "hi").await.unwrap_err();
    assert!(matches!(err, RelayError::Http(_)), "{err:?}");
    assert_eq!(err.status(), 500);
}
