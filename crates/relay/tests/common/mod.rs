//! In-process mock of the agent service.
#![allow(dead_code)]

use axum::{
    Json, Router,
    body::Body,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use futures_util::{StreamExt as _, stream};
use qingyan_config::Config;
use qingyan_types::{RelayEvent, RelaySink};
use serde_json::{Value, json};
use std::{
    convert::Infallible,
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// What `/stream` answers with.
#[derive(Clone)]
pub enum Reply {
    /// 200 with a complete event-stream body.
    Sse(&'static str),
    /// Non-2xx with a plain body.
    Status(u16, String),
    /// 200, sends the prefix, then never finishes.
    Hang(&'static str),
    /// 200, sends the prefix, then fails the body.
    Broken(&'static str),
}

#[derive(Debug, Clone)]
pub struct Captured {
    pub authorization: Option<String>,
    pub accept: Option<String>,
    pub body: Value,
}

pub struct MockUpstream {
    pub base: String,
    pub requests: Arc<Mutex<Vec<Captured>>>,
    pub token_calls: Arc<AtomicUsize>,
}

impl MockUpstream {
    pub async fn start(reply: Reply) -> Self {
        Self::start_with_token_delay(reply, Duration::ZERO).await
    }

    /// Like [`MockUpstream::start`], with `/get_token` answering after `delay`.
    pub async fn start_with_token_delay(reply: Reply, delay: Duration) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let token_calls = Arc::new(AtomicUsize::new(0));

        let calls = Arc::clone(&token_calls);
        let seen = Arc::clone(&requests);
        let router = Router::new()
            .route(
                "/get_token",
                post(move || async move {
                    tokio::time::sleep(delay).await;
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Json(json!({
                        "status": 0,
                        "message": "ok",
                        "result": {"access_token": format!("tok-{n}"), "expires_in": 3600}
                    }))
                }),
            )
            .route(
                "/stream",
                post(move |headers: HeaderMap, Json(body): Json<Value>| async move {
                    let text = |name: header::HeaderName| {
                        headers
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string)
                    };
                    seen.lock().unwrap().push(Captured {
                        authorization: text(header::AUTHORIZATION),
                        accept: text(header::ACCEPT),
                        body,
                    });
                    respond(reply.clone())
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        Self {
            base: format!("http://{addr}"),
            requests,
            token_calls,
        }
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.agent.url = Some(self.base.clone());
        config.agent.api_key = Some("key-1".into());
        config.agent.api_secret = Some("secret-1".into());
        config
    }

    pub fn requests(&self) -> Vec<Captured> {
        self.requests.lock().unwrap().clone()
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }
}

fn respond(reply: Reply) -> Response {
    match reply {
        Reply::Sse(body) => ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response(),
        Reply::Status(code, body) => (StatusCode::from_u16(code).unwrap(), body).into_response(),
        Reply::Hang(prefix) => {
            let chunks = stream::once(async move { Ok::<_, Infallible>(prefix) })
                .chain(stream::pending());
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(chunks),
            )
                .into_response()
        }
        Reply::Broken(prefix) => {
            let chunks = stream::once(async move { Ok(prefix) }).chain(stream::once(async {
                Err(io::Error::other("upstream reset"))
            }));
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(chunks),
            )
                .into_response()
        }
    }
}

/// Sink that records every event.
pub fn recorder() -> (Arc<Mutex<Vec<RelayEvent>>>, impl RelaySink) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    (seen, move |ev: RelayEvent| s.lock().unwrap().push(ev))
}

/// Poll `events` until it has at least `n` entries.
pub async fn wait_for_events(events: &Arc<Mutex<Vec<RelayEvent>>>, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while events.lock().unwrap().len() < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("events did not arrive");
}
