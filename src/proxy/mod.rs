//! HTTP surface of the proxy.
//!
//! | Method | Path                   | Handler                       |
//! |--------|------------------------|-------------------------------|
//! | POST   | `/v1/chat/completions` | [`handlers::chat_completions`] |
//! | GET    | `/events`              | [`handlers::recent_events`]    |
//! | OPTIONS| any                    | answered by [`cors::cors`]     |
//! | other  | any                    | 404                           |

pub mod client;
pub mod cors;
pub mod error;
pub mod handlers;
pub mod payload;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::Mutex;

use crate::cache::ResponseCache;
use crate::event_log::EventLog;

pub use client::{CompletionBackend, HttpBackend};
pub use error::ProxyError;

#[derive(Clone)]
pub struct AppState {
    /// Locked for the whole lookup, backend call, store sequence.
    pub cache: Arc<Mutex<ResponseCache>>,
    pub backend: Arc<dyn CompletionBackend>,
    pub events: EventLog,
}

impl AppState {
    pub fn new(cache: ResponseCache, backend: Arc<dyn CompletionBackend>, events: EventLog) -> Self {
        Self {
            cache: Arc::new(Mutex::new(cache)),
            backend,
            events,
        }
    }
}

pub fn create_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route(
            "/v1/chat/completions",
            post(handlers::chat_completions).fallback(handlers::not_found),
        )
        .route(
            "/events",
            get(handlers::recent_events).fallback(handlers::not_found),
        )
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(axum::middleware::from_fn(cors::cors))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{Body, Bytes};
    use axum::http::{HeaderMap, Method, Request, StatusCode};
    use chrono::NaiveDateTime;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::db::Database;
    use crate::event_log::DEFAULT_RECENT_LIMIT;
    use crate::fingerprint::fingerprint_data_url;
    use crate::fingerprint::hash::test_images::{data_url, split_vertical, split_vertical_inverted};

    const HELLO: &str = r#"{"choices":[{"message":{"content":"hello"}}]}"#;

    struct MockBackend {
        calls: AtomicUsize,
        last_body: StdMutex<Option<Bytes>>,
        reply: Result<Bytes, &'static str>,
        delay: Duration,
    }

    #[async_trait]
    impl CompletionBackend for MockBackend {
        async fn complete(&self, body: Bytes) -> Result<Bytes, ProxyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_body.lock().unwrap() = Some(body);
            tokio::time::sleep(self.delay).await;
            self.reply
                .clone()
                .map_err(|msg| ProxyError::backend("send", msg))
        }
    }

    struct Harness {
        app: Router,
        backend: Arc<MockBackend>,
        state: AppState,
        _dir: TempDir,
    }

    impl Harness {
        fn new(reply: Result<&'static str, &'static str>) -> Self {
            Self::build(reply, Duration::ZERO, 32 * 1024 * 1024)
        }

        fn build(
            reply: Result<&'static str, &'static str>,
            delay: Duration,
            max_body_bytes: usize,
        ) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let events = EventLog::new(Database::new(dir.path().join("events.db")).unwrap());
            let backend = Arc::new(MockBackend {
                calls: AtomicUsize::new(0),
                last_body: StdMutex::new(None),
                reply: reply.map(|s| Bytes::from_static(s.as_bytes())),
                delay,
            });
            let state = AppState::new(ResponseCache::default(), backend.clone(), events);
            Self {
                app: create_router(state.clone(), max_body_bytes),
                backend,
                state,
                _dir: dir,
            }
        }

        fn calls(&self) -> usize {
            self.backend.calls.load(Ordering::SeqCst)
        }

        async fn send(&self, req: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
            let resp = self.app.clone().oneshot(req).await.unwrap();
            let status = resp.status();
            let headers = resp.headers().clone();
            let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
                .await
                .unwrap();
            (status, headers, body)
        }

        async fn chat(&self, body: String) -> (StatusCode, HeaderMap, Bytes) {
            self.send(chat_request(body)).await
        }

        async fn event_contents(&self) -> Vec<String> {
            self.state
                .events
                .recent(DEFAULT_RECENT_LIMIT)
                .await
                .into_iter()
                .map(|e| e.content)
                .collect()
        }
    }

    fn chat_request(body: String) -> Request<Body> {
        Request::post("/v1/chat/completions")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn chat_body(image_url: &str) -> String {
        json!({
            "model": "smolvlm",
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": "What do you see?" },
                    { "type": "image_url", "image_url": { "url": image_url } }
                ]
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn cache_miss_round_trip() {
        let h = Harness::new(Ok(HELLO));
        let image = data_url(&split_vertical());
        let body = chat_body(&image);

        let (status, headers, resp) = h.chat(body.clone()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(resp, Bytes::from_static(HELLO.as_bytes()));
        assert_eq!(h.calls(), 1);
        assert_eq!(
            h.backend.last_body.lock().unwrap().as_deref(),
            Some(body.as_bytes())
        );

        let cache = h.state.cache.lock().await;
        let entry = cache.entry().unwrap();
        assert_eq!(entry.fingerprint, fingerprint_data_url(&image).unwrap());
        assert_eq!(entry.response, Bytes::from_static(HELLO.as_bytes()));
        drop(cache);

        assert_eq!(h.event_contents().await, ["hello"]);
    }

    #[tokio::test]
    async fn identical_image_is_served_from_cache() {
        let h = Harness::new(Ok(HELLO));
        let body = chat_body(&data_url(&split_vertical()));

        let (_, _, first) = h.chat(body.clone()).await;
        let (status, _, second) = h.chat(body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(first, second);
        assert_eq!(h.calls(), 1);
        assert_eq!(h.event_contents().await.len(), 1);
    }

    #[tokio::test]
    async fn overlapping_duplicates_reach_the_backend_once() {
        let h = Harness::build(Ok(HELLO), Duration::from_millis(200), 32 * 1024 * 1024);
        let body = chat_body(&data_url(&split_vertical()));

        let (first, second) = tokio::join!(
            h.app.clone().oneshot(chat_request(body.clone())),
            h.app.clone().oneshot(chat_request(body)),
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
        let first = axum::body::to_bytes(first.into_body(), usize::MAX)
            .await
            .unwrap();
        let second = axum::body::to_bytes(second.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first, Bytes::from_static(HELLO.as_bytes()));

        assert_eq!(h.calls(), 1);
        assert_eq!(h.event_contents().await, ["hello"]);
    }

    #[tokio::test]
    async fn oversized_body_is_a_json_500() {
        let h = Harness::build(Ok(HELLO), Duration::ZERO, 64);
        let body = chat_body(&data_url(&split_vertical()));
        assert!(body.len() > 64);

        let (status, headers, resp) = h.chat(body).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(headers["access-control-allow-origin"], "*");
        let json: Value = serde_json::from_slice(&resp).unwrap();
        assert!(json["error"]
            .as_str()
            .unwrap()
            .contains("Failed to read request body"));
        assert_eq!(h.calls(), 0);
    }

    #[tokio::test]
    async fn different_image_goes_to_backend() {
        let h = Harness::new(Ok(HELLO));

        h.chat(chat_body(&data_url(&split_vertical()))).await;
        let (status, _, _) = h
            .chat(chat_body(&data_url(&split_vertical_inverted())))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.calls(), 2);
        assert_eq!(h.event_contents().await.len(), 2);
    }

    #[tokio::test]
    async fn missing_image_is_rejected_without_side_effects() {
        let h = Harness::new(Ok(HELLO));
        let body = json!({
            "messages": [{ "role": "user", "content": [{ "type": "text", "text": "hi" }] }]
        })
        .to_string();

        let (status, headers, resp) = h.chat(body).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(headers["access-control-allow-origin"], "*");
        let json: Value = serde_json::from_slice(&resp).unwrap();
        assert!(json["error"].as_str().unwrap().contains("No image"));
        assert_eq!(h.calls(), 0);
        assert!(h.event_contents().await.is_empty());
        assert!(h.state.cache.lock().await.entry().is_none());
    }

    #[tokio::test]
    async fn malformed_image_leaves_state_untouched() {
        let h = Harness::new(Ok(HELLO));
        h.chat(chat_body(&data_url(&split_vertical()))).await;
        let before = h.state.cache.lock().await.entry().cloned().unwrap();

        let (status, _, resp) = h
            .chat(chat_body("data:image/png;base64,bm90IGFuIGltYWdl"))
            .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json: Value = serde_json::from_slice(&resp).unwrap();
        assert!(json["error"].is_string());
        assert_eq!(h.calls(), 1);
        assert_eq!(h.event_contents().await.len(), 1);
        let after = h.state.cache.lock().await.entry().cloned().unwrap();
        assert_eq!(after.fingerprint, before.fingerprint);
        assert_eq!(after.response, before.response);
    }

    #[tokio::test]
    async fn invalid_json_is_a_500() {
        let h = Harness::new(Ok(HELLO));
        let (status, _, resp) = h.chat("{not json".to_string()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json: Value = serde_json::from_slice(&resp).unwrap();
        assert!(json["error"].as_str().unwrap().contains("Invalid JSON"));
        assert_eq!(h.calls(), 0);
    }

    #[tokio::test]
    async fn backend_failure_is_not_cached() {
        let h = Harness::new(Err("connection refused"));

        let (status, _, resp) = h.chat(chat_body(&data_url(&split_vertical()))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json: Value = serde_json::from_slice(&resp).unwrap();
        assert!(json["error"].as_str().unwrap().contains("connection refused"));
        assert!(h.state.cache.lock().await.entry().is_none());
        assert!(h.event_contents().await.is_empty());
    }

    #[tokio::test]
    async fn answerless_response_is_cached_but_not_logged() {
        let h = Harness::new(Ok(r#"{"unexpected":true}"#));

        let (status, _, resp) = h.chat(chat_body(&data_url(&split_vertical()))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp, Bytes::from_static(br#"{"unexpected":true}"#));
        assert!(h.state.cache.lock().await.entry().is_some());
        assert!(h.event_contents().await.is_empty());
    }

    #[tokio::test]
    async fn events_endpoint_lists_newest_first() {
        let h = Harness::new(Ok(HELLO));
        for content in ["A", "B", "C"] {
            h.state.events.append(content).await.unwrap();
        }

        let (status, headers, resp) = h
            .send(Request::get("/events").body(Body::empty()).unwrap())
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["access-control-allow-origin"], "*");
        let json: Value = serde_json::from_slice(&resp).unwrap();
        let items = json.as_array().unwrap();
        let contents: Vec<_> = items.iter().map(|e| e["content"].as_str().unwrap()).collect();
        assert_eq!(contents, ["C", "B", "A"]);

        let timestamp = items[0]["timestamp"].as_str().unwrap();
        assert!(NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S").is_ok());
    }

    #[tokio::test]
    async fn events_endpoint_caps_at_twenty() {
        let h = Harness::new(Ok(HELLO));
        for i in 0..25 {
            h.state.events.append(format!("event {i}")).await.unwrap();
        }

        let (_, _, resp) = h
            .send(Request::get("/events").body(Body::empty()).unwrap())
            .await;
        let json: Value = serde_json::from_slice(&resp).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn options_anywhere_is_a_preflight() {
        let h = Harness::new(Ok(HELLO));
        for uri in ["/v1/chat/completions", "/events", "/somewhere/else"] {
            let req = Request::builder()
                .method(Method::OPTIONS)
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            let (status, headers, _) = h.send(req).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(headers["access-control-allow-methods"], "GET, POST, OPTIONS");
        }
    }

    #[tokio::test]
    async fn unknown_routes_are_404_with_cors() {
        let h = Harness::new(Ok(HELLO));

        let (status, headers, _) = h
            .send(Request::get("/nope").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(headers["access-control-allow-origin"], "*");

        let (status, _, _) = h
            .send(
                Request::get("/v1/chat/completions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = h
            .send(Request::post("/events").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
