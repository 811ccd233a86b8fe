//! Axum handlers for `/api/*` routes.
//!
//! Each handler receives [`WebState`] via [`axum::extract::State`] and
//! returns an axum [`Response`]. Snapshot guards are dropped before any
//! `.await`.

use std::time::Duration;

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::WebState;

const RESET_TIMEOUT: Duration = Duration::from_secs(3);

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct InputRequest {
    value: String,
}

#[derive(Deserialize)]
pub(super) struct KeyRequest {
    key: String,
}

#[derive(Deserialize, Default)]
struct SendRequest {
    text: Option<String>,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Build a JSON error response body.
fn json_error(code: &str, msg: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({ "error": code, "message": format!("{msg}") }))
}

fn is_streaming(state: &WebState) -> bool {
    state.chat.state().borrow().is_streaming()
}

/// Hand `text` to the turn controller and report the resulting input state.
async fn submit(state: &WebState, text: Option<String>) -> Response {
    let sent = text.is_some();
    if let Some(text) = text {
        debug!(chars = text.len(), "web submit");
        if let Err(e) = state.chat.submit(text).await {
            warn!("submit failed: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, json_error("unavailable", e)).into_response();
        }
    }
    let input_text = state.input().text().to_string();
    Json(json!({ "sent": sent, "input_text": input_text })).into_response()
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /api/health
pub(super) async fn health(State(state): State<WebState>) -> Response {
    Json(json!({ "status": "ok", "streaming": is_streaming(&state) })).into_response()
}

/// GET /api/state: conversation snapshot plus the input mirror.
pub(super) async fn state(State(state): State<WebState>) -> Response {
    let mut body = {
        let rx = state.chat.state();
        let conv = rx.borrow();
        json!({
            "revision": conv.revision(),
            "messages": conv.history(),
            "is_streaming": conv.is_streaming(),
        })
    };
    body["input_text"] = json!(state.input().text());
    Json(body).into_response()
}

/// GET /api/memory
pub(super) async fn memory(State(state): State<WebState>) -> Response {
    let facts = state.chat.state().borrow().facts().recent().to_vec();
    Json(json!({ "facts": facts })).into_response()
}

/// POST /api/input
pub(super) async fn input(
    State(state): State<WebState>,
    Json(req): Json<InputRequest>,
) -> Response {
    let mut input = state.input();
    let applied = input.on_change(&req.value);
    Json(json!({ "applied": applied, "input_text": input.text() })).into_response()
}

/// POST /api/key: `Enter` submits the current input.
pub(super) async fn key(
    State(state): State<WebState>,
    Json(req): Json<KeyRequest>,
) -> Response {
    let text = state.input().on_key(&req.key);
    submit(&state, text).await
}

/// POST /api/send: the input box, or `text` when given.
pub(super) async fn send(State(state): State<WebState>, body: Bytes) -> Response {
    let req: SendRequest = if body.is_empty() {
        SendRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => return (StatusCode::BAD_REQUEST, json_error("bad_request", e)).into_response(),
        }
    };
    let text = match req.text {
        Some(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
        None => state.input().take(),
    };
    submit(&state, text).await
}

/// POST /api/stop
pub(super) async fn stop(State(state): State<WebState>) -> Response {
    if let Err(e) = state.chat.cancel().await {
        warn!("stop failed: {e}");
        return (StatusCode::SERVICE_UNAVAILABLE, json_error("unavailable", e)).into_response();
    }
    Json(json!({ "streaming": is_streaming(&state) })).into_response()
}

/// POST /api/reset: also clears the input box.
///
/// A reset that is queued but not applied within [`RESET_TIMEOUT`] (the
/// controller is busy loading the model) answers 202; it still lands later.
pub(super) async fn reset(State(state): State<WebState>) -> Response {
    let applied = match state.chat.queue_reset().await {
        Ok(applied) => applied,
        Err(e) => {
            warn!("reset failed: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, json_error("unavailable", e)).into_response();
        }
    };
    state.input().clear();
    match tokio::time::timeout(RESET_TIMEOUT, applied).await {
        Ok(Ok(())) => Json(json!({ "ok": true })).into_response(),
        Ok(Err(_)) => {
            warn!("reset dropped by the turn controller");
            (StatusCode::SERVICE_UNAVAILABLE, json_error("unavailable", "reset was dropped"))
                .into_response()
        }
        Err(_) => {
            info!("reset still pending after {}s", RESET_TIMEOUT.as_secs());
            (StatusCode::ACCEPTED, Json(json!({ "ok": true, "pending": true }))).into_response()
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use serde_json::Value;
    use tokio::sync::broadcast;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::chat::{ChatEvent, ChatHandle, TurnController};
    use crate::llm::providers::dummy::DummyProvider;
    use crate::llm::{GenerationConfig, InferenceAdapter, LlmProvider};

    fn app(provider: DummyProvider) -> (Router, ChatHandle) {
        let adapter = Arc::new(InferenceAdapter::with_provider(LlmProvider::Dummy(provider)));
        let (controller, handle) =
            TurnController::new(adapter, GenerationConfig::interactive(), None);
        tokio::spawn(controller.run(CancellationToken::new()));
        (super::super::router(handle.clone()), handle)
    }

    async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = router.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, json)
    }

    async fn until_idle(events: &mut broadcast::Receiver<ChatEvent>) {
        loop {
            if let Ok(ChatEvent::TurnFinished { .. }) = events.recv().await {
                return;
            }
        }
    }

    #[tokio::test]
    async fn health_reports_idle() {
        let (router, _) = app(DummyProvider::new());
        let (status, body) = call(&router, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok", "streaming": false }));
    }

    #[tokio::test]
    async fn favicon_is_no_content() {
        let (router, _) = app(DummyProvider::new());
        let (status, _) = call(&router, Method::GET, "/favicon.ico", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn root_serves_the_page() {
        let (router, _) = app(DummyProvider::new());
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("/api/state"));
    }

    #[tokio::test]
    async fn enter_key_sends_and_swallows_next_change() {
        let (router, handle) = app(DummyProvider::scripted(["Hi!"]));
        let mut events = handle.subscribe();

        call(&router, Method::POST, "/api/input", Some(json!({ "value": "hello" }))).await;
        let (_, body) = call(&router, Method::POST, "/api/key", Some(json!({ "key": "Enter" }))).await;
        assert_eq!(body, json!({ "sent": true, "input_text": "" }));

        let (_, body) = call(&router, Method::POST, "/api/input", Some(json!({ "value": "hello" }))).await;
        assert_eq!(body["applied"], false);

        until_idle(&mut events).await;
        let (_, snap) = call(&router, Method::GET, "/api/state", None).await;
        let messages = snap["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "hello");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"], "Hi!");
        assert_eq!(snap["is_streaming"], false);
        assert_eq!(snap["input_text"], "");
    }

    #[tokio::test]
    async fn send_with_blank_input_does_nothing() {
        let (router, _) = app(DummyProvider::new());
        let (status, body) = call(&router, Method::POST, "/api/send", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sent"], false);
    }

    #[tokio::test]
    async fn send_rejects_malformed_json() {
        let (router, _) = app(DummyProvider::new());
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/send")
            .body(Body::from("{not json"))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn memory_lists_facts_and_reset_clears_them() {
        let (router, handle) = app(DummyProvider::scripted(["ok"]));
        let mut events = handle.subscribe();

        let text = json!({ "text": "Paris is a city in France." });
        call(&router, Method::POST, "/api/send", Some(text)).await;
        until_idle(&mut events).await;

        let (_, body) = call(&router, Method::GET, "/api/memory", None).await;
        assert_eq!(body, json!({ "facts": ["Paris is a city in France"] }));

        call(&router, Method::POST, "/api/input", Some(json!({ "value": "draft" }))).await;
        let (status, _) = call(&router, Method::POST, "/api/reset", None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&router, Method::GET, "/api/memory", None).await;
        assert_eq!(body, json!({ "facts": [] }));
        let (_, snap) = call(&router, Method::GET, "/api/state", None).await;
        assert_eq!(snap["messages"], json!([]));
        assert_eq!(snap["input_text"], "");
    }

    #[tokio::test(start_paused = true)]
    async fn reset_behind_a_busy_controller_is_accepted_and_applied_later() {
        let adapter = Arc::new(InferenceAdapter::with_provider(LlmProvider::Dummy(DummyProvider::new())));
        let (controller, handle) = TurnController::new(adapter, GenerationConfig::interactive(), None);
        let router = super::super::router(handle.clone());
        let mut events = handle.subscribe();

        call(&router, Method::POST, "/api/input", Some(json!({ "value": "draft" }))).await;
        let (status, body) = call(&router, Method::POST, "/api/reset", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, json!({ "ok": true, "pending": true }));
        let (_, snap) = call(&router, Method::GET, "/api/state", None).await;
        assert_eq!(snap["input_text"], "");

        // Once the controller gets to its queue, the reset is applied.
        tokio::spawn(controller.run(CancellationToken::new()));
        loop {
            if let ChatEvent::Reset = events.recv().await.unwrap() {
                break;
            }
        }
    }

    #[tokio::test]
    async fn stop_while_idle_is_harmless() {
        let (router, _) = app(DummyProvider::new());
        let (status, body) = call(&router, Method::POST, "/api/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["streaming"], false);
    }
}
