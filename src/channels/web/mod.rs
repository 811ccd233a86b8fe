//! Web shell: a small axum server around the turn controller.
//!
//! The page polls `/api/state` and renders the conversation snapshot; every
//! user action is a POST under `/api/`.
//!
//! ```text
//! GET  /api/health
//! GET  /api/state
//! GET  /api/memory
//! POST /api/input   {"value": "..."}
//! POST /api/key     {"key": "Enter"}
//! POST /api/send    optional {"text": "..."}
//! POST /api/stop
//! POST /api/reset
//! GET  /favicon.ico              → 204
//! GET  /                         → chat page
//! ```

mod api;
mod ui;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::chat::ChatHandle;
use crate::error::AppError;

// ── Input box ─────────────────────────────────────────────────────────────────

/// Server-side mirror of the page's text field.
///
/// Pressing Enter submits and then swallows the change event the browser
/// fires for the same keystroke, so the field does not refill with stale text.
#[derive(Debug, Default)]
pub struct InputBox {
    text: String,
    ignore_next_change: bool,
}

impl InputBox {
    /// Input-change handler. Returns `false` when the change was swallowed.
    pub fn on_change(&mut self, value: &str) -> bool {
        if self.ignore_next_change {
            self.ignore_next_change = false;
            return false;
        }
        self.text = value.to_string();
        true
    }

    /// Key handler. `Enter` arms the change filter and yields the text to send.
    pub fn on_key(&mut self, key: &str) -> Option<String> {
        if key != "Enter" {
            return None;
        }
        self.ignore_next_change = true;
        self.take()
    }

    /// Trimmed text to send, clearing the field. Blank text stays put.
    pub fn take(&mut self) -> Option<String> {
        let text = self.text.trim();
        if text.is_empty() {
            return None;
        }
        let text = text.to_string();
        self.text.clear();
        Some(text)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

// ── Shared request state ──────────────────────────────────────────────────────

/// Router state injected into every handler. Cheap to clone.
#[derive(Clone)]
pub(crate) struct WebState {
    pub chat: ChatHandle,
    pub input: Arc<Mutex<InputBox>>,
}

impl WebState {
    fn new(chat: ChatHandle) -> Self {
        Self { chat, input: Arc::new(Mutex::new(InputBox::default())) }
    }

    /// The input box. Handlers never panic while holding it, so a poisoned
    /// lock still holds a consistent value.
    pub fn input(&self) -> MutexGuard<'_, InputBox> {
        self.input.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Server loop ───────────────────────────────────────────────────────────────

/// Serve the web shell on `bind_addr` until `shutdown` is cancelled.
pub async fn serve(
    chat: ChatHandle,
    bind_addr: &str,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let router = router(chat);

    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| AppError::Web(format!("bind failed on {bind_addr}: {e}")))?;

    info!(%bind_addr, "web shell listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Web(format!("server error: {e}")))?;

    info!("web shell shut down");
    Ok(())
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn router(chat: ChatHandle) -> Router {
    Router::new()
        .route("/api/health", get(api::health))
        .route("/api/state",  get(api::state))
        .route("/api/memory", get(api::memory))
        .route("/api/input",  post(api::input))
        .route("/api/key",    post(api::key))
        .route("/api/send",   post(api::send))
        .route("/api/stop",   post(api::stop))
        .route("/api/reset",  post(api::reset))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .route("/",            get(ui::root))
        .with_state(WebState::new(chat))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_updates_text() {
        let mut input = InputBox::default();
        assert!(input.on_change("hel"));
        assert!(input.on_change("hello"));
        assert_eq!(input.text(), "hello");
    }

    #[test]
    fn enter_sends_then_ignores_one_change() {
        let mut input = InputBox::default();
        input.on_change("  hello  ");
        assert_eq!(input.on_key("Enter").as_deref(), Some("hello"));
        assert_eq!(input.text(), "");
        // The browser's trailing change event for the same keystroke.
        assert!(!input.on_change("hello"));
        assert_eq!(input.text(), "");
        assert!(input.on_change("next"));
        assert_eq!(input.text(), "next");
    }

    #[test]
    fn other_keys_do_nothing() {
        let mut input = InputBox::default();
        input.on_change("abc");
        assert_eq!(input.on_key("a"), None);
        assert!(input.on_change("abcd"));
    }

    #[test]
    fn blank_text_is_not_taken() {
        let mut input = InputBox::default();
        input.on_change("   ");
        assert_eq!(input.take(), None);
        assert_eq!(input.text(), "   ");
    }

    #[test]
    fn enter_on_blank_still_arms_the_filter() {
        let mut input = InputBox::default();
        assert_eq!(input.on_key("Enter"), None);
        assert!(!input.on_change("x"));
    }

    #[test]
    fn clear_resets_the_filter() {
        let mut input = InputBox::default();
        input.on_change("abc");
        input.on_key("Enter");
        input.clear();
        assert!(input.on_change("fresh"));
        assert_eq!(input.text(), "fresh");
    }
}
