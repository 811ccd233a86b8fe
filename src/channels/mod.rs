//! User-facing shells. Each one drives a [`ChatHandle`](crate::chat::ChatHandle)
//! and stops when its `shutdown` token is cancelled.

#[cfg(feature = "channel-pty")]
pub mod console;
#[cfg(feature = "channel-axum")]
pub mod web;
