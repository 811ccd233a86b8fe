//! hearth-chat: a local, single-conversation chat over a GGUF model.
//!
//! The library holds everything except the two entry points: configuration,
//! logging, the fact memory, prompt assembly, the inference adapter, the
//! turn controller, and the console and web shells.

pub mod channels;
pub mod chat;
pub mod config;
pub mod error;
pub mod facts;
pub mod llm;
pub mod logger;
