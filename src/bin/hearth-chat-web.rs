//! hearth-chat-web: browser shell entry point.
//!
//! The model loads lazily on the first message; a missing model file shows up
//! as a note in the conversation instead of stopping the server.

use std::sync::Arc;

use hearth_chat::channels::web;
use hearth_chat::chat::TurnController;
use hearth_chat::config;
use hearth_chat::error::AppError;
use hearth_chat::llm::InferenceAdapter;
use hearth_chat::logger;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let _ = dotenvy::dotenv();

    let config = config::load()?;
    logger::init(&config.log_level, config.log_file.as_deref())?;

    info!(
        backend = %config.model.backend,
        path = %config.model.path.display(),
        bind = %config.web.bind,
        "config loaded"
    );
    if let Some(path) = config.model.missing_model() {
        warn!(path = %path.display(), "model file not found; chats will report it");
    }

    let shutdown = CancellationToken::new();

    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            ctrlc_token.cancel();
        }
    });

    let adapter = Arc::new(InferenceAdapter::new(config.model.clone()));
    let (controller, handle) = TurnController::new(
        adapter,
        config.generation.interactive.clone(),
        config.generation.fragment_timeout,
    );
    let controller_task = tokio::spawn(controller.run(shutdown.clone()));

    println!("Open http://{}/ in your browser (Ctrl-C to quit).", config.web.bind);
    let result = web::serve(handle, &config.web.bind, shutdown.clone()).await;

    shutdown.cancel();
    let _ = controller_task.await;
    result
}
