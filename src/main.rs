//! hearth-chat: console entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Init logger once
//!   4. Check the model file (missing → exit 1), print the banner, load it
//!   5. Spawn the turn controller
//!   6. Spawn the Ctrl-C watcher
//!   7. Run the console until exit or EOF, then cancel and join

use std::sync::Arc;

use hearth_chat::channels::console;
use hearth_chat::chat::TurnController;
use hearth_chat::config;
use hearth_chat::error::AppError;
use hearth_chat::llm::InferenceAdapter;
use hearth_chat::logger;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(()) => {}
        Err(AppError::ModelNotFound(path)) => {
            println!("Model not found: {}", path.display());
            println!("Put your GGUF file at models/model.gguf or set MODEL_PATH env var.");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let config = config::load()?;
    logger::init(&config.log_level, config.log_file.as_deref())?;

    info!(
        backend = %config.model.backend,
        path = %config.model.path.display(),
        log_level = %config.log_level,
        "config loaded"
    );

    if let Some(path) = config.model.missing_model() {
        return Err(AppError::ModelNotFound(path));
    }
    console::print_banner(&mut std::io::stdout(), &config.model)?;

    let adapter = Arc::new(InferenceAdapter::new(config.model.clone()));
    adapter.get_handle().await?;

    let shutdown = CancellationToken::new();
    let (controller, handle) = TurnController::new(
        adapter,
        config.generation.console.clone(),
        config.generation.fragment_timeout,
    );
    let controller_task = tokio::spawn(controller.run(shutdown.clone()));

    // Ctrl-C is an interrupt for the console, not a shutdown: it cancels a
    // streaming turn or, at the prompt, ends the session.
    let (interrupt_tx, interrupts) = mpsc::channel(4);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received");
            if interrupt_tx.is_closed() {
                break;
            }
            let _ = interrupt_tx.try_send(());
        }
    });

    let stdin = BufReader::new(tokio::io::stdin());
    let result = console::run(handle, stdin, std::io::stdout(), interrupts, shutdown.clone()).await;

    shutdown.cancel();
    let _ = controller_task.await;
    result
}
