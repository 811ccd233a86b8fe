//! Console shell: reads lines from stdin, streams answers to stdout.
//!
//! Generic over its input and output so tests can drive it with byte
//! buffers. Interrupts (Ctrl-C) arrive on a channel: while a turn streams
//! they cancel it, at the prompt they end the session.

use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chat::{ChatEvent, ChatHandle, STOPPED_NOTE};
use crate::config::ModelConfig;
use crate::error::AppError;

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Exit,
    Reset,
    Memory,
    Ask(String),
    Empty,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        match line.to_lowercase().as_str() {
            "/exit" | "exit" | "quit" => Self::Exit,
            "/reset" | "reset" => Self::Reset,
            "/memory" | "memory" => Self::Memory,
            _ => Self::Ask(line.to_string()),
        }
    }
}

/// Print the startup block shown before the model loads.
pub fn print_banner(out: &mut impl Write, model: &ModelConfig) -> std::io::Result<()> {
    let path = std::path::absolute(&model.path).unwrap_or_else(|_| model.path.clone());
    writeln!(out, "Loading model...")?;
    writeln!(out, "  path={}", path.display())?;
    writeln!(
        out,
        "  n_ctx={} | n_gpu_layers={} | n_threads={}",
        model.n_ctx, model.n_gpu_layers, model.n_threads
    )
}

/// Run the read-submit-stream loop until exit, EOF, interrupt at the
/// prompt, or shutdown.
pub async fn run<R, W>(
    handle: ChatHandle,
    input: R,
    mut out: W,
    mut interrupts: mpsc::Receiver<()>,
    shutdown: CancellationToken,
) -> Result<(), AppError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut events = handle.subscribe();
    let mut lines = input.lines();

    writeln!(out, "\nLocal LLM chat started. Type /exit to quit, /reset to clear history.\n")?;

    loop {
        write!(out, "You: ")?;
        out.flush()?;

        let line = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            Some(()) = interrupts.recv() => {
                writeln!(out)?;
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!("stdin closed");
            writeln!(out)?;
            break;
        };

        match ConsoleCommand::parse(&line) {
            ConsoleCommand::Empty => continue,
            ConsoleCommand::Exit => break,
            ConsoleCommand::Reset => {
                handle.reset().await?;
                writeln!(out, "(history cleared)\n")?;
            }
            ConsoleCommand::Memory => print_memory(&handle, &mut out)?,
            ConsoleCommand::Ask(text) => {
                debug!(chars = text.len(), "console submit");
                handle.submit(text).await?;
                if !stream_turn(&handle, &mut events, &mut out, &mut interrupts, &shutdown).await? {
                    break;
                }
            }
        }
    }
    info!("console closed");
    Ok(())
}

fn print_memory(handle: &ChatHandle, out: &mut impl Write) -> Result<(), AppError> {
    let state = handle.state();
    let conv = state.borrow();
    let facts = conv.facts();
    if facts.is_empty() {
        writeln!(out, "\nMemory is empty.\n")?;
        return Ok(());
    }
    writeln!(out, "\nMemory:")?;
    for fact in facts.recent() {
        writeln!(out, "- {fact}")?;
    }
    debug!(total = facts.len(), "memory listed");
    writeln!(out)?;
    Ok(())
}

/// Render one turn from controller events. Returns `false` on shutdown.
async fn stream_turn(
    handle: &ChatHandle,
    events: &mut broadcast::Receiver<ChatEvent>,
    out: &mut impl Write,
    interrupts: &mut mpsc::Receiver<()>,
    shutdown: &CancellationToken,
) -> Result<bool, AppError> {
    let started = Instant::now();
    // Trailing whitespace is only printed once more text follows it.
    let mut held = String::new();

    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(false),
            Some(()) = interrupts.recv() => {
                debug!("interrupt: cancelling turn");
                handle.cancel().await?;
                continue;
            }
            ev = events.recv() => ev,
        };

        match event {
            Ok(ChatEvent::TurnStarted) => {
                write!(out, "\nAssistant: ")?;
                out.flush()?;
            }
            Ok(ChatEvent::Fragment(text)) => {
                let body = text.trim_end();
                if !body.is_empty() {
                    write!(out, "{held}{body}")?;
                    held.clear();
                }
                held.push_str(&text[body.len()..]);
                out.flush()?;
            }
            Ok(ChatEvent::Failed(message)) => {
                writeln!(out, "\nerror: {message}")?;
            }
            Ok(ChatEvent::TurnFinished { stopped }) => {
                if stopped {
                    write!(out, "\n{STOPPED_NOTE}")?;
                }
                let secs = started.elapsed().as_secs_f64();
                writeln!(out, "\n\n(Completed in {secs:.2}s)\n")?;
                return Ok(true);
            }
            Ok(ChatEvent::Reset) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "console fell behind the event stream");
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err(AppError::Chat("turn controller stopped".into()));
            }
        }
    }
}
