//! Turn controller: the task that owns the conversation.
//!
//! Shells talk to it through a cloneable [`ChatHandle`]. Commands arrive on an
//! mpsc channel; the conversation is published through a `watch` channel
//! (mutated in place with `send_modify`) and progress is broadcast as
//! [`ChatEvent`]s. At most one generation is in flight; submissions that
//! arrive meanwhile are queued by the conversation and drained in order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::conversation::{Conversation, PendingInput, Submission, TurnEnd};
use crate::error::AppError;
use crate::llm::{FragmentStream, GenerationConfig, InferenceAdapter, ProviderError, RawFragment};

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

// ── Commands / events ───────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ChatCommand {
    Submit(String),
    Cancel,
    Reset { done: oneshot::Sender<()> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A turn began streaming into a fresh placeholder.
    TurnStarted,
    /// Text appended to the placeholder.
    Fragment(String),
    /// The adapter failed; the message was also added as a note.
    Failed(String),
    TurnFinished { stopped: bool },
    Reset,
}

// ── Handle ──────────────────────────────────────────────────────────────────

/// Cheap, cloneable front door to a running [`TurnController`].
#[derive(Clone)]
pub struct ChatHandle {
    cmd_tx: mpsc::Sender<ChatCommand>,
    events: broadcast::Sender<ChatEvent>,
    state: watch::Receiver<Conversation>,
}

impl ChatHandle {
    pub async fn submit(&self, text: impl Into<String>) -> Result<(), AppError> {
        self.send(ChatCommand::Submit(text.into())).await
    }

    /// Request a cooperative stop of the in-flight turn.
    pub async fn cancel(&self) -> Result<(), AppError> {
        self.send(ChatCommand::Cancel).await
    }

    /// Clear the conversation. Resolves once the reset has been applied.
    pub async fn reset(&self) -> Result<(), AppError> {
        self.queue_reset()
            .await?
            .await
            .map_err(|_| AppError::Chat("turn controller dropped the reset".into()))
    }

    /// Queue a reset without waiting for it. The receiver fires once the
    /// controller has applied it; a queued reset is always applied.
    pub async fn queue_reset(&self) -> Result<oneshot::Receiver<()>, AppError> {
        let (done, rx) = oneshot::channel();
        self.send(ChatCommand::Reset { done }).await?;
        Ok(rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Live view of the conversation.
    pub fn state(&self) -> watch::Receiver<Conversation> {
        self.state.clone()
    }

    async fn send(&self, cmd: ChatCommand) -> Result<(), AppError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| AppError::Chat("turn controller is not running".into()))
    }
}

// ── Controller ──────────────────────────────────────────────────────────────

/// How the consumption of one fragment stream ended.
enum Outcome {
    Ended(TurnEnd),
    Reset,
    Shutdown,
}

/// What woke the streaming loop.
enum Wake {
    Shutdown,
    Command(Option<ChatCommand>),
    Fragment(Option<RawFragment>),
    TimedOut,
}

pub struct TurnController {
    adapter: Arc<InferenceAdapter>,
    generation: GenerationConfig,
    fragment_timeout: Option<Duration>,
    cmd_rx: mpsc::Receiver<ChatCommand>,
    events: broadcast::Sender<ChatEvent>,
    state: watch::Sender<Conversation>,
}

impl TurnController {
    pub fn new(
        adapter: Arc<InferenceAdapter>,
        generation: GenerationConfig,
        fragment_timeout: Option<Duration>,
    ) -> (Self, ChatHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (state, state_rx) = watch::channel(Conversation::new());
        let handle = ChatHandle { cmd_tx, events: events.clone(), state: state_rx };
        let controller = Self { adapter, generation, fragment_timeout, cmd_rx, events, state };
        (controller, handle)
    }

    /// Serve commands until shutdown or until every handle is dropped.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(max_tokens = self.generation.max_tokens, "turn controller running");
        loop {
            let cmd = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                cmd = self.cmd_rx.recv() => cmd,
            };
            let Some(cmd) = cmd else { break };

            let input = match cmd {
                ChatCommand::Submit(text) => match self.update(|c| c.submit(&text)) {
                    Submission::Start(input) => input,
                    Submission::Queued | Submission::Ignored => continue,
                },
                ChatCommand::Cancel => {
                    debug!("cancel while idle: nothing to stop");
                    continue;
                }
                ChatCommand::Reset { done } => {
                    self.apply_reset(done);
                    continue;
                }
            };
            if !self.drive(input, &shutdown).await {
                break;
            }
        }
        info!("turn controller stopped");
    }

    /// Run `first` and then every queued input, one at a time. Returns
    /// `false` on shutdown.
    async fn drive(&mut self, first: PendingInput, shutdown: &CancellationToken) -> bool {
        let mut next = Some(first);
        while let Some(input) = next.take() {
            let prompt = self.update(|c| c.begin_turn(&input));
            debug!(chars = prompt.len(), "turn started");
            let _ = self.events.send(ChatEvent::TurnStarted);

            let outcome = match self.adapter.generate(&prompt, &self.generation).await {
                Ok(stream) => self.consume(stream, shutdown).await,
                Err(e) => {
                    warn!(error = %e, "inference adapter failed");
                    Outcome::Ended(TurnEnd::Failed(failure_note(&e)))
                }
            };

            match outcome {
                Outcome::Shutdown => return false,
                Outcome::Reset => {}
                Outcome::Ended(end) => {
                    if let TurnEnd::Failed(message) = &end {
                        let _ = self.events.send(ChatEvent::Failed(message.clone()));
                    }
                    let stopped = self.update(|c| c.finish_turn(end));
                    debug!(stopped, "turn finished");
                    let _ = self.events.send(ChatEvent::TurnFinished { stopped });
                }
            }
            next = self.update(|c| c.next_pending());
        }
        true
    }

    /// Pull fragments into the placeholder while still serving commands.
    async fn consume(&mut self, mut stream: FragmentStream, shutdown: &CancellationToken) -> Outcome {
        loop {
            let wake = tokio::select! {
                biased;
                _ = shutdown.cancelled() => Wake::Shutdown,
                cmd = self.cmd_rx.recv() => Wake::Command(cmd),
                item = next_fragment(&mut stream, self.fragment_timeout) => match item {
                    Some(item) => Wake::Fragment(item),
                    None => Wake::TimedOut,
                },
            };

            match wake {
                Wake::Shutdown | Wake::Command(None) => return Outcome::Shutdown,
                Wake::Command(Some(ChatCommand::Submit(text))) => {
                    if self.update(|c| c.submit(&text)) == Submission::Queued {
                        debug!("input queued behind the current turn");
                    }
                }
                Wake::Command(Some(ChatCommand::Cancel)) => {
                    self.update(|c| c.request_stop());
                    debug!("stop requested");
                }
                Wake::Command(Some(ChatCommand::Reset { done })) => {
                    drop(stream);
                    self.apply_reset(done);
                    return Outcome::Reset;
                }
                Wake::Fragment(None) => return Outcome::Ended(TurnEnd::Exhausted),
                Wake::Fragment(Some(Err(ProviderError::MalformedFragment(detail)))) => {
                    warn!(%detail, "skipping malformed fragment");
                }
                Wake::Fragment(Some(Err(e))) => {
                    warn!(error = %e, "generation failed mid-turn");
                    return Outcome::Ended(TurnEnd::Failed(failure_note(&e)));
                }
                Wake::Fragment(Some(Ok(text))) => {
                    if self.state.borrow().stop_requested() {
                        return Outcome::Ended(TurnEnd::Exhausted);
                    }
                    self.update(|c| c.push_fragment(&text));
                    let _ = self.events.send(ChatEvent::Fragment(text));
                }
                Wake::TimedOut => {
                    warn!(timeout = ?self.fragment_timeout, "no fragment within the timeout");
                    return Outcome::Ended(TurnEnd::TimedOut);
                }
            }
        }
    }

    fn apply_reset(&mut self, done: oneshot::Sender<()>) {
        self.update(|c| c.reset());
        info!("conversation reset");
        let _ = self.events.send(ChatEvent::Reset);
        let _ = done.send(());
    }

    /// Mutate the published conversation and return what `f` returned.
    fn update<R>(&self, f: impl FnOnce(&mut Conversation) -> R) -> R {
        let mut out = None;
        self.state.send_modify(|c| out = Some(f(c)));
        out.expect("send_modify runs its closure")
    }
}

/// `None` when the timeout fired first.
async fn next_fragment(
    stream: &mut FragmentStream,
    timeout: Option<Duration>,
) -> Option<Option<RawFragment>> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, stream.next()).await.ok(),
        None => Some(stream.next().await),
    }
}

/// The note shown in place of an answer when the adapter fails.
fn failure_note(err: &ProviderError) -> String {
    match err {
        ProviderError::ModelNotFound(path) => format!(
            "Model not found: {}. Put your GGUF file there or set MODEL_PATH.",
            path.display()
        ),
        other => format!("Error: {other}"),
    }
}
