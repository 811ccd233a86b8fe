//! End-to-end turn handling against the dummy backend.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hearth_chat::chat::{ChatEvent, ChatHandle, Conversation, Role, Submission, TurnController};
use hearth_chat::config::{self, Backend, Config, EnvOverrides};
use hearth_chat::llm::providers::dummy::DummyProvider;
use hearth_chat::llm::{GenerationConfig, InferenceAdapter, LlmProvider};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

fn start(provider: DummyProvider) -> ChatHandle {
    let adapter = Arc::new(InferenceAdapter::with_provider(LlmProvider::Dummy(provider)));
    let (controller, handle) = TurnController::new(adapter, GenerationConfig::interactive(), None);
    tokio::spawn(controller.run(CancellationToken::new()));
    handle
}

async fn finished(events: &mut broadcast::Receiver<ChatEvent>, turns: usize) {
    let mut seen = 0;
    while seen < turns {
        if let ChatEvent::TurnFinished { .. } = events.recv().await.unwrap() {
            seen += 1;
        }
    }
}

fn history(handle: &ChatHandle) -> Vec<(Role, String)> {
    handle
        .state()
        .borrow()
        .history()
        .iter()
        .map(|t| (t.role, t.content.clone()))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_rapid_submissions_run_in_arrival_order() {
    let handle = start(DummyProvider::new().with_delay(Duration::from_millis(20)));
    let mut events = handle.subscribe();

    for text in ["one", "two", "three"] {
        handle.submit(text).await.unwrap();
    }
    finished(&mut events, 3).await;

    let h = history(&handle);
    let users: Vec<&str> = h
        .iter()
        .filter(|(r, _)| *r == Role::User)
        .map(|(_, c)| c.as_str())
        .collect();
    assert_eq!(users, ["one", "two", "three"]);

    let roles: Vec<Role> = h.iter().map(|(r, _)| *r).collect();
    assert_eq!(
        roles,
        [Role::User, Role::Assistant, Role::User, Role::User, Role::Assistant, Role::Assistant]
    );
    assert_eq!(h[1].1, "[echo] one");
    assert!(h.iter().filter(|(r, _)| *r == Role::Assistant).all(|(_, c)| c.starts_with("[echo]")));
    assert!(!handle.state().borrow().is_streaming());
}

#[tokio::test(start_paused = true)]
async fn test_input_during_streaming_shows_immediately() {
    let provider = DummyProvider::scripted(["Hello", " again", " friend"])
        .with_delay(Duration::from_millis(100));
    let handle = start(provider);
    let mut events = handle.subscribe();

    handle.submit("hi").await.unwrap();
    loop {
        if let ChatEvent::Fragment(_) = events.recv().await.unwrap() {
            break;
        }
    }
    handle.submit("there").await.unwrap();

    let mut state = handle.state();
    state
        .wait_for(|c| c.history().iter().any(|t| t.content == "there"))
        .await
        .unwrap();
    {
        let conv = state.borrow();
        assert!(conv.is_streaming());
        assert_eq!(conv.pending_len(), 1);
        assert_eq!(conv.history()[2].role, Role::User);
    }

    finished(&mut events, 2).await;
    let h = history(&handle);
    assert_eq!(
        h,
        [
            (Role::User, "hi".to_string()),
            (Role::Assistant, "Hello again friend".to_string()),
            (Role::User, "there".to_string()),
            (Role::Assistant, "Hello again friend".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_keeps_partial_answer() {
    let provider = DummyProvider::scripted(["The", " quick", " brown", " fox"])
        .with_delay(Duration::from_millis(100));
    let handle = start(provider);
    let mut events = handle.subscribe();

    handle.submit("tell me a story").await.unwrap();
    let mut fragments = 0;
    while fragments < 2 {
        if let ChatEvent::Fragment(_) = events.recv().await.unwrap() {
            fragments += 1;
        }
    }
    handle.cancel().await.unwrap();

    loop {
        if let ChatEvent::TurnFinished { stopped } = events.recv().await.unwrap() {
            assert!(stopped);
            break;
        }
    }
    let h = history(&handle);
    assert_eq!(h[1], (Role::Assistant, "The quick".to_string()));
    assert_eq!(h[2], (Role::Note, "Stopped.".to_string()));
    assert_eq!(h.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_with_queued_input_runs_the_queued_turn() {
    let provider = DummyProvider::scripted(["a", "b", "c"]).with_delay(Duration::from_millis(100));
    let handle = start(provider);
    let mut events = handle.subscribe();

    handle.submit("one").await.unwrap();
    loop {
        if let ChatEvent::Fragment(_) = events.recv().await.unwrap() {
            break;
        }
    }
    handle.submit("two").await.unwrap();
    handle.cancel().await.unwrap();

    let mut stops = Vec::new();
    while stops.len() < 2 {
        if let ChatEvent::TurnFinished { stopped } = events.recv().await.unwrap() {
            stops.push(stopped);
        }
    }
    assert_eq!(stops, [true, false]);
    assert_eq!(
        history(&handle),
        [
            (Role::User, "one".to_string()),
            (Role::Assistant, "a".to_string()),
            (Role::User, "two".to_string()),
            (Role::Note, "Stopped.".to_string()),
            (Role::Assistant, "abc".to_string()),
        ]
    );
    assert_eq!(handle.state().borrow().pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_replies_cut_to_nothing_leave_no_empty_entries() {
    // The stop sequence comes first, so every reply is empty.
    let handle = start(DummyProvider::scripted(["User: hi"]));
    let mut events = handle.subscribe();

    for text in ["one", "two", "three"] {
        handle.submit(text).await.unwrap();
    }
    finished(&mut events, 3).await;

    let h = history(&handle);
    assert!(h.iter().all(|(r, c)| *r != Role::Assistant || !c.is_empty()), "{h:?}");
    assert_eq!(h.iter().filter(|(r, _)| *r == Role::User).count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_stated_fact_is_remembered() {
    let handle = start(DummyProvider::scripted(["Noted."]));
    let mut events = handle.subscribe();

    handle.submit("Paris is a city in France.").await.unwrap();
    handle.submit("Paris is a city in France.").await.unwrap();
    finished(&mut events, 2).await;

    let state = handle.state();
    assert_eq!(state.borrow().facts().all(), ["Paris is a city in France"]);
}

#[test]
fn test_next_prompt_starts_with_memory() {
    let mut conv = Conversation::new();
    let Submission::Start(first) = conv.submit("Paris is a city in France.") else {
        panic!("idle conversation should start a turn");
    };
    conv.begin_turn(&first);
    conv.push_fragment("Yes.");
    conv.finish_turn(hearth_chat::chat::TurnEnd::Exhausted);

    let Submission::Start(second) = conv.submit("What do you know?") else {
        panic!("idle conversation should start a turn");
    };
    let prompt = conv.begin_turn(&second);
    assert!(prompt.starts_with("### Memory:\n- Paris is a city in France\n\n"), "{prompt}");
    assert!(prompt.contains("User: Paris is a city in France.\n\n### Response:\nYes.\n\n"));
    assert!(prompt.ends_with("User: What do you know?\n\n### Response:\n"));
}

#[tokio::test(start_paused = true)]
async fn test_reset_clears_history_and_memory() {
    let handle = start(DummyProvider::scripted(["ok"]));
    let mut events = handle.subscribe();
    handle.submit("Rust is a systems language").await.unwrap();
    finished(&mut events, 1).await;
    assert_eq!(handle.state().borrow().facts().len(), 1);

    handle.reset().await.unwrap();
    let state = handle.state();
    let conv = state.borrow();
    assert!(conv.history().is_empty());
    assert!(conv.facts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_fragment_is_skipped() {
    let handle = start(DummyProvider::scripted(["good", " text"]).malformed_after(1));
    let mut events = handle.subscribe();
    handle.submit("go").await.unwrap();
    finished(&mut events, 1).await;
    assert_eq!(history(&handle)[1], (Role::Assistant, "good text".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_missing_model_is_a_note_not_a_crash() {
    let mut model = Config::dummy().model;
    model.backend = Backend::Llama;
    model.path = "/definitely/not/here.gguf".into();
    let adapter = Arc::new(InferenceAdapter::new(model));
    let (controller, handle) = TurnController::new(adapter, GenerationConfig::interactive(), None);
    tokio::spawn(controller.run(CancellationToken::new()));

    let mut events = handle.subscribe();
    handle.submit("hello").await.unwrap();
    finished(&mut events, 1).await;
    let h = history(&handle);
    assert_eq!(h.last().unwrap().0, Role::Note);

    // The shell keeps working after the failure.
    handle.reset().await.unwrap();
    assert!(history(&handle).is_empty());
}

#[test]
fn test_default_config_file_loads() {
    let config = config::load_from(Some(Path::new("config/default.toml")), &EnvOverrides::default())
        .expect("config/default.toml should parse");
    assert_eq!(config.model.n_ctx, 2048);
    assert_eq!(config.generation.console, GenerationConfig::console());
    assert_eq!(config.generation.interactive, GenerationConfig::interactive());
    assert_eq!(config.generation.fragment_timeout, None);
    assert_eq!(config.web.bind, "127.0.0.1:3000");
}
