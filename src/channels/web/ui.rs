//! The chat page served at `/`.
//!
//! A single self-contained document: it polls `/api/state`, re-renders the
//! message list when the revision changes, and mirrors the text field to the
//! server through `/api/input` and `/api/key`.

use axum::response::Html;

const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Hearth Chat</title>
  <style>
    :root { --muted: #8a8175; --ink: #1f1c17; --accent: #2f5d50; }
    *, *::before, *::after { box-sizing: border-box; margin: 0; padding: 0; }
    body {
      font-family: system-ui, -apple-system, sans-serif;
      background: linear-gradient(160deg, #f4efe6, #e9e2d5);
      color: var(--ink);
      height: 100vh; display: flex; justify-content: center;
    }
    main { width: 100%; max-width: 760px; display: flex; flex-direction: column; padding: 16px; gap: 12px; }
    header { display: flex; align-items: baseline; justify-content: space-between; }
    header h1 { font-size: 1.2rem; }
    header span { font-size: 12px; color: var(--muted); }
    #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 10px; padding: 4px; }
    .msg { white-space: pre-wrap; line-height: 1.45; }
    .user, .assistant {
      padding: 12px 14px; border-radius: 16px; max-width: 85%;
      border: 1px solid rgba(0,0,0,0.08); box-shadow: 0 8px 18px rgba(0,0,0,0.08);
    }
    .user { align-self: flex-end; background: rgba(255,255,255,0.85); }
    .assistant { align-self: flex-start; background: rgba(255,255,255,0.98); }
    .note { align-self: center; color: var(--muted); font-size: 12px; text-align: center; padding: 6px 0; }
    #typing { font-size: 12px; color: var(--muted); visibility: hidden; }
    #typing.on { visibility: visible; }
    form { display: flex; gap: 8px; }
    #input { flex: 1; padding: 10px 12px; border-radius: 10px; border: 1px solid rgba(0,0,0,0.15); font: inherit; }
    button { padding: 10px 14px; border-radius: 10px; border: 1px solid transparent; font: inherit; cursor: pointer; }
    button:disabled { opacity: 0.45; cursor: default; }
    #send { background: var(--accent); color: #ffffff; }
    #stop { background: transparent; color: #a1463f; border-color: rgba(161,70,63,0.5); }
    #reset { background: transparent; border-color: rgba(0,0,0,0.2); }
  </style>
</head>
<body>
  <main>
    <header><h1>Hearth Chat</h1><span>Local</span></header>
    <div id="log"></div>
    <div id="typing">Typing...</div>
    <form id="form">
      <input id="input" autocomplete="off" placeholder="Type a message" />
      <button id="send" type="submit">Send</button>
      <button id="stop" type="button" disabled>Stop</button>
      <button id="reset" type="button">Reset</button>
    </form>
  </main>
  <script>
    const log = document.getElementById("log");
    const input = document.getElementById("input");
    const typing = document.getElementById("typing");
    const stopBtn = document.getElementById("stop");
    const resetBtn = document.getElementById("reset");
    let revision = -1;

    async function post(path, body) {
      const opts = { method: "POST" };
      if (body !== undefined) {
        opts.headers = { "content-type": "application/json" };
        opts.body = JSON.stringify(body);
      }
      const res = await fetch(path, opts);
      return res.ok ? res.json() : null;
    }

    function render(state) {
      typing.classList.toggle("on", state.is_streaming);
      stopBtn.disabled = !state.is_streaming;
      resetBtn.disabled = state.is_streaming;
      if (state.revision === revision) return;
      revision = state.revision;
      const stick = log.scrollTop + log.clientHeight >= log.scrollHeight - 24;
      log.replaceChildren(...state.messages.map((m) => {
        const div = document.createElement("div");
        div.className = "msg " + m.role;
        div.dataset.id = m.id;
        div.textContent = m.content;
        return div;
      }));
      if (stick) log.scrollTop = log.scrollHeight;
    }

    function syncInput(reply) {
      if (reply && typeof reply.input_text === "string") input.value = reply.input_text;
    }

    async function poll() {
      try {
        const res = await fetch("/api/state");
        if (res.ok) render(await res.json());
      } catch (_) {}
      setTimeout(poll, 250);
    }

    input.addEventListener("input", () => post("/api/input", { value: input.value }));
    input.addEventListener("keydown", async (e) => {
      if (e.key !== "Enter") return;
      e.preventDefault();
      syncInput(await post("/api/key", { key: "Enter" }));
    });
    document.getElementById("form").addEventListener("submit", async (e) => {
      e.preventDefault();
      syncInput(await post("/api/send"));
    });
    stopBtn.addEventListener("click", () => post("/api/stop"));
    resetBtn.addEventListener("click", async () => {
      await post("/api/reset");
      input.value = "";
      revision = -1;
    });
    poll();
  </script>
</body>
</html>
"#;

/// GET /
pub(super) async fn root() -> Html<&'static str> {
    Html(INDEX_HTML)
}
