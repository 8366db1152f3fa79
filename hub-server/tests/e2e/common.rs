//! Shared helpers for e2e tests. Received frames are logged with
//! `[e2e] received: ...`; run with `--nocapture` to see them.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

/// Binds the main socket to a random port, configures a temp sandbox
/// directory, and spawns the hub in the background. Returns the ws URL and
/// the `TempDir` (kept alive for the sandbox path to remain valid).
pub async fn spawn_hub(agents: Vec<hub_server::AgentSeed>) -> (String, tempfile::TempDir) {
    spawn_hub_with(agents, |_| {}).await
}

/// Like [`spawn_hub`], but `tweak` runs after the default test config is
/// built, letting a test override auth/rate-limit knobs before bind.
pub async fn spawn_hub_with(
    agents: Vec<hub_server::AgentSeed>,
    tweak: impl FnOnce(&mut hub_server::HubConfig),
) -> (String, tempfile::TempDir) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("ws://{}", addr);

    let dir = tempfile::tempdir().unwrap();
    let mut config = hub_server::HubConfig::from_env();
    config.host = "127.0.0.1".parse().unwrap();
    config.port = addr.port();
    config.stream_port = 0;
    config.sandbox_path = dir.path().display().to_string();
    config.auth_token = None;
    config.localhost_bypass_auth = true;
    tweak(&mut config);

    tokio::spawn(hub_server::run_serve_on_listener(
        listener,
        config,
        agents,
        Arc::new(hub_server::NullScreencastSource),
    ));
    // Give the spawned task a moment to bind/register before the first connect.
    tokio::time::sleep(Duration::from_millis(20)).await;
    (url, dir)
}

pub async fn recv_json<R>(read: &mut R) -> serde_json::Value
where
    R: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let msg = timeout(Duration::from_secs(5), read.next())
        .await
        .expect("timed out waiting for a message")
        .expect("stream ended")
        .expect("websocket error");
    let text = msg.to_text().expect("expected text frame");
    eprintln!("[e2e] received: {}", text);
    serde_json::from_str(text).expect("expected JSON frame")
}

pub async fn send_json<W>(write: &mut W, value: serde_json::Value)
where
    W: SinkExt<Message> + Unpin,
    W::Error: std::fmt::Debug,
{
    write
        .send(Message::Text(value.to_string()))
        .await
        .expect("send failed");
}
