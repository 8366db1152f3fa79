//! Viewport streamer: a dedicated WebSocket server (separate port, separate
//! handshake from the main hub socket) that carries binary JPEG frames with
//! per-frame acknowledgement and bounded backpressure.
//!
//! There is no headless-browser-automation crate anywhere in this
//! workspace, so the actual screencast capture is an external collaborator
//! behind [`ScreencastSource`] — the same shape as `AgenticLoop`/
//! `ProviderAdapter` in `hub-core`: a contract this crate drives but never
//! implements for real. [`NullScreencastSource`] is the inert stand-in used
//! until one is wired up.

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::Response,
    routing::get,
    Router,
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use hub_core::protocol::viewport::{decode_ack, Frame};
use hub_core::AgentHub;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// External capture backend for one agent's browser-automation session.
/// `hub-server` never implements this for real; see the module doc.
#[async_trait]
pub trait ScreencastSource: Send + Sync {
    /// Captures the next frame for `agent_id`, or `None` if the session has
    /// ended. `quality` is the configured JPEG quality hint.
    async fn capture(&self, agent_id: &str, frame_num: u32, quality: u8) -> Option<Frame>;

    /// Relays an intervention-mode input event into the browser session.
    async fn inject_input(&self, agent_id: &str, event: serde_json::Value);
}

/// Always ends the stream immediately: no automation backend is wired up.
pub struct NullScreencastSource;

#[async_trait]
impl ScreencastSource for NullScreencastSource {
    async fn capture(&self, _agent_id: &str, _frame_num: u32, _quality: u8) -> Option<Frame> {
        None
    }

    async fn inject_input(&self, _agent_id: &str, _event: serde_json::Value) {}
}

/// Tracks active streams so `browse_stream_stop` on the main socket (a
/// different connection entirely) can tear one down.
#[derive(Default)]
pub struct ViewportRegistry {
    active: DashMap<(String, String), oneshot::Sender<()>>,
}

impl ViewportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, agent_id: &str, client_id: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.active.insert((agent_id.to_string(), client_id.to_string()), tx);
        rx
    }

    fn remove(&self, agent_id: &str, client_id: &str) {
        self.active.remove(&(agent_id.to_string(), client_id.to_string()));
    }

    pub fn stop(&self, agent_id: &str, client_id: &str) {
        if let Some((_, tx)) = self.active.remove(&(agent_id.to_string(), client_id.to_string())) {
            let _ = tx.send(());
        }
    }
}

pub struct ViewportState {
    pub hub: Arc<AgentHub>,
    pub signing_secret: String,
    pub ack_high_water_mark: u32,
    pub frame_quality: u8,
    pub registry: Arc<ViewportRegistry>,
    pub source: Arc<dyn ScreencastSource>,
}

pub fn router(state: Arc<ViewportState>) -> Router {
    Router::new().route("/viewport", get(ws_handler)).with_state(state)
}

pub async fn run(addr: SocketAddr, state: Arc<ViewportState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "viewport streamer listening");
    axum::serve(listener, router(state)).await
}

#[derive(Deserialize)]
struct StreamQuery {
    agent_id: String,
    client_id: String,
    issued_at: i64,
    expiry: i64,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<StreamQuery>,
    State(state): State<Arc<ViewportState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, query, state))
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamClientMessage {
    StreamAuth { token: String },
    InputEvent { event: serde_json::Value },
}

const ACK_GRACE_PERIOD: Duration = Duration::from_secs(15);

async fn handle_socket(socket: WebSocket, query: StreamQuery, state: Arc<ViewportState>) {
    let (mut sink, mut stream) = socket.split();

    let authed = match stream.next().await {
        Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<StreamClientMessage>(&text) {
            Ok(StreamClientMessage::StreamAuth { token }) => {
                let now = chrono::Utc::now().timestamp();
                hub_core::signing::verify_stream_token(
                    state.signing_secret.as_bytes(),
                    &query.agent_id,
                    &query.client_id,
                    query.issued_at,
                    query.expiry,
                    &token,
                    now,
                )
            }
            _ => false,
        },
        _ => false,
    };

    let ack_json = serde_json::json!({"type": "stream_auth_result", "success": authed}).to_string();
    if sink.send(WsMessage::Text(ack_json)).await.is_err() || !authed {
        return;
    }

    if state.hub.get(&query.agent_id).is_none() {
        let _ = sink
            .send(WsMessage::Text(
                serde_json::json!({"type": "browse_stream_error", "error": "agent not found"}).to_string(),
            ))
            .await;
        return;
    }

    let mut stop_rx = state.registry.register(&query.agent_id, &query.client_id);
    let mut last_acked_frame_num: u32 = 0;
    let mut next_frame_num: u32 = 1;
    let mut last_ack_at = tokio::time::Instant::now();

    loop {
        let backpressured = next_frame_num.saturating_sub(last_acked_frame_num) > state.ack_high_water_mark;

        tokio::select! {
            _ = &mut stop_rx => {
                let _ = sink.send(WsMessage::Text(
                    serde_json::json!({"type": "browse_stream_stopped"}).to_string(),
                )).await;
                break;
            }
            _ = tokio::time::sleep(ACK_GRACE_PERIOD.saturating_sub(last_ack_at.elapsed())), if !backpressured => {
                if last_ack_at.elapsed() >= ACK_GRACE_PERIOD && next_frame_num > 1 {
                    warn!(agent_id = %query.agent_id, client_id = %query.client_id, "viewport ack watchdog timeout");
                    let _ = sink.send(WsMessage::Text(
                        serde_json::json!({"type": "browse_stream_error", "error": "ack timeout"}).to_string(),
                    )).await;
                    break;
                }
                match state.source.capture(&query.agent_id, next_frame_num, state.frame_quality).await {
                    Some(frame) => {
                        if sink.send(WsMessage::Binary(frame.encode())).await.is_err() {
                            break;
                        }
                        next_frame_num = next_frame_num.wrapping_add(1);
                    }
                    None => {
                        let _ = sink.send(WsMessage::Text(
                            serde_json::json!({"type": "browse_stream_stopped"}).to_string(),
                        )).await;
                        break;
                    }
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Binary(buf))) => {
                        if let Some(frame_num) = decode_ack(&buf) {
                            last_acked_frame_num = last_acked_frame_num.max(frame_num);
                            last_ack_at = tokio::time::Instant::now();
                        }
                    }
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Ok(StreamClientMessage::InputEvent { event }) = serde_json::from_str(&text) {
                            state.source.inject_input(&query.agent_id, event).await;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(err)) => {
                        warn!(%err, "viewport socket read error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.registry.remove(&query.agent_id, &query.client_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backpressure_gate() {
        assert!(5u32.saturating_sub(0) > 4);
        assert!(4u32.saturating_sub(0) <= 4);
    }

    #[tokio::test]
    async fn stop_signal_fires_registered_receiver() {
        let registry = ViewportRegistry::new();
        let mut rx = registry.register("agent-1", "client-1");
        registry.stop("agent-1", "client-1");
        assert!(rx.try_recv().is_ok() || tokio::time::timeout(Duration::from_millis(50), &mut rx).await.is_ok());
    }

    #[tokio::test]
    async fn null_source_ends_stream_immediately() {
        let source = NullScreencastSource;
        assert!(source.capture("agent-1", 1, 40).await.is_none());
    }
}
