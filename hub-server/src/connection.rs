//! WebSocket connection lifecycle: per-connection registration, the writer
//! task draining outbound messages, and the recv loop that rate-limits,
//! auth-gates, and dispatches inbound ones.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use hub_core::protocol::{ClientMessage, ServerMessage};
use hub_core::rate_limit::RateLimiter;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::app::AppState;
use crate::dispatch;
use crate::response::serialize_or_fallback;

pub(crate) async fn handle_socket(socket: WebSocket, peer_addr: IpAddr, state: Arc<AppState>) {
    let client_id = Uuid::new_v4().to_string();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.registry.register(&client_id, outbound_tx);

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = serialize_or_fallback(&message);
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut limiter = RateLimiter::new(state.config.rate_limit_messages_per_second);

    while let Some(received) = stream.next().await {
        let ws_message = match received {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!(client_id, %err, "websocket read error");
                break;
            }
        };
        let text = match ws_message {
            WsMessage::Text(t) => t,
            WsMessage::Binary(b) => String::from_utf8_lossy(&b).into_owned(),
            WsMessage::Close(_) => break,
            _ => continue,
        };

        if !limiter.record() {
            state
                .registry
                .send_to(&client_id, ServerMessage::error(None, "Rate limit exceeded"));
            break;
        }

        let client_message: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(err) => {
                state
                    .registry
                    .send_to(&client_id, ServerMessage::error(None, format!("parse error: {err}")));
                continue;
            }
        };

        let pre_authenticated = state.config.localhost_bypass_auth_applies(peer_addr);
        if pre_authenticated && !state.registry.is_authenticated(&client_id) {
            state.registry.mark_authenticated(&client_id);
        }

        if !matches!(client_message, ClientMessage::Auth(_)) && !state.registry.is_authenticated(&client_id) {
            state.registry.send_to(&client_id, ServerMessage::not_authenticated());
            continue;
        }

        dispatch::handle(&state, &client_id, peer_addr, client_message).await;
    }

    writer.abort();
    let subscribed = state.registry.remove(&client_id);
    if !subscribed.is_empty() {
        state.hub.router.remove_client(&client_id);
    }
    state.push_registry.unsubscribe(&client_id);
}
