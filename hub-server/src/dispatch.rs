//! Per-message-type handlers for the authenticated half of the WebSocket
//! protocol. `connection::handle_socket` owns the recv loop, auth gate, and
//! rate limiting; this module is the exhaustive match over `ClientMessage`.

use hub_core::protocol::{
    AgentAction, AgentStateMessage, ApiErrorMessage, AuthResultMessage, BrowseInterveneEndedMessage,
    BrowseInterveneGrantedMessage, BrowseStreamTokenMessage, ClientMessage, ContextChangeMessage,
    ConversationHistoryMessage, FetchResultMessage, HubAgentsListMessage, PersistResultMessage,
    PushSubscribeResultMessage, PushVerifyResultMessage, RestoreDomStateMessage, RestoreSessionMessage,
    ServerMessage, ToolResultMessage,
};
use hub_core::runner::RunnerSnapshot;
use std::net::IpAddr;
use std::sync::Arc;

use crate::app::AppState;
use crate::tools;

pub(crate) async fn handle(state: &Arc<AppState>, client_id: &str, peer_addr: IpAddr, message: ClientMessage) {
    match message {
        ClientMessage::Auth(msg) => handle_auth(state, client_id, peer_addr, msg.token).await,
        ClientMessage::ToolRequest(msg) => {
            let catalog = tools::default_catalog();
            let result = tools::execute_tool(
                &state.hub,
                &state.registry,
                &catalog,
                msg.agent_id.as_deref(),
                &msg.name,
                msg.input,
            )
            .await;
            state.registry.send_to(
                client_id,
                ServerMessage::ToolResult(ToolResultMessage {
                    id: msg.id,
                    is_error: result.is_error,
                    content: result.content,
                }),
            );
        }
        ClientMessage::FetchRequest(msg) => handle_fetch(state, client_id, msg.id, msg.url, msg.options).await,
        ClientMessage::ApiProxyRequest(msg) => {
            state.registry.send_to(
                client_id,
                ServerMessage::ApiError(ApiErrorMessage {
                    id: msg.id,
                    error: format!("No provider adapter configured for '{}'", msg.provider),
                }),
            );
        }
        ClientMessage::SubscribeAgent(msg) => handle_subscribe(state, client_id, msg.agent_id).await,
        ClientMessage::UnsubscribeAgent(msg) => {
            state.registry.unsubscribe(client_id, &msg.agent_id);
        }
        ClientMessage::ListHubAgents => {
            state.registry.send_to(
                client_id,
                ServerMessage::HubAgentsList(HubAgentsListMessage {
                    agents: state.hub.list_ids(),
                }),
            );
        }
        ClientMessage::AgentAction(msg) => handle_agent_action(state, client_id, msg.agent_id, msg.action).await,
        ClientMessage::SendMessage(msg) => {
            let Some(handle) = state.hub.get(&msg.agent_id) else {
                send_error(state, client_id, format!("agent not found: {}", msg.agent_id));
                return;
            };
            if let Err(err) = handle.runner.send_message(msg.content, None).await {
                send_error(state, client_id, err.to_string());
            }
        }
        ClientMessage::PersistAgent(msg) => handle_persist(state, client_id, msg.session).await,
        ClientMessage::RestoreAgent(msg) => handle_restore(state, client_id, msg.agent_id).await,
        ClientMessage::StateWriteThrough(msg) => {
            if let Err(err) = state
                .hub
                .state_write_through(&msg.hub_agent_id, &msg.key, msg.value, msg.action, Some(client_id), state.registry.as_ref())
                .await
            {
                send_error(state, client_id, err.to_string());
            }
        }
        ClientMessage::FileWriteThrough(msg) => {
            if let Err(err) = state
                .hub
                .file_write_through(&msg.hub_agent_id, &msg.path, msg.content, msg.action, Some(client_id), state.registry.as_ref())
                .await
            {
                send_error(state, client_id, err.to_string());
            }
        }
        ClientMessage::DomStateUpdate(msg) => handle_dom_update(state, client_id, msg.hub_agent_id, msg.dom_state).await,
        ClientMessage::BrowserToolResult(msg) => state.hub.router.resolve(&msg.id, msg.result),
        ClientMessage::SkillApprovalResponse(msg) => state.skill_gate.resolve(&msg.id, msg.approved),
        ClientMessage::BrowseStreamRequest(msg) => handle_stream_request(state, client_id, msg.agent_id).await,
        ClientMessage::BrowseStreamStop(msg) => {
            state.viewport_registry.stop(&msg.agent_id, client_id);
            state.registry.send_to(
                client_id,
                ServerMessage::BrowseStreamStopped(hub_core::protocol::BrowseStreamStoppedMessage {
                    agent_id: msg.agent_id,
                }),
            );
        }
        ClientMessage::BrowseInterveneRequest(msg) => handle_intervene_request(state, client_id, msg.agent_id).await,
        ClientMessage::BrowseInterveneRelease(msg) => {
            if let Some(handle) = state.hub.get(&msg.agent_id) {
                handle.runner.intervene_end(msg.notification.clone()).await;
                state.registry.broadcast_to_agent_subscribers(
                    &msg.agent_id,
                    ServerMessage::BrowseInterveneEnded(BrowseInterveneEndedMessage {
                        agent_id: msg.agent_id.clone(),
                        reason: "released".to_string(),
                        notification: msg.notification,
                    }),
                );
            }
        }
        ClientMessage::PushSubscribe(msg) => {
            let pin = state.push_registry.subscribe(client_id, msg.subscription);
            tracing::info!(client_id, pin, "push subscription pin issued out of band");
            state.registry.send_to(
                client_id,
                ServerMessage::PushSubscribeResult(PushSubscribeResultMessage { success: true }),
            );
        }
        ClientMessage::PushVerifyPin(msg) => {
            let success = state.push_registry.verify_pin(client_id, &msg.pin);
            state
                .registry
                .send_to(client_id, ServerMessage::PushVerifyResult(PushVerifyResultMessage { success }));
        }
        ClientMessage::PushUnsubscribe(_) => state.push_registry.unsubscribe(client_id),
        ClientMessage::VisibilityState(msg) => {
            tracing::debug!(client_id, visible = msg.visible, "client visibility changed");
        }
    }
}

async fn handle_auth(state: &Arc<AppState>, client_id: &str, peer_addr: IpAddr, token: String) {
    let already_local = state.config.localhost_bypass_auth_applies(peer_addr);
    let accepted = already_local
        || match &state.config.auth_token {
            Some(expected) => hub_core::auth::constant_time_eq(&token, expected),
            None => true,
        };

    if !accepted {
        state.registry.send_to(
            client_id,
            ServerMessage::AuthResult(AuthResultMessage {
                success: false,
                error: Some("invalid token".to_string()),
                hub_name: None,
                shared_providers: None,
                http_api_url: None,
                stream_url: None,
            }),
        );
        return;
    }

    state.registry.mark_authenticated(client_id);
    state.registry.send_to(
        client_id,
        ServerMessage::AuthResult(AuthResultMessage {
            success: true,
            error: None,
            hub_name: Some(state.config.hub_name.clone()),
            shared_providers: Some(state.config.shared_providers.clone()),
            http_api_url: state.config.http_api_url.clone(),
            stream_url: Some(format!("ws://{}:{}/viewport", state.config.host, state.config.stream_port)),
        }),
    );
    state.registry.send_to(
        client_id,
        ServerMessage::AnnounceTools(hub_core::protocol::AnnounceToolsMessage {
            tools: tools::default_catalog(),
        }),
    );
}

async fn handle_fetch(state: &Arc<AppState>, client_id: &str, id: String, url: String, options: serde_json::Value) {
    let method = options
        .get("method")
        .and_then(|v| v.as_str())
        .unwrap_or("GET")
        .to_uppercase();
    let mut builder = state.http_client.request(
        method.parse().unwrap_or(reqwest::Method::GET),
        &url,
    );
    if let Some(headers) = options.get("headers").and_then(|v| v.as_object()) {
        for (key, value) in headers {
            if let Some(value) = value.as_str() {
                builder = builder.header(key.as_str(), value);
            }
        }
    }
    if let Some(body) = options.get("body").and_then(|v| v.as_str()) {
        builder = builder.body(body.to_string());
    }

    let result = match builder.send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            match response.text().await {
                Ok(body) => FetchResultMessage {
                    id,
                    is_error: false,
                    content: serde_json::json!({"status": status, "body": body}),
                },
                Err(err) => FetchResultMessage {
                    id,
                    is_error: true,
                    content: serde_json::json!(err.to_string()),
                },
            }
        }
        Err(err) => FetchResultMessage {
            id,
            is_error: true,
            content: serde_json::json!(err.to_string()),
        },
    };
    state.registry.send_to(client_id, ServerMessage::FetchResult(result));
}

async fn handle_subscribe(state: &Arc<AppState>, client_id: &str, agent_id: String) {
    state.registry.subscribe(client_id, &agent_id);
    state.hub.router.note_activity(&agent_id, client_id);

    let Some(handle) = state.hub.get(&agent_id) else {
        send_error(state, client_id, format!("agent not found: {agent_id}"));
        return;
    };

    state.registry.send_to(
        client_id,
        ServerMessage::ConversationHistory(ConversationHistoryMessage {
            agent_id: agent_id.clone(),
            messages: handle.runner.history().await,
        }),
    );
    state.registry.send_to(
        client_id,
        ServerMessage::RestoreDomState(RestoreDomStateMessage {
            agent_id: agent_id.clone(),
            dom_state: handle.runner.dom_snapshot().await,
        }),
    );
    let config = handle.runner.config().await;
    let catalog = tools::default_catalog();
    let scoped_tools = if config.tool_catalog.is_empty() {
        catalog
    } else {
        catalog
            .into_iter()
            .filter(|t| config.tool_catalog.contains(&t.name))
            .collect()
    };
    state.registry.send_to(
        client_id,
        ServerMessage::ContextChange(ContextChangeMessage {
            agent_id: agent_id.clone(),
            tools: scoped_tools,
        }),
    );
    state.registry.send_to(
        client_id,
        ServerMessage::AgentState(AgentStateMessage {
            agent_id,
            state: format!("{:?}", handle.runner.state().await).to_lowercase(),
            busy: handle.runner.is_busy().await,
        }),
    );
}

async fn handle_agent_action(state: &Arc<AppState>, client_id: &str, agent_id: String, action: AgentAction) {
    let Some(handle) = state.hub.get(&agent_id) else {
        send_error(state, client_id, format!("agent not found: {agent_id}"));
        return;
    };
    let result = match action {
        AgentAction::Pause => handle.runner.pause().await.map_err(|e| e.to_string()),
        AgentAction::Resume => handle.runner.resume().await.map_err(|e| e.to_string()),
        AgentAction::Stop => handle.runner.stop().await.map_err(|e| e.to_string()),
        AgentAction::Kill => {
            handle.runner.kill().await;
            Ok(())
        }
        AgentAction::Remove => state.hub.remove_agent(&agent_id).await.map_err(|e| e.to_string()),
    };
    if let Err(err) = result {
        send_error(state, client_id, err);
    }
}

async fn handle_persist(state: &Arc<AppState>, client_id: &str, session: serde_json::Value) {
    let snapshot: Result<RunnerSnapshot, _> = serde_json::from_value(session);
    let (agent_id, result) = match snapshot {
        Ok(snapshot) => {
            let agent_id = snapshot.id.clone();
            let outcome = state.hub.persist_raw_snapshot(snapshot).await;
            (agent_id, outcome.map_err(|e| e.to_string()))
        }
        Err(err) => ("unknown".to_string(), Err(err.to_string())),
    };
    state.registry.send_to(
        client_id,
        ServerMessage::PersistResult(PersistResultMessage {
            agent_id,
            success: result.is_ok(),
            error: result.err(),
        }),
    );
}

async fn handle_restore(state: &Arc<AppState>, client_id: &str, agent_id: String) {
    match state.hub.load_snapshot(&agent_id).await {
        Ok(snapshot) => {
            let session = serde_json::to_value(&snapshot).unwrap_or(serde_json::Value::Null);
            state.registry.send_to(
                client_id,
                ServerMessage::RestoreSession(RestoreSessionMessage { agent_id, session }),
            );
        }
        Err(err) => send_error(state, client_id, err.to_string()),
    }
}

async fn handle_dom_update(state: &Arc<AppState>, client_id: &str, agent_id: String, dom_state: hub_core::model::DomSnapshot) {
    let Some(handle) = state.hub.get(&agent_id) else {
        send_error(state, client_id, format!("agent not found: {agent_id}"));
        return;
    };
    if let Err(err) = handle.dom.restore(dom_state.clone()).await {
        send_error(state, client_id, err.to_string());
        return;
    }
    handle.runner.set_dom_state(dom_state.clone()).await;
    state.registry.broadcast_to_agent_subscribers(
        &agent_id,
        ServerMessage::RestoreDomState(RestoreDomStateMessage { agent_id, dom_state }),
    );
}

async fn handle_stream_request(state: &Arc<AppState>, client_id: &str, agent_id: String) {
    if state.hub.get(&agent_id).is_none() {
        send_error(state, client_id, format!("agent not found: {agent_id}"));
        return;
    }
    let issued_at = chrono::Utc::now().timestamp();
    let expiry = issued_at + 60;
    let token = match hub_core::signing::sign_stream_token(
        state.config.signing_secret.as_bytes(),
        &agent_id,
        client_id,
        issued_at,
        expiry,
    ) {
        Ok(token) => token,
        Err(_) => {
            send_error(state, client_id, "failed to sign stream token".to_string());
            return;
        }
    };
    // The signed token itself travels in the `stream_auth` message on the
    // dedicated stream socket, not in this URL: only the identifiers needed
    // to look the token back up accompany the connection.
    let stream_url = format!(
        "ws://{}:{}/viewport?agent_id={}&client_id={}&issued_at={}&expiry={}",
        state.config.host, state.config.stream_port, agent_id, client_id, issued_at, expiry
    );
    state.registry.send_to(
        client_id,
        ServerMessage::BrowseStreamToken(BrowseStreamTokenMessage {
            agent_id: agent_id.clone(),
            token,
            stream_port: state.config.stream_port,
            viewport: serde_json::json!({"quality": state.config.stream_frame_quality}),
            stream_url: Some(stream_url),
        }),
    );
}

async fn handle_intervene_request(state: &Arc<AppState>, client_id: &str, agent_id: String) {
    let Some(handle) = state.hub.get(&agent_id) else {
        send_error(state, client_id, format!("agent not found: {agent_id}"));
        return;
    };
    handle.runner.intervene_start().await;
    state.registry.send_to(
        client_id,
        ServerMessage::BrowseInterveneGranted(BrowseInterveneGrantedMessage { agent_id }),
    );
}

fn send_error(state: &Arc<AppState>, client_id: &str, message: impl Into<String>) {
    state.registry.send_to(client_id, ServerMessage::error(None, message));
}
