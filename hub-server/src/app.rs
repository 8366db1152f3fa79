//! Axum app: shared state, router, WebSocket upgrade, and the signed
//! file-download route.

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use hub_core::AgentHub;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::HubConfig;
use crate::connection::handle_socket;
use crate::push::PushRegistry;
use crate::registry::ConnectionRegistry;
use crate::skill_approval::SkillApprovalGate;
use crate::viewport::ViewportRegistry;

pub(crate) struct AppState {
    pub(crate) hub: Arc<AgentHub>,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) skill_gate: Arc<SkillApprovalGate>,
    pub(crate) push_registry: Arc<PushRegistry>,
    pub(crate) viewport_registry: Arc<ViewportRegistry>,
    pub(crate) config: HubConfig,
    pub(crate) http_client: reqwest::Client,
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/agents/:agent_id/files/*path", get(file_handler))
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, peer.ip(), state))
}

#[derive(Deserialize)]
struct FileQuery {
    sig: String,
    exp: i64,
}

async fn file_handler(
    axum::extract::Path((agent_id, path)): axum::extract::Path<(String, String)>,
    Query(query): Query<FileQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let now = chrono::Utc::now().timestamp();
    let valid = hub_core::signing::verify_file_url(
        state.config.signing_secret.as_bytes(),
        &agent_id,
        &path,
        query.exp,
        &query.sig,
        now,
    );
    if !valid {
        return (StatusCode::FORBIDDEN, "invalid or expired signature").into_response();
    }

    let Some(handle) = state.hub.get(&agent_id) else {
        return (StatusCode::NOT_FOUND, "agent not found").into_response();
    };
    match handle.storage.get(&path).await {
        Some(value) => {
            let body = value.as_str().map(|s| s.to_string()).unwrap_or_else(|| value.to_string());
            body.into_response()
        }
        None => (StatusCode::NOT_FOUND, "file not found").into_response(),
    }
}
