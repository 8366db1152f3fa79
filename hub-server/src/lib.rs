//! Axum WebSocket hub for the Hub Runtime.
//!
//! Connection lifecycle, auth/rate-limiting, protocol dispatch, subscription
//! fan-out, the signed-URL file route, and wiring each agent's event stream
//! to its subscribed clients. All agent/protocol semantics live in
//! `hub-core`; this crate is transport only.
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`].

mod app;
mod config;
mod connection;
mod dispatch;
mod push;
mod registry;
mod response;
mod skill_approval;
mod tools;
mod viewport;

pub use config::HubConfig;
pub use viewport::{NullScreencastSource, ScreencastSource};

use hub_core::protocol::{AgentEventMessage, AgentLoopEventMessage, ServerMessage};
use hub_core::runner::ToolExecutor;
use hub_core::{AgentConfig, AgentHub};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

use app::{router, AppState};
use push::PushRegistry;
use registry::ConnectionRegistry;
use skill_approval::SkillApprovalGate;
use tools::HubToolExecutor;
use viewport::{ViewportRegistry, ViewportState};

/// One agent to pre-register at startup, since the wire protocol has no
/// `create_agent` message: agent provisioning is owned by whatever process
/// wires up `hub-server` (here, `hub-cli`'s config/flags), not by a
/// connected browser.
pub struct AgentSeed {
    pub id: String,
    pub config: AgentConfig,
}

/// Runs the hub on an existing listener. Used by tests (bind to
/// `127.0.0.1:0`, then pass the listener) and by [`run_serve`].
///
/// `screencast_source` backs the viewport streamer's frame capture; pass
/// [`NullScreencastSource`] when no browser-automation backend is wired up.
pub async fn run_serve_on_listener(
    listener: TcpListener,
    config: HubConfig,
    seeds: Vec<AgentSeed>,
    screencast_source: Arc<dyn ScreencastSource>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!(%addr, "hub listening");

    std::fs::create_dir_all(&config.sandbox_path).ok();
    let session_db = format!("{}/sessions.db", config.sandbox_path.trim_end_matches('/'));
    let sessions = Arc::new(
        hub_core::SqliteSessionStore::new(&session_db)
            .map_err(|e| Box::<dyn std::error::Error + Send + Sync>::from(e.to_string()))?,
    );
    let hub = Arc::new(AgentHub::new(sessions));
    let registry = Arc::new(ConnectionRegistry::new());
    let skill_gate = Arc::new(SkillApprovalGate::new());
    let push_registry = Arc::new(PushRegistry::new());
    let viewport_registry = Arc::new(ViewportRegistry::new());
    let http_client = reqwest::Client::new();

    for seed in seeds {
        spawn_agent(&hub, &registry, seed.id, seed.config);
    }

    let viewport_state = Arc::new(ViewportState {
        hub: hub.clone(),
        signing_secret: config.signing_secret.clone(),
        ack_high_water_mark: config.stream_ack_high_water_mark,
        frame_quality: config.stream_frame_quality,
        registry: viewport_registry.clone(),
        source: screencast_source,
    });
    let viewport_addr = SocketAddr::new(config.host, config.stream_port);
    tokio::spawn(async move {
        if let Err(err) = viewport::run(viewport_addr, viewport_state).await {
            tracing::error!(%err, "viewport streamer exited");
        }
    });

    let state = Arc::new(AppState {
        hub: hub.clone(),
        registry,
        skill_gate,
        push_registry,
        viewport_registry,
        config,
        http_client,
    });

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            hub.tick_schedulers(chrono::Utc::now()).await;
        }
    });

    let app = router(state);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

/// Registers an agent (always with `agentic_loop: None`: no `AgenticLoop`
/// implementation exists in this workspace, since wiring a real LLM is out
/// of scope here) and forwards its runner/loop events to subscribed
/// clients.
fn spawn_agent(hub: &Arc<AgentHub>, registry: &Arc<ConnectionRegistry>, id: String, config: AgentConfig) {
    let catalog = tools::default_catalog();
    let tool_executor: Arc<dyn ToolExecutor> = Arc::new(HubToolExecutor {
        agent_id: id.clone(),
        hub: hub.clone(),
        directory: registry.clone(),
        catalog,
    });

    let handle = match hub.create_agent(
        id.clone(),
        config,
        None,
        Arc::new(hub_core::runner::NullProviderAdapter),
        tool_executor,
    ) {
        Ok(handle) => handle,
        Err(err) => {
            tracing::warn!(agent_id = %id, %err, "failed to register agent");
            return;
        }
    };

    let runner = handle.runner.clone();
    let event_registry = registry.clone();
    let event_agent_id = id.clone();
    let loop_registry = registry.clone();
    let loop_agent_id = id.clone();
    tokio::spawn(async move {
        let event_sub = runner
            .on_event(move |event| {
                let value = serde_json::to_value(&event).unwrap_or(serde_json::Value::Null);
                event_registry.broadcast_to_agent_subscribers(
                    &event_agent_id,
                    ServerMessage::AgentEvent(AgentEventMessage {
                        agent_id: event_agent_id.clone(),
                        event: value,
                    }),
                );
            })
            .await;
        let loop_sub = runner
            .on_agent_event(move |event| {
                let value = serde_json::to_value(&event).unwrap_or(serde_json::Value::Null);
                loop_registry.broadcast_to_agent_subscribers(
                    &loop_agent_id,
                    ServerMessage::AgentLoopEvent(AgentLoopEventMessage {
                        agent_id: loop_agent_id.clone(),
                        event: value,
                    }),
                );
            })
            .await;
        // Held for the agent's lifetime: the runner is never torn down while
        // the hub process runs, so these subscriptions never unsubscribe.
        std::mem::forget(event_sub);
        std::mem::forget(loop_sub);
    });
}

/// Runs the hub. Listens on `config.host:config.port`; the viewport streamer
/// binds `config.host:config.stream_port` alongside it.
pub async fn run_serve(
    config: HubConfig,
    seeds: Vec<AgentSeed>,
    screencast_source: Arc<dyn ScreencastSource>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::new(config.host, config.port);
    let listener = TcpListener::bind(addr).await?;
    run_serve_on_listener(listener, config, seeds, screencast_source).await
}
