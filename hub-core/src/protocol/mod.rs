//! Hub front-end WebSocket protocol: client/server message envelopes, keyed
//! by a `type` discriminator.
//!
//! Dispatch over this union is exhaustive pattern matching, not open
//! polymorphism: unknown `type` values fail to deserialize and the caller
//! replies with a generic `Error` message instead of growing a handler
//! registry.

pub mod viewport;

use crate::model::{DomSnapshot, Message};
use serde::{Deserialize, Serialize};

/// An agent action requested over `agent_action`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAction {
    Pause,
    Resume,
    Stop,
    Kill,
    Remove,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterveneMode {
    Visible,
    Private,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteThroughAction {
    Set,
    Delete,
}

/// A single entry in the announced tool catalog.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCatalogEntry {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
    /// True when this tool can only be executed inside a browser.
    #[serde(default)]
    pub browser_only: bool,
}

// ---------------------------------------------------------------------------
// Client -> Hub
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthMessage {
    pub token: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolRequestMessage {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub agent_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchRequestMessage {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiProxyRequestMessage {
    pub id: String,
    pub provider: String,
    pub path: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscribeAgentMessage {
    pub agent_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnsubscribeAgentMessage {
    pub agent_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentActionMessage {
    pub agent_id: String,
    pub action: AgentAction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendMessageMessage {
    pub agent_id: String,
    pub content: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistAgentMessage {
    pub session: serde_json::Value,
    #[serde(default)]
    pub key_hashes: Option<serde_json::Value>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_provider: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RestoreAgentMessage {
    pub agent_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateWriteThroughMessage {
    pub hub_agent_id: String,
    pub key: String,
    #[serde(default)]
    pub value: serde_json::Value,
    pub action: WriteThroughAction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileWriteThroughMessage {
    pub hub_agent_id: String,
    pub path: String,
    #[serde(default)]
    pub content: String,
    pub action: WriteThroughAction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomStateUpdateMessage {
    pub hub_agent_id: String,
    pub dom_state: DomSnapshot,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowserToolResultMessage {
    pub id: String,
    pub result: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SkillApprovalResponseMessage {
    pub id: String,
    pub approved: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowseStreamRequestMessage {
    pub agent_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowseStreamStopMessage {
    pub agent_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowseInterveneRequestMessage {
    pub agent_id: String,
    pub mode: InterveneMode,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowseInterveneReleaseMessage {
    pub agent_id: String,
    #[serde(default)]
    pub notification: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushSubscribeMessage {
    #[serde(default)]
    pub subscription: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushVerifyPinMessage {
    pub pin: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushUnsubscribeMessage {}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VisibilityStateMessage {
    pub visible: bool,
}

/// Client-to-hub inbound message envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth(AuthMessage),
    ToolRequest(ToolRequestMessage),
    FetchRequest(FetchRequestMessage),
    ApiProxyRequest(ApiProxyRequestMessage),
    SubscribeAgent(SubscribeAgentMessage),
    UnsubscribeAgent(UnsubscribeAgentMessage),
    ListHubAgents,
    AgentAction(AgentActionMessage),
    SendMessage(SendMessageMessage),
    PersistAgent(PersistAgentMessage),
    RestoreAgent(RestoreAgentMessage),
    StateWriteThrough(StateWriteThroughMessage),
    FileWriteThrough(FileWriteThroughMessage),
    DomStateUpdate(DomStateUpdateMessage),
    BrowserToolResult(BrowserToolResultMessage),
    SkillApprovalResponse(SkillApprovalResponseMessage),
    BrowseStreamRequest(BrowseStreamRequestMessage),
    BrowseStreamStop(BrowseStreamStopMessage),
    BrowseInterveneRequest(BrowseInterveneRequestMessage),
    BrowseInterveneRelease(BrowseInterveneReleaseMessage),
    PushSubscribe(PushSubscribeMessage),
    PushVerifyPin(PushVerifyPinMessage),
    PushUnsubscribe(PushUnsubscribeMessage),
    VisibilityState(VisibilityStateMessage),
}

// ---------------------------------------------------------------------------
// Hub -> Client
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthResultMessage {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_providers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_api_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnnounceToolsMessage {
    pub tools: Vec<ToolCatalogEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResultMessage {
    pub id: String,
    #[serde(default)]
    pub is_error: bool,
    pub content: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchResultMessage {
    pub id: String,
    #[serde(default)]
    pub is_error: bool,
    pub content: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiStreamChunkMessage {
    pub id: String,
    pub chunk: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiStreamEndMessage {
    pub id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiErrorMessage {
    pub id: String,
    pub error: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentEventMessage {
    pub agent_id: String,
    pub event: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentLoopEventMessage {
    pub agent_id: String,
    pub event: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentStateMessage {
    pub agent_id: String,
    pub state: String,
    pub busy: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationHistoryMessage {
    pub agent_id: String,
    pub messages: Vec<Message>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RestoreDomStateMessage {
    pub agent_id: String,
    pub dom_state: DomSnapshot,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextChangeMessage {
    pub agent_id: String,
    pub tools: Vec<ToolCatalogEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatePushMessage {
    pub hub_agent_id: String,
    pub key: String,
    pub value: serde_json::Value,
    pub action: WriteThroughAction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilePushMessage {
    pub hub_agent_id: String,
    pub path: String,
    pub content: String,
    pub action: WriteThroughAction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowserToolRequestMessage {
    pub id: String,
    pub hub_agent_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SkillApprovalRequestMessage {
    pub id: String,
    pub agent_id: String,
    pub description: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistResultMessage {
    pub agent_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RestoreSessionMessage {
    pub agent_id: String,
    pub session: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubAgentsListMessage {
    pub agents: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowseStreamTokenMessage {
    pub agent_id: String,
    pub token: String,
    pub stream_port: u16,
    #[serde(default)]
    pub viewport: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowseStreamStoppedMessage {
    pub agent_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowseStreamErrorMessage {
    pub agent_id: String,
    pub error: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowseInterveneGrantedMessage {
    pub agent_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowseInterveneDeniedMessage {
    pub agent_id: String,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowseInterveneEndedMessage {
    pub agent_id: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VapidPublicKeyMessage {
    pub key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushSubscribeResultMessage {
    pub success: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushVerifyResultMessage {
    pub success: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub message: String,
}

/// Hub-to-client outbound message envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthResult(AuthResultMessage),
    AnnounceTools(AnnounceToolsMessage),
    ToolResult(ToolResultMessage),
    FetchResult(FetchResultMessage),
    ApiStreamChunk(ApiStreamChunkMessage),
    ApiStreamEnd(ApiStreamEndMessage),
    ApiError(ApiErrorMessage),
    AgentEvent(AgentEventMessage),
    AgentLoopEvent(AgentLoopEventMessage),
    AgentState(AgentStateMessage),
    ConversationHistory(ConversationHistoryMessage),
    RestoreDomState(RestoreDomStateMessage),
    ContextChange(ContextChangeMessage),
    StatePush(StatePushMessage),
    FilePush(FilePushMessage),
    BrowserToolRequest(BrowserToolRequestMessage),
    SkillApprovalRequest(SkillApprovalRequestMessage),
    PersistResult(PersistResultMessage),
    RestoreSession(RestoreSessionMessage),
    HubAgentsList(HubAgentsListMessage),
    BrowseStreamToken(BrowseStreamTokenMessage),
    BrowseStreamStopped(BrowseStreamStoppedMessage),
    BrowseStreamError(BrowseStreamErrorMessage),
    BrowseInterveneGranted(BrowseInterveneGrantedMessage),
    BrowseInterveneDenied(BrowseInterveneDeniedMessage),
    BrowseInterveneEnded(BrowseInterveneEndedMessage),
    VapidPublicKey(VapidPublicKeyMessage),
    PushSubscribeResult(PushSubscribeResultMessage),
    PushVerifyResult(PushVerifyResultMessage),
    Error(ErrorMessage),
}

impl ServerMessage {
    pub fn error(id: Option<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorMessage {
            id,
            message: message.into(),
        })
    }

    pub fn not_authenticated() -> Self {
        Self::error(None, "Not authenticated")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_auth_roundtrip() {
        let msg = ClientMessage::Auth(AuthMessage {
            token: "tok".into(),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"auth\""));
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, ClientMessage::Auth(_)));
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let json = r#"{"type":"not_a_real_type"}"#;
        let parsed: Result<ClientMessage, _> = serde_json::from_str(json);
        assert!(parsed.is_err());
    }

    #[test]
    fn server_not_authenticated_shape() {
        let msg = ServerMessage::not_authenticated();
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("Not authenticated"));
        assert!(json.contains("\"type\":\"error\""));
    }

    #[test]
    fn tool_request_roundtrip() {
        let msg = ClientMessage::ToolRequest(ToolRequestMessage {
            id: "1".into(),
            name: "read_file".into(),
            input: serde_json::json!({"path": "a.txt"}),
            agent_id: Some("agent-1".into()),
        });
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            ClientMessage::ToolRequest(r) => {
                assert_eq!(r.name, "read_file");
                assert_eq!(r.agent_id.as_deref(), Some("agent-1"));
            }
            _ => panic!("expected ToolRequest"),
        }
    }
}
