use super::common;
use futures_util::StreamExt;
use hub_core::AgentConfig;
use tokio_tungstenite::connect_async;

fn seed(id: &str) -> hub_server::AgentSeed {
    hub_server::AgentSeed {
        id: id.to_string(),
        config: AgentConfig {
            model: "test-model".to_string(),
            provider: "test-provider".to_string(),
            system_prompt: None,
            tool_catalog: vec![],
            token_budget: None,
            cost_budget: None,
            network_policy: Default::default(),
        },
    }
}

#[tokio::test]
async fn send_message_to_an_inert_agent_appends_to_history_without_error() {
    let (url, _dir) = common::spawn_hub(vec![seed("agent-1")]).await;
    let (ws, _) = connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    common::send_json(&mut write, serde_json::json!({"type": "auth", "token": ""})).await;
    common::recv_json(&mut read).await;
    common::recv_json(&mut read).await;

    common::send_json(
        &mut write,
        serde_json::json!({"type": "send_message", "agent_id": "agent-1", "content": "hello"}),
    )
    .await;

    // No AgenticLoop is wired up, so the message is appended with no turn
    // execution and no reply is emitted; subscribing afterwards surfaces it.
    common::send_json(&mut write, serde_json::json!({"type": "subscribe_agent", "agent_id": "agent-1"})).await;
    let history = common::recv_json(&mut read).await;
    assert_eq!(history["type"], "conversation_history");
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"][0]["text"], "hello");
}

#[tokio::test]
async fn send_message_to_an_unknown_agent_errors() {
    let (url, _dir) = common::spawn_hub(vec![]).await;
    let (ws, _) = connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    common::send_json(&mut write, serde_json::json!({"type": "auth", "token": ""})).await;
    common::recv_json(&mut read).await;
    common::recv_json(&mut read).await;

    common::send_json(
        &mut write,
        serde_json::json!({"type": "send_message", "agent_id": "ghost", "content": "hello"}),
    )
    .await;
    let resp = common::recv_json(&mut read).await;
    assert_eq!(resp["type"], "error");
}
