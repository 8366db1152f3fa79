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
async fn subscribing_to_an_agent_replies_with_history_dom_and_context() {
    let (url, _dir) = common::spawn_hub(vec![seed("agent-1")]).await;
    let (ws, _) = connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    common::send_json(&mut write, serde_json::json!({"type": "auth", "token": ""})).await;
    common::recv_json(&mut read).await;
    common::recv_json(&mut read).await;

    common::send_json(&mut write, serde_json::json!({"type": "subscribe_agent", "agent_id": "agent-1"})).await;

    let history = common::recv_json(&mut read).await;
    assert_eq!(history["type"], "conversation_history");
    assert_eq!(history["agent_id"], "agent-1");
    assert_eq!(history["messages"].as_array().unwrap().len(), 0);

    let dom = common::recv_json(&mut read).await;
    assert_eq!(dom["type"], "restore_dom_state");

    let context = common::recv_json(&mut read).await;
    assert_eq!(context["type"], "context_change");
}

#[tokio::test]
async fn subscribing_to_an_unknown_agent_errors() {
    let (url, _dir) = common::spawn_hub(vec![]).await;
    let (ws, _) = connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    common::send_json(&mut write, serde_json::json!({"type": "auth", "token": ""})).await;
    common::recv_json(&mut read).await;
    common::recv_json(&mut read).await;

    common::send_json(&mut write, serde_json::json!({"type": "subscribe_agent", "agent_id": "ghost"})).await;
    let resp = common::recv_json(&mut read).await;
    assert_eq!(resp["type"], "error");
}

#[tokio::test]
async fn list_hub_agents_reports_seeded_agents() {
    let (url, _dir) = common::spawn_hub(vec![seed("agent-1"), seed("agent-2")]).await;
    let (ws, _) = connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    common::send_json(&mut write, serde_json::json!({"type": "auth", "token": ""})).await;
    common::recv_json(&mut read).await;
    common::recv_json(&mut read).await;

    common::send_json(&mut write, serde_json::json!({"type": "list_hub_agents"})).await;
    let resp = common::recv_json(&mut read).await;
    assert_eq!(resp["type"], "hub_agents_list");
    let mut agents: Vec<String> = resp["agents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    agents.sort();
    assert_eq!(agents, vec!["agent-1".to_string(), "agent-2".to_string()]);
}
