use super::common;
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;

#[tokio::test]
async fn capabilities_tool_round_trips() {
    let (url, _dir) = common::spawn_hub(vec![]).await;
    let (ws, _) = connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    common::send_json(&mut write, serde_json::json!({"type": "auth", "token": ""})).await;
    common::recv_json(&mut read).await;
    common::recv_json(&mut read).await;

    common::send_json(
        &mut write,
        serde_json::json!({"type": "tool_request", "id": "t1", "name": "capabilities", "input": {}}),
    )
    .await;
    let resp = common::recv_json(&mut read).await;
    assert_eq!(resp["type"], "tool_result");
    assert_eq!(resp["id"], "t1");
    assert_eq!(resp["is_error"], false);
    assert!(resp["content"]["tools"].as_array().unwrap().contains(&serde_json::json!("capabilities")));
}

#[tokio::test]
async fn unknown_tool_name_errors() {
    let (url, _dir) = common::spawn_hub(vec![]).await;
    let (ws, _) = connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    common::send_json(&mut write, serde_json::json!({"type": "auth", "token": ""})).await;
    common::recv_json(&mut read).await;
    common::recv_json(&mut read).await;

    common::send_json(
        &mut write,
        serde_json::json!({"type": "tool_request", "id": "t2", "name": "nonexistent", "input": {}}),
    )
    .await;
    let resp = common::recv_json(&mut read).await;
    assert_eq!(resp["type"], "tool_result");
    assert_eq!(resp["is_error"], true);
}

#[tokio::test]
async fn browser_only_tool_without_agent_id_errors() {
    let (url, _dir) = common::spawn_hub(vec![]).await;
    let (ws, _) = connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    common::send_json(&mut write, serde_json::json!({"type": "auth", "token": ""})).await;
    common::recv_json(&mut read).await;
    common::recv_json(&mut read).await;

    common::send_json(
        &mut write,
        serde_json::json!({"type": "tool_request", "id": "t3", "name": "dom_query", "input": {"selector": "body"}}),
    )
    .await;
    let resp = common::recv_json(&mut read).await;
    assert_eq!(resp["type"], "tool_result");
    assert_eq!(resp["is_error"], true);
}
