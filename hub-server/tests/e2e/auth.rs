use super::common;
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;

#[tokio::test]
async fn localhost_bypass_authenticates_without_a_token() {
    let (url, _dir) = common::spawn_hub(vec![]).await;
    let (ws, _) = connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    common::send_json(&mut write, serde_json::json!({"type": "auth", "token": ""})).await;
    let resp = common::recv_json(&mut read).await;
    assert_eq!(resp["type"], "auth_result");
    assert_eq!(resp["success"], true);

    // A successful auth is immediately followed by the tool catalog.
    let announce = common::recv_json(&mut read).await;
    assert_eq!(announce["type"], "announce_tools");
}

#[tokio::test]
async fn wrong_token_is_rejected_when_bypass_is_disabled() {
    let (url, _dir) = common::spawn_hub_with(vec![], |config| {
        config.localhost_bypass_auth = false;
        config.auth_token = Some("correct-horse".to_string());
    })
    .await;
    let (ws, _) = connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    common::send_json(&mut write, serde_json::json!({"type": "auth", "token": "wrong"})).await;
    let resp = common::recv_json(&mut read).await;
    assert_eq!(resp["type"], "auth_result");
    assert_eq!(resp["success"], false);

    // Non-auth messages are refused until a valid token is presented.
    common::send_json(&mut write, serde_json::json!({"type": "list_hub_agents"})).await;
    let resp = common::recv_json(&mut read).await;
    assert_eq!(resp["type"], "error");
}

#[tokio::test]
async fn correct_token_is_accepted_when_bypass_is_disabled() {
    let (url, _dir) = common::spawn_hub_with(vec![], |config| {
        config.localhost_bypass_auth = false;
        config.auth_token = Some("correct-horse".to_string());
    })
    .await;
    let (ws, _) = connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    common::send_json(&mut write, serde_json::json!({"type": "auth", "token": "correct-horse"})).await;
    let resp = common::recv_json(&mut read).await;
    assert_eq!(resp["type"], "auth_result");
    assert_eq!(resp["success"], true);
}
