use super::common;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn malformed_json_gets_a_parse_error_and_connection_stays_open() {
    let (url, _dir) = common::spawn_hub(vec![]).await;
    let (ws, _) = connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    write.send(Message::Text("not json at all".to_string())).await.unwrap();
    let resp = common::recv_json(&mut read).await;
    assert_eq!(resp["type"], "error");
    assert!(resp["message"].as_str().unwrap().contains("parse error"));

    // The socket is still usable after a parse failure.
    common::send_json(&mut write, serde_json::json!({"type": "list_hub_agents"})).await;
    let resp = common::recv_json(&mut read).await;
    assert_eq!(resp["type"], "hub_agents_list");
}

#[tokio::test]
async fn unknown_message_type_gets_a_parse_error() {
    let (url, _dir) = common::spawn_hub(vec![]).await;
    let (ws, _) = connect_async(&url).await.unwrap();
    let (mut write, mut read) = ws.split();

    common::send_json(&mut write, serde_json::json!({"type": "not_a_real_message"})).await;
    let resp = common::recv_json(&mut read).await;
    assert_eq!(resp["type"], "error");
}
