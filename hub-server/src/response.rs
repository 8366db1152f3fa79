//! Serializes an outbound `ServerMessage`, falling back to a generic error
//! envelope if serialization itself fails (never silently drops a frame).

use hub_core::protocol::ServerMessage;

pub(crate) fn serialize_or_fallback(message: &ServerMessage) -> String {
    serde_json::to_string(message).unwrap_or_else(|err| {
        serde_json::to_string(&ServerMessage::error(None, format!("serialization error: {err}")))
            .expect("error envelope always serializes")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_normal_message() {
        let msg = ServerMessage::not_authenticated();
        let json = serialize_or_fallback(&msg);
        assert!(json.contains("Not authenticated"));
    }
}
