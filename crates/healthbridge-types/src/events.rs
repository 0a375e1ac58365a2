use serde::{Deserialize, Serialize};

use crate::models::MessageView;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the handshake and the channel join
    Ready { user_id: i64, name: String },

    /// A direct message was persisted. Sent to the receiver and echoed to the sender.
    MessageCreate(MessageView),

    /// A command from this connection could not be carried out
    Error { message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Send a direct message to another user
    SendMessage {
        receiver_id: Option<i64>,
        content: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_uses_adjacent_tagging() {
        let cmd: GatewayCommand = serde_json::from_str(
            r#"{"type":"SendMessage","data":{"receiver_id":2,"content":"Bonjour"}}"#,
        )
        .unwrap();
        let GatewayCommand::SendMessage { receiver_id, content } = cmd;
        assert_eq!(receiver_id, Some(2));
        assert_eq!(content.as_deref(), Some("Bonjour"));
    }

    #[test]
    fn error_event_shape() {
        let json = serde_json::to_value(GatewayEvent::Error { message: "nope".into() }).unwrap();
        assert_eq!(json["type"], "Error");
        assert_eq!(json["data"]["message"], "nope");
    }
}
