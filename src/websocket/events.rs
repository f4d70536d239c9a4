use serde::{Deserialize, Serialize};

use crate::models::message::Message;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom {
        conversation_id: String,
    },
    LeaveRoom {
        conversation_id: String,
    },
    SendMessage {
        conversation_id: String,
        content: String,
        message_type: Option<String>,
        file_url: Option<String>,
        file_name: Option<String>,
    },
    TypingStart {
        conversation_id: String,
    },
    TypingStop {
        conversation_id: String,
    },
    MessageRead {
        message_id: String,
        conversation_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        user_id: String,
    },
    NewMessage {
        message: Message,
    },
    /// Ack sent to the originating connection only.
    MessageDelivered {
        message_id: String,
    },
    UserTyping {
        conversation_id: String,
        user_id: String,
        is_typing: bool,
    },
    UserOnline {
        user_id: String,
    },
    UserOffline {
        user_id: String,
    },
    MessageRead {
        conversation_id: String,
        message_id: String,
        user_id: String,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_tags() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"join_room","conversation_id":"c1"}"#).unwrap();
        assert!(matches!(event, ClientEvent::JoinRoom { ref conversation_id } if conversation_id == "c1"));

        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"send_message","conversation_id":"c1","content":"hello","message_type":"text"}"#,
        )
        .unwrap();
        assert!(matches!(event, ClientEvent::SendMessage { .. }));
    }

    #[test]
    fn test_server_event_tags() {
        let json = serde_json::to_string(&ServerEvent::UserTyping {
            conversation_id: "c1".to_string(),
            user_id: "u1".to_string(),
            is_typing: true,
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "user_typing");
        assert_eq!(value["is_typing"], true);

        let json = serde_json::to_string(&ServerEvent::UserOffline {
            user_id: "u1".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"user_offline""#));
    }
}
