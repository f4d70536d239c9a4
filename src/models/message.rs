use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    File,
    Image,
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Text => "text",
            MessageType::File => "file",
            MessageType::Image => "image",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(MessageType::Text),
            "file" => Some(MessageType::File),
            "image" => Some(MessageType::Image),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    /// Store-assigned, monotonically increasing; the ordering tiebreak for
    /// messages sharing a created_at timestamp.
    pub seq: i64,
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub message_type: String,
    pub content: String,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub is_edited: i64,
    pub is_deleted: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub message_type: String,
    pub content: String,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub created_at: String,
}

impl NewMessage {
    pub fn new(
        conversation_id: String,
        sender_id: String,
        message_type: MessageType,
        content: String,
        file_url: Option<String>,
        file_name: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id,
            sender_id,
            message_type: message_type.as_str().to_string(),
            content,
            file_url,
            file_name,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_round_trip() {
        assert_eq!(MessageType::parse("text"), Some(MessageType::Text));
        assert_eq!(MessageType::parse("file"), Some(MessageType::File));
        assert_eq!(MessageType::parse("image"), Some(MessageType::Image));
        assert_eq!(MessageType::parse("video"), None);
        assert_eq!(MessageType::Image.as_str(), "image");
    }
}
