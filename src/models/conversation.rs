use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "direct" => Some(ConversationKind::Direct),
            "group" => Some(ConversationKind::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub id: String,
    pub kind: String,
    pub display_name: Option<String>,
    pub created_by: String,
    pub last_message_content: Option<String>,
    pub last_message_sender_id: Option<String>,
    pub last_message_at: Option<String>,
    pub is_active: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Conversation {
    pub fn new(kind: ConversationKind, display_name: Option<String>, created_by: String) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.as_str().to_string(),
            // Direct conversations have no name of their own; clients derive
            // the display from the other participant.
            display_name: match kind {
                ConversationKind::Direct => None,
                ConversationKind::Group => display_name,
            },
            created_by,
            last_message_content: None,
            last_message_sender_id: None,
            last_message_at: None,
            is_active: 1,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Participant {
    pub conversation_id: String,
    pub user_id: String,
    pub organization_id: String,
    pub joined_at: String,
    pub last_read_at: Option<String>,
    pub is_active: i64,
}

/// Conversation plus the participant rows and the derived organization set,
/// as returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub participants: Vec<Participant>,
    pub organization_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        assert_eq!(ConversationKind::parse("direct"), Some(ConversationKind::Direct));
        assert_eq!(ConversationKind::parse("group"), Some(ConversationKind::Group));
        assert_eq!(ConversationKind::parse("channel"), None);
        assert_eq!(ConversationKind::Direct.as_str(), "direct");
    }

    #[test]
    fn test_direct_ignores_name() {
        let conv = Conversation::new(
            ConversationKind::Direct,
            Some("should be dropped".to_string()),
            "user-1".to_string(),
        );
        assert!(conv.display_name.is_none());

        let group = Conversation::new(
            ConversationKind::Group,
            Some("green team".to_string()),
            "user-1".to_string(),
        );
        assert_eq!(group.display_name.as_deref(), Some("green team"));
    }
}
