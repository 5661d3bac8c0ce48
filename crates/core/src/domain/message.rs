use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::agent::Channel;
use crate::domain::conversation::ConversationId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// A message that has not been stored yet.
#[derive(Clone, Debug, PartialEq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub role: MessageRole,
    pub content: String,
    pub channel: Channel,
    pub metadata: Option<Value>,
}

/// Append-only record. `seq` is assigned by the store and breaks timestamp ties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub seq: i64,
    pub conversation_id: ConversationId,
    pub role: MessageRole,
    pub content: String,
    pub channel: Channel,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}
