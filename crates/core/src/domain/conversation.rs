use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::{AgentId, Channel};
use crate::flows::FlowState;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Escalated,
    Closed,
    Cancelled,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Escalated => "escalated",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "escalated" => Some(Self::Escalated),
            "closed" => Some(Self::Closed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// Who is on the other end of a conversation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl Contact {
    /// Identifier used for the one-open-conversation-per-contact rule.
    /// Phone wins over email; contacts with neither share the `unknown` bucket.
    pub fn key(&self) -> String {
        let pick = |value: &Option<String>| {
            value.as_deref().map(str::trim).filter(|value| !value.is_empty()).map(str::to_owned)
        };
        pick(&self.phone)
            .or_else(|| pick(&self.email).map(|email| email.to_ascii_lowercase()))
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Display string used in logs and rate-limit details.
    pub fn label(&self) -> String {
        self.phone
            .clone()
            .or_else(|| self.email.clone())
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub agent_id: AgentId,
    pub contact: Contact,
    pub channel: Channel,
    pub status: ConversationStatus,
    pub flow_state: Option<FlowState>,
    pub flow_type: Option<String>,
    /// Bumped on every flow-state write; used as the compare-and-swap token.
    pub flow_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }
}
