use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::agent::AgentId;

pub const ACTION_REPLIED: &str = "replied";
pub const ACTION_RATE_LIMITED: &str = "rate_limited";

/// Audit trail entry. `action` is a tool name, `rate_limited` or `replied`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentLogEntry {
    pub agent_id: AgentId,
    pub action: String,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

impl AgentLogEntry {
    pub fn new(agent_id: AgentId, action: impl Into<String>, details: Value) -> Self {
        Self { agent_id, action: action.into(), details, created_at: Utc::now() }
    }
}
