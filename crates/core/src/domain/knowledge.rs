use serde::{Deserialize, Serialize};

use crate::domain::agent::{AgentId, OrganizationId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub organization_id: OrganizationId,
    /// `None` means the entry applies to every agent in the organization.
    pub agent_id: Option<AgentId>,
    pub title: String,
    pub content: String,
    pub category: String,
    pub is_active: bool,
}

impl KnowledgeEntry {
    pub fn applies_to(&self, agent_id: &AgentId) -> bool {
        self.is_active && self.agent_id.as_ref().map(|owner| owner == agent_id).unwrap_or(true)
    }
}
