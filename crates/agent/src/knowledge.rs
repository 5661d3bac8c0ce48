use std::sync::Arc;

use async_trait::async_trait;

use frontdesk_core::domain::agent::{AgentId, OrganizationId};
use frontdesk_core::domain::knowledge::KnowledgeEntry;
use frontdesk_db::repositories::KnowledgeRepository;
use frontdesk_db::RepositoryError;

pub const NO_KNOWLEDGE: &str = "No specific knowledge base configured.";

/// Supplies the reference text placed in the system prompt.
#[async_trait]
pub trait KnowledgeProvider: Send + Sync {
    async fn knowledge_text(
        &self,
        organization_id: &OrganizationId,
        agent_id: &AgentId,
    ) -> Result<String, RepositoryError>;
}

pub struct KnowledgeLoader {
    repository: Arc<dyn KnowledgeRepository>,
}

impl KnowledgeLoader {
    pub fn new(repository: Arc<dyn KnowledgeRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl KnowledgeProvider for KnowledgeLoader {
    async fn knowledge_text(
        &self,
        organization_id: &OrganizationId,
        agent_id: &AgentId,
    ) -> Result<String, RepositoryError> {
        let entries = self.repository.list_for_agent(organization_id, agent_id).await?;
        Ok(format_entries(entries.iter().filter(|entry| entry.applies_to(agent_id))))
    }
}

/// `[CATEGORY] title:` headers over each entry, blank line between entries.
pub fn format_entries<'a>(entries: impl IntoIterator<Item = &'a KnowledgeEntry>) -> String {
    let sections: Vec<String> = entries
        .into_iter()
        .map(|entry| {
            format!("[{}] {}:\n{}", entry.category.to_uppercase(), entry.title, entry.content)
        })
        .collect();

    if sections.is_empty() {
        NO_KNOWLEDGE.to_string()
    } else {
        sections.join("\n\n")
    }
}
