use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use frontdesk_core::domain::agent::{Agent, AgentId, Channel, EmployeeTypeId, OrganizationId};
use frontdesk_core::domain::agent_log::AgentLogEntry;
use frontdesk_core::domain::conversation::{
    Contact, Conversation, ConversationId, ConversationStatus,
};
use frontdesk_core::domain::knowledge::KnowledgeEntry;
use frontdesk_core::domain::lead::{Booking, BookingId, Lead, LeadId};
use frontdesk_core::domain::message::{Message, MessageId, MessageRole, NewMessage};
use frontdesk_core::flows::{FlowDefinition, FlowState};
use frontdesk_core::scoring::ScoringRule;

use super::{
    count_to_u32, new_id, AgentLogRepository, AgentRepository, BookingRepository,
    ConversationRepository, FlowDefinitionRepository, KnowledgeRepository, LeadRepository,
    MessageRepository, RepositoryError, ScoringRuleRepository,
};

#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: RwLock<HashMap<String, Agent>>,
}

#[async_trait::async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        let agents = self.agents.read().await;
        Ok(agents.get(&id.0).cloned())
    }

    async fn save(&self, agent: Agent) -> Result<(), RepositoryError> {
        let mut agents = self.agents.write().await;
        agents.insert(agent.id.0.clone(), agent);
        Ok(())
    }
}

/// Holds the write lock across lookup and insert, so it gives the same
/// single-open-conversation guarantee as the unique index.
#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<String, Conversation>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(&id.0).cloned())
    }

    async fn find_or_create_open(
        &self,
        agent_id: &AgentId,
        channel: Channel,
        contact: &Contact,
    ) -> Result<Conversation, RepositoryError> {
        let contact_key = contact.key();
        let mut conversations = self.conversations.write().await;

        let existing = conversations.values().find(|conversation| {
            conversation.agent_id == *agent_id
                && conversation.channel == channel
                && conversation.status == ConversationStatus::Open
                && conversation.contact.key() == contact_key
        });
        if let Some(conversation) = existing {
            return Ok(conversation.clone());
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: ConversationId(new_id()),
            agent_id: agent_id.clone(),
            contact: contact.clone(),
            channel,
            status: ConversationStatus::Open,
            flow_state: None,
            flow_type: None,
            flow_version: 0,
            created_at: now,
            updated_at: now,
        };
        conversations.insert(conversation.id.0.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn compare_and_set_flow_state(
        &self,
        id: &ConversationId,
        expected_version: i64,
        state: &FlowState,
    ) -> Result<bool, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let Some(conversation) = conversations.get_mut(&id.0) else {
            return Ok(false);
        };
        if conversation.flow_version != expected_version {
            return Ok(false);
        }

        conversation.flow_state = Some(state.clone());
        conversation.flow_type = Some(state.flow_name.clone());
        conversation.flow_version += 1;
        conversation.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_status(
        &self,
        id: &ConversationId,
        status: ConversationStatus,
    ) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        if let Some(conversation) = conversations.get_mut(&id.0) {
            conversation.status = status;
            conversation.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn touch(&self, id: &ConversationId) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        if let Some(conversation) = conversations.get_mut(&id.0) {
            conversation.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<Vec<Message>>,
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let mut messages = self.messages.write().await;
        let seq = messages.last().map(|last| last.seq + 1).unwrap_or(1);
        let stored = Message {
            id: MessageId(new_id()),
            seq,
            conversation_id: message.conversation_id,
            role: message.role,
            content: message.content,
            channel: message.channel,
            metadata: message.metadata,
            created_at: Utc::now(),
        };
        messages.push(stored.clone());
        Ok(stored)
    }

    async fn recent(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let mut recent: Vec<Message> = messages
            .iter()
            .rev()
            .filter(|message| message.conversation_id == *conversation_id)
            .take(limit as usize)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn count_by_role_since(
        &self,
        conversation_id: &ConversationId,
        role: MessageRole,
        since: Option<DateTime<Utc>>,
    ) -> Result<u32, RepositoryError> {
        let messages = self.messages.read().await;
        let count = messages
            .iter()
            .filter(|message| message.conversation_id == *conversation_id)
            .filter(|message| message.role == role)
            .filter(|message| since.map(|since| message.created_at >= since).unwrap_or(true))
            .count();
        Ok(count_to_u32(i64::try_from(count).unwrap_or(i64::MAX)))
    }
}

#[derive(Default)]
pub struct InMemoryAgentLogRepository {
    entries: RwLock<Vec<AgentLogEntry>>,
}

#[async_trait::async_trait]
impl AgentLogRepository for InMemoryAgentLogRepository {
    async fn append(&self, entry: AgentLogEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.push(entry);
        Ok(())
    }

    async fn count_actions_since(
        &self,
        agent_id: &AgentId,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, RepositoryError> {
        let entries = self.entries.read().await;
        let count = entries
            .iter()
            .filter(|entry| {
                entry.agent_id == *agent_id && entry.action == action && entry.created_at >= since
            })
            .count();
        Ok(count_to_u32(i64::try_from(count).unwrap_or(i64::MAX)))
    }

    async fn list_for_agent(
        &self,
        agent_id: &AgentId,
    ) -> Result<Vec<AgentLogEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|entry| entry.agent_id == *agent_id).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryLeadRepository {
    leads: RwLock<HashMap<String, Lead>>,
}

impl InMemoryLeadRepository {
    pub async fn all(&self) -> Vec<Lead> {
        let leads = self.leads.read().await;
        let mut all: Vec<Lead> = leads.values().cloned().collect();
        all.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        all
    }
}

#[async_trait::async_trait]
impl LeadRepository for InMemoryLeadRepository {
    async fn insert(&self, lead: Lead) -> Result<(), RepositoryError> {
        let mut leads = self.leads.write().await;
        if leads.contains_key(&lead.id.0) {
            return Err(RepositoryError::Conflict(format!("lead `{}` already exists", lead.id.0)));
        }
        leads.insert(lead.id.0.clone(), lead);
        Ok(())
    }

    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let leads = self.leads.read().await;
        Ok(leads.get(&id.0).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryBookingRepository {
    bookings: RwLock<HashMap<String, Booking>>,
}

impl InMemoryBookingRepository {
    pub async fn all(&self) -> Vec<Booking> {
        let bookings = self.bookings.read().await;
        let mut all: Vec<Booking> = bookings.values().cloned().collect();
        all.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        all
    }
}

#[async_trait::async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn insert(&self, booking: Booking) -> Result<(), RepositoryError> {
        let mut bookings = self.bookings.write().await;
        if bookings.contains_key(&booking.id.0) {
            return Err(RepositoryError::Conflict(format!(
                "booking `{}` already exists",
                booking.id.0
            )));
        }
        bookings.insert(booking.id.0.clone(), booking);
        Ok(())
    }

    async fn find_by_id(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        let bookings = self.bookings.read().await;
        Ok(bookings.get(&id.0).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryFlowDefinitionRepository {
    definitions: RwLock<HashMap<String, FlowDefinition>>,
}

#[async_trait::async_trait]
impl FlowDefinitionRepository for InMemoryFlowDefinitionRepository {
    async fn find_active(
        &self,
        employee_type_id: &EmployeeTypeId,
    ) -> Result<Option<FlowDefinition>, RepositoryError> {
        let definitions = self.definitions.read().await;
        let active = definitions
            .values()
            .filter(|definition| {
                definition.is_active && definition.employee_type_id == *employee_type_id
            })
            .max_by(|left, right| {
                left.updated_at
                    .cmp(&right.updated_at)
                    .then(left.version.cmp(&right.version))
                    .then(right.id.cmp(&left.id))
            });
        Ok(active.cloned())
    }

    async fn save(&self, definition: FlowDefinition) -> Result<(), RepositoryError> {
        let mut definitions = self.definitions.write().await;
        definitions.insert(definition.id.clone(), definition);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryScoringRuleRepository {
    rules: RwLock<Vec<ScoringRule>>,
}

#[async_trait::async_trait]
impl ScoringRuleRepository for InMemoryScoringRuleRepository {
    async fn list_for_employee_type(
        &self,
        employee_type_id: &EmployeeTypeId,
    ) -> Result<Vec<ScoringRule>, RepositoryError> {
        let rules = self.rules.read().await;
        Ok(rules.iter().filter(|rule| rule.employee_type_id == *employee_type_id).cloned().collect())
    }

    async fn save(&self, rule: ScoringRule) -> Result<(), RepositoryError> {
        let mut rules = self.rules.write().await;
        rules.push(rule);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryKnowledgeRepository {
    entries: RwLock<HashMap<String, KnowledgeEntry>>,
}

#[async_trait::async_trait]
impl KnowledgeRepository for InMemoryKnowledgeRepository {
    async fn list_for_agent(
        &self,
        organization_id: &OrganizationId,
        agent_id: &AgentId,
    ) -> Result<Vec<KnowledgeEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        let mut matching: Vec<KnowledgeEntry> = entries
            .values()
            .filter(|entry| entry.organization_id == *organization_id && entry.applies_to(agent_id))
            .cloned()
            .collect();
        matching.sort_by(|left, right| {
            (&left.category, &left.title, &left.id).cmp(&(&right.category, &right.title, &right.id))
        });
        Ok(matching)
    }

    async fn save(&self, entry: KnowledgeEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.insert(entry.id.clone(), entry);
        Ok(())
    }
}
