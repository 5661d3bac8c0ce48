use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use frontdesk_core::domain::agent::{Agent, AgentId, Channel, EmployeeTypeId, OrganizationId};
use frontdesk_core::domain::agent_log::AgentLogEntry;
use frontdesk_core::domain::conversation::{
    Contact, Conversation, ConversationId, ConversationStatus,
};
use frontdesk_core::domain::knowledge::KnowledgeEntry;
use frontdesk_core::domain::lead::{Booking, BookingId, Lead, LeadId};
use frontdesk_core::domain::message::{Message, MessageRole, NewMessage};
use frontdesk_core::flows::{FlowDefinition, FlowState};
use frontdesk_core::scoring::ScoringRule;

pub mod agent;
pub mod agent_log;
pub mod conversation;
pub mod flow;
pub mod knowledge;
pub mod lead;
pub mod memory;
pub mod message;
pub mod scoring_rule;

pub use agent::SqlAgentRepository;
pub use agent_log::SqlAgentLogRepository;
pub use conversation::SqlConversationRepository;
pub use flow::SqlFlowDefinitionRepository;
pub use knowledge::SqlKnowledgeRepository;
pub use lead::{SqlBookingRepository, SqlLeadRepository};
pub use memory::{
    InMemoryAgentLogRepository, InMemoryAgentRepository, InMemoryBookingRepository,
    InMemoryConversationRepository, InMemoryFlowDefinitionRepository,
    InMemoryKnowledgeRepository, InMemoryLeadRepository, InMemoryMessageRepository,
    InMemoryScoringRuleRepository,
};
pub use message::SqlMessageRepository;
pub use scoring_rule::SqlScoringRuleRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflicting write: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError>;
    async fn save(&self, agent: Agent) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_id(&self, id: &ConversationId)
        -> Result<Option<Conversation>, RepositoryError>;

    /// Returns the open conversation for this contact, creating it if needed.
    /// Concurrent callers for the same contact all get the same row.
    async fn find_or_create_open(
        &self,
        agent_id: &AgentId,
        channel: Channel,
        contact: &Contact,
    ) -> Result<Conversation, RepositoryError>;

    /// Writes `state` only if the stored version still equals `expected_version`.
    /// Returns `false` when another writer got there first.
    async fn compare_and_set_flow_state(
        &self,
        id: &ConversationId,
        expected_version: i64,
        state: &FlowState,
    ) -> Result<bool, RepositoryError>;

    async fn set_status(
        &self,
        id: &ConversationId,
        status: ConversationStatus,
    ) -> Result<(), RepositoryError>;

    async fn touch(&self, id: &ConversationId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: NewMessage) -> Result<Message, RepositoryError>;

    /// The newest `limit` messages, returned oldest first.
    async fn recent(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn count_by_role_since(
        &self,
        conversation_id: &ConversationId,
        role: MessageRole,
        since: Option<DateTime<Utc>>,
    ) -> Result<u32, RepositoryError>;
}

#[async_trait]
pub trait AgentLogRepository: Send + Sync {
    async fn append(&self, entry: AgentLogEntry) -> Result<(), RepositoryError>;

    async fn count_actions_since(
        &self,
        agent_id: &AgentId,
        action: &str,
        since: DateTime<Utc>,
    ) -> Result<u32, RepositoryError>;

    async fn list_for_agent(&self, agent_id: &AgentId)
        -> Result<Vec<AgentLogEntry>, RepositoryError>;
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn insert(&self, lead: Lead) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert(&self, booking: Booking) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError>;
}

#[async_trait]
pub trait FlowDefinitionRepository: Send + Sync {
    /// The active definition for an employee type. When several are marked
    /// active the most recently updated wins, then the highest version.
    async fn find_active(
        &self,
        employee_type_id: &EmployeeTypeId,
    ) -> Result<Option<FlowDefinition>, RepositoryError>;

    async fn save(&self, definition: FlowDefinition) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ScoringRuleRepository: Send + Sync {
    async fn list_for_employee_type(
        &self,
        employee_type_id: &EmployeeTypeId,
    ) -> Result<Vec<ScoringRule>, RepositoryError>;

    async fn save(&self, rule: ScoringRule) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    /// Active entries for the organization that are org-wide or owned by the agent,
    /// ordered by category then title.
    async fn list_for_agent(
        &self,
        organization_id: &OrganizationId,
        agent_id: &AgentId,
    ) -> Result<Vec<KnowledgeEntry>, RepositoryError>;

    async fn save(&self, entry: KnowledgeEntry) -> Result<(), RepositoryError>;
}

/// Fixed-width UTC encoding; string comparison in SQL matches time order.
pub(crate) fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_json<T>(column: &str, value: &str) -> Result<T, RepositoryError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

pub(crate) fn to_json<T>(column: &str, value: &T) -> Result<String, RepositoryError>
where
    T: serde::Serialize,
{
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("cannot encode `{column}`: {error}")))
}

pub(crate) fn parse_channel(value: &str) -> Result<Channel, RepositoryError> {
    Channel::parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown channel `{value}`")))
}

pub(crate) fn count_to_u32(count: i64) -> u32 {
    u32::try_from(count.max(0)).unwrap_or(u32::MAX)
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
