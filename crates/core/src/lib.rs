pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod rate_limit;
pub mod scoring;

pub use domain::agent::{Agent, AgentId, AgentStatus, Channel, EmployeeTypeId, OrganizationId};
pub use domain::agent_log::AgentLogEntry;
pub use domain::conversation::{Contact, Conversation, ConversationId, ConversationStatus};
pub use domain::knowledge::KnowledgeEntry;
pub use domain::lead::{Booking, BookingId, BookingStatus, Lead, LeadId};
pub use domain::message::{Message, MessageId, MessageRole, NewMessage};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{FlowDefinition, FlowEngine, FlowState};
pub use rate_limit::{RateLimitExceeded, RateLimitPolicy};
pub use scoring::{LeadProfile, ScoringRule};
