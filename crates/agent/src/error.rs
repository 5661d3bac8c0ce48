use thiserror::Error;

use frontdesk_core::domain::agent::AgentId;
use frontdesk_core::domain::conversation::ConversationId;
use frontdesk_core::errors::{ApplicationError, DomainError};
use frontdesk_db::RepositoryError;

/// Failures talking to the model provider.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm configuration error: {0}")]
    Configuration(String),
    #[error("llm network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("llm authentication failed: {0}")]
    Authentication(String),
    #[error("llm rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("llm api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("llm request timed out after {0}ms")]
    Timeout(u64),
    #[error("llm circuit breaker is open")]
    CircuitOpen,
    #[error("llm returned an unusable response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Transient failures that a later attempt may not hit.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited { .. } | Self::Timeout(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Configuration(_)
            | Self::Authentication(_)
            | Self::CircuitOpen
            | Self::InvalidResponse(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool `{tool}` could not persist its result: {source}")]
    Repository {
        tool: &'static str,
        #[source]
        source: RepositoryError,
    },
}

/// Everything that can end a turn early.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("agent `{0}` was not found")]
    AgentNotFound(String),
    #[error("conversation `{0}` was not found")]
    ConversationNotFound(String),
    #[error("agent `{0}` is not accepting messages")]
    AgentUnavailable(String),
    #[error("flow state for conversation `{0}` kept changing underneath the turn")]
    FlowConflict(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl EngineError {
    pub fn agent_not_found(id: &AgentId) -> Self {
        Self::AgentNotFound(id.0.clone())
    }

    pub fn conversation_not_found(id: &ConversationId) -> Self {
        Self::ConversationNotFound(id.0.clone())
    }

    /// Whether a channel with at-least-once delivery should try the turn again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::AgentNotFound(_) | Self::ConversationNotFound(_) | Self::AgentUnavailable(_) => {
                false
            }
            Self::FlowConflict(_) | Self::Repository(_) | Self::Tool(_) => true,
            Self::Llm(error) => error.is_retryable() || matches!(error, LlmError::CircuitOpen),
        }
    }
}

impl From<EngineError> for ApplicationError {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::AgentNotFound(id) => Self::NotFound { entity: "agent", id },
            EngineError::ConversationNotFound(id) => Self::NotFound { entity: "conversation", id },
            EngineError::AgentUnavailable(id) => Self::Domain(DomainError::AgentUnavailable(id)),
            EngineError::FlowConflict(_) | EngineError::Repository(_) | EngineError::Tool(_) => {
                Self::Persistence(value.to_string())
            }
            EngineError::Llm(LlmError::Configuration(message)) => Self::Configuration(message),
            EngineError::Llm(error) => Self::Integration(error.to_string()),
        }
    }
}
