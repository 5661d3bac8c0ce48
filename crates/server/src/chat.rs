//! JSON chat endpoint used by the web widget and first-party clients.
//!
//! - `POST /api/chat` - run one turn and return the reply

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use frontdesk_agent::{InboundMessage, TurnOutcome};
use frontdesk_core::domain::agent::{AgentId, Channel, OrganizationId};
use frontdesk_core::domain::conversation::{Contact, ConversationId};
use frontdesk_core::errors::{ApplicationError, InterfaceError};

use crate::app::AppState;

pub const MAX_MESSAGE_CHARS: usize = 4000;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/chat", post(chat))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub agent_id: String,
    pub organization_id: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub contact_name: Option<String>,
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatError {
    pub error: String,
    pub correlation_id: String,
}

type ChatFailure = (StatusCode, Json<ChatError>);

pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<TurnOutcome>, ChatFailure> {
    let correlation_id = uuid::Uuid::new_v4().to_string();
    let inbound = inbound_message(body).map_err(|message| {
        failure(InterfaceError::BadRequest { message, correlation_id: correlation_id.clone() })
    })?;

    let agent_id = inbound.agent_id.0.clone();
    match state.orchestrator.process_message(inbound).await {
        Ok(outcome) => {
            info!(
                event_name = "channel.chat.replied",
                correlation_id = %correlation_id,
                agent_id = %agent_id,
                conversation_id = %outcome.conversation_id.0,
                rate_limited = outcome.rate_limited,
                "chat turn completed"
            );
            Ok(Json(outcome))
        }
        Err(error) => {
            warn!(
                event_name = "channel.chat.failed",
                correlation_id = %correlation_id,
                agent_id = %agent_id,
                retryable = error.is_retryable(),
                error = %error,
                "chat turn failed"
            );
            Err(failure(ApplicationError::from(error).into_interface(correlation_id)))
        }
    }
}

fn inbound_message(body: ChatRequest) -> Result<InboundMessage, String> {
    let length = body.message.trim().chars().count();
    if length == 0 || body.message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(format!("message must be between 1 and {MAX_MESSAGE_CHARS} characters"));
    }
    let channel = match body.channel.as_deref() {
        None => Channel::Web,
        Some(raw) => Channel::parse(raw).ok_or_else(|| format!("unknown channel `{raw}`"))?,
    };

    Ok(InboundMessage {
        agent_id: AgentId(body.agent_id),
        organization_id: Some(OrganizationId(body.organization_id)),
        channel,
        contact: Contact {
            phone: body.contact_phone,
            email: body.contact_email,
            name: body.contact_name,
        },
        text: body.message,
        conversation_id: body.conversation_id.map(ConversationId),
    })
}

fn failure(error: InterfaceError) -> ChatFailure {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ChatError {
            error: error.user_message().to_string(),
            correlation_id: error.correlation_id().to_string(),
        }),
    )
}
