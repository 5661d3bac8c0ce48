//! Twilio WhatsApp inbound webhook.
//!
//! The turn runs before the webhook is answered. Replies leave through the outbound
//! dispatcher; a retryable failure answers 500 so Twilio redelivers the message.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Form, Router,
};
use serde::Deserialize;
use tracing::{info, warn};

use frontdesk_agent::InboundMessage;
use frontdesk_core::domain::agent::{AgentId, Channel};
use frontdesk_core::domain::conversation::Contact;

use crate::app::AppState;
use crate::twiml::TwimlDocument;

pub const UNAVAILABLE_REPLY: &str =
    "Sorry, I can't help with that right now. Please try again later.";

pub fn router() -> Router<AppState> {
    Router::new().route("/api/webhooks/whatsapp", post(inbound))
}

#[derive(Debug, Deserialize)]
pub struct WhatsappQuery {
    pub agent_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct WhatsappMessage {
    #[serde(rename = "From", default)]
    pub from: String,
    #[serde(rename = "Body", default)]
    pub body: String,
    #[serde(rename = "ProfileName", default)]
    pub profile_name: Option<String>,
}

pub async fn inbound(
    State(state): State<AppState>,
    Query(query): Query<WhatsappQuery>,
    Form(message): Form<WhatsappMessage>,
) -> Response {
    let phone = sender_number(&message.from);
    if message.body.trim().is_empty() || phone.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }

    let inbound = InboundMessage {
        agent_id: AgentId(query.agent_id),
        organization_id: None,
        channel: Channel::Whatsapp,
        contact: Contact {
            phone: Some(phone.clone()),
            email: None,
            name: message.profile_name.filter(|name| !name.trim().is_empty()),
        },
        text: message.body,
        conversation_id: None,
    };

    let agent_id = inbound.agent_id.0.clone();
    match state.orchestrator.process_message(inbound).await {
        Ok(outcome) => {
            if !outcome.reply.trim().is_empty() {
                deliver(&state, &agent_id, &phone, &outcome.reply).await;
            }
            info!(
                event_name = "channel.whatsapp.replied",
                agent_id = %agent_id,
                conversation_id = %outcome.conversation_id.0,
                rate_limited = outcome.rate_limited,
                "whatsapp turn completed"
            );
            TwimlDocument::new().into_response()
        }
        // Twilio redelivers the webhook on a 5xx, so transient failures surface as one.
        Err(error) if error.is_retryable() => {
            warn!(
                event_name = "channel.whatsapp.turn_failed",
                agent_id = %agent_id,
                retryable = true,
                error = %error,
                "whatsapp turn failed, asking for redelivery"
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(error) => {
            warn!(
                event_name = "channel.whatsapp.turn_failed",
                agent_id = %agent_id,
                retryable = false,
                error = %error,
                "whatsapp turn failed"
            );
            deliver(&state, &agent_id, &phone, UNAVAILABLE_REPLY).await;
            TwimlDocument::new().into_response()
        }
    }
}

async fn deliver(state: &AppState, agent_id: &str, phone: &str, body: &str) {
    if let Err(error) = state.outbound.send(Channel::Whatsapp, phone, body).await {
        warn!(
            event_name = "channel.whatsapp.send_failed",
            agent_id = %agent_id,
            error = %error,
            "whatsapp reply could not be delivered"
        );
    }
}

fn sender_number(from: &str) -> String {
    from.trim().trim_start_matches("whatsapp:").trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use frontdesk_agent::llm::ChatCompletion;
    use frontdesk_agent::LlmError;
    use frontdesk_core::domain::agent::{AgentId, AgentStatus, Channel};
    use frontdesk_core::domain::conversation::Contact;
    use frontdesk_db::repositories::{ConversationRepository, MessageRepository};

    use super::{router, sender_number, UNAVAILABLE_REPLY};
    use crate::app::testing::{capture_outbound, test_app};

    fn form_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/webhooks/whatsapp?agent_id=agent-1")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[test]
    fn sender_number_drops_the_scheme() {
        assert_eq!(sender_number("whatsapp:+447700900001"), "+447700900001");
        assert_eq!(sender_number("+447700900001"), "+447700900001");
    }

    #[tokio::test]
    async fn reply_is_sent_back_to_the_sender() {
        let mut app = test_app(AgentStatus::Active).await;
        let mut outbound = capture_outbound(&mut app);
        app.gateway.push_completion(ChatCompletion::text("Hi Sam, how can I help?"));

        let response = router()
            .with_state(app.state.clone())
            .oneshot(form_request(
                "From=whatsapp%3A%2B447700900001&Body=Hello&ProfileName=Sam",
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let (channel, to, body) = tokio::time::timeout(Duration::from_secs(2), outbound.recv())
            .await
            .expect("reply in time")
            .expect("reply sent");
        assert_eq!(channel, Channel::Whatsapp);
        assert_eq!(to, "+447700900001");
        assert_eq!(body, "Hi Sam, how can I help?");

        let calls = app.gateway.calls();
        assert_eq!(calls.len(), 1);
    }

    #[tokio::test]
    async fn empty_body_is_acknowledged_without_a_turn() {
        let app = test_app(AgentStatus::Active).await;
        let response = router()
            .with_state(app.state.clone())
            .oneshot(form_request("From=whatsapp%3A%2B447700900001&Body="))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(app.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn retryable_failure_asks_twilio_to_redeliver() {
        let mut app = test_app(AgentStatus::Active).await;
        let mut outbound = capture_outbound(&mut app);
        app.gateway.push_completion_error(LlmError::Timeout(30));

        let response = router()
            .with_state(app.state.clone())
            .oneshot(form_request("From=whatsapp%3A%2B447700900001&Body=Are+you+open%3F"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(outbound.try_recv().is_err());

        let contact = Contact { phone: Some("+447700900001".to_string()), ..Contact::default() };
        let conversation = app
            .stores
            .conversations
            .find_or_create_open(&AgentId("agent-1".to_string()), Channel::Whatsapp, &contact)
            .await
            .expect("conversation");
        let stored = app.stores.messages.recent(&conversation.id, 20).await.expect("history");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "Are you open?");
    }

    #[tokio::test]
    async fn paused_agent_sends_an_apology_instead_of_silence() {
        let mut app = test_app(AgentStatus::Paused).await;
        let mut outbound = capture_outbound(&mut app);

        let response = router()
            .with_state(app.state.clone())
            .oneshot(form_request("From=whatsapp%3A%2B447700900001&Body=Hello"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let (channel, to, body) = outbound.try_recv().expect("apology sent");
        assert_eq!(channel, Channel::Whatsapp);
        assert_eq!(to, "+447700900001");
        assert_eq!(body, UNAVAILABLE_REPLY);
        assert!(app.gateway.calls().is_empty());
    }
}
