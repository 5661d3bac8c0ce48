//! Twilio voice webhooks.
//!
//! - `POST /api/voice/incoming?agent_id=` - greet the caller and listen
//! - `POST /api/voice/respond?agent_id=&caller=` - answer one transcribed utterance
//!
//! Every path answers with TwiML; failures become a spoken apology and a hangup.

use axum::{
    extract::{Query, State},
    routing::post,
    Form, Router,
};
use serde::Deserialize;
use tracing::{info, warn};

use frontdesk_agent::tools::ESCALATE_TO_HUMAN;
use frontdesk_agent::{EngineError, InboundMessage, TurnOutcome};
use frontdesk_core::domain::agent::{AgentId, Channel};
use frontdesk_core::domain::conversation::Contact;

use crate::app::AppState;
use crate::twiml::{
    self, TwimlDocument, HANDOVER_SUFFIX, LINE_UNAVAILABLE, NOT_CAUGHT, TECHNICAL_ISSUE,
};

const EMPTY_REPLY: &str = "I'll get someone to follow up with you.";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/voice/incoming", post(incoming))
        .route("/api/voice/respond", post(respond))
}

#[derive(Debug, Deserialize)]
pub struct VoiceQuery {
    pub agent_id: String,
    #[serde(default)]
    pub caller: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IncomingCall {
    #[serde(rename = "From", default)]
    pub from: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SpeechTurn {
    #[serde(rename = "SpeechResult", default)]
    pub speech_result: String,
}

/// Relative action URL Twilio posts the next transcript to.
pub fn respond_url(agent_id: &str, caller: &str) -> String {
    let query = serde_urlencoded::to_string([("agent_id", agent_id), ("caller", caller)])
        .unwrap_or_default();
    format!("/api/voice/respond?{query}")
}

pub async fn incoming(
    State(state): State<AppState>,
    Query(query): Query<VoiceQuery>,
    Form(call): Form<IncomingCall>,
) -> TwimlDocument {
    let agent_id = AgentId(query.agent_id);
    match state.orchestrator.load_active_agent(&agent_id, None).await {
        Ok(agent) => {
            info!(
                event_name = "channel.voice.call_started",
                agent_id = %agent.id.0,
                "inbound call answered"
            );
            twiml::greeting(&respond_url(&agent.id.0, &call.from), &agent.name)
        }
        Err(error) => unavailable_or_failed(&agent_id, &error),
    }
}

pub async fn respond(
    State(state): State<AppState>,
    Query(query): Query<VoiceQuery>,
    Form(turn): Form<SpeechTurn>,
) -> TwimlDocument {
    let caller = query.caller.unwrap_or_default();
    let action = respond_url(&query.agent_id, &caller);
    if turn.speech_result.trim().is_empty() {
        return twiml::say_and_listen(NOT_CAUGHT, &action);
    }

    let agent_id = AgentId(query.agent_id);
    let inbound = InboundMessage {
        agent_id: agent_id.clone(),
        organization_id: None,
        channel: Channel::Voice,
        contact: Contact {
            phone: Some(caller).filter(|caller| !caller.trim().is_empty()),
            ..Contact::default()
        },
        text: turn.speech_result,
        conversation_id: None,
    };

    // The turn runs detached so it still persists if the caller is cut off.
    let orchestrator = state.orchestrator.clone();
    let handle = tokio::spawn(async move { orchestrator.process_message(inbound).await });
    match tokio::time::timeout(state.voice_timeout, handle).await {
        Ok(Ok(Ok(outcome))) => speak(outcome, &action),
        Ok(Ok(Err(error))) => unavailable_or_failed(&agent_id, &error),
        Ok(Err(join_error)) => {
            warn!(
                event_name = "channel.voice.turn_panicked",
                agent_id = %agent_id.0,
                error = %join_error,
                "voice turn task failed"
            );
            twiml::hangup(TECHNICAL_ISSUE)
        }
        Err(_) => {
            warn!(
                event_name = "channel.voice.turn_timeout",
                agent_id = %agent_id.0,
                timeout_ms = u64::try_from(state.voice_timeout.as_millis()).unwrap_or(u64::MAX),
                "voice turn exceeded the response deadline"
            );
            twiml::hangup(TECHNICAL_ISSUE)
        }
    }
}

fn speak(outcome: TurnOutcome, action: &str) -> TwimlDocument {
    if outcome.rate_limited {
        return twiml::hangup(&outcome.reply);
    }

    let reply = if outcome.reply.trim().is_empty() { EMPTY_REPLY } else { outcome.reply.as_str() };
    if outcome.tools_used.iter().any(|tool| tool == ESCALATE_TO_HUMAN) {
        twiml::hangup(&format!("{reply} {HANDOVER_SUFFIX}"))
    } else {
        twiml::say_and_listen(reply, action)
    }
}

fn unavailable_or_failed(agent_id: &AgentId, error: &EngineError) -> TwimlDocument {
    match error {
        EngineError::AgentNotFound(_) | EngineError::AgentUnavailable(_) => {
            info!(
                event_name = "channel.voice.agent_unavailable",
                agent_id = %agent_id.0,
                "call to an unavailable agent"
            );
            twiml::hangup(LINE_UNAVAILABLE)
        }
        other => {
            warn!(
                event_name = "channel.voice.turn_failed",
                agent_id = %agent_id.0,
                error = %other,
                "voice turn failed"
            );
            twiml::hangup(TECHNICAL_ISSUE)
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use frontdesk_agent::llm::{ChatCompletion, ToolCall};
    use frontdesk_core::domain::agent::{AgentId, AgentStatus, Channel};
    use frontdesk_core::domain::conversation::{Contact, ConversationStatus};
    use frontdesk_core::domain::message::{MessageRole, NewMessage};
    use frontdesk_core::rate_limit::RateLimitExceeded;

    use super::{respond_url, router};
    use crate::app::testing::test_app;
    use crate::twiml::{LINE_UNAVAILABLE, NOT_CAUGHT};

    fn form_request(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn text(response: axum::response::Response) -> String {
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    const RESPOND: &str = "/api/voice/respond?agent_id=agent-1&caller=%2B447700900001";

    #[test]
    fn respond_url_encodes_the_caller() {
        assert_eq!(respond_url("agent-1", "+447700900001"), RESPOND);
    }

    #[tokio::test]
    async fn incoming_call_greets_with_the_agent_name() {
        let app = test_app(AgentStatus::Active).await;
        let response = router()
            .with_state(app.state)
            .oneshot(form_request("/api/voice/incoming?agent_id=agent-1", "From=%2B447700900001"))
            .await
            .expect("response");

        let xml = text(response).await;
        assert!(xml.contains("Hello, you're through to Ava. How can I help you today?"));
        assert!(xml.contains("caller=%2B447700900001"));
    }

    #[tokio::test]
    async fn empty_speech_asks_again() {
        let app = test_app(AgentStatus::Active).await;
        let response = router()
            .with_state(app.state)
            .oneshot(form_request(RESPOND, "SpeechResult="))
            .await
            .expect("response");

        let xml = text(response).await;
        assert!(xml.contains(NOT_CAUGHT));
        assert!(xml.contains("<Gather"));
        assert!(app.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn paused_agent_hangs_up() {
        let app = test_app(AgentStatus::Paused).await;
        let response = router()
            .with_state(app.state)
            .oneshot(form_request(RESPOND, "SpeechResult=hello"))
            .await
            .expect("response");

        let xml = text(response).await;
        assert!(xml.contains(LINE_UNAVAILABLE));
        assert!(xml.contains("<Hangup/>"));
    }

    #[tokio::test]
    async fn reply_is_spoken_and_the_call_keeps_listening() {
        let app = test_app(AgentStatus::Active).await;
        app.gateway.push_completion(ChatCompletion::text("We're open nine to five."));

        let response = router()
            .with_state(app.state)
            .oneshot(form_request(RESPOND, "SpeechResult=When+are+you+open%3F"))
            .await
            .expect("response");

        let xml = text(response).await;
        assert!(xml.contains(">We're open nine to five.</Say><Gather"));
        assert!(!xml.contains("<Hangup/>"));
    }

    #[tokio::test]
    async fn escalation_hands_over_and_hangs_up() {
        let app = test_app(AgentStatus::Active).await;
        app.gateway.push_completion(ChatCompletion::tool_calls(vec![ToolCall {
            id: "call_1".to_string(),
            name: "escalate_to_human".to_string(),
            arguments: r#"{"reason":"complaint"}"#.to_string(),
        }]));
        app.gateway.push_reply("I'm sorry to hear that.");
        let conversations = app.stores.conversations.clone();

        let response = router()
            .with_state(app.state)
            .oneshot(form_request(RESPOND, "SpeechResult=I+want+to+complain"))
            .await
            .expect("response");

        let xml = text(response).await;
        assert!(xml.contains(
            "I'm sorry to hear that. Someone from our team will be in touch shortly. Goodbye!"
        ));
        assert!(xml.contains("<Hangup/>"));

        let contact = Contact { phone: Some("+447700900001".to_string()), ..Contact::default() };
        let next = conversations
            .find_or_create_open(&AgentId("agent-1".to_string()), Channel::Voice, &contact)
            .await
            .expect("conversation");
        // The escalated conversation no longer counts as open.
        assert_eq!(next.status, ConversationStatus::Open);
        assert_eq!(next.flow_version, 0);
    }

    #[tokio::test]
    async fn turn_limit_ends_the_call() {
        let app = test_app(AgentStatus::Active).await;
        let contact = Contact { phone: Some("+447700900001".to_string()), ..Contact::default() };
        let conversation = app
            .stores
            .conversations
            .find_or_create_open(&AgentId("agent-1".to_string()), Channel::Voice, &contact)
            .await
            .expect("conversation");
        for index in 0..20 {
            app.stores
                .messages
                .append(NewMessage {
                    conversation_id: conversation.id.clone(),
                    role: MessageRole::Assistant,
                    content: format!("turn {index}"),
                    channel: Channel::Voice,
                    metadata: None,
                })
                .await
                .expect("append");
        }

        let response = router()
            .with_state(app.state)
            .oneshot(form_request(RESPOND, "SpeechResult=still+there%3F"))
            .await
            .expect("response");

        let xml = text(response).await;
        assert!(xml.contains(RateLimitExceeded::VoiceTurns { limit: 20 }.friendly_message()));
        assert!(xml.contains("<Hangup/>"));
        assert!(app.gateway.calls().is_empty());
    }
}
