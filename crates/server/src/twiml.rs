//! Minimal TwiML documents for the voice and WhatsApp webhooks.

use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};

const VOICE: &str = "Polly.Amy";
const LANGUAGE: &str = "en-GB";

pub const NOT_CAUGHT: &str = "Sorry, I didn't catch that. Could you repeat that?";
pub const LINE_UNAVAILABLE: &str = "This line is currently unavailable. Please try again later.";
pub const TECHNICAL_ISSUE: &str = "I'm experiencing a technical issue. Please call back shortly.";
pub const HANDOVER_SUFFIX: &str = "Someone from our team will be in touch shortly. Goodbye!";
const NO_INPUT_FALLBACK: &str = "I didn't catch that. Please call back and try again.";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TwimlDocument {
    body: String,
}

impl TwimlDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: &str) -> Self {
        self.body.push_str(&say_element(text));
        self
    }

    /// Listens for speech and posts the transcript to `action`. An optional
    /// prompt is spoken inside the gather so the caller can barge in.
    pub fn gather(mut self, action: &str, prompt: Option<&str>) -> Self {
        self.body.push_str(&format!(
            "<Gather input=\"speech\" action=\"{}\" method=\"POST\" language=\"{LANGUAGE}\" \
             speechTimeout=\"auto\" timeout=\"5\">",
            escape(action)
        ));
        if let Some(prompt) = prompt {
            self.body.push_str(&say_element(prompt));
        }
        self.body.push_str("</Gather>");
        self
    }

    pub fn hangup(mut self) -> Self {
        self.body.push_str("<Hangup/>");
        self
    }

    pub fn render(&self) -> String {
        format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>{}</Response>", self.body)
    }
}

impl IntoResponse for TwimlDocument {
    fn into_response(self) -> Response {
        ([(CONTENT_TYPE, "application/xml")], self.render()).into_response()
    }
}

pub fn greeting(action: &str, agent_name: &str) -> TwimlDocument {
    TwimlDocument::new()
        .gather(
            action,
            Some(&format!("Hello, you're through to {agent_name}. How can I help you today?")),
        )
        .say(NO_INPUT_FALLBACK)
}

pub fn say_and_listen(text: &str, action: &str) -> TwimlDocument {
    TwimlDocument::new().say(text).gather(action, None)
}

pub fn hangup(farewell: &str) -> TwimlDocument {
    TwimlDocument::new().say(farewell).hangup()
}

fn say_element(text: &str) -> String {
    format!("<Say voice=\"{VOICE}\" language=\"{LANGUAGE}\">{}</Say>", escape(text))
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}
