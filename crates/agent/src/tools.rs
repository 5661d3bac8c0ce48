//! Side-effecting tools the model may call during a turn.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};

use frontdesk_core::domain::agent::Agent;
use frontdesk_core::domain::agent_log::AgentLogEntry;
use frontdesk_core::domain::conversation::{Conversation, ConversationStatus};
use frontdesk_core::domain::lead::{Booking, BookingId, BookingStatus, Lead, LeadId};
use frontdesk_core::flows::FlowState;
use frontdesk_core::scoring::{self, LeadProfile, DEFAULT_HOT_THRESHOLD};
use frontdesk_db::repositories::{
    AgentLogRepository, BookingRepository, ConversationRepository, LeadRepository,
    ScoringRuleRepository,
};

use crate::calendar::{push_in_background, BookingNotifier};
use crate::error::ToolError;
use crate::llm::{ToolCall, ToolSchema};

pub const BOOK_APPOINTMENT: &str = "book_appointment";
pub const COLLECT_LEAD: &str = "collect_lead";
pub const ESCALATE_TO_HUMAN: &str = "escalate_to_human";

/// What a tool can see about the turn it runs in.
pub struct ToolContext<'a> {
    pub agent: &'a Agent,
    pub conversation: &'a Conversation,
    /// Flow state after this turn's transition, if the conversation follows a flow.
    pub flow_state: Option<&'a FlowState>,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn schema(&self) -> ToolSchema;
    async fn execute(&self, ctx: &ToolContext<'_>, input: &Map<String, Value>)
        -> Result<Value, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.retain(|existing| existing.name() != tool.name());
        self.tools.push(Box::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|tool| tool.name() == name).map(|tool| tool.as_ref())
    }

    /// Schemas in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|tool| tool.schema()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// One executed call, kept for the follow-up completion and message metadata.
/// The call's arguments are recorded in the agent log only.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutcome {
    pub tool: String,
    pub tool_call_id: String,
    pub result: Value,
}

impl ToolOutcome {
    pub fn to_metadata(&self) -> Value {
        json!({ "tool": self.tool, "tool_call_id": self.tool_call_id, "result": self.result })
    }
}

/// Runs tool calls and writes one agent log entry per call.
pub struct ToolExecutor {
    registry: ToolRegistry,
    agent_log: Arc<dyn AgentLogRepository>,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, agent_log: Arc<dyn AgentLogRepository>) -> Self {
        Self { registry, agent_log }
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.registry.schemas()
    }

    pub async fn execute(
        &self,
        ctx: &ToolContext<'_>,
        call: &ToolCall,
    ) -> Result<ToolOutcome, ToolError> {
        let input = parse_arguments(&call.arguments);
        let input_value = Value::Object(input.clone());

        let outcome = match self.registry.get(&call.name) {
            Some(tool) => tool.execute(ctx, &input).await,
            None => {
                tracing::warn!(
                    event_name = "pipeline.tool.unknown",
                    agent_id = %ctx.agent.id.0,
                    tool = %call.name,
                    "model requested an unknown tool"
                );
                Ok(json!({ "status": "unknown_tool" }))
            }
        };

        let details = match &outcome {
            Ok(result) => json!({ "input": input_value, "result": result }),
            Err(error) => json!({ "input": input_value, "error": error.to_string() }),
        };
        self.agent_log
            .append(AgentLogEntry::new(ctx.agent.id.clone(), call.name.clone(), details))
            .await
            .map_err(|source| ToolError::Repository { tool: "agent_log", source })?;

        let result = outcome?;
        tracing::info!(
            event_name = "pipeline.tool.executed",
            agent_id = %ctx.agent.id.0,
            conversation_id = %ctx.conversation.id.0,
            tool = %call.name,
            "tool executed"
        );
        Ok(ToolOutcome {
            tool: call.name.clone(),
            tool_call_id: call.id.clone(),
            result,
        })
    }
}

/// Malformed or non-object argument text degrades to an empty object.
pub fn parse_arguments(raw: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn string_arg(input: &Map<String, Value>, key: &str) -> Option<String> {
    input
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn collected_string(collected: &Map<String, Value>, key: &str) -> Option<String> {
    collected.get(key).and_then(|value| match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn string_property(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

pub struct BookAppointmentTool {
    bookings: Arc<dyn BookingRepository>,
    notifier: Arc<dyn BookingNotifier>,
}

impl BookAppointmentTool {
    pub fn new(bookings: Arc<dyn BookingRepository>, notifier: Arc<dyn BookingNotifier>) -> Self {
        Self { bookings, notifier }
    }
}

#[async_trait]
impl Tool for BookAppointmentTool {
    fn name(&self) -> &'static str {
        BOOK_APPOINTMENT
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: BOOK_APPOINTMENT,
            description: "Book an appointment or meeting for the contact. Use this when someone \
                          explicitly asks to schedule, book, or arrange a meeting/appointment.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "attendee_name": string_property("Full name of the person booking"),
                    "attendee_email": string_property("Email address for the booking confirmation"),
                    "attendee_phone": string_property("Phone number of the attendee"),
                    "preferred_date": string_property(
                        "Preferred date/time in ISO format or natural language"
                    ),
                    "reason": string_property("Purpose or reason for the appointment"),
                },
                "required": ["attendee_name", "preferred_date"],
            }),
        }
    }

    async fn execute(
        &self,
        ctx: &ToolContext<'_>,
        input: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let contact = &ctx.conversation.contact;
        let booking = Booking {
            id: BookingId(uuid::Uuid::new_v4().to_string()),
            organization_id: ctx.agent.organization_id.clone(),
            agent_id: ctx.agent.id.clone(),
            conversation_id: ctx.conversation.id.clone(),
            attendee_name: string_arg(input, "attendee_name")
                .or_else(|| contact.name.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            attendee_email: string_arg(input, "attendee_email"),
            attendee_phone: string_arg(input, "attendee_phone"),
            preferred_date: string_arg(input, "preferred_date"),
            reason: string_arg(input, "reason"),
            status: BookingStatus::Pending,
            created_at: Utc::now(),
        };

        self.bookings
            .insert(booking.clone())
            .await
            .map_err(|source| ToolError::Repository { tool: BOOK_APPOINTMENT, source })?;

        let booking_id = booking.id.0.clone();
        push_in_background(Arc::clone(&self.notifier), booking);
        Ok(json!({ "booking_id": booking_id, "status": "pending_confirmation" }))
    }
}

pub struct CollectLeadTool {
    leads: Arc<dyn LeadRepository>,
    rules: Arc<dyn ScoringRuleRepository>,
    hot_threshold: u8,
}

impl CollectLeadTool {
    pub fn new(leads: Arc<dyn LeadRepository>, rules: Arc<dyn ScoringRuleRepository>) -> Self {
        Self { leads, rules, hot_threshold: DEFAULT_HOT_THRESHOLD }
    }
}

#[async_trait]
impl Tool for CollectLeadTool {
    fn name(&self) -> &'static str {
        COLLECT_LEAD
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: COLLECT_LEAD,
            description: "Save a new contact as a potential lead. Use this when someone shows \
                          interest in services or is a new enquiry.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": string_property("Contact's full name"),
                    "phone": string_property("Contact's phone number"),
                    "email": string_property("Contact's email address"),
                    "notes": string_property("Notes about their enquiry or interest"),
                },
                "required": ["name"],
            }),
        }
    }

    async fn execute(
        &self,
        ctx: &ToolContext<'_>,
        input: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let collected = ctx.flow_state.map(|state| state.collected_data.clone()).unwrap_or_default();
        let service_type = ctx
            .flow_state
            .map(|state| state.flow_name.clone())
            .filter(|name| !name.is_empty())
            .or_else(|| ctx.conversation.flow_type.clone());

        let profile = LeadProfile {
            name: string_arg(input, "name").or_else(|| collected_string(&collected, "name")),
            phone: string_arg(input, "phone").or_else(|| collected_string(&collected, "phone")),
            email: string_arg(input, "email").or_else(|| collected_string(&collected, "email")),
            notes: string_arg(input, "notes"),
            service_type: service_type.clone(),
            urgency: collected_string(&collected, "urgency"),
            source_channel: Some(ctx.conversation.channel.as_str().to_string()),
            service_data: collected,
        };

        let rules = self
            .rules
            .list_for_employee_type(&ctx.agent.employee_type_id)
            .await
            .map_err(|source| ToolError::Repository { tool: COLLECT_LEAD, source })?;
        let compiled: Vec<_> = rules.iter().map(|rule| rule.compile()).collect();
        for rule in compiled.iter().filter(|rule| rule.has_unsupported_conditions()) {
            tracing::warn!(
                event_name = "pipeline.scoring.unsupported_condition",
                rule = %rule.rule_name,
                "scoring rule has conditions that never match"
            );
        }

        let lead_score = scoring::score(&compiled, &profile, service_type.as_deref());
        let is_hot = scoring::is_hot(lead_score, self.hot_threshold);

        let lead = Lead {
            id: LeadId(uuid::Uuid::new_v4().to_string()),
            organization_id: ctx.agent.organization_id.clone(),
            agent_id: ctx.agent.id.clone(),
            conversation_id: ctx.conversation.id.clone(),
            name: profile.name,
            phone: profile.phone,
            email: profile.email,
            notes: profile.notes,
            service_type: profile.service_type,
            service_data: Value::Object(profile.service_data),
            urgency: profile.urgency,
            source_channel: ctx.conversation.channel,
            score: lead_score,
            is_hot,
            status: "new".to_string(),
            created_at: Utc::now(),
        };
        let lead_id = lead.id.0.clone();
        self.leads
            .insert(lead)
            .await
            .map_err(|source| ToolError::Repository { tool: COLLECT_LEAD, source })?;

        Ok(json!({ "lead_id": lead_id, "status": "saved", "lead_score": lead_score, "is_hot": is_hot }))
    }
}

pub struct EscalateToHumanTool {
    conversations: Arc<dyn ConversationRepository>,
}

impl EscalateToHumanTool {
    pub fn new(conversations: Arc<dyn ConversationRepository>) -> Self {
        Self { conversations }
    }
}

#[async_trait]
impl Tool for EscalateToHumanTool {
    fn name(&self) -> &'static str {
        ESCALATE_TO_HUMAN
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: ESCALATE_TO_HUMAN,
            description: "Flag this conversation for a human team member to take over. Use for \
                          complaints, complex queries, or when the AI cannot help.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "reason": string_property("Why this needs human attention"),
                },
                "required": ["reason"],
            }),
        }
    }

    async fn execute(
        &self,
        ctx: &ToolContext<'_>,
        input: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        self.conversations
            .set_status(&ctx.conversation.id, ConversationStatus::Escalated)
            .await
            .map_err(|source| ToolError::Repository { tool: ESCALATE_TO_HUMAN, source })?;

        tracing::info!(
            event_name = "pipeline.conversation.escalated",
            conversation_id = %ctx.conversation.id.0,
            "conversation handed to a human"
        );
        Ok(json!({ "status": "escalated", "reason": input.get("reason").cloned().unwrap_or(Value::Null) }))
    }
}
