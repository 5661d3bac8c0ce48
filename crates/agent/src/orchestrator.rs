//! One conversation turn, end to end.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use frontdesk_core::domain::agent::{Agent, AgentId, Channel, OrganizationId};
use frontdesk_core::domain::agent_log::{AgentLogEntry, ACTION_RATE_LIMITED, ACTION_REPLIED};
use frontdesk_core::domain::conversation::{Contact, Conversation, ConversationId};
use frontdesk_core::domain::message::{MessageRole, NewMessage};
use frontdesk_core::flows::{FlowEngine, FlowState};
use frontdesk_core::rate_limit::{RateLimitExceeded, RateLimitPolicy};
use frontdesk_db::repositories::{
    AgentLogRepository, AgentRepository, BookingRepository, ConversationRepository,
    FlowDefinitionRepository, InMemoryAgentLogRepository, InMemoryAgentRepository,
    InMemoryBookingRepository, InMemoryConversationRepository, InMemoryFlowDefinitionRepository,
    InMemoryKnowledgeRepository, InMemoryLeadRepository, InMemoryMessageRepository,
    InMemoryScoringRuleRepository, KnowledgeRepository, LeadRepository, MessageRepository,
    ScoringRuleRepository, SqlAgentLogRepository, SqlAgentRepository, SqlBookingRepository,
    SqlConversationRepository, SqlFlowDefinitionRepository, SqlKnowledgeRepository,
    SqlLeadRepository, SqlMessageRepository, SqlScoringRuleRepository,
};
use frontdesk_db::DbPool;

use crate::calendar::{BookingNotifier, LoggingBookingNotifier};
use crate::error::EngineError;
use crate::knowledge::{KnowledgeLoader, KnowledgeProvider};
use crate::llm::{ChatMessage, LlmGateway};
use crate::prompts::build_system_prompt;
use crate::rate_limiter::RateLimiter;
use crate::tools::{
    BookAppointmentTool, CollectLeadTool, EscalateToHumanTool, ToolContext, ToolExecutor,
    ToolOutcome, ToolRegistry,
};

pub const HISTORY_LIMIT: u32 = 20;
const FLOW_WRITE_ATTEMPTS: u32 = 3;

/// Every repository a turn touches.
#[derive(Clone)]
pub struct PipelineStores {
    pub agents: Arc<dyn AgentRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub agent_log: Arc<dyn AgentLogRepository>,
    pub leads: Arc<dyn LeadRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub flows: Arc<dyn FlowDefinitionRepository>,
    pub scoring_rules: Arc<dyn ScoringRuleRepository>,
    pub knowledge: Arc<dyn KnowledgeRepository>,
}

impl PipelineStores {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            agents: Arc::new(SqlAgentRepository::new(pool.clone())),
            conversations: Arc::new(SqlConversationRepository::new(pool.clone())),
            messages: Arc::new(SqlMessageRepository::new(pool.clone())),
            agent_log: Arc::new(SqlAgentLogRepository::new(pool.clone())),
            leads: Arc::new(SqlLeadRepository::new(pool.clone())),
            bookings: Arc::new(SqlBookingRepository::new(pool.clone())),
            flows: Arc::new(SqlFlowDefinitionRepository::new(pool.clone())),
            scoring_rules: Arc::new(SqlScoringRuleRepository::new(pool.clone())),
            knowledge: Arc::new(SqlKnowledgeRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            agents: Arc::new(InMemoryAgentRepository::default()),
            conversations: Arc::new(InMemoryConversationRepository::default()),
            messages: Arc::new(InMemoryMessageRepository::default()),
            agent_log: Arc::new(InMemoryAgentLogRepository::default()),
            leads: Arc::new(InMemoryLeadRepository::default()),
            bookings: Arc::new(InMemoryBookingRepository::default()),
            flows: Arc::new(InMemoryFlowDefinitionRepository::default()),
            scoring_rules: Arc::new(InMemoryScoringRuleRepository::default()),
            knowledge: Arc::new(InMemoryKnowledgeRepository::default()),
        }
    }
}

/// A message as it arrives from a channel adapter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub agent_id: AgentId,
    /// When present the agent must belong to this organization.
    pub organization_id: Option<OrganizationId>,
    pub channel: Channel,
    pub contact: Contact,
    pub text: String,
    pub conversation_id: Option<ConversationId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub conversation_id: ConversationId,
    pub reply: String,
    pub tools_used: Vec<String>,
    pub rate_limited: bool,
}

impl TurnOutcome {
    fn limited(conversation_id: ConversationId, exceeded: &RateLimitExceeded) -> Self {
        Self {
            conversation_id,
            reply: exceeded.friendly_message().to_string(),
            tools_used: Vec::new(),
            rate_limited: true,
        }
    }
}

pub struct ConversationOrchestrator {
    stores: PipelineStores,
    gateway: Arc<dyn LlmGateway>,
    knowledge: Arc<dyn KnowledgeProvider>,
    rate_limiter: RateLimiter,
    tools: ToolExecutor,
}

impl ConversationOrchestrator {
    pub fn new(stores: PipelineStores, gateway: Arc<dyn LlmGateway>, policy: RateLimitPolicy) -> Self {
        let knowledge = Arc::new(KnowledgeLoader::new(Arc::clone(&stores.knowledge)));
        let rate_limiter =
            RateLimiter::new(policy, Arc::clone(&stores.messages), Arc::clone(&stores.agent_log));
        let tools = build_executor(&stores, Arc::new(LoggingBookingNotifier));
        Self { stores, gateway, knowledge, rate_limiter, tools }
    }

    pub fn with_knowledge_provider(mut self, knowledge: Arc<dyn KnowledgeProvider>) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn with_booking_notifier(mut self, notifier: Arc<dyn BookingNotifier>) -> Self {
        self.tools = build_executor(&self.stores, notifier);
        self
    }

    pub fn stores(&self) -> &PipelineStores {
        &self.stores
    }

    /// Loads the agent and rejects it when it is missing, owned by another
    /// organization, or not active.
    pub async fn load_active_agent(
        &self,
        agent_id: &AgentId,
        organization_id: Option<&OrganizationId>,
    ) -> Result<Agent, EngineError> {
        let agent = self
            .stores
            .agents
            .find_by_id(agent_id)
            .await?
            .filter(|agent| organization_id.map_or(true, |org| agent.organization_id == *org))
            .ok_or_else(|| EngineError::agent_not_found(agent_id))?;
        if !agent.is_active() {
            return Err(EngineError::AgentUnavailable(agent.id.0.clone()));
        }
        Ok(agent)
    }

    pub async fn process_message(&self, inbound: InboundMessage) -> Result<TurnOutcome, EngineError> {
        let agent = self.load_active_agent(&inbound.agent_id, inbound.organization_id.as_ref()).await?;
        let mut conversation = self.resolve_conversation(&agent, &inbound).await?;

        let engine = self.active_flow(&agent).await?;
        if let Some(engine) = &engine {
            self.initialize_flow(engine, &mut conversation).await?;
        }

        let now = Utc::now();
        if let Some(exceeded) = self.rate_limiter.check(&conversation, now).await? {
            return self.reject(&agent, &conversation, exceeded).await;
        }

        let history = self.stores.messages.recent(&conversation.id, HISTORY_LIMIT).await?;
        self.stores
            .messages
            .append(NewMessage {
                conversation_id: conversation.id.clone(),
                role: MessageRole::User,
                content: inbound.text.clone(),
                channel: inbound.channel,
                metadata: None,
            })
            .await?;

        let mut messages: Vec<ChatMessage> = history
            .iter()
            .map(|message| match message.role {
                MessageRole::User => ChatMessage::user(message.content.clone()),
                MessageRole::Assistant => ChatMessage::assistant(message.content.clone()),
            })
            .collect();
        messages.push(ChatMessage::user(inbound.text.clone()));

        let knowledge =
            self.knowledge.knowledge_text(&agent.organization_id, &agent.id).await?;
        let base_prompt = build_system_prompt(&agent, &knowledge, now);
        let system_prompt = match (&engine, &conversation.flow_state) {
            (Some(engine), Some(state)) => engine.augment_prompt(&base_prompt, state),
            _ => base_prompt,
        };

        let flow_state = match &engine {
            Some(engine) => self.advance_flow(engine, &mut conversation, &inbound.text).await?,
            None => None,
        };

        let completion =
            self.gateway.complete_with_tools(&system_prompt, &messages, &self.tools.schemas()).await?;

        let mut outcomes: Vec<ToolOutcome> = Vec::with_capacity(completion.tool_calls.len());
        let reply = if completion.tool_calls.is_empty() {
            completion.content.unwrap_or_default()
        } else {
            let ctx = ToolContext {
                agent: &agent,
                conversation: &conversation,
                flow_state: flow_state.as_ref(),
            };
            for call in &completion.tool_calls {
                outcomes.push(self.tools.execute(&ctx, call).await?);
            }

            messages.push(ChatMessage::tool_request(
                completion.content.clone(),
                completion.tool_calls.clone(),
            ));
            for outcome in &outcomes {
                messages.push(ChatMessage::tool_result(
                    outcome.tool_call_id.clone(),
                    outcome.result.to_string(),
                ));
            }
            self.gateway.complete(&system_prompt, &messages).await?
        };

        if !reply.trim().is_empty() {
            let metadata = (!outcomes.is_empty()).then(|| {
                json!({
                    "tool_results": outcomes.iter().map(ToolOutcome::to_metadata).collect::<Vec<Value>>()
                })
            });
            self.stores
                .messages
                .append(NewMessage {
                    conversation_id: conversation.id.clone(),
                    role: MessageRole::Assistant,
                    content: reply.clone(),
                    channel: inbound.channel,
                    metadata,
                })
                .await?;

            // Only delivered replies count against the agent's daily budget.
            self.stores.conversations.touch(&conversation.id).await?;
            self.stores
                .agent_log
                .append(AgentLogEntry::new(
                    agent.id.clone(),
                    ACTION_REPLIED,
                    json!({ "channel": inbound.channel.as_str(), "conversation_id": conversation.id.0 }),
                ))
                .await?;
        }

        let tools_used: Vec<String> = outcomes.into_iter().map(|outcome| outcome.tool).collect();
        tracing::info!(
            event_name = "pipeline.turn.completed",
            agent_id = %agent.id.0,
            conversation_id = %conversation.id.0,
            channel = inbound.channel.as_str(),
            tools = tools_used.len(),
            "turn completed"
        );

        Ok(TurnOutcome { conversation_id: conversation.id, reply, tools_used, rate_limited: false })
    }

    async fn resolve_conversation(
        &self,
        agent: &Agent,
        inbound: &InboundMessage,
    ) -> Result<Conversation, EngineError> {
        match &inbound.conversation_id {
            Some(id) => self
                .stores
                .conversations
                .find_by_id(id)
                .await?
                .filter(|conversation| conversation.agent_id == agent.id)
                .ok_or_else(|| EngineError::conversation_not_found(id)),
            None => Ok(self
                .stores
                .conversations
                .find_or_create_open(&agent.id, inbound.channel, &inbound.contact)
                .await?),
        }
    }

    async fn active_flow(&self, agent: &Agent) -> Result<Option<FlowEngine>, EngineError> {
        let Some(definition) = self.stores.flows.find_active(&agent.employee_type_id).await? else {
            return Ok(None);
        };
        if let Err(problems) = definition.validate() {
            for problem in problems {
                tracing::warn!(
                    event_name = "pipeline.flow.invalid_definition",
                    flow_id = %definition.id,
                    problem = %problem,
                    "flow definition has problems"
                );
            }
        }
        Ok(Some(FlowEngine::new(definition)))
    }

    /// Writes the initial state once. If another turn initialized it first,
    /// the stored state is adopted.
    async fn initialize_flow(
        &self,
        engine: &FlowEngine,
        conversation: &mut Conversation,
    ) -> Result<(), EngineError> {
        if conversation.flow_state.is_some() {
            return Ok(());
        }

        let initial = engine.initialize();
        let written = self
            .stores
            .conversations
            .compare_and_set_flow_state(&conversation.id, conversation.flow_version, &initial)
            .await?;
        if written {
            conversation.flow_version += 1;
            conversation.flow_type = Some(initial.flow_name.clone());
            conversation.flow_state = Some(initial);
        } else {
            *conversation = self.reload(&conversation.id).await?;
        }
        Ok(())
    }

    /// Applies the user's message to the flow and persists it with
    /// compare-and-set, re-deriving the transition from fresh state on conflict.
    async fn advance_flow(
        &self,
        engine: &FlowEngine,
        conversation: &mut Conversation,
        text: &str,
    ) -> Result<Option<FlowState>, EngineError> {
        for _ in 0..FLOW_WRITE_ATTEMPTS {
            let Some(state) = conversation.flow_state.clone() else {
                return Ok(None);
            };
            let Some(transition) = engine.transition(&state, text) else {
                return Ok(Some(state));
            };
            if let Some(target) = &transition.unresolved_target {
                tracing::warn!(
                    event_name = "pipeline.flow.unresolved_target",
                    conversation_id = %conversation.id.0,
                    step = %transition.from,
                    target = %target,
                    "flow pointed at a missing step, completing"
                );
            }

            let next = state.merge(&transition.patch);
            let written = self
                .stores
                .conversations
                .compare_and_set_flow_state(&conversation.id, conversation.flow_version, &next)
                .await?;
            if written {
                tracing::debug!(
                    event_name = "pipeline.flow.advanced",
                    conversation_id = %conversation.id.0,
                    from = %transition.from,
                    to = %next.current_step,
                    "flow advanced"
                );
                conversation.flow_version += 1;
                conversation.flow_state = Some(next.clone());
                return Ok(Some(next));
            }
            *conversation = self.reload(&conversation.id).await?;
        }
        Err(EngineError::FlowConflict(conversation.id.0.clone()))
    }

    async fn reload(&self, id: &ConversationId) -> Result<Conversation, EngineError> {
        self.stores
            .conversations
            .find_by_id(id)
            .await?
            .ok_or_else(|| EngineError::conversation_not_found(id))
    }

    async fn reject(
        &self,
        agent: &Agent,
        conversation: &Conversation,
        exceeded: RateLimitExceeded,
    ) -> Result<TurnOutcome, EngineError> {
        tracing::info!(
            event_name = "pipeline.turn.rate_limited",
            agent_id = %agent.id.0,
            conversation_id = %conversation.id.0,
            reason = exceeded.code(),
            "turn rejected by rate limit"
        );
        self.stores
            .agent_log
            .append(AgentLogEntry::new(
                agent.id.clone(),
                ACTION_RATE_LIMITED,
                json!({ "reason": exceeded.to_string(), "code": exceeded.code(), "contact": conversation.contact.label() }),
            ))
            .await?;
        Ok(TurnOutcome::limited(conversation.id.clone(), &exceeded))
    }
}

fn build_executor(stores: &PipelineStores, notifier: Arc<dyn BookingNotifier>) -> ToolExecutor {
    let mut registry = ToolRegistry::default();
    registry.register(BookAppointmentTool::new(Arc::clone(&stores.bookings), notifier));
    registry.register(CollectLeadTool::new(
        Arc::clone(&stores.leads),
        Arc::clone(&stores.scoring_rules),
    ));
    registry.register(EscalateToHumanTool::new(Arc::clone(&stores.conversations)));
    ToolExecutor::new(registry, Arc::clone(&stores.agent_log))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;

    use frontdesk_core::domain::agent::{
        Agent, AgentId, AgentStatus, Channel, EmployeeTypeId, OrganizationId,
    };
    use frontdesk_core::domain::conversation::{Contact, ConversationStatus};
    use frontdesk_core::domain::lead::BookingStatus;
    use frontdesk_core::domain::message::{MessageRole, NewMessage};
    use frontdesk_core::flows::{FlowBranch, FlowDefinition, FlowState, FlowStep};
    use frontdesk_core::rate_limit::{RateLimitExceeded, RateLimitPolicy};
    use frontdesk_db::repositories::{
        AgentLogRepository, AgentRepository, ConversationRepository, FlowDefinitionRepository,
        InMemoryAgentLogRepository, InMemoryAgentRepository, InMemoryBookingRepository,
        InMemoryConversationRepository, InMemoryFlowDefinitionRepository,
        InMemoryKnowledgeRepository, InMemoryLeadRepository, InMemoryMessageRepository,
        InMemoryScoringRuleRepository, MessageRepository,
    };

    use super::{ConversationOrchestrator, InboundMessage, PipelineStores};
    use crate::error::{EngineError, LlmError};
    use crate::llm::{ChatCompletion, ChatRole, ScriptedGateway, ToolCall};

    struct Harness {
        orchestrator: ConversationOrchestrator,
        gateway: Arc<ScriptedGateway>,
        agents: Arc<InMemoryAgentRepository>,
        conversations: Arc<InMemoryConversationRepository>,
        messages: Arc<InMemoryMessageRepository>,
        agent_log: Arc<InMemoryAgentLogRepository>,
        leads: Arc<InMemoryLeadRepository>,
        bookings: Arc<InMemoryBookingRepository>,
        flows: Arc<InMemoryFlowDefinitionRepository>,
    }

    async fn harness() -> Harness {
        let gateway = Arc::new(ScriptedGateway::new());
        let agents = Arc::new(InMemoryAgentRepository::default());
        let conversations = Arc::new(InMemoryConversationRepository::default());
        let messages = Arc::new(InMemoryMessageRepository::default());
        let agent_log = Arc::new(InMemoryAgentLogRepository::default());
        let leads = Arc::new(InMemoryLeadRepository::default());
        let bookings = Arc::new(InMemoryBookingRepository::default());
        let flows = Arc::new(InMemoryFlowDefinitionRepository::default());

        let stores = PipelineStores {
            agents: agents.clone(),
            conversations: conversations.clone(),
            messages: messages.clone(),
            agent_log: agent_log.clone(),
            leads: leads.clone(),
            bookings: bookings.clone(),
            flows: flows.clone(),
            scoring_rules: Arc::new(InMemoryScoringRuleRepository::default()),
            knowledge: Arc::new(InMemoryKnowledgeRepository::default()),
        };
        agents.save(agent(AgentStatus::Active)).await.expect("seed agent");

        Harness {
            orchestrator: ConversationOrchestrator::new(
                stores,
                gateway.clone(),
                RateLimitPolicy::default(),
            ),
            gateway,
            agents,
            conversations,
            messages,
            agent_log,
            leads,
            bookings,
            flows,
        }
    }

    fn agent(status: AgentStatus) -> Agent {
        Agent {
            id: AgentId("agent-1".to_string()),
            organization_id: OrganizationId("org-1".to_string()),
            organization_name: "Sparkle Cleaning".to_string(),
            employee_type_id: EmployeeTypeId("receptionist".to_string()),
            name: "Ava".to_string(),
            custom_prompt: None,
            status,
            channels: vec![Channel::Web, Channel::Whatsapp, Channel::Voice],
        }
    }

    fn contact() -> Contact {
        Contact { phone: Some("+447700900001".to_string()), ..Contact::default() }
    }

    fn inbound(channel: Channel, text: &str) -> InboundMessage {
        InboundMessage {
            agent_id: AgentId("agent-1".to_string()),
            organization_id: Some(OrganizationId("org-1".to_string())),
            channel,
            contact: contact(),
            text: text.to_string(),
            conversation_id: None,
        }
    }

    fn step(id: &str, kind: &str, data_field: Option<&str>, next: Option<&str>) -> FlowStep {
        FlowStep {
            id: id.to_string(),
            kind: kind.to_string(),
            question: Some(format!("Ask for {id}")),
            data_field: data_field.map(str::to_string),
            data_fields: Vec::new(),
            branches: Vec::new(),
            next: next.map(str::to_string),
        }
    }

    fn lead_flow() -> FlowDefinition {
        let mut greeting = step("greeting", "question", None, Some("ask_phone"));
        greeting.branches.push(FlowBranch {
            condition: "cleaning".to_string(),
            next_step: Some("ask_phone".to_string()),
        });
        FlowDefinition {
            id: "flow-1".to_string(),
            employee_type_id: EmployeeTypeId("receptionist".to_string()),
            flow_name: "office_cleaning".to_string(),
            version: 1,
            is_active: true,
            updated_at: Utc::now(),
            steps: vec![
                greeting,
                step("ask_phone", "data_collection", Some("phone"), Some("ask_email")),
                step("ask_email", "data_collection", Some("email"), None),
            ],
        }
    }

    #[tokio::test]
    async fn booking_request_creates_a_pending_booking() {
        let harness = harness().await;
        harness.gateway.push_completion(ChatCompletion::tool_calls(vec![ToolCall {
            id: "call_1".to_string(),
            name: "book_appointment".to_string(),
            arguments: r#"{"attendee_name":"Sam","preferred_date":"tomorrow 3pm"}"#.to_string(),
        }]));
        harness.gateway.push_reply("You're booked in for tomorrow at 3pm.");

        let outcome = harness
            .orchestrator
            .process_message(inbound(Channel::Whatsapp, "Can I book a call tomorrow at 3pm?"))
            .await
            .expect("turn");

        assert_eq!(outcome.tools_used, vec!["book_appointment".to_string()]);
        assert_eq!(outcome.reply, "You're booked in for tomorrow at 3pm.");
        assert!(!outcome.rate_limited);

        let bookings = harness.bookings.all().await;
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].status, BookingStatus::Pending);
        assert_eq!(bookings[0].conversation_id, outcome.conversation_id);

        let history = harness.messages.recent(&outcome.conversation_id, 20).await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[1].role, MessageRole::Assistant);
        let metadata = history[1].metadata.clone().expect("tool metadata");
        assert_eq!(metadata["tool_results"][0]["tool"], json!("book_appointment"));
        assert_eq!(metadata["tool_results"][0]["tool_call_id"], json!("call_1"));

        let calls = harness.gateway.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].with_tools);
        assert!(!calls[1].with_tools);
        let follow_up = &calls[1].messages;
        assert_eq!(follow_up.last().map(|message| message.role), Some(ChatRole::Tool));

        let actions: Vec<String> = harness
            .agent_log
            .list_for_agent(&AgentId("agent-1".to_string()))
            .await
            .expect("log")
            .into_iter()
            .map(|entry| entry.action)
            .collect();
        assert_eq!(actions, vec!["book_appointment".to_string(), "replied".to_string()]);
    }

    #[tokio::test]
    async fn voice_call_at_turn_limit_hangs_up_without_the_model() {
        let harness = harness().await;
        let conversation = harness
            .conversations
            .find_or_create_open(&AgentId("agent-1".to_string()), Channel::Voice, &contact())
            .await
            .expect("conversation");
        for index in 0..20 {
            harness
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

        let outcome = harness
            .orchestrator
            .process_message(inbound(Channel::Voice, "one more thing"))
            .await
            .expect("turn");

        assert!(outcome.rate_limited);
        assert_eq!(
            outcome.reply,
            RateLimitExceeded::VoiceTurns { limit: 20 }.friendly_message()
        );
        assert!(harness.gateway.calls().is_empty());
        let stored = harness.messages.recent(&conversation.id, 50).await.expect("history");
        assert_eq!(stored.len(), 20);

        let log = harness
            .agent_log
            .list_for_agent(&AgentId("agent-1".to_string()))
            .await
            .expect("log");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, "rate_limited");
        assert_eq!(log[0].details["contact"], json!("+447700900001"));
    }

    #[tokio::test]
    async fn thirty_first_message_in_an_hour_is_rejected() {
        let harness = harness().await;
        let conversation = harness
            .conversations
            .find_or_create_open(&AgentId("agent-1".to_string()), Channel::Web, &contact())
            .await
            .expect("conversation");
        for index in 0..30 {
            harness
                .messages
                .append(NewMessage {
                    conversation_id: conversation.id.clone(),
                    role: MessageRole::User,
                    content: format!("message {index}"),
                    channel: Channel::Web,
                    metadata: None,
                })
                .await
                .expect("append");
        }

        let outcome =
            harness.orchestrator.process_message(inbound(Channel::Web, "hello?")).await.expect("turn");

        assert!(outcome.rate_limited);
        assert_eq!(
            outcome.reply,
            RateLimitExceeded::ContactHourly { limit: 30 }.friendly_message()
        );
        assert!(harness.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn collected_flow_data_fills_in_the_lead() {
        let harness = harness().await;
        harness.flows.save(lead_flow()).await.expect("flow");
        let conversation = harness
            .conversations
            .find_or_create_open(&AgentId("agent-1".to_string()), Channel::Whatsapp, &contact())
            .await
            .expect("conversation");
        let mut state = FlowState {
            flow_id: "flow-1".to_string(),
            flow_name: "office_cleaning".to_string(),
            current_step: "ask_email".to_string(),
            ..FlowState::default()
        };
        state.collected_data.insert("phone".to_string(), json!("07700 900001"));
        assert!(harness
            .conversations
            .compare_and_set_flow_state(&conversation.id, conversation.flow_version, &state)
            .await
            .expect("seed state"));

        harness.gateway.push_completion(ChatCompletion::tool_calls(vec![ToolCall {
            id: "call_1".to_string(),
            name: "collect_lead".to_string(),
            arguments: r#"{"name":"Jo"}"#.to_string(),
        }]));
        harness.gateway.push_reply("Thanks Jo, we'll be in touch.");

        let outcome = harness
            .orchestrator
            .process_message(inbound(Channel::Whatsapp, "jo@example.com"))
            .await
            .expect("turn");
        assert_eq!(outcome.tools_used, vec!["collect_lead".to_string()]);

        let leads = harness.leads.all().await;
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].name.as_deref(), Some("Jo"));
        assert_eq!(leads[0].phone.as_deref(), Some("07700 900001"));
        assert_eq!(leads[0].email.as_deref(), Some("jo@example.com"));
        assert_eq!(leads[0].service_type.as_deref(), Some("office_cleaning"));

        let stored = harness
            .conversations
            .find_by_id(&conversation.id)
            .await
            .expect("find")
            .expect("exists");
        let stored_state = stored.flow_state.expect("flow state");
        assert!(stored_state.is_complete());
        assert_eq!(stored.flow_version, 2);
    }

    #[tokio::test]
    async fn first_turn_initializes_flow_and_prompts_from_greeting() {
        let harness = harness().await;
        harness.flows.save(lead_flow()).await.expect("flow");
        harness.gateway.push_completion(ChatCompletion::text("Great, what's your number?"));

        let outcome = harness
            .orchestrator
            .process_message(inbound(Channel::Web, "I need office cleaning quotes"))
            .await
            .expect("turn");
        assert_eq!(outcome.reply, "Great, what's your number?");

        let calls = harness.gateway.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].system_prompt.contains("You are currently at step: greeting"));

        let stored = harness
            .conversations
            .find_by_id(&outcome.conversation_id)
            .await
            .expect("find")
            .expect("exists");
        let state = stored.flow_state.expect("flow state");
        assert_eq!(state.current_step, "ask_phone");
        assert_eq!(state.step_history, vec!["ask_phone".to_string()]);
        assert_eq!(stored.flow_type.as_deref(), Some("office_cleaning"));
    }

    #[tokio::test]
    async fn inactive_agents_never_reach_the_model() {
        let harness = harness().await;
        harness.agents.save(agent(AgentStatus::Paused)).await.expect("pause");

        let error = harness
            .orchestrator
            .process_message(inbound(Channel::Web, "hello"))
            .await
            .expect_err("paused agent");
        assert!(matches!(error, EngineError::AgentUnavailable(_)));
        assert!(!error.is_retryable());
        assert!(harness.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn agent_from_another_organization_is_not_found() {
        let harness = harness().await;
        let mut message = inbound(Channel::Web, "hello");
        message.organization_id = Some(OrganizationId("org-2".to_string()));

        let error = harness.orchestrator.process_message(message).await.expect_err("wrong org");
        assert!(matches!(error, EngineError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn model_failure_keeps_the_inbound_message() {
        let harness = harness().await;
        harness
            .gateway
            .push_completion_error(LlmError::Api { status: 503, message: "unavailable".into() });

        let error = harness
            .orchestrator
            .process_message(inbound(Channel::Web, "are you open on sunday?"))
            .await
            .expect_err("model down");
        assert!(error.is_retryable());

        let conversation = harness
            .conversations
            .find_or_create_open(&AgentId("agent-1".to_string()), Channel::Web, &contact())
            .await
            .expect("conversation");
        let stored = harness.messages.recent(&conversation.id, 20).await.expect("history");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "are you open on sunday?");
        assert_eq!(conversation.status, ConversationStatus::Open);
    }

    #[tokio::test]
    async fn empty_completion_is_not_counted_as_a_reply() {
        let harness = harness().await;
        harness.gateway.push_completion(ChatCompletion::text(""));

        let outcome = harness
            .orchestrator
            .process_message(inbound(Channel::Web, "hello?"))
            .await
            .expect("turn");
        assert_eq!(outcome.reply, "");

        let actions: Vec<String> = harness
            .agent_log
            .list_for_agent(&AgentId("agent-1".to_string()))
            .await
            .expect("log")
            .into_iter()
            .map(|entry| entry.action)
            .collect();
        assert!(!actions.contains(&"replied".to_string()));

        let stored = harness.messages.recent(&outcome.conversation_id, 20).await.expect("history");
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn history_is_replayed_in_order_and_replays_append() {
        let harness = harness().await;
        harness.gateway.push_completion(ChatCompletion::text("Hi!"));
        harness.gateway.push_completion(ChatCompletion::text("Hi again!"));

        let first =
            harness.orchestrator.process_message(inbound(Channel::Web, "hello")).await.expect("turn");
        let second =
            harness.orchestrator.process_message(inbound(Channel::Web, "hello")).await.expect("turn");
        assert_eq!(first.conversation_id, second.conversation_id);

        let calls = harness.gateway.calls();
        let replayed: Vec<Option<String>> =
            calls[1].messages.iter().map(|message| message.content.clone()).collect();
        assert_eq!(
            replayed,
            vec![Some("hello".to_string()), Some("Hi!".to_string()), Some("hello".to_string())]
        );

        let stored = harness.messages.recent(&first.conversation_id, 20).await.expect("history");
        assert_eq!(stored.len(), 4);
    }
}
