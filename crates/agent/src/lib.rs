//! Conversation pipeline - turns an inbound channel message into a reply
//!
//! One turn runs through the [`orchestrator::ConversationOrchestrator`]:
//! 1. **Gating** - agent status, conversation lookup, flow initialization
//! 2. **Cost protection** (`rate_limiter`) - contact, agent and voice limits
//! 3. **Prompting** (`prompts`, `knowledge`) - system prompt, history, flow context
//! 4. **Model call** (`llm`) - tool-augmented completion with retry and a breaker
//! 5. **Tool execution** (`tools`) - leads, bookings, escalation
//! 6. **Persistence** - reply, agent log, conversation timestamps
//!
//! # Safety Principle
//!
//! The model proposes tool calls; it never writes to storage directly. Lead
//! scores, flow transitions and limits are computed deterministically.

pub mod calendar;
pub mod circuit_breaker;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod orchestrator;
pub mod prompts;
pub mod rate_limiter;
pub mod retry;
pub mod tools;

pub use error::{EngineError, LlmError, ToolError};
pub use llm::{LlmGateway, OpenAiCompatibleGateway, ScriptedGateway};
pub use orchestrator::{ConversationOrchestrator, InboundMessage, PipelineStores, TurnOutcome};
