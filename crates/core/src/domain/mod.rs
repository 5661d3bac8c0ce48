pub mod agent;
pub mod agent_log;
pub mod conversation;
pub mod knowledge;
pub mod lead;
pub mod message;
