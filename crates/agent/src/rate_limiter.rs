//! Cost protection: counts recent traffic and applies [`RateLimitPolicy`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use frontdesk_core::domain::agent::Channel;
use frontdesk_core::domain::agent_log::ACTION_REPLIED;
use frontdesk_core::domain::conversation::Conversation;
use frontdesk_core::domain::message::MessageRole;
use frontdesk_core::rate_limit::{RateLimitExceeded, RateLimitPolicy};
use frontdesk_db::repositories::{AgentLogRepository, MessageRepository};
use frontdesk_db::RepositoryError;

pub struct RateLimiter {
    policy: RateLimitPolicy,
    messages: Arc<dyn MessageRepository>,
    agent_log: Arc<dyn AgentLogRepository>,
}

impl RateLimiter {
    pub fn new(
        policy: RateLimitPolicy,
        messages: Arc<dyn MessageRepository>,
        agent_log: Arc<dyn AgentLogRepository>,
    ) -> Self {
        Self { policy, messages, agent_log }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Runs every check that applies to the conversation's channel, in order:
    /// contact, agent, then voice turns and duration. `Ok(None)` lets the turn proceed.
    pub async fn check(
        &self,
        conversation: &Conversation,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitExceeded>, RepositoryError> {
        let last_hour = self
            .messages
            .count_by_role_since(&conversation.id, MessageRole::User, Some(now - Duration::hours(1)))
            .await?;
        let last_day = self
            .messages
            .count_by_role_since(&conversation.id, MessageRole::User, Some(now - Duration::hours(24)))
            .await?;
        if let Err(exceeded) = self.policy.check_contact(last_hour, last_day) {
            return Ok(Some(exceeded));
        }

        let replies = self
            .agent_log
            .count_actions_since(&conversation.agent_id, ACTION_REPLIED, now - Duration::hours(24))
            .await?;
        if let Err(exceeded) = self.policy.check_agent(replies) {
            return Ok(Some(exceeded));
        }

        if conversation.channel == Channel::Voice {
            let turns = self
                .messages
                .count_by_role_since(&conversation.id, MessageRole::Assistant, None)
                .await?;
            if let Err(exceeded) = self.policy.check_voice_turns(turns) {
                return Ok(Some(exceeded));
            }
            if let Err(exceeded) = self.policy.check_voice_duration(conversation.elapsed_secs(now)) {
                return Ok(Some(exceeded));
            }
        }

        Ok(None)
    }
}
