use std::time::Duration;

use thiserror::Error;

/// Thresholds for the cost-protection checks. Counts are compared with `>=`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub contact_messages_per_hour: u32,
    pub contact_messages_per_day: u32,
    pub agent_replies_per_day: u32,
    pub voice_max_turns: u32,
    pub voice_max_duration: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            contact_messages_per_hour: 30,
            contact_messages_per_day: 100,
            agent_replies_per_day: 500,
            voice_max_turns: 20,
            voice_max_duration: Duration::from_secs(600),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RateLimitExceeded {
    #[error("Contact exceeded {limit} messages/hour")]
    ContactHourly { limit: u32 },
    #[error("Contact exceeded {limit} messages/day")]
    ContactDaily { limit: u32 },
    #[error("Agent exceeded {limit} replies/day")]
    AgentDaily { limit: u32 },
    #[error("Voice call exceeded {limit} turns")]
    VoiceTurns { limit: u32 },
    #[error("Voice call exceeded {limit_secs} seconds")]
    VoiceDuration { limit_secs: u64 },
}

impl RateLimitExceeded {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ContactHourly { .. } => "contact_hourly",
            Self::ContactDaily { .. } => "contact_daily",
            Self::AgentDaily { .. } => "agent_daily",
            Self::VoiceTurns { .. } => "voice_turns",
            Self::VoiceDuration { .. } => "voice_duration",
        }
    }

    /// Text shown or spoken to the contact in place of a model reply.
    pub fn friendly_message(&self) -> &'static str {
        match self {
            Self::ContactHourly { .. } => {
                "You've sent a lot of messages in the last hour. Please wait a while before \
                 sending more, or call us directly."
            }
            Self::ContactDaily { .. } => {
                "You've reached the daily message limit. Please call us directly or try again \
                 tomorrow."
            }
            Self::AgentDaily { .. } => {
                "This assistant has reached its daily message capacity. Please contact us \
                 directly, our team will be happy to help."
            }
            Self::VoiceTurns { .. } => {
                "We've been chatting for a while! For further assistance, please call back or \
                 send us a message. Goodbye!"
            }
            Self::VoiceDuration { .. } => {
                "We've reached the maximum call duration. Please call back if you need further \
                 assistance. Goodbye!"
            }
        }
    }

    pub fn ends_call(&self) -> bool {
        matches!(self, Self::VoiceTurns { .. } | Self::VoiceDuration { .. })
    }
}

impl RateLimitPolicy {
    pub fn check_contact(
        &self,
        user_messages_last_hour: u32,
        user_messages_last_day: u32,
    ) -> Result<(), RateLimitExceeded> {
        if user_messages_last_hour >= self.contact_messages_per_hour {
            return Err(RateLimitExceeded::ContactHourly { limit: self.contact_messages_per_hour });
        }
        if user_messages_last_day >= self.contact_messages_per_day {
            return Err(RateLimitExceeded::ContactDaily { limit: self.contact_messages_per_day });
        }
        Ok(())
    }

    pub fn check_agent(&self, replies_last_day: u32) -> Result<(), RateLimitExceeded> {
        if replies_last_day >= self.agent_replies_per_day {
            return Err(RateLimitExceeded::AgentDaily { limit: self.agent_replies_per_day });
        }
        Ok(())
    }

    pub fn check_voice_turns(&self, assistant_turns: u32) -> Result<(), RateLimitExceeded> {
        if assistant_turns >= self.voice_max_turns {
            return Err(RateLimitExceeded::VoiceTurns { limit: self.voice_max_turns });
        }
        Ok(())
    }

    /// Unlike the counters, the call may run for exactly the limit.
    pub fn check_voice_duration(&self, elapsed_secs: i64) -> Result<(), RateLimitExceeded> {
        let limit_secs = self.voice_max_duration.as_secs();
        if elapsed_secs > 0 && elapsed_secs.unsigned_abs() > limit_secs {
            return Err(RateLimitExceeded::VoiceDuration { limit_secs });
        }
        Ok(())
    }
}
