use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrganizationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmployeeTypeId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Paused,
    Cancelled,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Inbound channel a conversation runs over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Web,
    Whatsapp,
    Instagram,
    Messenger,
    Voice,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Whatsapp => "whatsapp",
            Self::Instagram => "instagram",
            Self::Messenger => "messenger",
            Self::Voice => "voice",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "web" => Some(Self::Web),
            "whatsapp" => Some(Self::Whatsapp),
            "instagram" => Some(Self::Instagram),
            "messenger" | "facebook" => Some(Self::Messenger),
            "voice" => Some(Self::Voice),
            _ => None,
        }
    }
}

/// Configured AI employee, joined with the names the prompt builder needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub organization_id: OrganizationId,
    pub organization_name: String,
    pub employee_type_id: EmployeeTypeId,
    pub name: String,
    pub custom_prompt: Option<String>,
    pub status: AgentStatus,
    pub channels: Vec<Channel>,
}

impl Agent {
    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }

    pub fn business_context(&self) -> Option<&str> {
        self.custom_prompt.as_deref().map(str::trim).filter(|value| !value.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::{Agent, AgentId, AgentStatus, Channel, EmployeeTypeId, OrganizationId};

    #[test]
    fn channel_round_trips_through_str() {
        for channel in [
            Channel::Web,
            Channel::Whatsapp,
            Channel::Instagram,
            Channel::Messenger,
            Channel::Voice,
        ] {
            assert_eq!(Channel::parse(channel.as_str()), Some(channel));
        }
        assert_eq!(Channel::parse("Facebook"), Some(Channel::Messenger));
        assert_eq!(Channel::parse("sms"), None);
    }

    #[test]
    fn status_round_trips_and_gates_activity() {
        for status in [AgentStatus::Active, AgentStatus::Paused, AgentStatus::Cancelled] {
            assert_eq!(AgentStatus::parse(status.as_str()), Some(status));
        }

        let mut agent = Agent {
            id: AgentId("agent-1".to_string()),
            organization_id: OrganizationId("org-1".to_string()),
            organization_name: "Sparkle Cleaning".to_string(),
            employee_type_id: EmployeeTypeId("receptionist".to_string()),
            name: "Ava".to_string(),
            custom_prompt: Some("   ".to_string()),
            status: AgentStatus::Paused,
            channels: vec![Channel::Web],
        };
        assert!(!agent.is_active());
        assert_eq!(agent.business_context(), None);

        agent.status = AgentStatus::Active;
        agent.custom_prompt = Some("We clean offices in Leeds.".to_string());
        assert!(agent.is_active());
        assert_eq!(agent.business_context(), Some("We clean offices in Leeds."));
    }
}
