//! Agent identity and the lifecycle vocabulary of both state machines.

use crate::health::Health;
use serde::{Deserialize, Serialize};

/// Identifier an agent announces for itself when onboarding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a shadow, as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowState {
    /// Waiting for the onboarding handshake to finish.
    Onboarding,
    /// Handshake done, no heartbeat seen yet.
    Onboarded,
    /// Heartbeats arriving on time.
    Active,
    /// A heartbeat was missed.
    Inactive,
    /// The agent left the fleet on purpose. Terminal.
    Terminating,
}

impl ShadowState {
    pub const ALL: [ShadowState; 5] = [
        ShadowState::Onboarding,
        ShadowState::Onboarded,
        ShadowState::Active,
        ShadowState::Inactive,
        ShadowState::Terminating,
    ];

    /// Health implied by this state. There is no other source of state health.
    pub const fn health(self) -> Health {
        match self {
            ShadowState::Onboarding => Health::Green,
            ShadowState::Onboarded => Health::Yellow,
            ShadowState::Active => Health::Green,
            ShadowState::Inactive => Health::Yellow,
            ShadowState::Terminating => Health::Green,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, ShadowState::Terminating)
    }

    /// Whether the timer collaborator should watch this state for missed heartbeats.
    pub const fn expects_heartbeat(self) -> bool {
        matches!(
            self,
            ShadowState::Onboarded | ShadowState::Active | ShadowState::Inactive
        )
    }
}

impl std::fmt::Display for ShadowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShadowState::Onboarding => write!(f, "onboarding"),
            ShadowState::Onboarded => write!(f, "onboarded"),
            ShadowState::Active => write!(f, "active"),
            ShadowState::Inactive => write!(f, "inactive"),
            ShadowState::Terminating => write!(f, "terminating"),
        }
    }
}

/// Events consumed by a shadow's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowEvent {
    OnboardingAck,
    Heartbeat,
    /// Injected by the timer when no heartbeat arrived in time.
    Timeout,
    OffboardingNotice,
}

impl std::fmt::Display for ShadowEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShadowEvent::OnboardingAck => write!(f, "onboarding_ack"),
            ShadowEvent::Heartbeat => write!(f, "heartbeat"),
            ShadowEvent::Timeout => write!(f, "timeout"),
            ShadowEvent::OffboardingNotice => write!(f, "offboarding_notice"),
        }
    }
}

/// Local lifecycle state of an agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    Onboarding,
    Running,
    /// Offboarding notice sent. Terminal.
    Terminating,
}

impl ClientState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, ClientState::Terminating)
    }
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientState::Onboarding => write!(f, "onboarding"),
            ClientState::Running => write!(f, "running"),
            ClientState::Terminating => write!(f, "terminating"),
        }
    }
}

/// Events consumed by the agent-side state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientEvent {
    OnboardingComplete,
    Sigint,
    ShutdownRequested,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_health_is_fixed_per_state() {
        assert_eq!(ShadowState::Active.health(), Health::Green);
        assert_eq!(ShadowState::Inactive.health(), Health::Yellow);
        assert_eq!(ShadowState::Onboarded.health(), Health::Yellow);
        assert_eq!(ShadowState::Onboarding.health(), Health::Green);
    }

    #[test]
    fn test_only_terminating_is_terminal() {
        let terminal: Vec<_> = ShadowState::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal, vec![&ShadowState::Terminating]);
    }

    #[test]
    fn test_agent_id_is_transparent() {
        let id = AgentId::new("thermostat-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"thermostat-1\"");
        assert_eq!(id.to_string(), "thermostat-1");
    }
}
