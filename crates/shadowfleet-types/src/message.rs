//! Messages exchanged between agents and the monitor.
//!
//! The transport and its framing are external; these types only fix the
//! vocabulary. Every message is a [`FleetMessage`] envelope tagged with the
//! sending agent's id.

use crate::agent::{AgentId, ShadowEvent};
use crate::error::SendError;
use crate::health::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol version carried in onboarding requests.
pub const PROTOCOL_VERSION: u32 = 1;

/// A message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetMessage {
    /// Unique message ID.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// The agent this message is from (or about).
    pub agent_id: AgentId,
    /// When the sender created the message.
    #[serde(default = "Utc::now")]
    pub sent_at: DateTime<Utc>,
    /// Message variant.
    #[serde(flatten)]
    pub kind: MessageKind,
}

/// The different kinds of fleet messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    /// Agent asks to join the fleet.
    OnboardingRequest {
        #[serde(default = "default_protocol_version")]
        protocol_version: u32,
    },
    /// Handshake completed.
    OnboardingAck,
    /// Agent is alive.
    Heartbeat,
    /// Agent is leaving the fleet.
    OffboardingNotice {
        #[serde(default)]
        reason: Option<String>,
    },
    /// A log record forwarded by the agent.
    Log { level: Severity, message: String },
}

fn default_protocol_version() -> u32 {
    PROTOCOL_VERSION
}

impl FleetMessage {
    /// Create a new message from the given agent.
    pub fn new(agent_id: AgentId, kind: MessageKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            sent_at: Utc::now(),
            kind,
        }
    }

    /// Shadow event this message drives, if it drives one at all.
    ///
    /// Onboarding requests create shadows and log records only feed severity
    /// bookkeeping, so neither maps to an event.
    pub fn shadow_event(&self) -> Option<ShadowEvent> {
        match self.kind {
            MessageKind::OnboardingAck => Some(ShadowEvent::OnboardingAck),
            MessageKind::Heartbeat => Some(ShadowEvent::Heartbeat),
            MessageKind::OffboardingNotice { .. } => Some(ShadowEvent::OffboardingNotice),
            MessageKind::OnboardingRequest { .. } | MessageKind::Log { .. } => None,
        }
    }
}

/// Outbound side of the messaging collaborator.
///
/// Implementations must not block: hooks call `send` while the state
/// machine is mid-transition. Retries belong to the implementation.
pub trait Messenger: Send + Sync {
    fn send(&self, message: FleetMessage) -> Result<(), SendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_shape() {
        let msg = FleetMessage::new(AgentId::new("a1"), MessageKind::Heartbeat);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "heartbeat");
        assert_eq!(value["agent_id"], "a1");
    }

    #[test]
    fn test_message_minimal_json() {
        let msg: FleetMessage =
            serde_json::from_str(r#"{"agent_id":"a1","type":"onboarding_request"}"#).unwrap();
        assert_eq!(
            msg.kind,
            MessageKind::OnboardingRequest {
                protocol_version: PROTOCOL_VERSION
            }
        );
    }

    #[test]
    fn test_log_message_parses_level() {
        let msg: FleetMessage = serde_json::from_str(
            r#"{"agent_id":"a1","type":"log","level":"error","message":"disk full"}"#,
        )
        .unwrap();
        assert!(matches!(
            msg.kind,
            MessageKind::Log {
                level: Severity::Error,
                ..
            }
        ));
        assert_eq!(msg.shadow_event(), None);
    }

    #[test]
    fn test_log_message_accepts_numeric_level() {
        let msg: FleetMessage = serde_json::from_str(
            r#"{"agent_id":"a1","type":"log","level":50,"message":"meltdown"}"#,
        )
        .unwrap();
        assert!(matches!(
            msg.kind,
            MessageKind::Log {
                level: Severity::Critical,
                ..
            }
        ));
    }

    #[test]
    fn test_shadow_event_mapping() {
        let id = AgentId::new("a1");
        let off = FleetMessage::new(id.clone(), MessageKind::OffboardingNotice { reason: None });
        assert_eq!(off.shadow_event(), Some(ShadowEvent::OffboardingNotice));
        let ack = FleetMessage::new(id, MessageKind::OnboardingAck);
        assert_eq!(ack.shadow_event(), Some(ShadowEvent::OnboardingAck));
    }
}
