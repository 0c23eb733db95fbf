//! Notifications the monitor publishes about its shadows.

use crate::agent::{AgentId, ShadowEvent, ShadowState};
use crate::health::Health;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a shadow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FleetEventKind {
    /// A shadow was created for a newly onboarding agent.
    ShadowCreated,
    /// The shadow moved between two different states.
    StateChanged { from: ShadowState, to: ShadowState },
    /// The overall (alerting) health changed.
    HealthChanged { from: Health, to: Health },
    /// The agent left the fleet deliberately.
    Offboarded,
    /// The shadow was removed from the registry.
    Evicted,
    /// A delivery could not be applied and was dropped.
    EventDropped {
        event: Option<ShadowEvent>,
        reason: String,
    },
}

/// A notification about one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetEvent {
    pub agent_id: AgentId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: FleetEventKind,
}

impl FleetEvent {
    pub fn new(agent_id: AgentId, timestamp: DateTime<Utc>, kind: FleetEventKind) -> Self {
        Self {
            agent_id,
            timestamp,
            kind,
        }
    }
}
