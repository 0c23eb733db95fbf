//! Monitor configuration.

use crate::agent::AgentId;
use crate::error::ConfigError;
use crate::health::Necessity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Top-level monitor configuration, loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Seconds without a heartbeat before a shadow receives a timeout event.
    pub heartbeat_timeout_secs: u64,
    /// How often the timeout sweeper wakes up.
    pub sweep_interval_secs: u64,
    /// Seconds a terminated shadow is kept before eviction.
    pub eviction_after_secs: u64,
    /// Upper bound on tracked shadows.
    pub max_agents: usize,
    /// Consecutive missed heartbeats before the shadow observes an error.
    pub escalate_after_missed: u32,
    /// Necessity assigned to agents without an entry in `necessity`.
    pub default_necessity: Necessity,
    /// Per-agent necessity, keyed by agent id.
    pub necessity: HashMap<AgentId, Necessity>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 120,
            sweep_interval_secs: 10,
            eviction_after_secs: 600,
            max_agents: 4096,
            escalate_after_missed: 3,
            default_necessity: Necessity::Required,
            necessity: HashMap::new(),
        }
    }
}

impl FleetConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn eviction_after(&self) -> Duration {
        Duration::from_secs(self.eviction_after_secs)
    }

    /// Necessity of a given agent.
    pub fn necessity_for(&self, agent_id: &AgentId) -> Necessity {
        self.necessity
            .get(agent_id)
            .copied()
            .unwrap_or(self.default_necessity)
    }

    /// Reject values that would make the monitor misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "heartbeat_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "sweep_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_agents == 0 {
            return Err(ConfigError::Invalid {
                field: "max_agents",
                reason: "must allow at least one agent".to_string(),
            });
        }
        if self.escalate_after_missed == 0 {
            return Err(ConfigError::Invalid {
                field: "escalate_after_missed",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
