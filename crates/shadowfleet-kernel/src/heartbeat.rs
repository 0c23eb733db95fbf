//! Heartbeat checks — finds shadows whose agents have gone quiet.
//!
//! The check is a pure function over the registry. The dispatcher turns
//! overdue statuses into timeout deliveries, and the monitor runs that sweep
//! on a timer.

use crate::registry::ShadowRegistry;
use chrono::{DateTime, Utc};
use shadowfleet_types::agent::{AgentId, ShadowState};
use tracing::{debug, warn};

/// Result of a heartbeat check for one shadow.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatStatus {
    pub agent_id: AgentId,
    pub state: ShadowState,
    /// When the current silence began.
    pub silent_since: DateTime<Utc>,
    /// Seconds since the agent was last heard from or last timed out.
    pub silent_secs: i64,
    /// Whether a timeout event is due.
    pub overdue: bool,
}

/// Check every shadow that expects heartbeats.
///
/// A shadow is overdue once it has been silent for longer than the
/// configured timeout. Silence restarts at each delivered timeout, so a
/// quiet agent collects one timeout per period rather than one per sweep.
pub fn check_shadows(registry: &ShadowRegistry, now: DateTime<Utc>) -> Vec<HeartbeatStatus> {
    let timeout_secs = registry.config().heartbeat_timeout_secs as i64;
    let mut statuses = Vec::new();

    for shadow in registry.list() {
        let state = shadow.state();
        if !state.expects_heartbeat() {
            continue;
        }

        let silent_since = shadow.silent_since();
        let silent_secs = (now - silent_since).num_seconds();
        let overdue = silent_secs > timeout_secs;

        if overdue {
            warn!(
                agent = %shadow.agent_id(),
                state = %state,
                silent_secs,
                timeout_secs,
                "Agent heartbeat overdue"
            );
        } else {
            debug!(agent = %shadow.agent_id(), silent_secs, "Agent heartbeat OK");
        }

        statuses.push(HeartbeatStatus {
            agent_id: shadow.agent_id().clone(),
            state,
            silent_since,
            silent_secs,
            overdue,
        });
    }

    statuses.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
    statuses
}

/// Aggregate heartbeat summary.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatSummary {
    pub total_checked: usize,
    pub responsive: usize,
    pub overdue: usize,
    pub overdue_agents: Vec<HeartbeatStatus>,
}

/// Produce a summary from heartbeat statuses.
pub fn summarize(statuses: &[HeartbeatStatus]) -> HeartbeatSummary {
    let overdue_agents: Vec<HeartbeatStatus> =
        statuses.iter().filter(|s| s.overdue).cloned().collect();

    HeartbeatSummary {
        total_checked: statuses.len(),
        responsive: statuses.len() - overdue_agents.len(),
        overdue: overdue_agents.len(),
        overdue_agents,
    }
}
