//! Agent shadow — the monitor's model of one remote agent.
//!
//! Each shadow drives its own state machine:
//!
//! ```text
//! Onboarding --ack--> Onboarded --heartbeat--> Active <--heartbeat-- Inactive
//!                         |                      |                     ^  |
//!                         +-------timeout--------+-------timeout-------+  | timeout (self)
//!
//! any non-terminal state --offboarding_notice--> Terminating
//! ```
//!
//! State health is a pure function of the state. Alerting uses the overall
//! health, which also folds in the highest severity observed since the agent
//! last became active, capped by the agent's necessity.

use crate::error::KernelResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shadowfleet_fsm::{Next, Outcome, State, StateMachine};
use shadowfleet_types::agent::{AgentId, ShadowEvent, ShadowState};
use shadowfleet_types::agent::{ShadowEvent as E, ShadowState as S};
use shadowfleet_types::config::FleetConfig;
use shadowfleet_types::event::{FleetEvent, FleetEventKind};
use shadowfleet_types::health::{Health, Necessity, Severity};
use tracing::{debug, info, warn};

const TRANSITIONS: [(ShadowState, ShadowEvent, ShadowState); 11] = [
    (S::Onboarding, E::OnboardingAck, S::Onboarded),
    (S::Onboarded, E::Heartbeat, S::Active),
    (S::Active, E::Heartbeat, S::Active),
    (S::Inactive, E::Heartbeat, S::Active),
    (S::Onboarded, E::Timeout, S::Inactive),
    (S::Active, E::Timeout, S::Inactive),
    (S::Inactive, E::Timeout, S::Inactive),
    (S::Onboarding, E::OffboardingNotice, S::Terminating),
    (S::Onboarded, E::OffboardingNotice, S::Terminating),
    (S::Active, E::OffboardingNotice, S::Terminating),
    (S::Inactive, E::OffboardingNotice, S::Terminating),
];

/// Bookkeeping shared by the shadow's state hooks.
struct ShadowBook {
    agent_id: AgentId,
    /// Timestamp of the delivery being processed.
    now: DateTime<Utc>,
    max_observed_level: Severity,
    missed_heartbeats: u32,
    last_seen: DateTime<Utc>,
    last_timeout: Option<DateTime<Utc>>,
    inactive_since: Option<DateTime<Utc>>,
    terminated_at: Option<DateTime<Utc>>,
    notices: Vec<FleetEvent>,
}

impl ShadowBook {
    fn new(agent_id: AgentId, now: DateTime<Utc>) -> Self {
        Self {
            agent_id,
            now,
            max_observed_level: Severity::BASELINE,
            missed_heartbeats: 0,
            last_seen: now,
            last_timeout: None,
            inactive_since: None,
            terminated_at: None,
            notices: Vec::new(),
        }
    }

    /// Raise the maximum observed level. Returns whether it went up.
    fn observe(&mut self, level: Severity) -> bool {
        if level > self.max_observed_level {
            self.max_observed_level = level;
            true
        } else {
            false
        }
    }

    fn record_missed(&mut self, escalate_after: u32) {
        self.missed_heartbeats += 1;
        self.last_timeout = Some(self.now);
        let level = if self.missed_heartbeats >= escalate_after {
            Severity::Error
        } else {
            Severity::Warning
        };
        self.observe(level);
        debug!(
            agent = %self.agent_id,
            missed = self.missed_heartbeats,
            level = %level,
            "Heartbeat missed"
        );
    }

    fn notify(&mut self, kind: FleetEventKind) {
        self.notices
            .push(FleetEvent::new(self.agent_id.clone(), self.now, kind));
    }
}

/// Hooks for one shadow state.
struct ShadowNode {
    id: ShadowState,
}

impl State for ShadowNode {
    type Id = ShadowState;
    type Event = ShadowEvent;
    type Context = ShadowBook;

    fn on_entry(&mut self, book: &mut ShadowBook) -> Next<ShadowEvent> {
        match self.id {
            // Recovery forgives earlier degradation for alerting purposes.
            ShadowState::Active => {
                book.max_observed_level = Severity::BASELINE;
                book.missed_heartbeats = 0;
            }
            ShadowState::Inactive => book.inactive_since = Some(book.now),
            ShadowState::Terminating => book.terminated_at = Some(book.now),
            ShadowState::Onboarding | ShadowState::Onboarded => {}
        }
        Next::Stay
    }

    fn on_exit(&mut self, book: &mut ShadowBook) {
        if self.id == ShadowState::Inactive {
            book.inactive_since = None;
        }
    }
}

/// Point-in-time view of a shadow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowSnapshot {
    pub agent_id: AgentId,
    pub state: ShadowState,
    pub health: Health,
    pub overall_health: Health,
    pub necessity: Necessity,
    pub max_observed_level: Severity,
    pub missed_heartbeats: u32,
    pub last_seen: DateTime<Utc>,
    pub inactive_since: Option<DateTime<Utc>>,
    pub terminated_at: Option<DateTime<Utc>>,
}

/// The monitor's model of one remote agent.
pub struct AgentShadow {
    agent_id: AgentId,
    necessity: Necessity,
    escalate_after_missed: u32,
    machine: StateMachine<ShadowNode>,
}

impl AgentShadow {
    /// Build a shadow and its transition table. Call [`start`](Self::start)
    /// before delivering events.
    pub fn new(
        agent_id: AgentId,
        necessity: Necessity,
        config: &FleetConfig,
        now: DateTime<Utc>,
    ) -> KernelResult<Self> {
        let mut builder = StateMachine::<ShadowNode>::builder(format!("shadow:{agent_id}"));
        for id in ShadowState::ALL {
            builder.register_state(id, ShadowNode { id })?;
        }
        for (from, event, to) in TRANSITIONS {
            builder.add_transition(from, event, to)?;
        }

        Ok(Self {
            machine: builder.build(ShadowBook::new(agent_id.clone(), now)),
            agent_id,
            necessity,
            escalate_after_missed: config.escalate_after_missed,
        })
    }

    /// Enter the Onboarding state.
    pub fn start(&self, now: DateTime<Utc>) -> KernelResult<()> {
        self.machine.with_context(|book| book.now = now);
        self.machine.start(ShadowState::Onboarding)?;
        self.machine
            .with_context(|book| book.notify(FleetEventKind::ShadowCreated));
        info!(agent = %self.agent_id, necessity = ?self.necessity, "Shadow created");
        Ok(())
    }

    /// Apply an event, returning the engine error if it is rejected.
    pub fn fire(
        &self,
        event: ShadowEvent,
        now: DateTime<Utc>,
    ) -> KernelResult<Outcome<ShadowState, ShadowEvent>> {
        let before = self.overall_health();
        self.machine.with_context(|book| book.now = now);
        let outcome = self.machine.fire(event)?;

        let escalate_after = self.escalate_after_missed;
        self.machine.with_context(|book| {
            for hop in outcome.hops.iter().filter(|h| !h.is_self_loop()) {
                book.notify(FleetEventKind::StateChanged {
                    from: hop.from,
                    to: hop.to,
                });
                if hop.to.is_terminal() {
                    book.notify(FleetEventKind::Offboarded);
                }
            }
            match event {
                ShadowEvent::Timeout => book.record_missed(escalate_after),
                _ => book.last_seen = now,
            }
        });

        if outcome.changed() {
            debug!(
                agent = %self.agent_id,
                event = %event,
                state = %outcome.state,
                "Shadow transitioned"
            );
        }
        self.note_health_change(before);
        Ok(outcome)
    }

    /// Apply an event; a rejected event is logged and dropped.
    ///
    /// Returns the resulting state, or `None` if the event was dropped.
    pub fn handle(&self, event: ShadowEvent, now: DateTime<Utc>) -> Option<ShadowState> {
        match self.fire(event, now) {
            Ok(outcome) => Some(outcome.state),
            Err(err) => {
                self.drop_event(Some(event), &err.to_string(), now);
                None
            }
        }
    }

    /// Record a dropped delivery.
    pub fn drop_event(&self, event: Option<ShadowEvent>, reason: &str, now: DateTime<Utc>) {
        warn!(
            agent = %self.agent_id,
            event = ?event,
            state = %self.state(),
            reason,
            "Dropping event for shadow"
        );
        self.machine.with_context(|book| {
            book.now = now;
            book.notify(FleetEventKind::EventDropped {
                event,
                reason: reason.to_string(),
            });
        });
    }

    /// Fold a severity reported by the agent into the maximum observed level.
    pub fn observe_severity(&self, level: Severity, now: DateTime<Utc>) {
        let before = self.overall_health();
        let raised = self.machine.with_context(|book| {
            book.now = now;
            book.last_seen = now;
            book.observe(level)
        });
        if raised {
            debug!(agent = %self.agent_id, level = %level, "Maximum observed level raised");
        }
        self.note_health_change(before);
    }

    fn note_health_change(&self, before: Health) {
        let after = self.overall_health();
        if after == before {
            return;
        }
        if after == Health::Red {
            warn!(agent = %self.agent_id, from = %before, to = %after, "Shadow health changed");
        } else {
            info!(agent = %self.agent_id, from = %before, to = %after, "Shadow health changed");
        }
        self.machine.with_context(|book| {
            book.notify(FleetEventKind::HealthChanged {
                from: before,
                to: after,
            })
        });
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn necessity(&self) -> Necessity {
        self.necessity
    }

    /// Current state. A shadow that was never started reports Onboarding.
    pub fn state(&self) -> ShadowState {
        self.machine.current().unwrap_or(ShadowState::Onboarding)
    }

    /// Health implied by the current state alone.
    pub fn health(&self) -> Health {
        self.state().health()
    }

    /// Health implied by the maximum observed level alone.
    pub fn log_health(&self) -> Health {
        self.max_observed_level().log_health()
    }

    /// Health used for alerting: the worse of state and log health,
    /// capped by necessity.
    pub fn overall_health(&self) -> Health {
        self.machine.inspect(|current, book| {
            let state = current.unwrap_or(ShadowState::Onboarding);
            self.necessity
                .cap(state.health().max(book.max_observed_level.log_health()))
        })
    }

    pub fn max_observed_level(&self) -> Severity {
        self.machine.inspect(|_, book| book.max_observed_level)
    }

    pub fn missed_heartbeats(&self) -> u32 {
        self.machine.inspect(|_, book| book.missed_heartbeats)
    }

    /// Last time a message from the agent was applied.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.machine.inspect(|_, book| book.last_seen)
    }

    /// Start of the current silence: the later of the last message and the
    /// last timeout delivered.
    pub fn silent_since(&self) -> DateTime<Utc> {
        self.machine.inspect(|_, book| match book.last_timeout {
            Some(t) => t.max(book.last_seen),
            None => book.last_seen,
        })
    }

    pub fn inactive_since(&self) -> Option<DateTime<Utc>> {
        self.machine.inspect(|_, book| book.inactive_since)
    }

    pub fn terminated_at(&self) -> Option<DateTime<Utc>> {
        self.machine.inspect(|_, book| book.terminated_at)
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Take the notifications produced since the last call.
    pub fn drain_notices(&self) -> Vec<FleetEvent> {
        self.machine
            .with_context(|book| std::mem::take(&mut book.notices))
    }

    pub fn snapshot(&self) -> ShadowSnapshot {
        self.machine.inspect(|current, book| {
            let state = current.unwrap_or(ShadowState::Onboarding);
            ShadowSnapshot {
                agent_id: self.agent_id.clone(),
                state,
                health: state.health(),
                overall_health: self
                    .necessity
                    .cap(state.health().max(book.max_observed_level.log_health())),
                necessity: self.necessity,
                max_observed_level: book.max_observed_level,
                missed_heartbeats: book.missed_heartbeats,
                last_seen: book.last_seen,
                inactive_since: book.inactive_since,
                terminated_at: book.terminated_at,
            }
        })
    }
}

impl std::fmt::Debug for AgentShadow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentShadow")
            .field("agent_id", &self.agent_id)
            .field("state", &self.state())
            .field("necessity", &self.necessity)
            .finish()
    }
}
