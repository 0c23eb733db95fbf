//! Dispatcher — routes deliveries to shadows through per-agent lanes.
//!
//! Every agent gets its own lane: an unbounded queue drained by one tokio
//! task. Deliveries for one agent are applied in arrival order; different
//! agents progress independently, so a slow or misbehaving agent never
//! holds up the rest of the fleet.
//!
//! A lane is only ever removed from the map by its own task, once it has
//! been asked to close and its queue is empty. Sends happen while the map
//! entry is held, so a new lane for the same agent cannot start while the
//! old one still has work.

use crate::error::{KernelError, KernelResult};
use crate::event_bus::EventBus;
use crate::heartbeat::{self, HeartbeatSummary};
use crate::registry::ShadowRegistry;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use shadowfleet_types::agent::{AgentId, ShadowEvent};
use shadowfleet_types::event::{FleetEvent, FleetEventKind};
use shadowfleet_types::message::{FleetMessage, MessageKind, PROTOCOL_VERSION};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Something for the dispatcher to apply to a shadow.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// A message received from an agent.
    Message(FleetMessage),
    /// The agent missed its heartbeat window.
    Timeout(AgentId),
    /// A sweep saw the agent silent since `silent_since`. Skipped if the
    /// agent was heard from by the time it is applied.
    Overdue {
        agent_id: AgentId,
        silent_since: DateTime<Utc>,
    },
}

impl Delivery {
    pub fn agent_id(&self) -> &AgentId {
        match self {
            Delivery::Message(message) => &message.agent_id,
            Delivery::Timeout(agent_id) => agent_id,
            Delivery::Overdue { agent_id, .. } => agent_id,
        }
    }
}

enum LaneItem {
    Deliver(Delivery),
    /// Acknowledged once everything queued before it has been applied.
    Barrier(oneshot::Sender<()>),
    /// Retire the lane as soon as its queue is empty.
    Close,
}

struct Lane {
    id: u64,
    tx: mpsc::UnboundedSender<LaneItem>,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub heartbeat: HeartbeatSummary,
    /// Agents whose shadows were evicted.
    pub evicted: Vec<AgentId>,
}

/// Routes deliveries to shadows and publishes what they report.
pub struct Dispatcher {
    registry: Arc<ShadowRegistry>,
    bus: Arc<EventBus>,
    lanes: DashMap<AgentId, Lane>,
    next_lane: AtomicU64,
}

impl Dispatcher {
    pub fn new(registry: Arc<ShadowRegistry>, bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            bus,
            lanes: DashMap::new(),
            next_lane: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<ShadowRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Apply a delivery on the calling thread and return the notifications
    /// it produced.
    ///
    /// Nothing here fails: deliveries that cannot be applied are logged and
    /// reported as `EventDropped`. Callers that bypass the lanes must not
    /// apply deliveries for the same agent concurrently.
    pub fn apply(&self, delivery: Delivery, now: DateTime<Utc>) -> Vec<FleetEvent> {
        match delivery {
            Delivery::Timeout(agent_id) => self.deliver_event(&agent_id, ShadowEvent::Timeout, now),
            Delivery::Overdue {
                agent_id,
                silent_since,
            } => match self.registry.get(&agent_id) {
                Some(shadow) if shadow.silent_since() > silent_since => {
                    debug!(agent = %agent_id, "Agent heard from since the sweep, skipping timeout");
                    Vec::new()
                }
                _ => self.deliver_event(&agent_id, ShadowEvent::Timeout, now),
            },
            Delivery::Message(message) => self.apply_message(message, now),
        }
    }

    fn apply_message(&self, message: FleetMessage, now: DateTime<Utc>) -> Vec<FleetEvent> {
        if let Some(event) = message.shadow_event() {
            return self.deliver_event(&message.agent_id, event, now);
        }

        let agent_id = &message.agent_id;
        match message.kind {
            MessageKind::OnboardingRequest { protocol_version } => {
                self.onboard(agent_id, protocol_version, now)
            }
            MessageKind::Log { level, message: text } => match self.registry.get(agent_id) {
                Some(shadow) => {
                    trace!(agent = %agent_id, level = %level, text = %text, "Agent log record");
                    shadow.observe_severity(level, now);
                    shadow.drain_notices()
                }
                None => unknown_agent(agent_id, None, now),
            },
            MessageKind::OnboardingAck
            | MessageKind::Heartbeat
            | MessageKind::OffboardingNotice { .. } => Vec::new(),
        }
    }

    fn deliver_event(
        &self,
        agent_id: &AgentId,
        event: ShadowEvent,
        now: DateTime<Utc>,
    ) -> Vec<FleetEvent> {
        match self.registry.get(agent_id) {
            Some(shadow) => {
                shadow.handle(event, now);
                shadow.drain_notices()
            }
            None => unknown_agent(agent_id, Some(event), now),
        }
    }

    fn onboard(
        &self,
        agent_id: &AgentId,
        protocol_version: u32,
        now: DateTime<Utc>,
    ) -> Vec<FleetEvent> {
        if protocol_version != PROTOCOL_VERSION {
            let err = KernelError::UnsupportedProtocol(protocol_version);
            warn!(agent = %agent_id, error = %err, "Rejecting onboarding request");
            return vec![dropped(agent_id, None, &err, now)];
        }

        let mut notices = Vec::new();
        if let Some(existing) = self.registry.get(agent_id) {
            if !existing.is_terminal() {
                debug!(
                    agent = %agent_id,
                    state = %existing.state(),
                    "Repeated onboarding request, keeping shadow"
                );
                return notices;
            }
            // A returning agent replaces its terminated shadow.
            if let Ok(old) = self.registry.evict(agent_id) {
                notices.extend(old.drain_notices());
                notices.push(FleetEvent::new(agent_id.clone(), now, FleetEventKind::Evicted));
            }
        }

        let necessity = self.registry.config().necessity_for(agent_id);
        match self.registry.get_or_create(agent_id, necessity, now) {
            Ok((shadow, _)) => notices.extend(shadow.drain_notices()),
            Err(err) => {
                warn!(agent = %agent_id, error = %err, "Cannot create shadow");
                notices.push(dropped(agent_id, None, &err, now));
            }
        }
        notices
    }

    /// Queue a delivery on its agent's lane.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(self: &Arc<Self>, delivery: Delivery) {
        let agent_id = delivery.agent_id().clone();
        let mut lane = self
            .lanes
            .entry(agent_id.clone())
            .or_insert_with(|| self.spawn_lane(agent_id.clone()));

        // Only a lane whose task died without retiring can refuse a send.
        if let Err(mpsc::error::SendError(item)) = lane.tx.send(LaneItem::Deliver(delivery)) {
            warn!(agent = %agent_id, "Lane task gone, reopening lane");
            *lane = self.spawn_lane(agent_id.clone());
            if lane.tx.send(item).is_err() {
                warn!(agent = %agent_id, "Lane unavailable, dropping delivery");
            }
        }
    }

    fn spawn_lane(self: &Arc<Self>, agent_id: AgentId) -> Lane {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = self.next_lane.fetch_add(1, Ordering::Relaxed);
        let dispatcher = Arc::clone(self);

        tokio::spawn(async move {
            debug!(agent = %agent_id, lane = id, "Lane opened");
            let mut closing = false;
            while let Some(item) = rx.recv().await {
                match item {
                    LaneItem::Deliver(delivery) => {
                        let events = dispatcher.apply(delivery, Utc::now());
                        dispatcher.bus.publish_all(events).await;
                    }
                    LaneItem::Barrier(done) => {
                        let _ = done.send(());
                    }
                    LaneItem::Close => closing = true,
                }
                if closing
                    && dispatcher
                        .lanes
                        .remove_if(&agent_id, |_, lane| lane.id == id && rx.is_empty())
                        .is_some()
                {
                    break;
                }
            }
            debug!(agent = %agent_id, lane = id, "Lane closed");
        });

        Lane { id, tx }
    }

    /// Wait until every delivery queued so far has been applied.
    pub async fn flush(&self) {
        let senders: Vec<_> = self.lanes.iter().map(|e| e.value().tx.clone()).collect();
        for tx in senders {
            let (done_tx, done_rx) = oneshot::channel();
            if tx.send(LaneItem::Barrier(done_tx)).is_ok() {
                let _ = done_rx.await;
            }
        }
    }

    /// Deliver timeouts to overdue shadows and evict expired ones.
    pub async fn sweep(self: &Arc<Self>, now: DateTime<Utc>) -> SweepReport {
        let statuses = heartbeat::check_shadows(&self.registry, now);
        for status in statuses.iter().filter(|s| s.overdue) {
            self.dispatch(Delivery::Overdue {
                agent_id: status.agent_id.clone(),
                silent_since: status.silent_since,
            });
        }

        let retention = self.registry.config().eviction_after();
        let evicted = self.registry.evict_expired(now, retention);
        for agent_id in &evicted {
            self.close_lane(agent_id);
            self.bus
                .publish(FleetEvent::new(agent_id.clone(), now, FleetEventKind::Evicted))
                .await;
        }

        let report = SweepReport {
            heartbeat: heartbeat::summarize(&statuses),
            evicted,
        };
        if report.heartbeat.overdue > 0 || !report.evicted.is_empty() {
            info!(
                checked = report.heartbeat.total_checked,
                overdue = report.heartbeat.overdue,
                evicted = report.evicted.len(),
                "Sweep complete"
            );
        }
        report
    }

    /// Evict a terminated shadow now and close its lane.
    pub async fn evict(&self, agent_id: &AgentId) -> KernelResult<()> {
        self.registry.evict(agent_id)?;
        self.close_lane(agent_id);
        self.bus
            .publish(FleetEvent::new(
                agent_id.clone(),
                Utc::now(),
                FleetEventKind::Evicted,
            ))
            .await;
        Ok(())
    }

    /// Ask an agent's lane to retire. Deliveries already queued, and any
    /// that arrive before the queue runs dry, still run on the same task.
    pub fn close_lane(&self, agent_id: &AgentId) {
        if let Some(lane) = self.lanes.get(agent_id) {
            let _ = lane.tx.send(LaneItem::Close);
        }
    }

    /// Number of open lanes.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Close every lane. Queued deliveries drain in the background.
    pub fn shutdown(&self) {
        info!(lanes = self.lanes.len(), "Closing dispatch lanes");
        for lane in self.lanes.iter() {
            let _ = lane.tx.send(LaneItem::Close);
        }
    }
}

fn unknown_agent(
    agent_id: &AgentId,
    event: Option<ShadowEvent>,
    now: DateTime<Utc>,
) -> Vec<FleetEvent> {
    let err = KernelError::UnknownAgent(agent_id.clone());
    warn!(agent = %agent_id, event = ?event, "Dropping delivery for unknown agent");
    vec![dropped(agent_id, event, &err, now)]
}

fn dropped(
    agent_id: &AgentId,
    event: Option<ShadowEvent>,
    err: &KernelError,
    now: DateTime<Utc>,
) -> FleetEvent {
    FleetEvent::new(
        agent_id.clone(),
        now,
        FleetEventKind::EventDropped {
            event,
            reason: err.to_string(),
        },
    )
}
