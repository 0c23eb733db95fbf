//! Integration tests for the monitor dispatch pipeline.
//!
//! Real agent clients are wired to a real `FleetMonitor` through
//! `ChannelMessenger`s, and every client message travels through the
//! dispatcher's per-agent lanes before the assertions run.
//!
//! No external services are contacted. All communication is in-process
//! via real tokio channels and tasks.

use chrono::{Duration as ChronoDuration, Utc};
use shadowfleet_agent::{AgentClient, ChannelMessenger};
use shadowfleet_kernel::{Delivery, FleetMonitor};
use shadowfleet_types::agent::{AgentId, ClientState, ShadowState};
use shadowfleet_types::config::FleetConfig;
use shadowfleet_types::event::FleetEventKind;
use shadowfleet_types::health::{Health, Necessity, Severity};
use shadowfleet_types::message::{FleetMessage, MessageKind};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Harness: one client plus the pipe that carries its messages to the monitor
// ---------------------------------------------------------------------------

struct Agent {
    client: Arc<AgentClient>,
    outbox: mpsc::UnboundedReceiver<FleetMessage>,
}

impl Agent {
    fn new(id: &str) -> Self {
        let (messenger, outbox) = ChannelMessenger::new();
        let client = AgentClient::new(AgentId::new(id), Arc::new(messenger)).unwrap();
        Self {
            client: Arc::new(client),
            outbox,
        }
    }

    fn id(&self) -> AgentId {
        self.client.agent_id().clone()
    }

    /// Hand everything the client sent so far to the monitor.
    fn forward(&mut self, monitor: &FleetMonitor) -> usize {
        let mut count = 0;
        while let Ok(message) = self.outbox.try_recv() {
            monitor.receive(message);
            count += 1;
        }
        count
    }

    /// Start the client, acknowledge it on the monitor side and send the
    /// first heartbeat.
    async fn onboard(&mut self, monitor: &FleetMonitor) {
        self.client.start().unwrap();
        self.forward(monitor);
        monitor.receive(FleetMessage::new(self.id(), MessageKind::OnboardingAck));
        self.client.onboarding_complete().unwrap();
        self.client.heartbeat().unwrap();
        self.forward(monitor);
        monitor.flush().await;
    }
}

fn shadow_state(monitor: &FleetMonitor, id: &AgentId) -> Option<ShadowState> {
    monitor.registry().get(id).map(|s| s.state())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_client_lifecycle_drives_shadow() {
    let monitor = FleetMonitor::new(FleetConfig::default());
    let mut agent = Agent::new("pump-1");

    agent.client.start().unwrap();
    agent.forward(&monitor);
    monitor.flush().await;
    assert_eq!(
        shadow_state(&monitor, &agent.id()),
        Some(ShadowState::Onboarding)
    );

    monitor.receive(FleetMessage::new(agent.id(), MessageKind::OnboardingAck));
    agent.client.onboarding_complete().unwrap();
    monitor.flush().await;
    assert_eq!(
        shadow_state(&monitor, &agent.id()),
        Some(ShadowState::Onboarded)
    );

    agent.client.heartbeat().unwrap();
    agent.forward(&monitor);
    monitor.flush().await;
    let shadow = monitor.registry().get(&agent.id()).unwrap();
    assert_eq!(shadow.state(), ShadowState::Active);
    assert_eq!(shadow.health(), Health::Green);

    assert_eq!(agent.client.interrupt().unwrap(), ClientState::Terminating);
    assert_eq!(agent.forward(&monitor), 1);
    monitor.flush().await;
    assert_eq!(shadow.state(), ShadowState::Terminating);

    let history = monitor.bus().history_for(&agent.id(), usize::MAX).await;
    assert!(history.iter().any(|e| e.kind == FleetEventKind::Offboarded));
    assert!(history
        .iter()
        .all(|e| !matches!(e.kind, FleetEventKind::EventDropped { .. })));
}

#[tokio::test]
async fn test_interrupt_before_onboarding_never_creates_shadow() {
    let monitor = FleetMonitor::new(FleetConfig::default());
    let mut agent = Agent::new("early-exit");

    agent.client.interrupt_flag().store(true, Ordering::SeqCst);
    assert_eq!(agent.client.start().unwrap(), ClientState::Terminating);

    let sent: Vec<_> = std::iter::from_fn(|| agent.outbox.try_recv().ok()).collect();
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        sent[0].kind,
        MessageKind::OffboardingNotice { .. }
    ));

    for message in sent {
        monitor.receive(message);
    }
    monitor.flush().await;

    // The notice arrives for an agent the monitor never saw.
    assert!(monitor.registry().is_empty());
    let history = monitor.bus().history_for(&agent.id(), usize::MAX).await;
    assert_eq!(history.len(), 1);
    assert!(matches!(
        history[0].kind,
        FleetEventKind::EventDropped { .. }
    ));
}

#[tokio::test]
async fn test_many_agents_progress_independently() {
    let monitor = FleetMonitor::new(FleetConfig::default());
    let mut agents: Vec<Agent> = (0..24).map(|i| Agent::new(&format!("node-{i}"))).collect();
    for agent in agents.iter_mut() {
        agent.onboard(&monitor).await;
    }

    // One agent floods the monitor with deliveries it cannot accept.
    let rogue = AgentId::new("node-0");
    monitor.receive(FleetMessage::new(
        rogue.clone(),
        MessageKind::OffboardingNotice { reason: None },
    ));
    for _ in 0..50 {
        monitor.receive(FleetMessage::new(rogue.clone(), MessageKind::Heartbeat));
        monitor.receive(FleetMessage::new(rogue.clone(), MessageKind::OnboardingAck));
    }
    for agent in agents.iter_mut().skip(1) {
        agent.client.heartbeat().unwrap();
        agent.forward(&monitor);
    }
    monitor.flush().await;

    assert_eq!(shadow_state(&monitor, &rogue), Some(ShadowState::Terminating));
    for agent in agents.iter().skip(1) {
        assert_eq!(shadow_state(&monitor, &agent.id()), Some(ShadowState::Active));
    }
    let snapshots = monitor.snapshots();
    assert_eq!(snapshots.len(), 24);
    assert_eq!(snapshots[0].agent_id, rogue);
}

#[tokio::test]
async fn test_silent_agent_times_out_and_escalates() {
    let config = FleetConfig {
        heartbeat_timeout_secs: 30,
        escalate_after_missed: 3,
        ..Default::default()
    };
    let monitor = FleetMonitor::new(config);
    let mut quiet = Agent::new("quiet");
    quiet.onboard(&monitor).await;
    let mut events = monitor.subscribe();

    let shadow = monitor.registry().get(&quiet.id()).unwrap();
    for missed in 1..=3 {
        let later = shadow.silent_since() + ChronoDuration::seconds(31);
        let report = monitor.dispatcher().sweep(later).await;
        monitor.flush().await;
        assert_eq!(report.heartbeat.overdue, 1);
        assert_eq!(shadow.missed_heartbeats(), missed);
    }

    assert_eq!(shadow.state(), ShadowState::Inactive);
    assert_eq!(shadow.max_observed_level(), Severity::Error);
    assert_eq!(shadow.overall_health(), Health::Red);

    let mut saw_red = false;
    while let Ok(event) = events.try_recv() {
        if event.agent_id == quiet.id()
            && event.kind
                == (FleetEventKind::HealthChanged {
                    from: Health::Yellow,
                    to: Health::Red,
                })
        {
            saw_red = true;
        }
    }
    assert!(saw_red);

    // A heartbeat brings it back and forgives the escalation.
    quiet.client.heartbeat().unwrap();
    quiet.forward(&monitor);
    monitor.flush().await;
    assert_eq!(shadow.state(), ShadowState::Active);
    assert_eq!(shadow.overall_health(), Health::Green);
}

#[tokio::test]
async fn test_optional_agent_capped_at_yellow() {
    let mut config = FleetConfig::default();
    config
        .necessity
        .insert(AgentId::new("sensor"), Necessity::Optional);
    let monitor = FleetMonitor::new(config);
    let mut sensor = Agent::new("sensor");
    sensor.onboard(&monitor).await;

    sensor
        .client
        .log(Severity::Critical, "calibration lost")
        .unwrap();
    sensor.forward(&monitor);
    monitor.flush().await;

    let shadow = monitor.registry().get(&sensor.id()).unwrap();
    assert_eq!(shadow.log_health(), Health::Red);
    assert_eq!(shadow.overall_health(), Health::Yellow);
}

#[tokio::test]
async fn test_terminated_agent_evicted_and_can_return() {
    let config = FleetConfig {
        eviction_after_secs: 60,
        ..Default::default()
    };
    let monitor = FleetMonitor::new(config);
    let mut agent = Agent::new("worker");
    agent.onboard(&monitor).await;
    agent.client.shutdown().unwrap();
    agent.forward(&monitor);
    monitor.flush().await;

    let report = monitor
        .dispatcher()
        .sweep(Utc::now() + ChronoDuration::seconds(120))
        .await;
    assert_eq!(report.evicted, vec![agent.id()]);
    assert!(monitor.registry().is_empty());

    // Same id, new process.
    let mut again = Agent::new("worker");
    again.onboard(&monitor).await;
    assert_eq!(shadow_state(&monitor, &again.id()), Some(ShadowState::Active));

    monitor.dispatch(Delivery::Timeout(again.id()));
    monitor.flush().await;
    assert_eq!(
        shadow_state(&monitor, &again.id()),
        Some(ShadowState::Inactive)
    );
}
