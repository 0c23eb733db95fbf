//! Agent client — the agent's own view of its lifecycle.
//!
//! ```text
//! Onboarding --onboarding_complete--> Running
//!     |                                  |
//!     +------ sigint / shutdown ---------+--> Terminating
//! ```
//!
//! Entering Onboarding sends an onboarding request, unless the process was
//! interrupted before the client started, in which case the client goes
//! straight to Terminating. Entering Terminating sends the offboarding
//! notice. Send failures inside hooks are logged and never abort a
//! transition.

use crate::error::{ClientError, ClientResult};
use shadowfleet_fsm::{FsmError, Next, Outcome, State, StateMachine};
use shadowfleet_types::agent::{AgentId, ClientEvent, ClientState};
use shadowfleet_types::error::SendError;
use shadowfleet_types::health::Severity;
use shadowfleet_types::message::{FleetMessage, MessageKind, Messenger, PROTOCOL_VERSION};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const TRANSITIONS: [(ClientState, ClientEvent, ClientState); 5] = [
    (
        ClientState::Onboarding,
        ClientEvent::OnboardingComplete,
        ClientState::Running,
    ),
    (
        ClientState::Onboarding,
        ClientEvent::Sigint,
        ClientState::Terminating,
    ),
    (
        ClientState::Onboarding,
        ClientEvent::ShutdownRequested,
        ClientState::Terminating,
    ),
    (
        ClientState::Running,
        ClientEvent::Sigint,
        ClientState::Terminating,
    ),
    (
        ClientState::Running,
        ClientEvent::ShutdownRequested,
        ClientState::Terminating,
    ),
];

/// What the client's hooks need to talk to the monitor.
struct Outbox {
    agent_id: AgentId,
    messenger: Arc<dyn Messenger>,
    interrupted: Arc<AtomicBool>,
}

impl Outbox {
    fn send(&self, kind: MessageKind) -> Result<(), SendError> {
        self.messenger
            .send(FleetMessage::new(self.agent_id.clone(), kind))
    }

    /// Send from a hook: failures are logged, not returned.
    fn announce(&self, kind: MessageKind) {
        let label = message_label(&kind);
        match self.send(kind) {
            Ok(()) => debug!(agent = %self.agent_id, message = label, "Sent"),
            Err(e) => warn!(
                agent = %self.agent_id,
                message = label,
                error = %e,
                "Failed to send lifecycle message"
            ),
        }
    }
}

fn message_label(kind: &MessageKind) -> &'static str {
    match kind {
        MessageKind::OnboardingRequest { .. } => "onboarding_request",
        MessageKind::OnboardingAck => "onboarding_ack",
        MessageKind::Heartbeat => "heartbeat",
        MessageKind::OffboardingNotice { .. } => "offboarding_notice",
        MessageKind::Log { .. } => "log",
    }
}

/// Hooks for the three client states.
enum ClientNode {
    Onboarding,
    Running,
    Terminating,
}

impl State for ClientNode {
    type Id = ClientState;
    type Event = ClientEvent;
    type Context = Outbox;

    fn on_entry(&mut self, outbox: &mut Outbox) -> Next<ClientEvent> {
        match self {
            ClientNode::Onboarding => {
                if outbox.interrupted.load(Ordering::SeqCst) {
                    info!(agent = %outbox.agent_id, "Interrupted before onboarding");
                    return Next::Fire(ClientEvent::Sigint);
                }
                outbox.announce(MessageKind::OnboardingRequest {
                    protocol_version: PROTOCOL_VERSION,
                });
            }
            ClientNode::Running => {
                info!(agent = %outbox.agent_id, "Agent running");
            }
            ClientNode::Terminating => {
                let reason = if outbox.interrupted.load(Ordering::SeqCst) {
                    "interrupted"
                } else {
                    "shutdown requested"
                };
                info!(agent = %outbox.agent_id, reason, "Agent terminating");
                outbox.announce(MessageKind::OffboardingNotice {
                    reason: Some(reason.to_string()),
                });
            }
        }
        Next::Stay
    }
}

/// Lifecycle client embedded in a monitored agent.
pub struct AgentClient {
    agent_id: AgentId,
    interrupted: Arc<AtomicBool>,
    machine: StateMachine<ClientNode>,
}

impl AgentClient {
    /// Build a client with its own interrupt flag.
    pub fn new(agent_id: AgentId, messenger: Arc<dyn Messenger>) -> ClientResult<Self> {
        Self::with_interrupt_flag(agent_id, messenger, Arc::new(AtomicBool::new(false)))
    }

    /// Build a client that shares an interrupt flag with a signal handler.
    pub fn with_interrupt_flag(
        agent_id: AgentId,
        messenger: Arc<dyn Messenger>,
        interrupted: Arc<AtomicBool>,
    ) -> ClientResult<Self> {
        let mut builder = StateMachine::<ClientNode>::builder(format!("client:{agent_id}"));
        builder
            .register_state(ClientState::Onboarding, ClientNode::Onboarding)?
            .register_state(ClientState::Running, ClientNode::Running)?
            .register_state(ClientState::Terminating, ClientNode::Terminating)?;
        for (from, event, to) in TRANSITIONS {
            builder.add_transition(from, event, to)?;
        }

        let outbox = Outbox {
            agent_id: agent_id.clone(),
            messenger,
            interrupted: Arc::clone(&interrupted),
        };
        Ok(Self {
            agent_id,
            interrupted,
            machine: builder.build(outbox),
        })
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// The shared interrupt flag.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Enter Onboarding and announce the agent.
    ///
    /// Returns the state the client settled in: Terminating if it was
    /// interrupted before starting.
    pub fn start(&self) -> ClientResult<ClientState> {
        Ok(self.machine.start(ClientState::Onboarding)?.state)
    }

    pub fn fire(&self, event: ClientEvent) -> ClientResult<Outcome<ClientState, ClientEvent>> {
        Ok(self.machine.fire(event)?)
    }

    /// The monitor acknowledged onboarding.
    pub fn onboarding_complete(&self) -> ClientResult<ClientState> {
        Ok(self.fire(ClientEvent::OnboardingComplete)?.state)
    }

    /// Leave the fleet.
    pub fn shutdown(&self) -> ClientResult<ClientState> {
        Ok(self.fire(ClientEvent::ShutdownRequested)?.state)
    }

    /// Record an interrupt and terminate.
    ///
    /// Safe to call at any time: before `start` it only sets the flag, and
    /// a client that already terminated stays put.
    pub fn interrupt(&self) -> ClientResult<ClientState> {
        self.interrupted.store(true, Ordering::SeqCst);
        match self.machine.fire(ClientEvent::Sigint) {
            Ok(outcome) => Ok(outcome.state),
            Err(FsmError::NotStarted) => Ok(ClientState::Onboarding),
            Err(FsmError::UnhandledEvent { .. }) if self.state().is_terminal() => {
                Ok(ClientState::Terminating)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Send a heartbeat. Only a running client sends heartbeats.
    pub fn heartbeat(&self) -> ClientResult<()> {
        self.machine
            .inspect(|current, outbox| -> ClientResult<()> {
                match current {
                    Some(ClientState::Running) => Ok(outbox.send(MessageKind::Heartbeat)?),
                    other => Err(ClientError::NotRunning(
                        other.unwrap_or(ClientState::Onboarding),
                    )),
                }
            })
    }

    /// Forward a log record to the monitor.
    pub fn log(&self, level: Severity, message: impl Into<String>) -> ClientResult<()> {
        let message = message.into();
        self.machine
            .inspect(|current, outbox| -> ClientResult<()> {
                match current {
                    Some(state) if !state.is_terminal() => {
                        Ok(outbox.send(MessageKind::Log { level, message })?)
                    }
                    other => Err(ClientError::NotRunning(
                        other.unwrap_or(ClientState::Onboarding),
                    )),
                }
            })
    }

    /// Current state. A client that was never started reports Onboarding.
    pub fn state(&self) -> ClientState {
        self.machine.current().unwrap_or(ClientState::Onboarding)
    }

    pub fn is_started(&self) -> bool {
        self.machine.current().is_some()
    }
}

impl std::fmt::Debug for AgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentClient")
            .field("agent_id", &self.agent_id)
            .field("state", &self.state())
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}
