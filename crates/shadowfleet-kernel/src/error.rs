//! Kernel-specific error types.

use shadowfleet_fsm::FsmError;
use shadowfleet_types::agent::{AgentId, ShadowState};
use shadowfleet_types::error::ConfigError;
use thiserror::Error;

/// Kernel error type wrapping state machine and config errors with
/// registry context.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A shadow's state machine rejected an operation.
    #[error(transparent)]
    Fsm(#[from] FsmError),

    /// The configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No shadow exists for this agent.
    #[error("Agent not found: {0}")]
    UnknownAgent(AgentId),

    /// The registry is at its configured capacity.
    #[error("Registry full: {0} agents tracked")]
    RegistryFull(usize),

    /// Only terminated shadows may be evicted.
    #[error("Agent {agent} cannot be evicted in state {state}")]
    EvictionRefused { agent: AgentId, state: ShadowState },

    /// The agent speaks a protocol version this monitor does not.
    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocol(u32),
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;
