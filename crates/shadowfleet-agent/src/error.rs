//! Agent client error types.

use shadowfleet_fsm::FsmError;
use shadowfleet_types::agent::ClientState;
use shadowfleet_types::error::SendError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// The client's state machine rejected an operation.
    #[error(transparent)]
    Fsm(#[from] FsmError),

    /// The operation needs a running client.
    #[error("Agent client is not running (state: {0})")]
    NotRunning(ClientState),

    /// The messenger refused an outbound message.
    #[error(transparent)]
    Send(#[from] SendError),

    /// Installing the interrupt handler failed.
    #[error("Signal handler error: {0}")]
    Signal(#[from] std::io::Error),
}

/// Alias for client results.
pub type ClientResult<T> = Result<T, ClientError>;
