//! State machine error types.

use thiserror::Error;

/// Errors raised while building or driving a state machine.
///
/// State and event identifiers are carried in their `Debug` rendering so the
/// error type stays independent of the machine it came from.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsmError {
    /// A state id was registered twice.
    #[error("State already registered: {0}")]
    DuplicateState(String),

    /// A transition or start referenced a state that was never registered.
    #[error("Unknown state: {0}")]
    UnknownState(String),

    /// Two transitions were defined for the same (state, event) pair.
    #[error("Transition already defined for state {state} on event {event}")]
    DuplicateTransition {
        /// The source state.
        state: String,
        /// The triggering event.
        event: String,
    },

    /// The transition table has no entry for the current state and event.
    #[error("No transition from state {state} on event {event}")]
    UnhandledEvent {
        /// The state the machine was (and still is) in.
        state: String,
        /// The event that was rejected.
        event: String,
    },

    /// Entry hooks kept requesting follow-up events past the chain limit.
    #[error("Entry chain exceeded {depth} follow-up events at state {state}")]
    TransitionLoop {
        /// The state whose entry hook requested the event over the limit.
        state: String,
        /// The chain limit that was hit.
        depth: usize,
    },

    /// `fire` was called before `start`.
    #[error("State machine not started")]
    NotStarted,

    /// `start` was called twice.
    #[error("State machine already started")]
    AlreadyStarted,

    /// A previous transition loop stopped this machine for good.
    #[error("State machine halted after a transition loop")]
    Halted,
}

/// Alias for state machine results.
pub type FsmResult<T> = Result<T, FsmError>;
