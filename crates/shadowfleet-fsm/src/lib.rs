//! Table-driven finite state machine engine.
//!
//! A machine is assembled with [`StateMachineBuilder`]: states are registered
//! under an id, transitions map `(state, event)` to a next state, and the
//! finished [`StateMachine`] owns the table, the states and a hook context.
//!
//! ## Semantics
//!
//! - Every `(state, event)` pair resolves to exactly one next state or the
//!   event is rejected with [`FsmError::UnhandledEvent`]. Nothing is
//!   silently ignored.
//! - Leaving a state runs its `on_exit`, entering one runs `on_entry`.
//!   An entry hook may return [`Next::Fire`] to request an immediate
//!   follow-up event, processed as a new transition before the call returns.
//! - Self-transitions are bookkeeping only and run no hooks.
//! - One transition at a time per machine: `start` and `fire` take an
//!   internal lock, and hooks only see the context, never the machine.

pub mod error;
pub mod machine;

pub use error::{FsmError, FsmResult};
pub use machine::{
    Hop, Next, Outcome, State, StateMachine, StateMachineBuilder, MAX_CHAIN_DEPTH,
};
