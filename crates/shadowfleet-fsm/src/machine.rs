//! State machine runtime: builder, transition table and hook dispatch.

use crate::error::{FsmError, FsmResult};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, trace};

/// Maximum number of follow-up events a single `start`/`fire` may chain
/// through entry hooks before the machine is considered stuck in a loop.
pub const MAX_CHAIN_DEPTH: usize = 16;

/// What an entry hook asks the engine to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next<E> {
    /// Remain in the entered state.
    Stay,
    /// Immediately process this event from the entered state.
    Fire(E),
}

/// Hooks of a state.
///
/// A machine holds one concrete `State` type; machines with several kinds
/// of state use an enum and match on it, so dispatch stays static.
pub trait State {
    /// Identifier states are registered under.
    type Id: Copy + Eq + Hash + Debug;
    /// Events that drive transitions.
    type Event: Copy + Eq + Hash + Debug;
    /// Data shared by all hooks of the machine.
    type Context;

    /// Called after the machine switched to this state.
    fn on_entry(&mut self, _ctx: &mut Self::Context) -> Next<Self::Event> {
        Next::Stay
    }

    /// Called before the machine leaves this state.
    fn on_exit(&mut self, _ctx: &mut Self::Context) {}
}

/// One resolved table lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop<I, E> {
    pub from: I,
    pub event: E,
    pub to: I,
}

impl<I: PartialEq, E> Hop<I, E> {
    /// Self-transitions run no hooks.
    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }
}

/// Result of a `start` or `fire` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<I, E> {
    /// State the machine ended in.
    pub state: I,
    /// Every table lookup performed, including follow-up events.
    pub hops: Vec<Hop<I, E>>,
}

impl<I: PartialEq, E> Outcome<I, E> {
    /// Whether at least one hop moved to a different state.
    pub fn changed(&self) -> bool {
        self.hops.iter().any(|h| !h.is_self_loop())
    }
}

/// Assembles states and transitions; the table is frozen by [`build`](Self::build).
pub struct StateMachineBuilder<S: State> {
    name: String,
    states: HashMap<S::Id, S>,
    table: HashMap<(S::Id, S::Event), S::Id>,
}

impl<S: State> StateMachineBuilder<S> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: HashMap::new(),
            table: HashMap::new(),
        }
    }

    /// Register a state under `id`.
    pub fn register_state(&mut self, id: S::Id, state: S) -> FsmResult<&mut Self> {
        match self.states.entry(id) {
            Entry::Occupied(_) => Err(FsmError::DuplicateState(format!("{id:?}"))),
            Entry::Vacant(slot) => {
                slot.insert(state);
                Ok(self)
            }
        }
    }

    /// Map `(from, event)` to `to`. Both states must already be registered.
    pub fn add_transition(
        &mut self,
        from: S::Id,
        event: S::Event,
        to: S::Id,
    ) -> FsmResult<&mut Self> {
        for id in [from, to] {
            if !self.states.contains_key(&id) {
                return Err(FsmError::UnknownState(format!("{id:?}")));
            }
        }
        match self.table.entry((from, event)) {
            Entry::Occupied(_) => Err(FsmError::DuplicateTransition {
                state: format!("{from:?}"),
                event: format!("{event:?}"),
            }),
            Entry::Vacant(slot) => {
                slot.insert(to);
                Ok(self)
            }
        }
    }

    /// Freeze the table and hand the hooks their context.
    pub fn build(self, context: S::Context) -> StateMachine<S> {
        StateMachine {
            name: self.name,
            inner: Mutex::new(Inner {
                states: self.states,
                table: self.table,
                current: None,
                context,
                halted: false,
            }),
        }
    }
}

/// A running state machine instance.
pub struct StateMachine<S: State> {
    /// Label used in log output.
    name: String,
    inner: Mutex<Inner<S>>,
}

struct Inner<S: State> {
    states: HashMap<S::Id, S>,
    table: HashMap<(S::Id, S::Event), S::Id>,
    current: Option<S::Id>,
    context: S::Context,
    halted: bool,
}

impl<S: State> StateMachine<S> {
    pub fn builder(name: impl Into<String>) -> StateMachineBuilder<S> {
        StateMachineBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Inner<S>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state, `None` before `start`.
    pub fn current(&self) -> Option<S::Id> {
        self.lock().current
    }

    pub fn is_halted(&self) -> bool {
        self.lock().halted
    }

    /// Whether the table has an entry for the current state and `event`.
    pub fn accepts(&self, event: S::Event) -> bool {
        let inner = self.lock();
        match inner.current {
            Some(current) => inner.table.contains_key(&(current, event)),
            None => false,
        }
    }

    /// Run `f` on the hook context, serialized with transitions.
    pub fn with_context<R>(&self, f: impl FnOnce(&mut S::Context) -> R) -> R {
        let mut inner = self.lock();
        f(&mut inner.context)
    }

    /// Read the current state and the context under one lock.
    pub fn inspect<R>(&self, f: impl FnOnce(Option<S::Id>, &S::Context) -> R) -> R {
        let inner = self.lock();
        f(inner.current, &inner.context)
    }

    /// Enter `initial` and run its entry hook, following any requested events.
    pub fn start(&self, initial: S::Id) -> FsmResult<Outcome<S::Id, S::Event>> {
        let mut inner = self.lock();
        if inner.halted {
            return Err(FsmError::Halted);
        }
        if inner.current.is_some() {
            return Err(FsmError::AlreadyStarted);
        }
        if !inner.states.contains_key(&initial) {
            return Err(FsmError::UnknownState(format!("{initial:?}")));
        }

        inner.current = Some(initial);
        debug!(machine = %self.name, state = ?initial, "State machine started");

        let mut outcome = Outcome {
            state: initial,
            hops: Vec::new(),
        };
        let next = inner.enter(initial);
        inner.follow(&self.name, next, &mut outcome)?;
        Ok(outcome)
    }

    /// Process one event.
    ///
    /// On `UnhandledEvent` the current state is unchanged. If a follow-up
    /// event requested by an entry hook is rejected, the hops before it stay
    /// applied.
    pub fn fire(&self, event: S::Event) -> FsmResult<Outcome<S::Id, S::Event>> {
        let mut inner = self.lock();
        if inner.halted {
            return Err(FsmError::Halted);
        }
        let current = inner.current.ok_or(FsmError::NotStarted)?;

        let mut outcome = Outcome {
            state: current,
            hops: Vec::new(),
        };
        let next = inner.step(&self.name, event, &mut outcome)?;
        inner.follow(&self.name, next, &mut outcome)?;
        Ok(outcome)
    }
}

impl<S: State> Inner<S> {
    fn enter(&mut self, id: S::Id) -> Next<S::Event> {
        let Inner {
            states, context, ..
        } = self;
        match states.get_mut(&id) {
            Some(state) => state.on_entry(context),
            None => Next::Stay,
        }
    }

    fn exit(&mut self, id: S::Id) {
        let Inner {
            states, context, ..
        } = self;
        if let Some(state) = states.get_mut(&id) {
            state.on_exit(context);
        }
    }

    fn step(
        &mut self,
        name: &str,
        event: S::Event,
        outcome: &mut Outcome<S::Id, S::Event>,
    ) -> FsmResult<Next<S::Event>> {
        let from = self.current.ok_or(FsmError::NotStarted)?;
        let to = match self.table.get(&(from, event)) {
            Some(to) => *to,
            None => {
                return Err(FsmError::UnhandledEvent {
                    state: format!("{from:?}"),
                    event: format!("{event:?}"),
                })
            }
        };

        outcome.hops.push(Hop { from, event, to });
        outcome.state = to;

        if to == from {
            trace!(machine = %name, state = ?from, event = ?event, "Self-transition");
            return Ok(Next::Stay);
        }

        self.exit(from);
        self.current = Some(to);
        debug!(machine = %name, from = ?from, to = ?to, event = ?event, "State transition");
        Ok(self.enter(to))
    }

    fn follow(
        &mut self,
        name: &str,
        mut next: Next<S::Event>,
        outcome: &mut Outcome<S::Id, S::Event>,
    ) -> FsmResult<()> {
        let mut depth = 0;
        while let Next::Fire(event) = next {
            depth += 1;
            if depth > MAX_CHAIN_DEPTH {
                self.halted = true;
                let state = format!("{:?}", outcome.state);
                error!(
                    machine = %name,
                    state = %state,
                    depth = MAX_CHAIN_DEPTH,
                    "Entry hooks keep requesting events, halting state machine"
                );
                return Err(FsmError::TransitionLoop {
                    state,
                    depth: MAX_CHAIN_DEPTH,
                });
            }
            next = self.step(name, event, outcome)?;
        }
        Ok(())
    }
}
