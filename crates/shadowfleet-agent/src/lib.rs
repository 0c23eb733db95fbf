//! Agent-side half of the shadowfleet monitor.
//!
//! An [`AgentClient`] runs inside the monitored process. It tracks the
//! process's own lifecycle and announces it to the monitor: an onboarding
//! request when it starts, an offboarding notice when it stops, and
//! heartbeats in between.

pub mod client;
pub mod error;
pub mod messenger;
pub mod signal;

pub use client::AgentClient;
pub use error::{ClientError, ClientResult};
pub use messenger::ChannelMessenger;
pub use signal::interrupt_on_ctrl_c;
