//! Monitoring kernel for the shadowfleet agent monitor.
//!
//! Keeps one [`shadow::AgentShadow`] per remote agent, routes incoming
//! messages and heartbeat timeouts to them through per-agent dispatch lanes,
//! and publishes what changed on the [`event_bus::EventBus`].

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event_bus;
pub mod heartbeat;
pub mod monitor;
pub mod registry;
pub mod shadow;

pub use dispatcher::{Delivery, Dispatcher};
pub use error::{KernelError, KernelResult};
pub use monitor::FleetMonitor;
