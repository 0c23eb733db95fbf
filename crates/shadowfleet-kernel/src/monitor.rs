//! Fleet monitor — owns the registry, bus and dispatcher, and runs the
//! timeout sweeper until shutdown.

use crate::dispatcher::{Delivery, Dispatcher, SweepReport};
use crate::event_bus::EventBus;
use crate::registry::ShadowRegistry;
use crate::shadow::ShadowSnapshot;
use chrono::Utc;
use shadowfleet_types::config::FleetConfig;
use shadowfleet_types::event::FleetEvent;
use shadowfleet_types::message::FleetMessage;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// The monitoring side of the fleet.
pub struct FleetMonitor {
    config: FleetConfig,
    dispatcher: Arc<Dispatcher>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl FleetMonitor {
    pub fn new(config: FleetConfig) -> Self {
        let registry = Arc::new(ShadowRegistry::new(config.clone()));
        let bus = Arc::new(EventBus::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            dispatcher: Arc::new(Dispatcher::new(registry, bus)),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<ShadowRegistry> {
        self.dispatcher.registry()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        self.dispatcher.bus()
    }

    /// Subscribe to fleet notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.bus().subscribe()
    }

    /// Spawn the timeout sweeper. It runs every `sweep_interval_secs` until
    /// [`shutdown`](Self::shutdown) is called.
    pub fn start(&self) -> JoinHandle<()> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let mut shutdown = self.shutdown_rx.clone();
        let interval = self.config.sweep_interval();

        info!(
            interval_secs = interval.as_secs(),
            timeout_secs = self.config.heartbeat_timeout_secs,
            "Timeout sweeper started"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        info!("Timeout sweeper: shutdown signal received");
                        break;
                    }
                }
                if *shutdown.borrow() {
                    break;
                }
                let report = dispatcher.sweep(Utc::now()).await;
                debug!(
                    checked = report.heartbeat.total_checked,
                    overdue = report.heartbeat.overdue,
                    "Sweep tick"
                );
            }
        })
    }

    /// Run one sweep now.
    pub async fn sweep(&self) -> SweepReport {
        self.dispatcher.sweep(Utc::now()).await
    }

    /// Queue a message from an agent.
    pub fn receive(&self, message: FleetMessage) {
        self.dispatcher.dispatch(Delivery::Message(message));
    }

    pub fn dispatch(&self, delivery: Delivery) {
        self.dispatcher.dispatch(delivery);
    }

    /// Wait until every queued delivery has been applied.
    pub async fn flush(&self) {
        self.dispatcher.flush().await;
    }

    pub fn snapshots(&self) -> Vec<ShadowSnapshot> {
        self.registry().snapshots()
    }

    /// Stop the sweeper and close all lanes.
    pub fn shutdown(&self) {
        info!("Fleet monitor: initiating shutdown");
        let _ = self.shutdown_tx.send(true);
        self.dispatcher.shutdown();
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}
