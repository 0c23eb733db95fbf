//! In-process messenger backed by a tokio channel.

use shadowfleet_types::error::SendError;
use shadowfleet_types::message::{FleetMessage, Messenger};
use tokio::sync::mpsc;

/// Messenger that forwards every message into an unbounded channel.
///
/// Useful for wiring a client straight into a monitor in the same process,
/// and for tests.
#[derive(Debug, Clone)]
pub struct ChannelMessenger {
    tx: mpsc::UnboundedSender<FleetMessage>,
}

impl ChannelMessenger {
    /// Create a messenger and the receiver its messages arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FleetMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn from_sender(tx: mpsc::UnboundedSender<FleetMessage>) -> Self {
        Self { tx }
    }
}

impl Messenger for ChannelMessenger {
    fn send(&self, message: FleetMessage) -> Result<(), SendError> {
        self.tx.send(message).map_err(|_| SendError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadowfleet_types::agent::AgentId;
    use shadowfleet_types::message::MessageKind;

    #[test]
    fn test_send_reaches_receiver() {
        let (messenger, mut rx) = ChannelMessenger::new();
        messenger
            .send(FleetMessage::new(AgentId::new("a1"), MessageKind::Heartbeat))
            .unwrap();
        let received = rx.try_recv().unwrap();
        assert_eq!(received.kind, MessageKind::Heartbeat);
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (messenger, rx) = ChannelMessenger::new();
        drop(rx);
        let err = messenger
            .send(FleetMessage::new(AgentId::new("a1"), MessageKind::Heartbeat))
            .unwrap_err();
        assert_eq!(err, SendError::Closed);
    }
}
