use shared::protocol::{ServerFrame, UpdateNotification};
use server_api::ChannelPublisher;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChannelMessage {
    pub(crate) channel: String,
    pub(crate) data: UpdateNotification,
}

impl ChannelMessage {
    pub(crate) fn into_frame(self) -> ServerFrame {
        ServerFrame::Message {
            channel: self.channel,
            data: self.data,
        }
    }
}

/// In-process fan-out of channel messages. Every websocket connection holds
/// one receiver and filters by the channels it subscribed to, so per-channel
/// order is the publish order.
#[derive(Clone)]
pub(crate) struct MessageBus {
    tx: broadcast::Sender<ChannelMessage>,
}

impl MessageBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ChannelMessage> {
        self.tx.subscribe()
    }
}

impl ChannelPublisher for MessageBus {
    fn publish_to_channel(&self, channel: &str, notification: UpdateNotification) {
        let delivered = self
            .tx
            .send(ChannelMessage {
                channel: channel.to_string(),
                data: notification,
            })
            .unwrap_or(0);
        trace!(%channel, delivered, "channel message sent");
    }
}

#[cfg(test)]
#[path = "tests/message_bus_tests.rs"]
mod tests;
