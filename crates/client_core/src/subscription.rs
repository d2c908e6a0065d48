use shared::{domain::TopicId, protocol::reviewable_update_channel};
use tracing::info;

use crate::transport::{ChannelBus, ChannelBusError};

/// What the client is looking at after a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageContext {
    /// A topic page. `None` until the topic has loaded.
    Topic(Option<TopicId>),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub topic_id: TopicId,
    pub channel: String,
}

/// Keeps the client subscribed to the update channel of the topic on screen
/// and to nothing else.
pub struct SubscriptionManager<B> {
    bus: B,
    current: Option<ChannelHandle>,
}

impl<B: ChannelBus> SubscriptionManager<B> {
    pub fn new(bus: B) -> Self {
        Self { bus, current: None }
    }

    pub fn current(&self) -> Option<&ChannelHandle> {
        self.current.as_ref()
    }

    pub fn current_channel(&self) -> Option<&str> {
        self.current.as_ref().map(|handle| handle.channel.as_str())
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Drops the previous page's subscription, then subscribes to the new
    /// page's topic if it has one. Both steps finish before this returns.
    /// If leaving the previous channel fails, its handle is kept so the next
    /// navigation retries the unsubscribe.
    pub async fn on_navigate(&mut self, page: PageContext) -> Result<(), ChannelBusError> {
        if let Some(previous) = &self.current {
            self.bus.unsubscribe(&previous.channel).await?;
            info!(topic_id = previous.topic_id.0, channel = %previous.channel, "left update channel");
            self.current = None;
        }

        let PageContext::Topic(Some(topic_id)) = page else {
            return Ok(());
        };
        let channel = reviewable_update_channel(topic_id);
        self.bus.subscribe(&channel).await?;
        info!(topic_id = topic_id.0, %channel, "joined update channel");
        self.current = Some(ChannelHandle { topic_id, channel });
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/subscription_tests.rs"]
mod tests;
