use shared::{
    domain::TopicId,
    protocol::{reviewable_update_channel, UpdateNotification},
};
use tracing::debug;

/// Fire-and-forget emission of reviewable updates. Implementations deliver to
/// whoever is subscribed right now and drop the message otherwise.
pub trait ChannelPublisher: Send + Sync {
    fn publish_to_channel(&self, channel: &str, notification: UpdateNotification);

    fn publish(&self, topic_id: TopicId, notification: UpdateNotification) {
        let channel = reviewable_update_channel(topic_id);
        debug!(
            %channel,
            reviewable_id = notification.reviewable_id.0,
            action = ?notification.action,
            "publishing reviewable update"
        );
        self.publish_to_channel(&channel, notification);
    }
}
