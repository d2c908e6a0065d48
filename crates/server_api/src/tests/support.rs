use std::sync::{Arc, Mutex};

use serde_json::{json, Map, Value};
use shared::{
    domain::{ReviewableId, ReviewableKind, TopicId, UserId},
    protocol::UpdateNotification,
};
use storage::{NewReviewable, Storage};

use crate::{ApiContext, ChannelPublisher};

#[derive(Default)]
pub(crate) struct RecordingPublisher {
    published: Mutex<Vec<(String, UpdateNotification)>>,
}

impl RecordingPublisher {
    pub(crate) fn published(&self) -> Vec<(String, UpdateNotification)> {
        self.published.lock().expect("publisher lock").clone()
    }
}

impl ChannelPublisher for RecordingPublisher {
    fn publish_to_channel(&self, channel: &str, notification: UpdateNotification) {
        self.published
            .lock()
            .expect("publisher lock")
            .push((channel.to_string(), notification));
    }
}

pub(crate) struct Fixture {
    pub(crate) ctx: ApiContext,
    pub(crate) publisher: Arc<RecordingPublisher>,
    pub(crate) moderator: UserId,
}

pub(crate) async fn setup() -> Fixture {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let moderator = storage.create_user("moderator", true).await.expect("user");
    let publisher = Arc::new(RecordingPublisher::default());
    let ctx = ApiContext::new(storage, publisher.clone());
    Fixture {
        ctx,
        publisher,
        moderator,
    }
}

pub(crate) fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("json object")
}

pub(crate) async fn create_reviewable(
    ctx: &ApiContext,
    kind: ReviewableKind,
    topic_id: Option<TopicId>,
    target_id: Option<i64>,
) -> ReviewableId {
    ctx.storage
        .create_reviewable(&NewReviewable {
            kind,
            topic_id,
            target_id,
            created_by: None,
            fields: object(json!({
                "title": "original",
                "payload": { "raw": "original body", "title": "Original title" }
            })),
        })
        .await
        .expect("reviewable")
}

/// Bumps the stored version to `version` through real updates.
pub(crate) async fn advance_to_version(
    ctx: &ApiContext,
    reviewable_id: ReviewableId,
    version: i64,
) {
    let stored = ctx
        .storage
        .load_reviewable(reviewable_id)
        .await
        .expect("load")
        .expect("some");
    for current in stored.version..version {
        ctx.storage
            .update_fields_if_version(reviewable_id, current, &stored.fields)
            .await
            .expect("bump");
    }
}
