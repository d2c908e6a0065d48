use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    domain::{ReviewableId, ReviewableKind, ReviewableStatus, TopicId, UserId},
    error::ApiError,
};

pub const REVIEWABLE_UPDATE_CHANNEL_PREFIX: &str = "/reviewable-update/";

pub fn reviewable_update_channel(topic_id: TopicId) -> String {
    format!("{REVIEWABLE_UPDATE_CHANNEL_PREFIX}{}", topic_id.0)
}

pub fn topic_for_channel(channel: &str) -> Option<TopicId> {
    channel
        .strip_prefix(REVIEWABLE_UPDATE_CHANNEL_PREFIX)
        .and_then(|id| id.parse::<i64>().ok())
        .map(TopicId)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    Edit,
    Delete,
}

/// Announces that a reviewable changed. Edits carry no payload; subscribers
/// fetch the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNotification {
    pub action: UpdateAction,
    pub reviewable_id: ReviewableId,
}

impl UpdateNotification {
    pub fn edit(reviewable_id: ReviewableId) -> Self {
        Self {
            action: UpdateAction::Edit,
            reviewable_id,
        }
    }

    pub fn delete(reviewable_id: ReviewableId) -> Self {
        Self {
            action: UpdateAction::Delete,
            reviewable_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewableSummary {
    pub reviewable_id: ReviewableId,
    pub kind: ReviewableKind,
    pub status: ReviewableStatus,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<TopicId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<UserId>,
    pub fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateReviewableRequest {
    #[serde(default)]
    pub reviewable: Map<String, Value>,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateReviewableResponse {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformRequest {
    pub version: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_to: Option<ReviewableStatus>,
    pub version: i64,
    #[serde(default)]
    pub remove_reviewable_ids: Vec<ReviewableId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CurrentPayloadResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewable_queued_post: Option<QueuedPostPayload>,
}

impl CurrentPayloadResponse {
    /// The raw body, if the server returned a non-empty one.
    pub fn raw(&self) -> Option<&str> {
        self.reviewable_queued_post
            .as_ref()
            .and_then(|post| post.payload.raw.as_deref())
            .filter(|raw| !raw.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueuedPostPayload {
    pub payload: PostPayload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PostPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Acknowledges a subscribe frame; messages on `channel` follow from here.
    Subscribed { channel: String },
    Unsubscribed { channel: String },
    Message {
        channel: String,
        data: UpdateNotification,
    },
    Error(ApiError),
}
