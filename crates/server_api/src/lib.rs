use std::sync::Arc;

use serde_json::Value;
use shared::{
    domain::{ReviewableId, ReviewableKind, TopicId, UserId, UserSummary},
    error::{ApiError, ErrorCode},
    protocol::{CurrentPayloadResponse, PostPayload, QueuedPostPayload, ReviewableSummary},
};
use storage::{Storage, StoredReviewable};
use tracing::info;

mod actions;
mod mutator;
pub mod policy;
pub mod publisher;
pub mod registry;

pub use actions::perform_action;
pub use mutator::update_reviewable;
pub use policy::{EditPolicy, EditableFields, ModeratorEditPolicy};
pub use publisher::ChannelPublisher;
pub use registry::{merge_fields, ActionDefinition, ReviewableRegistry};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub publisher: Arc<dyn ChannelPublisher>,
    pub policy: Arc<dyn EditPolicy>,
    pub registry: Arc<ReviewableRegistry>,
    /// Every update or action needs the acting moderator's claim first.
    pub require_claims: bool,
}

impl ApiContext {
    pub fn new(storage: Storage, publisher: Arc<dyn ChannelPublisher>) -> Self {
        Self {
            storage,
            publisher,
            policy: Arc::new(ModeratorEditPolicy),
            registry: Arc::new(ReviewableRegistry::new()),
            require_claims: false,
        }
    }
}

pub async fn list_queue(
    ctx: &ApiContext,
    user_id: UserId,
    topic_id: Option<TopicId>,
) -> Result<Vec<ReviewableSummary>, ApiError> {
    let actor = load_actor(ctx, user_id).await?;
    let reviewables = ctx
        .storage
        .list_pending_reviewables(topic_id)
        .await
        .map_err(internal)?;
    Ok(reviewables
        .into_iter()
        .filter(|reviewable| ctx.policy.can_see(&actor, reviewable))
        .map(summarize)
        .collect())
}

/// The content a client needs to redraw an edited queued post.
pub async fn current_payload(
    ctx: &ApiContext,
    user_id: UserId,
    reviewable_id: ReviewableId,
) -> Result<CurrentPayloadResponse, ApiError> {
    let (_, reviewable) = load_visible(ctx, user_id, reviewable_id).await?;
    if reviewable.kind != ReviewableKind::QueuedPost {
        return Ok(CurrentPayloadResponse::default());
    }
    let raw = reviewable
        .fields
        .get("payload")
        .and_then(|payload| payload.get("raw"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(CurrentPayloadResponse {
        reviewable_queued_post: Some(QueuedPostPayload {
            payload: PostPayload { raw },
        }),
    })
}

pub async fn claim_reviewable(
    ctx: &ApiContext,
    user_id: UserId,
    reviewable_id: ReviewableId,
) -> Result<ReviewableSummary, ApiError> {
    let (actor, reviewable) = load_visible(ctx, user_id, reviewable_id).await?;
    if !reviewable.status.is_pending() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "reviewable has already been handled",
        ));
    }
    let claimant = ctx
        .storage
        .claim_reviewable(reviewable_id, actor.user_id)
        .await
        .map_err(internal)?;
    if claimant != actor.user_id {
        return Err(claimed_by_other());
    }
    info!(
        reviewable_id = reviewable_id.0,
        user_id = actor.user_id.0,
        "reviewable claimed"
    );
    let reviewable = load_reviewable(ctx, reviewable_id).await?;
    Ok(summarize(reviewable))
}

pub async fn release_claim(
    ctx: &ApiContext,
    user_id: UserId,
    reviewable_id: ReviewableId,
) -> Result<bool, ApiError> {
    let (actor, _) = load_visible(ctx, user_id, reviewable_id).await?;
    ctx.storage
        .release_claim(reviewable_id, actor.user_id)
        .await
        .map_err(internal)
}

pub fn summarize(reviewable: StoredReviewable) -> ReviewableSummary {
    ReviewableSummary {
        reviewable_id: reviewable.reviewable_id,
        kind: reviewable.kind,
        status: reviewable.status,
        version: reviewable.version,
        topic_id: reviewable.topic_id,
        target_id: reviewable.target_id,
        claimed_by: reviewable.claimed_by,
        fields: reviewable.fields,
        created_at: reviewable.created_at,
    }
}

async fn load_actor(ctx: &ApiContext, user_id: UserId) -> Result<UserSummary, ApiError> {
    ctx.storage
        .load_user(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "unknown user"))
}

async fn load_reviewable(
    ctx: &ApiContext,
    reviewable_id: ReviewableId,
) -> Result<StoredReviewable, ApiError> {
    ctx.storage
        .load_reviewable(reviewable_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "reviewable not found"))
}

/// Loads the acting user and the reviewable, and checks the user may see the
/// review queue at all.
async fn load_visible(
    ctx: &ApiContext,
    user_id: UserId,
    reviewable_id: ReviewableId,
) -> Result<(UserSummary, StoredReviewable), ApiError> {
    let actor = load_actor(ctx, user_id).await?;
    let reviewable = load_reviewable(ctx, reviewable_id).await?;
    if !ctx.policy.can_see(&actor, &reviewable) {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "you are not allowed to see the review queue",
        ));
    }
    Ok((actor, reviewable))
}

fn ensure_claim(
    ctx: &ApiContext,
    actor: &UserSummary,
    reviewable: &StoredReviewable,
) -> Result<(), ApiError> {
    match reviewable.claimed_by {
        Some(claimant) if claimant != actor.user_id => Err(claimed_by_other()),
        None if ctx.require_claims => Err(ApiError::new(
            ErrorCode::Forbidden,
            "reviewable must be claimed before acting",
        )),
        _ => Ok(()),
    }
}

fn claimed_by_other() -> ApiError {
    ApiError::new(
        ErrorCode::Forbidden,
        "reviewable is claimed by another moderator",
    )
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
