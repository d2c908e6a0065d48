use serde_json::{Map, Value};
use shared::{
    domain::{ReviewableId, ReviewableKind, UserId},
    error::{ApiError, ErrorCode},
    protocol::{PerformResult, UpdateNotification},
};
use storage::{CasOutcome, NewActionRecord, StoredReviewable};
use tracing::{info, warn};

use crate::{ensure_claim, internal, load_visible, ApiContext};

/// Actions whose success takes a queued post out of every viewer's queue.
const QUEUE_LEAVING_ACTIONS: &[&str] = &["approve_post", "reject_post"];

/// Runs `action_id` against a reviewable under the same version lock as
/// [`crate::update_reviewable`].
///
/// A result with `success == false` carries the action's validation errors
/// and leaves the reviewable untouched.
pub async fn perform_action(
    ctx: &ApiContext,
    user_id: UserId,
    reviewable_id: ReviewableId,
    expected_version: i64,
    action_id: &str,
    params: Map<String, Value>,
) -> Result<PerformResult, ApiError> {
    let (actor, reviewable) = load_visible(ctx, user_id, reviewable_id).await?;
    ensure_claim(ctx, &actor, &reviewable)?;

    let mut args = Map::new();
    args.insert("version".into(), Value::from(expected_version));
    args.extend(ctx.registry.additional_args(reviewable.kind, &params));
    args.extend(ctx.registry.permitted_params(reviewable.kind, &params));

    let Some(action) = ctx.registry.find_action(&reviewable, action_id) else {
        return Err(invalid_action_error(&reviewable, action_id));
    };

    if reviewable.version != expected_version {
        info!(
            reviewable_id = reviewable_id.0,
            expected_version,
            stored_version = reviewable.version,
            action_id,
            "rejecting reviewable action with stale version"
        );
        return Err(ApiError::conflict());
    }

    let errors = ctx.registry.validate_action(&reviewable, &action, &args);
    if !errors.is_empty() {
        info!(
            reviewable_id = reviewable_id.0,
            action_id,
            ?errors,
            "reviewable action failed validation"
        );
        return Ok(PerformResult {
            success: false,
            transition_to: None,
            version: reviewable.version,
            remove_reviewable_ids: Vec::new(),
            errors,
        });
    }

    let outcome = ctx
        .storage
        .transition_if_version(
            reviewable_id,
            expected_version,
            action.transition_to,
            &NewActionRecord {
                action_id: action.id.to_string(),
                user_id: actor.user_id,
                args,
            },
        )
        .await
        .map_err(internal)?;
    let version = match outcome {
        CasOutcome::Committed { version } => version,
        CasOutcome::VersionMismatch => {
            warn!(
                reviewable_id = reviewable_id.0,
                expected_version, action_id, "lost reviewable action race"
            );
            return Err(ApiError::conflict());
        }
    };

    info!(
        reviewable_id = reviewable_id.0,
        user_id = actor.user_id.0,
        action_id,
        status = action.transition_to.as_str(),
        version,
        "reviewable action performed"
    );

    let result = PerformResult {
        success: true,
        transition_to: Some(action.transition_to),
        version,
        remove_reviewable_ids: vec![reviewable_id],
        errors: Vec::new(),
    };

    if reviewable.kind == ReviewableKind::QueuedPost
        && QUEUE_LEAVING_ACTIONS.contains(&action.id)
    {
        if let Some(topic_id) = reviewable.topic_id {
            ctx.publisher
                .publish(topic_id, UpdateNotification::delete(reviewable_id));
        }
    }

    Ok(result)
}

/// A handled user reviewable whose user is gone gets a not-found instead of
/// an access error, so the moderator learns the record itself has vanished.
fn invalid_action_error(reviewable: &StoredReviewable, action_id: &str) -> ApiError {
    if reviewable.kind == ReviewableKind::User
        && !reviewable.status.is_pending()
        && reviewable.target_id.is_none()
    {
        return ApiError::new(
            ErrorCode::NotFound,
            "reviewable was already handled and the user no longer exists",
        );
    }
    ApiError::new(
        ErrorCode::InvalidAction,
        format!(
            "action '{action_id}' is not valid for a {} reviewable in status {}",
            reviewable.kind.as_str(),
            reviewable.status.as_str()
        ),
    )
}

#[cfg(test)]
#[path = "tests/actions_tests.rs"]
mod tests;
