use serde_json::{Map, Value};
use shared::{
    domain::{ReviewableId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{UpdateNotification, UpdateReviewableResponse},
};
use storage::CasOutcome;
use tracing::{info, warn};

use crate::{
    ensure_claim, internal, load_visible, policy::EditableFields, registry::merge_fields,
    ApiContext,
};

/// Applies field edits to a pending reviewable under an optimistic lock on
/// its version. On success the stored version is `expected_version + 1` and,
/// when the reviewable belongs to a topic, one edit notification goes out on
/// that topic's channel after the write committed.
pub async fn update_reviewable(
    ctx: &ApiContext,
    user_id: UserId,
    reviewable_id: ReviewableId,
    expected_version: i64,
    edits: Map<String, Value>,
) -> Result<UpdateReviewableResponse, ApiError> {
    let (actor, reviewable) = load_visible(ctx, user_id, reviewable_id).await?;
    ensure_claim(ctx, &actor, &reviewable)?;

    let editable = ctx.policy.editable_for(&actor, &reviewable);
    if editable.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            "you are not allowed to edit this reviewable",
        ));
    }
    ensure_all_editable(&editable, &edits)?;

    if reviewable.version != expected_version {
        info!(
            reviewable_id = reviewable_id.0,
            expected_version,
            stored_version = reviewable.version,
            "rejecting reviewable update with stale version"
        );
        return Err(ApiError::conflict());
    }

    let errors = ctx.registry.validate_edits(reviewable.kind, &edits);
    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    let merged = merge_fields(&reviewable.fields, &edits);
    let outcome = ctx
        .storage
        .update_fields_if_version(reviewable_id, expected_version, &merged)
        .await
        .map_err(internal)?;
    let version = match outcome {
        CasOutcome::Committed { version } => version,
        CasOutcome::VersionMismatch => {
            warn!(
                reviewable_id = reviewable_id.0,
                expected_version, "lost reviewable update race"
            );
            return Err(ApiError::conflict());
        }
    };

    info!(
        reviewable_id = reviewable_id.0,
        user_id = actor.user_id.0,
        version,
        "reviewable updated"
    );
    if let Some(topic_id) = reviewable.topic_id {
        ctx.publisher
            .publish(topic_id, UpdateNotification::edit(reviewable_id));
    }

    Ok(UpdateReviewableResponse {
        fields: edits,
        version,
    })
}

fn ensure_all_editable(editable: &EditableFields, edits: &Map<String, Value>) -> Result<(), ApiError> {
    for (name, value) in edits {
        let allowed = match value {
            Value::Object(nested) => nested
                .keys()
                .all(|nested_name| editable.has(&format!("{name}.{nested_name}"))),
            _ => editable.has(name),
        };
        if !allowed {
            return Err(ApiError::new(
                ErrorCode::Forbidden,
                format!("field '{name}' is not editable"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/mutator_tests.rs"]
mod tests;
