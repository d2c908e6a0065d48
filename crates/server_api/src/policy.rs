use std::collections::BTreeSet;

use shared::domain::{ReviewableKind, UserSummary};
use storage::StoredReviewable;

/// Field paths a user may edit on one reviewable. Nested payload fields are
/// addressed as `"parent.child"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditableFields(BTreeSet<String>);

impl EditableFields {
    pub fn has(&self, path: &str) -> bool {
        self.0.contains(path)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for EditableFields {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

pub trait EditPolicy: Send + Sync {
    fn can_see(&self, actor: &UserSummary, reviewable: &StoredReviewable) -> bool;
    fn editable_for(&self, actor: &UserSummary, reviewable: &StoredReviewable) -> EditableFields;
}

/// Moderators see the whole queue and may edit the payload of pending queued
/// posts. Nothing else is editable.
pub struct ModeratorEditPolicy;

impl EditPolicy for ModeratorEditPolicy {
    fn can_see(&self, actor: &UserSummary, _reviewable: &StoredReviewable) -> bool {
        actor.moderator
    }

    fn editable_for(&self, actor: &UserSummary, reviewable: &StoredReviewable) -> EditableFields {
        if !actor.moderator || !reviewable.status.is_pending() {
            return EditableFields::default();
        }
        match reviewable.kind {
            ReviewableKind::QueuedPost => [
                "category_id",
                "payload.raw",
                "payload.title",
                "payload.tags",
            ]
            .into_iter()
            .collect(),
            ReviewableKind::FlaggedPost | ReviewableKind::User => EditableFields::default(),
        }
    }
}
