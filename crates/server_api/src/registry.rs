use std::collections::{BTreeSet, HashMap};

use serde_json::{Map, Value};
use shared::domain::{ReviewableKind, ReviewableStatus};
use storage::StoredReviewable;

const MAX_RAW_CHARS: usize = 32_000;
const MIN_TITLE_CHARS: usize = 3;
const MAX_TITLE_CHARS: usize = 255;
const MAX_REJECT_REASON_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionDefinition {
    pub id: &'static str,
    pub transition_to: ReviewableStatus,
}

const QUEUED_POST_ACTIONS: &[ActionDefinition] = &[
    ActionDefinition {
        id: "approve_post",
        transition_to: ReviewableStatus::Approved,
    },
    ActionDefinition {
        id: "reject_post",
        transition_to: ReviewableStatus::Rejected,
    },
    ActionDefinition {
        id: "delete_user",
        transition_to: ReviewableStatus::Deleted,
    },
];

const FLAGGED_POST_ACTIONS: &[ActionDefinition] = &[
    ActionDefinition {
        id: "agree_and_hide",
        transition_to: ReviewableStatus::Approved,
    },
    ActionDefinition {
        id: "disagree",
        transition_to: ReviewableStatus::Rejected,
    },
    ActionDefinition {
        id: "delete_post",
        transition_to: ReviewableStatus::Deleted,
    },
];

const USER_ACTIONS: &[ActionDefinition] = &[
    ActionDefinition {
        id: "approve_user",
        transition_to: ReviewableStatus::Approved,
    },
    ActionDefinition {
        id: "reject_user",
        transition_to: ReviewableStatus::Rejected,
    },
];

/// Per-kind behavior of reviewables: the action set, caller parameters that
/// may be forwarded to actions, and edit/action validation.
#[derive(Debug, Clone, Default)]
pub struct ReviewableRegistry {
    permitted_params: HashMap<ReviewableKind, BTreeSet<String>>,
}

impl ReviewableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_param(&mut self, kind: ReviewableKind, param: impl Into<String>) -> &mut Self {
        self.permitted_params
            .entry(kind)
            .or_default()
            .insert(param.into());
        self
    }

    pub fn actions_for(
        &self,
        kind: ReviewableKind,
        status: ReviewableStatus,
    ) -> &'static [ActionDefinition] {
        if !status.is_pending() {
            return &[];
        }
        match kind {
            ReviewableKind::QueuedPost => QUEUED_POST_ACTIONS,
            ReviewableKind::FlaggedPost => FLAGGED_POST_ACTIONS,
            ReviewableKind::User => USER_ACTIONS,
        }
    }

    pub fn find_action(
        &self,
        reviewable: &StoredReviewable,
        action_id: &str,
    ) -> Option<ActionDefinition> {
        self.actions_for(reviewable.kind, reviewable.status)
            .iter()
            .find(|action| action.id == action_id)
            .copied()
    }

    /// Arguments a kind derives from the caller's parameters on its own.
    pub fn additional_args(&self, kind: ReviewableKind, params: &Map<String, Value>) -> Map<String, Value> {
        let mut args = Map::new();
        if kind == ReviewableKind::User {
            let send_email = match params.get("send_email") {
                Some(Value::Bool(flag)) => *flag,
                Some(Value::String(flag)) => flag != "false",
                _ => true,
            };
            args.insert("send_email".into(), Value::Bool(send_email));
            if let Some(reason) = params.get("reject_reason").and_then(Value::as_str) {
                args.insert("reject_reason".into(), Value::String(reason.to_string()));
            }
        }
        args
    }

    /// The subset of `params` registered for `kind`. Everything else is
    /// dropped.
    pub fn permitted_params(&self, kind: ReviewableKind, params: &Map<String, Value>) -> Map<String, Value> {
        let Some(allowed) = self.permitted_params.get(&kind) else {
            return Map::new();
        };
        params
            .iter()
            .filter(|(key, _)| allowed.contains(key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Item-level validation of submitted edits. Returns one message per
    /// offending field.
    pub fn validate_edits(&self, kind: ReviewableKind, edits: &Map<String, Value>) -> Vec<String> {
        let mut errors = Vec::new();
        if kind != ReviewableKind::QueuedPost {
            return errors;
        }

        if let Some(category) = edits.get("category_id") {
            if !(category.is_null() || category.is_i64()) {
                errors.push("category_id must be an integer".to_string());
            }
        }

        let Some(Value::Object(payload)) = edits.get("payload") else {
            return errors;
        };
        if let Some(raw) = payload.get("raw") {
            match raw.as_str() {
                Some(raw) if raw.trim().is_empty() => {
                    errors.push("payload.raw can't be blank".to_string())
                }
                Some(raw) if raw.chars().count() > MAX_RAW_CHARS => errors.push(format!(
                    "payload.raw is too long (maximum is {MAX_RAW_CHARS} characters)"
                )),
                Some(_) => {}
                None => errors.push("payload.raw must be a string".to_string()),
            }
        }
        if let Some(title) = payload.get("title") {
            match title.as_str().map(|t| t.trim().chars().count()) {
                Some(len) if (MIN_TITLE_CHARS..=MAX_TITLE_CHARS).contains(&len) => {}
                Some(_) => errors.push(format!(
                    "payload.title must be between {MIN_TITLE_CHARS} and {MAX_TITLE_CHARS} characters"
                )),
                None => errors.push("payload.title must be a string".to_string()),
            }
        }
        if let Some(tags) = payload.get("tags") {
            let valid = tags
                .as_array()
                .is_some_and(|tags| tags.iter().all(Value::is_string));
            if !valid {
                errors.push("payload.tags must be a list of strings".to_string());
            }
        }
        errors
    }

    /// Preconditions an action checks against the current record before it
    /// commits. A non-empty result turns into a failed perform result.
    pub fn validate_action(
        &self,
        reviewable: &StoredReviewable,
        action: &ActionDefinition,
        args: &Map<String, Value>,
    ) -> Vec<String> {
        let mut errors = Vec::new();
        match (reviewable.kind, action.id) {
            (ReviewableKind::QueuedPost, "approve_post") => {
                let raw = reviewable
                    .fields
                    .get("payload")
                    .and_then(|payload| payload.get("raw"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if raw.trim().is_empty() {
                    errors.push("payload.raw can't be blank".to_string());
                }
            }
            (ReviewableKind::User, "reject_user") => {
                let too_long = args
                    .get("reject_reason")
                    .and_then(Value::as_str)
                    .is_some_and(|reason| reason.chars().count() > MAX_REJECT_REASON_CHARS);
                if too_long {
                    errors.push(format!(
                        "reject_reason is too long (maximum is {MAX_REJECT_REASON_CHARS} characters)"
                    ));
                }
            }
            _ => {}
        }
        errors
    }
}

/// Merges edits into the stored fields. Object values are merged one key at a
/// time so an edit to `payload.raw` keeps `payload.title`.
pub fn merge_fields(stored: &Map<String, Value>, edits: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = stored.clone();
    for (name, value) in edits {
        match (merged.get_mut(name), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => {
                for (key, nested_value) in nested {
                    existing.insert(key.clone(), nested_value.clone());
                }
            }
            _ => {
                merged.insert(name.clone(), value.clone());
            }
        }
    }
    merged
}
