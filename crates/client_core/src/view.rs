use serde_json::Value;
use shared::{domain::ReviewableId, protocol::ReviewableSummary};
use tracing::warn;

use crate::render::ContentRenderer;

/// What the reconciler needs from a rendered review list: ordered map items
/// tagged with reviewable ids, and detail items at the same positions whose
/// body can be replaced.
pub trait ReviewListView {
    fn map_item_ids(&self) -> Vec<ReviewableId>;
    fn has_detail_at(&self, position: usize) -> bool;
    /// Returns false when there is no detail item at `position`.
    fn replace_body_at(&mut self, position: usize, body: String) -> bool;
    /// Removes the map item and the detail item at `position`.
    fn remove_at(&mut self, position: usize);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapItem {
    pub reviewable_id: ReviewableId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailItem {
    pub reviewable_id: ReviewableId,
    pub body: String,
}

/// In-memory review list, used by the moderator CLI and in tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageList {
    map_items: Vec<MapItem>,
    detail_items: Vec<DetailItem>,
}

impl PageList {
    pub fn new(items: impl IntoIterator<Item = (ReviewableId, String)>) -> Self {
        let (map_items, detail_items) = items
            .into_iter()
            .map(|(reviewable_id, body)| (MapItem { reviewable_id }, DetailItem { reviewable_id, body }))
            .unzip();
        Self {
            map_items,
            detail_items,
        }
    }

    /// Builds the list from a queue listing, rendering each item's
    /// `payload.raw`. Items whose content does not render get an empty body.
    pub fn from_summaries(summaries: &[ReviewableSummary], renderer: &dyn ContentRenderer) -> Self {
        Self::new(summaries.iter().map(|summary| {
            let raw = summary
                .fields
                .get("payload")
                .and_then(|payload| payload.get("raw"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let body = renderer.render(raw).unwrap_or_else(|error| {
                warn!(reviewable_id = summary.reviewable_id.0, %error, "failed to render reviewable");
                String::new()
            });
            (summary.reviewable_id, body)
        }))
    }

    /// A list whose detail items lag behind its map items, as a half-rendered
    /// page would be.
    pub fn with_missing_details(mut self, keep: usize) -> Self {
        self.detail_items.truncate(keep);
        self
    }

    pub fn map_items(&self) -> &[MapItem] {
        &self.map_items
    }

    pub fn detail_items(&self) -> &[DetailItem] {
        &self.detail_items
    }

    pub fn len(&self) -> usize {
        self.map_items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map_items.is_empty()
    }
}

impl ReviewListView for PageList {
    fn map_item_ids(&self) -> Vec<ReviewableId> {
        self.map_items.iter().map(|item| item.reviewable_id).collect()
    }

    fn has_detail_at(&self, position: usize) -> bool {
        position < self.detail_items.len()
    }

    fn replace_body_at(&mut self, position: usize, body: String) -> bool {
        match self.detail_items.get_mut(position) {
            Some(detail) => {
                detail.body = body;
                true
            }
            None => false,
        }
    }

    fn remove_at(&mut self, position: usize) {
        if position < self.map_items.len() {
            self.map_items.remove(position);
        }
        if position < self.detail_items.len() {
            self.detail_items.remove(position);
        }
    }
}
