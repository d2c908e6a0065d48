use shared::domain::ReviewableId;

use crate::view::ReviewListView;

/// Positions of the reviewables on the current page, built once per page
/// load. Removals go through [`ClientListIndex::remove`] so positions stay
/// aligned with the view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientListIndex {
    ids: Vec<ReviewableId>,
}

impl ClientListIndex {
    pub fn build<V: ReviewListView + ?Sized>(view: &V) -> Self {
        Self {
            ids: view.map_item_ids(),
        }
    }

    pub fn position_of(&self, reviewable_id: ReviewableId) -> Option<usize> {
        self.ids.iter().position(|id| *id == reviewable_id)
    }

    pub fn remove(&mut self, position: usize) -> Option<ReviewableId> {
        (position < self.ids.len()).then(|| self.ids.remove(position))
    }

    pub fn ids(&self) -> &[ReviewableId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
