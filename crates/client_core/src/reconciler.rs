use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::ReviewableId,
    protocol::{CurrentPayloadResponse, UpdateAction, UpdateNotification},
};
use tracing::{debug, warn};

use crate::{list_index::ClientListIndex, render::ContentRenderer, view::ReviewListView};

/// Where the reconciler fetches the authoritative content of an edited item.
#[async_trait]
pub trait PayloadSource: Send + Sync {
    async fn current_payload(&self, reviewable_id: ReviewableId) -> Result<CurrentPayloadResponse>;
}

#[async_trait]
impl<P: PayloadSource + ?Sized> PayloadSource for Arc<P> {
    async fn current_payload(&self, reviewable_id: ReviewableId) -> Result<CurrentPayloadResponse> {
        (**self).current_payload(reviewable_id).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The reviewable is not on this page.
    NotOnPage,
    /// The map item exists but its detail item does not.
    MissingDetail { position: usize },
    Replaced { position: usize },
    Removed { position: usize },
    /// The edit could not be applied; the view is unchanged.
    EditDropped { position: usize },
}

pub struct Reconciler<P, R> {
    source: P,
    renderer: R,
}

impl<P: PayloadSource, R: ContentRenderer> Reconciler<P, R> {
    pub fn new(source: P, renderer: R) -> Self {
        Self { source, renderer }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Applies one notification to the view. Callers feed notifications one
    /// at a time in delivery order; a later edit overwrites an earlier one.
    pub async fn on_notification<V: ReviewListView + ?Sized>(
        &self,
        view: &mut V,
        index: &mut ClientListIndex,
        notification: UpdateNotification,
    ) -> ReconcileOutcome {
        let reviewable_id = notification.reviewable_id;
        let Some(position) = index.position_of(reviewable_id) else {
            debug!(reviewable_id = reviewable_id.0, "notification for reviewable not on page");
            return ReconcileOutcome::NotOnPage;
        };
        if !view.has_detail_at(position) {
            warn!(
                reviewable_id = reviewable_id.0,
                position, "review list is out of sync; skipping notification"
            );
            return ReconcileOutcome::MissingDetail { position };
        }

        match notification.action {
            UpdateAction::Edit => match self.fetch_rendered(reviewable_id).await {
                Ok(Some(body)) => {
                    if view.replace_body_at(position, body) {
                        ReconcileOutcome::Replaced { position }
                    } else {
                        ReconcileOutcome::EditDropped { position }
                    }
                }
                Ok(None) => {
                    debug!(reviewable_id = reviewable_id.0, "edited reviewable has no raw content");
                    ReconcileOutcome::EditDropped { position }
                }
                Err(error) => {
                    warn!(reviewable_id = reviewable_id.0, %error, "failed to refresh edited reviewable");
                    ReconcileOutcome::EditDropped { position }
                }
            },
            UpdateAction::Delete => {
                view.remove_at(position);
                index.remove(position);
                debug!(reviewable_id = reviewable_id.0, position, "removed reviewable from page");
                ReconcileOutcome::Removed { position }
            }
        }
    }

    async fn fetch_rendered(&self, reviewable_id: ReviewableId) -> Result<Option<String>> {
        let payload = self.source.current_payload(reviewable_id).await?;
        payload
            .raw()
            .map(|raw| self.renderer.render(raw))
            .transpose()
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
