use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    list_index::ClientListIndex,
    reconciler::{PayloadSource, ReconcileOutcome, Reconciler},
    render::ContentRenderer,
    subscription::SubscriptionManager,
    transport::{ChannelBus, Delivery},
    view::ReviewListView,
};

/// A loaded review list together with its position index.
pub struct ReviewPage<V> {
    view: V,
    index: ClientListIndex,
}

impl<V: ReviewListView> ReviewPage<V> {
    pub fn load(view: V) -> Self {
        let index = ClientListIndex::build(&view);
        Self { view, index }
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn index(&self) -> &ClientListIndex {
        &self.index
    }

    pub fn into_view(self) -> V {
        self.view
    }

    /// Reconciles one delivery. Deliveries for any channel other than
    /// `current_channel` belong to a page the client already left.
    pub async fn handle_delivery<P, R>(
        &mut self,
        reconciler: &Reconciler<P, R>,
        current_channel: Option<&str>,
        delivery: Delivery,
    ) -> Option<ReconcileOutcome>
    where
        P: PayloadSource,
        R: ContentRenderer,
    {
        if current_channel != Some(delivery.channel.as_str()) {
            debug!(channel = %delivery.channel, "dropping message for a channel left behind");
            return None;
        }
        Some(
            reconciler
                .on_notification(&mut self.view, &mut self.index, delivery.notification)
                .await,
        )
    }

    /// Processes deliveries one at a time until the transport closes.
    /// `on_change` runs after every delivery that reached the reconciler.
    pub async fn run<B, P, R>(
        &mut self,
        reconciler: &Reconciler<P, R>,
        subscriptions: &SubscriptionManager<B>,
        deliveries: &mut mpsc::UnboundedReceiver<Delivery>,
        mut on_change: impl FnMut(&V, ReconcileOutcome),
    ) where
        B: ChannelBus,
        P: PayloadSource,
        R: ContentRenderer,
    {
        while let Some(delivery) = deliveries.recv().await {
            let current = subscriptions.current_channel();
            if let Some(outcome) = self.handle_delivery(reconciler, current, delivery).await {
                on_change(&self.view, outcome);
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/page_tests.rs"]
mod tests;
