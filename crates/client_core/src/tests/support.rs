use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::ReviewableId,
    protocol::{CurrentPayloadResponse, PostPayload, QueuedPostPayload},
};

use crate::{
    reconciler::PayloadSource,
    transport::{ChannelBus, ChannelBusError},
    view::PageList,
};

/// Serves canned payloads and records which reviewables were fetched.
#[derive(Default)]
pub(crate) struct FakeSource {
    raw: Mutex<HashMap<ReviewableId, String>>,
    fetched: Mutex<Vec<ReviewableId>>,
}

impl FakeSource {
    pub(crate) fn with_raw(self, reviewable_id: ReviewableId, raw: &str) -> Self {
        self.raw
            .lock()
            .expect("source lock")
            .insert(reviewable_id, raw.to_string());
        self
    }

    pub(crate) fn set_raw(&self, reviewable_id: ReviewableId, raw: &str) {
        self.raw
            .lock()
            .expect("source lock")
            .insert(reviewable_id, raw.to_string());
    }

    pub(crate) fn fetched(&self) -> Vec<ReviewableId> {
        self.fetched.lock().expect("source lock").clone()
    }
}

#[async_trait]
impl PayloadSource for FakeSource {
    async fn current_payload(&self, reviewable_id: ReviewableId) -> Result<CurrentPayloadResponse> {
        self.fetched.lock().expect("source lock").push(reviewable_id);
        let raw = self
            .raw
            .lock()
            .expect("source lock")
            .get(&reviewable_id)
            .cloned()
            .ok_or_else(|| anyhow!("connection reset"))?;
        Ok(CurrentPayloadResponse {
            reviewable_queued_post: Some(QueuedPostPayload {
                payload: PostPayload { raw: Some(raw) },
            }),
        })
    }
}

/// Tracks which channels are live and the order of bus calls.
#[derive(Default)]
pub(crate) struct RecordingBus {
    live: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
    fail_subscribe: bool,
    unsubscribe_failures: AtomicUsize,
}

impl RecordingBus {
    pub(crate) fn failing() -> Self {
        Self {
            fail_subscribe: true,
            ..Self::default()
        }
    }

    /// A bus whose next `times` unsubscribes fail and leave the channel live.
    pub(crate) fn failing_unsubscribe(times: usize) -> Self {
        Self {
            unsubscribe_failures: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    pub(crate) fn live(&self) -> Vec<String> {
        self.live.lock().expect("bus lock").clone()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("bus lock").clone()
    }
}

#[async_trait]
impl ChannelBus for RecordingBus {
    async fn subscribe(&self, channel: &str) -> Result<(), ChannelBusError> {
        self.calls
            .lock()
            .expect("bus lock")
            .push(format!("subscribe {channel}"));
        if self.fail_subscribe {
            return Err(ChannelBusError::Closed);
        }
        self.live.lock().expect("bus lock").push(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), ChannelBusError> {
        self.calls
            .lock()
            .expect("bus lock")
            .push(format!("unsubscribe {channel}"));
        let failed = self
            .unsubscribe_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ChannelBusError::Closed);
        }
        self.live.lock().expect("bus lock").retain(|live| live != channel);
        Ok(())
    }
}

/// Five items with ids 10..=14 and bodies `body-10`..`body-14`.
pub(crate) fn five_item_page() -> PageList {
    PageList::new((10..15).map(|id| (ReviewableId(id), format!("body-{id}"))))
}
