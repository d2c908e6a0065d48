//! Client half of the live review queue: keeps one update channel open for
//! the topic on screen and applies incoming edit/delete notifications to the
//! rendered list.

pub mod http;
pub mod list_index;
pub mod page;
pub mod reconciler;
pub mod render;
pub mod subscription;
pub mod transport;
pub mod view;

pub use http::ReviewablesClient;
pub use list_index::ClientListIndex;
pub use page::ReviewPage;
pub use reconciler::{PayloadSource, ReconcileOutcome, Reconciler};
pub use render::{ContentRenderer, MarkdownRenderer};
pub use subscription::{ChannelHandle, PageContext, SubscriptionManager};
pub use transport::{ws_url, ChannelBus, ChannelBusError, Delivery, WsChannelBus};
pub use view::{DetailItem, MapItem, PageList, ReviewListView};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
