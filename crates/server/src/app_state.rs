use server_api::ApiContext;

use crate::message_bus::MessageBus;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) bus: MessageBus,
    pub(crate) max_body_bytes: usize,
}
