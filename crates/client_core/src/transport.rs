use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream::SplitSink, SinkExt, StreamExt};
use shared::{
    domain::UserId,
    protocol::{ClientFrame, ServerFrame, UpdateNotification},
};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{mpsc, Mutex},
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum ChannelBusError {
    #[error("invalid server url '{0}'")]
    InvalidUrl(String),
    #[error("websocket transport failed: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("channel bus is closed")]
    Closed,
}

/// A channel message delivered to this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub channel: String,
    pub notification: UpdateNotification,
}

/// Client side of the pub/sub transport.
#[async_trait]
pub trait ChannelBus: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<(), ChannelBusError>;
    async fn unsubscribe(&self, channel: &str) -> Result<(), ChannelBusError>;
}

#[async_trait]
impl<B: ChannelBus + ?Sized> ChannelBus for Arc<B> {
    async fn subscribe(&self, channel: &str) -> Result<(), ChannelBusError> {
        (**self).subscribe(channel).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), ChannelBusError> {
        (**self).unsubscribe(channel).await
    }
}

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Websocket channel bus. Channel messages arrive on the receiver returned by
/// [`WsChannelBus::connect`] in the order the server sent them.
pub struct WsChannelBus {
    writer: Mutex<WsWriter>,
}

impl WsChannelBus {
    pub async fn connect(
        server_url: &str,
        user_id: UserId,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Delivery>), ChannelBusError> {
        let url = ws_url(server_url, user_id)?;
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        info!(%url, "channel bus connected");
        let (writer, mut reader) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(msg) = reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(ServerFrame::Message { channel, data }) => {
                            let delivery = Delivery {
                                channel,
                                notification: data,
                            };
                            if tx.send(delivery).is_err() {
                                break;
                            }
                        }
                        Ok(ServerFrame::Subscribed { channel }) => {
                            debug!(%channel, "subscription acknowledged")
                        }
                        Ok(ServerFrame::Unsubscribed { channel }) => {
                            debug!(%channel, "unsubscription acknowledged")
                        }
                        Ok(ServerFrame::Error(error)) => {
                            warn!(code = ?error.code, message = %error.message, "server rejected frame")
                        }
                        Err(error) => warn!(%error, "invalid server frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        warn!(%error, "websocket receive failed");
                        break;
                    }
                }
            }
            info!("channel bus disconnected");
        });

        Ok((
            Self {
                writer: Mutex::new(writer),
            },
            rx,
        ))
    }

    async fn send_frame(&self, frame: &ClientFrame) -> Result<(), ChannelBusError> {
        let text = serde_json::to_string(frame)?;
        self.writer
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|error| match error {
                tokio_tungstenite::tungstenite::Error::ConnectionClosed
                | tokio_tungstenite::tungstenite::Error::AlreadyClosed => ChannelBusError::Closed,
                other => ChannelBusError::Transport(other),
            })
    }
}

#[async_trait]
impl ChannelBus for WsChannelBus {
    async fn subscribe(&self, channel: &str) -> Result<(), ChannelBusError> {
        self.send_frame(&ClientFrame::Subscribe {
            channel: channel.to_string(),
        })
        .await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), ChannelBusError> {
        self.send_frame(&ClientFrame::Unsubscribe {
            channel: channel.to_string(),
        })
        .await
    }
}

/// `http(s)://host[/prefix]` becomes `ws(s)://host[/prefix]/ws?user_id=..`.
pub fn ws_url(server_url: &str, user_id: UserId) -> Result<Url, ChannelBusError> {
    let invalid = || ChannelBusError::InvalidUrl(server_url.to_string());
    let mut url = Url::parse(server_url).map_err(|_| invalid())?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        _ => return Err(invalid()),
    };
    url.set_scheme(scheme).map_err(|_| invalid())?;
    let path = format!("{}/ws", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    url.query_pairs_mut()
        .append_pair("user_id", &user_id.0.to_string());
    Ok(url)
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
