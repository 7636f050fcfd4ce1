// crates/core/src/push/ws.rs
//! WebSocket transport built on tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use super::transport::{redact_token, ChannelEvent, CloseInfo, PushChannel, PushConnector};
use crate::error::{ChannelError, ConnectError};

/// Close code reported when the peer's close frame carried none.
const NO_STATUS_RECEIVED: u16 = 1005;

#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushChannel>, ConnectError> {
        match connect_async(url).await {
            Ok((stream, response)) => {
                debug!(status = response.status().as_u16(), "websocket handshake complete");
                Ok(Box::new(WsChannel { stream }))
            }
            Err(WsError::Http(response))
                if matches!(response.status().as_u16(), 401 | 403) =>
            {
                Err(ConnectError::Unauthorized {
                    status: response.status().as_u16(),
                })
            }
            Err(err) => Err(ConnectError::Transport {
                url: redact_token(url),
                message: err.to_string(),
            }),
        }
    }
}

pub struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushChannel for WsChannel {
    async fn send_text(&mut self, text: &str) -> Result<(), ChannelError> {
        self.stream
            .send(Message::Text(text.to_string().into()))
            .await
            .map_err(|e| ChannelError(e.to_string()))
    }

    async fn next_event(&mut self) -> ChannelEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return ChannelEvent::Frame(text.to_string()),
                Some(Ok(Message::Binary(bytes))) => {
                    return ChannelEvent::Frame(String::from_utf8_lossy(&bytes).into_owned())
                }
                Some(Ok(Message::Close(frame))) => {
                    let close = match frame {
                        Some(frame) => CloseInfo {
                            code: u16::from(frame.code),
                            reason: frame.reason.to_string(),
                            clean: true,
                        },
                        None => CloseInfo {
                            code: NO_STATUS_RECEIVED,
                            reason: String::new(),
                            clean: true,
                        },
                    };
                    return ChannelEvent::Closed(close);
                }
                // Control frames; tungstenite answers pings itself.
                Some(Ok(other)) => trace!(?other, "ignoring control frame"),
                Some(Err(err)) => return ChannelEvent::Closed(CloseInfo::abnormal(err.to_string())),
                None => return ChannelEvent::Closed(CloseInfo::abnormal("stream ended")),
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        if let Err(err) = self.stream.close(Some(frame)).await {
            debug!("close handshake failed: {err}");
        }
    }
}
