//! [`Frame`] adapters over a `tokio-tungstenite` WebSocket.
//!
//! Used for the speech backend sockets (client side) and for the sockets
//! the gateway accepts from its own clients (server side).

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use parley_core::error::{GatewayError, Result};

use crate::socket::{Frame, FrameSink, FrameSource, SocketPair};

/// Split a WebSocket into a [`SocketPair`].
pub fn ws_socket<S>(ws: WebSocketStream<S>) -> SocketPair
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (write, read) = ws.split();
    SocketPair {
        sink: Box::new(WsSink { write }),
        source: Box::new(WsSource { read }),
    }
}

struct WsSink<S> {
    write: SplitSink<WebSocketStream<S>, WsMessage>,
}

#[async_trait]
impl<S> FrameSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let msg = match frame {
            Frame::Text(text) => WsMessage::text(text),
            Frame::Binary(data) => WsMessage::binary(data),
        };
        self.write
            .send(msg)
            .await
            .map_err(|e| GatewayError::Resource(format!("socket send failed: {e}")))
    }

    async fn close(&mut self) -> Result<()> {
        self.write
            .close()
            .await
            .map_err(|e| GatewayError::Resource(format!("socket close failed: {e}")))
    }
}

struct WsSource<S> {
    read: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> FrameSource for WsSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Option<Result<Frame>> {
        loop {
            let msg = match self.read.next().await? {
                Ok(msg) => msg,
                Err(e) => {
                    return Some(Err(GatewayError::Resource(format!(
                        "socket read failed: {e}"
                    ))))
                }
            };
            match msg {
                WsMessage::Text(text) => return Some(Ok(Frame::Text(text.to_string()))),
                WsMessage::Binary(data) => return Some(Ok(Frame::Binary(data))),
                WsMessage::Close(_) => return None,
                // Ping/pong are answered by tungstenite itself.
                _ => continue,
            }
        }
    }
}
