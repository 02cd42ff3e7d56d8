//! WebSocket connector on tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use sessionkit_core::error::TransportError;
use sessionkit_core::{SocketConnector, SocketEvent, WebSocket};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};
use url::Url;

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn ws_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    TransportError::WebSocket {
        message: err.to_string(),
    }
}

/// Opens `ws://` and `wss://` connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SocketConnector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn WebSocket>, TransportError> {
        // The query string carries the access token.
        debug!(host = url.host_str(), path = url.path(), "Opening WebSocket");

        let (stream, response) = connect_async(url.as_str()).await.map_err(ws_error)?;
        debug!(status = %response.status(), "WebSocket connected");

        Ok(Box::new(TungsteniteSocket { stream }))
    }
}

/// An open tokio-tungstenite connection.
pub struct TungsteniteSocket {
    stream: Stream,
}

#[async_trait]
impl WebSocket for TungsteniteSocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(ws_error)
    }

    async fn next_event(&mut self) -> SocketEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    trace!(bytes = text.len(), "Received text frame");
                    return SocketEvent::Text(text.as_str().to_owned());
                }
                Some(Ok(Message::Binary(data))) => {
                    trace!(bytes = data.len(), "Ignoring binary frame");
                }
                Some(Ok(Message::Ping(_))) => {
                    // Pong is queued by tungstenite and flushed on the next write.
                    trace!("Received ping");
                }
                Some(Ok(Message::Pong(_))) => {
                    trace!("Received pong");
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Close frame received");
                    return match frame {
                        Some(frame) => SocketEvent::Closed {
                            code: Some(u16::from(frame.code)),
                            reason: frame.reason.to_string(),
                        },
                        None => SocketEvent::Closed {
                            code: None,
                            reason: String::new(),
                        },
                    };
                }
                Some(Ok(Message::Frame(_))) => {
                    // Raw frame, ignore
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    return SocketEvent::Closed {
                        code: None,
                        reason: e.to_string(),
                    };
                }
                None => {
                    return SocketEvent::Closed {
                        code: None,
                        reason: "connection ended".to_string(),
                    };
                }
            }
        }
    }

    async fn close(&mut self, code: u16) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        self.stream.close(Some(frame)).await.map_err(ws_error)
    }
}
