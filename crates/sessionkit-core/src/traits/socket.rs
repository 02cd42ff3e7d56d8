//! WebSocket capability.

use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;

/// Something that happened on an open socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A text frame.
    Text(String),
    /// The connection ended. `code` is `None` when the socket dropped without
    /// a close frame.
    Closed { code: Option<u16>, reason: String },
}

/// An open WebSocket connection.
///
/// `next_event` must be cancel-safe: the channel races it against its
/// keepalive timer and teardown signal.
#[async_trait]
pub trait WebSocket: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Waits for the next frame. Transport errors are reported as
    /// [`SocketEvent::Closed`] so the caller has a single failure path.
    async fn next_event(&mut self) -> SocketEvent;

    /// Sends a close frame with `code`.
    async fn close(&mut self, code: u16) -> Result<(), TransportError>;
}

/// Opens WebSocket connections.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn WebSocket>, TransportError>;
}
