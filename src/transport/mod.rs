//! The socket the engine talks through.
//!
//! The engine never owns a socket directly. It is handed an
//! `Arc<dyn Transport>` and only ever calls `connect`, `send` and
//! `disconnect` on it; everything the socket produces comes back as a
//! stream of [`TransportEvent`]s.

mod websocket;

#[cfg(test)]
pub(crate) mod mock;

pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Where to connect and which subprotocol to ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub subprotocol: String,
}

/// One outbound websocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected { subprotocol: Option<String> },
    Disconnected { code: Option<u16>, reason: String },
    Text(String),
    Data(Vec<u8>),
}

/// Events of one opened connection. The sender side is dropped when the
/// socket goes away, after a final `Disconnected` where one is known.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport is not connected")]
    NotConnected,
    #[error("send failed: {0}")]
    Send(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<TransportEvents, TransportError>;

    async fn send(&self, frame: Frame) -> Result<(), TransportError>;

    async fn disconnect(&self, code: u16, reason: &str) -> Result<(), TransportError>;
}
