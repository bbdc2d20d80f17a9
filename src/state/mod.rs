use crate::codec::WireEncoding;
use crate::protocol::EventSubscription;
use crate::transport::Endpoint;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Public connection lifecycle. `Active` is only reachable via `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Active,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Active => "active",
        };
        f.write_str(label)
    }
}

/// Finer-grained handshake progress, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    #[default]
    Disconnected,
    Connecting,
    AwaitingHello,
    AwaitingIdentified,
    Active,
}

impl HandshakeState {
    pub fn connection_state(self) -> ConnectionState {
        match self {
            HandshakeState::Disconnected => ConnectionState::Disconnected,
            HandshakeState::Active => ConnectionState::Active,
            _ => ConnectionState::Connecting,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Ws,
    Wss,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }
}

impl std::str::FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ws" => Ok(Scheme::Ws),
            "wss" => Ok(Scheme::Wss),
            other => Err(format!("unknown scheme: {other}")),
        }
    }
}

/// Everything needed to open and identify a connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub encoding: WireEncoding,
    pub event_subscriptions: EventSubscription,
}

impl ConnectionParams {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Ws,
            host: host.into(),
            port,
            password: None,
            encoding: WireEncoding::Json,
            event_subscriptions: EventSubscription::ALL,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_encoding(mut self, encoding: WireEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_event_subscriptions(mut self, mask: EventSubscription) -> Self {
        self.event_subscriptions = mask;
        self
    }

    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            url: self.url(),
            subprotocol: self.encoding.subprotocol().to_string(),
        }
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self::new("127.0.0.1", 4455)
    }
}

// Keeps the password out of logs.
impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("encoding", &self.encoding)
            .field("event_subscriptions", &self.event_subscriptions)
            .finish()
    }
}
