//! Client-side engine for the obs-websocket v5 protocol.
//!
//! [`Engine`] owns one session over an injected [`Transport`]: it runs the
//! Hello / Identify handshake, correlates requests and batches with their
//! responses, and hands out shared, reference-counted event streams.

pub mod batch;
pub mod cache;
pub mod catalog;
pub mod codec;
pub mod config;
mod demux;
pub mod engine;
pub mod error;
mod events;
pub mod handshake;
pub mod model;
pub mod protocol;
mod request;
pub mod state;
pub mod status;
pub mod store;
pub mod transport;

pub use batch::{BatchOutcome, BatchRequest, BatchResults};
pub use cache::{CacheKey, CacheStats, Subscription};
pub use catalog::{DecodedEvent, Event, PayloadRegistry, Request};
pub use codec::WireEncoding;
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, EngineResult};
pub use protocol::{EventSubscription, ExecutionType, OpCode};
pub use state::{ConnectionParams, ConnectionState, HandshakeState, Scheme};
pub use status::StatusProbe;
pub use store::{ConnectionStore, FileStore, MemoryStore};
pub use transport::{Transport, WebSocketTransport};
