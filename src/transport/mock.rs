//! In-memory transport for tests. The test holds a [`MockServer`] and plays
//! the obs-websocket side of the conversation.

use super::{Endpoint, Frame, Transport, TransportError, TransportEvent, TransportEvents};
use crate::codec::{self, OpData, RawEnvelope, WireEncoding};
use crate::protocol::{Authentication, HelloInfo, IdentifiedInfo};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) struct MockTransport {
    inner: Mutex<MockInner>,
    accepted: mpsc::UnboundedSender<mpsc::UnboundedSender<TransportEvent>>,
    sent: mpsc::UnboundedSender<Frame>,
}

#[derive(Default)]
struct MockInner {
    peer: Option<mpsc::UnboundedSender<TransportEvent>>,
    endpoints: Vec<Endpoint>,
    closes: Vec<(u16, String)>,
    refuse: bool,
}

pub(crate) struct MockServer {
    transport: Arc<MockTransport>,
    accepted: mpsc::UnboundedReceiver<mpsc::UnboundedSender<TransportEvent>>,
    sent: mpsc::UnboundedReceiver<Frame>,
    peer: Option<mpsc::UnboundedSender<TransportEvent>>,
}

impl MockTransport {
    pub(crate) fn new() -> (Arc<MockTransport>, MockServer) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport {
            inner: Mutex::new(MockInner::default()),
            accepted: accepted_tx,
            sent: sent_tx,
        });
        let server = MockServer {
            transport: Arc::clone(&transport),
            accepted: accepted_rx,
            sent: sent_rx,
            peer: None,
        };
        (transport, server)
    }

    pub(crate) fn refuse_connections(&self) {
        self.inner.lock().unwrap().refuse = true;
    }

    pub(crate) fn endpoints(&self) -> Vec<Endpoint> {
        self.inner.lock().unwrap().endpoints.clone()
    }

    pub(crate) fn closes(&self) -> Vec<(u16, String)> {
        self.inner.lock().unwrap().closes.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<TransportEvents, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.endpoints.push(endpoint.clone());
        if inner.refuse {
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(TransportEvent::Connected {
            subprotocol: Some(endpoint.subprotocol.clone()),
        });
        inner.peer = Some(tx.clone());
        let _ = self.accepted.send(tx);
        Ok(rx)
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.inner.lock().unwrap().peer.is_none() {
            return Err(TransportError::NotConnected);
        }
        self.sent
            .send(frame)
            .map_err(|err| TransportError::Send(err.to_string()))
    }

    async fn disconnect(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.closes.push((code, reason.to_string()));
        match inner.peer.take() {
            Some(peer) => {
                let _ = peer.send(TransportEvent::Disconnected {
                    code: Some(code),
                    reason: reason.to_string(),
                });
                Ok(())
            }
            None => Err(TransportError::NotConnected),
        }
    }
}

impl MockServer {
    pub(crate) fn transport(&self) -> Arc<MockTransport> {
        Arc::clone(&self.transport)
    }

    /// Waits for the engine to open a connection.
    pub(crate) async fn accept(&mut self) {
        let peer = tokio::time::timeout(Duration::from_secs(5), self.accepted.recv())
            .await
            .expect("engine never connected")
            .expect("transport dropped");
        self.peer = Some(peer);
    }

    pub(crate) fn push(&self, data: OpData) {
        let frame = codec::encode(&data, WireEncoding::Json).unwrap();
        self.push_frame(frame);
    }

    pub(crate) fn push_msgpack(&self, data: OpData) {
        let frame = codec::encode(&data, WireEncoding::MsgPack).unwrap();
        self.push_frame(frame);
    }

    pub(crate) fn push_raw(&self, raw: RawEnvelope) {
        let frame = codec::encode_raw(&raw, WireEncoding::Json).unwrap();
        self.push_frame(frame);
    }

    pub(crate) fn push_text(&self, text: &str) {
        self.peer()
            .send(TransportEvent::Text(text.to_string()))
            .unwrap();
    }

    fn push_frame(&self, frame: Frame) {
        let event = match frame {
            Frame::Text(text) => TransportEvent::Text(text),
            Frame::Binary(bytes) => TransportEvent::Data(bytes),
        };
        self.peer().send(event).unwrap();
    }

    pub(crate) fn hello(&self, authentication: Option<Authentication>) {
        self.push(OpData::Hello(HelloInfo {
            obs_web_socket_version: "5.5.0".to_string(),
            rpc_version: 1,
            authentication,
        }));
    }

    pub(crate) fn identified(&self) {
        self.push(OpData::Identified(IdentifiedInfo {
            negotiated_rpc_version: 1,
        }));
    }

    /// Simulates the server hanging up.
    pub(crate) fn drop_connection(&mut self, code: u16, reason: &str) {
        let peer = self.peer.take().expect("no open connection");
        let _ = peer.send(TransportEvent::Disconnected {
            code: Some(code),
            reason: reason.to_string(),
        });
        self.transport.inner.lock().unwrap().peer = None;
    }

    /// Next frame the engine sent, decoded.
    pub(crate) async fn recv(&mut self) -> OpData {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.sent.recv())
            .await
            .expect("engine sent nothing")
            .expect("transport dropped");
        let raw = codec::decode_frame(&frame).unwrap();
        OpData::from_raw(&raw).unwrap()
    }

    pub(crate) async fn recv_frame(&mut self) -> Frame {
        tokio::time::timeout(Duration::from_secs(5), self.sent.recv())
            .await
            .expect("engine sent nothing")
            .expect("transport dropped")
    }

    pub(crate) fn try_recv(&mut self) -> Option<Frame> {
        self.sent.try_recv().ok()
    }

    fn peer(&self) -> &mpsc::UnboundedSender<TransportEvent> {
        self.peer.as_ref().expect("no open connection")
    }
}
