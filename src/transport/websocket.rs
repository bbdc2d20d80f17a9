use super::{Endpoint, Frame, Transport, TransportError, TransportEvent, TransportEvents};
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

// Control frame payload cap (125) minus the two-byte close code.
const MAX_CLOSE_REASON: usize = 123;

/// [`Transport`] over `tokio-tungstenite`. One instance holds at most one
/// socket; connecting again replaces the previous one.
#[derive(Default)]
pub struct WebSocketTransport {
    sink: Mutex<Option<WsSink>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<TransportEvents, TransportError> {
        let mut request = endpoint
            .url
            .as_str()
            .into_client_request()
            .map_err(|err| TransportError::InvalidEndpoint(err.to_string()))?;
        let protocol = HeaderValue::from_str(&endpoint.subprotocol)
            .map_err(|err| TransportError::InvalidEndpoint(err.to_string()))?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, protocol);

        let (ws, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        let subprotocol = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        tracing::debug!(url = %endpoint.url, subprotocol = ?subprotocol, "websocket open");

        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(TransportEvent::Connected { subprotocol });
        let reader = tokio::spawn(read_loop(stream, tx));
        if let Some(previous) = self.reader.lock().await.replace(reader) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
        };
        sink.send(message)
            .await
            .map_err(|err| TransportError::Send(err.to_string()))
    }

    async fn disconnect(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        let Some(mut sink) = self.sink.lock().await.take() else {
            return Err(TransportError::NotConnected);
        };
        let close = CloseFrame {
            code: CloseCode::from(code),
            reason: close_reason(reason).to_string().into(),
        };
        let sent = sink
            .send(Message::Close(Some(close)))
            .await
            .map_err(|err| TransportError::Send(err.to_string()));
        let _ = sink.close().await;
        sent
    }
}

fn close_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

async fn read_loop(
    mut stream: futures_util::stream::SplitStream<WsStream>,
    tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let closed = loop {
        let event = match stream.next().await {
            Some(Ok(Message::Text(text))) => TransportEvent::Text(text.as_str().to_owned()),
            Some(Ok(Message::Binary(bytes))) => TransportEvent::Data(bytes.to_vec()),
            Some(Ok(Message::Close(frame))) => {
                break match frame {
                    Some(frame) => TransportEvent::Disconnected {
                        code: Some(u16::from(frame.code)),
                        reason: frame.reason.as_str().to_owned(),
                    },
                    None => TransportEvent::Disconnected {
                        code: None,
                        reason: "closed without a close frame".to_string(),
                    },
                };
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                tracing::debug!(error = %err, "websocket read failed");
                break TransportEvent::Disconnected {
                    code: None,
                    reason: err.to_string(),
                };
            }
            None => {
                break TransportEvent::Disconnected {
                    code: None,
                    reason: "connection closed".to_string(),
                }
            }
        };
        if tx.send(event).is_err() {
            return;
        }
    };
    let _ = tx.send(closed);
}
