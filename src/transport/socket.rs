use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{EventSink, Transport, TransportEvent, TransportKind};
use crate::api::messages::{StatusEvent, TranscriptionResponse};
use crate::api::protocol::{self, Frame, EVENT_STATUS, EVENT_TRANSCRIPTION_UPDATE};
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = Arc<Mutex<SplitSink<WsStream, Message>>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Push transport over a WebSocket
pub struct SocketTransport {
    url: String,
    handshake_token: String,
    writer: Option<WsWriter>,
    reader: Option<JoinHandle<()>>,
}

impl SocketTransport {
    pub fn new(url: String, handshake_token: String) -> Self {
        Self {
            url,
            handshake_token,
            writer: None,
            reader: None,
        }
    }
}

#[async_trait::async_trait]
impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn name(&self) -> &str {
        "socket"
    }

    async fn open(&mut self, sink: EventSink) -> Result<(), TransportError> {
        info!("Connecting push channel at {}", self.url);

        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (writer, reader) = stream.split();
        let writer = Arc::new(Mutex::new(writer));
        self.writer = Some(Arc::clone(&writer));

        let token = self.handshake_token.clone();
        self.send(&token)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        self.reader = Some(tokio::spawn(read_loop(reader, writer, sink)));

        info!("Push channel connected");
        Ok(())
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let writer = self.writer.as_ref().ok_or(TransportError::Disconnected)?;
        writer
            .lock()
            .await
            .send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|_| TransportError::Disconnected)
    }

    fn activate(&mut self) {
        debug!("Push channel active, updates arrive without a timer");
    }

    async fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        if let Some(writer) = self.writer.take() {
            let mut writer = writer.lock().await;
            let closed = tokio::time::timeout(CLOSE_TIMEOUT, async {
                match writer.send(Message::Close(None)).await {
                    Ok(()) => writer.close().await,
                    Err(e) => Err(e),
                }
            })
            .await;

            match closed {
                Ok(Ok(())) => debug!("Push channel closed"),
                Ok(Err(e)) => debug!("Push channel already gone: {}", e),
                Err(_) => warn!("Push channel did not close within {:?}", CLOSE_TIMEOUT),
            }
        }
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn read_loop(
    mut reader: SplitStream<WsStream>,
    writer: WsWriter,
    sink: EventSink,
) {
    while let Some(msg) = reader.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if !handle_text(text.as_str(), &writer, &sink).await {
                    break;
                }
            }
            Ok(Message::Close(frame)) => {
                debug!("Server closed push channel: {:?}", frame);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Push channel read failed: {}", e);
                sink.emit(TransportEvent::Error(e.to_string())).await;
                break;
            }
        }
    }

    sink.emit(TransportEvent::Closed).await;
}

/// Returns false when the server ended the conversation
async fn handle_text(text: &str, writer: &WsWriter, sink: &EventSink) -> bool {
    let frame = match protocol::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            return sink
                .emit(TransportEvent::FetchFailed(format!("undecodable push frame: {}", e)))
                .await;
        }
    };

    match frame {
        Frame::Event { name, payload } if name == EVENT_TRANSCRIPTION_UPDATE => {
            let event = match serde_json::from_value::<TranscriptionResponse>(payload) {
                Ok(update) => TransportEvent::Fragment(update.into_fragment()),
                Err(e) => TransportEvent::FetchFailed(format!("bad {} payload: {}", EVENT_TRANSCRIPTION_UPDATE, e)),
            };
            sink.emit(event).await
        }
        Frame::Event { name, payload } if name == EVENT_STATUS => {
            let message = serde_json::from_value::<StatusEvent>(payload)
                .map(|s| s.message)
                .unwrap_or_default();
            sink.emit(TransportEvent::Status(message)).await
        }
        Frame::Event { name, .. } => {
            debug!("Ignoring push event {}", name);
            true
        }
        Frame::Ping => {
            let pong = Message::Text(Frame::Pong.encode().into());
            if let Err(e) = writer.lock().await.send(pong).await {
                debug!("Failed to answer ping: {}", e);
            }
            true
        }
        Frame::Connect => {
            debug!("Push channel handshake acknowledged");
            true
        }
        Frame::Disconnect | Frame::Close => false,
        other => {
            debug!("Ignoring push frame {:?}", other);
            true
        }
    }
}
