//! WebSocket transport for the live music service, built on
//! `tokio-tungstenite`.
//!
//! [`WebSocketTransport::connect`] opens the socket, sends the `setup`
//! message and spawns a reader task that decodes every inbound frame into a
//! [`ServerMessage`] and forwards it to the session's [`EventSink`].  The
//! returned [`WsSession`] serialises outbound writes through an async mutex.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::control::{WireConfig, WirePrompt};
use crate::session::transport::{
    ClientMessage, CloseInfo, EventSink, PlaybackControl, ServerMessage, Session, SessionError,
    SessionParams, Transport,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Writer = SplitSink<Socket, Message>;

// ---------------------------------------------------------------------------
// WebSocketTransport
// ---------------------------------------------------------------------------

/// Opens [`WsSession`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

/// Endpoint URL with the API key attached as a query parameter.
fn endpoint_url(params: &SessionParams) -> String {
    let sep = if params.endpoint.contains('?') { '&' } else { '?' };
    format!("{}{sep}key={}", params.endpoint, params.api_key)
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(
        &self,
        params: &SessionParams,
        sink: EventSink,
    ) -> Result<Box<dyn Session>, SessionError> {
        if params.api_key.is_empty() {
            return Err(SessionError::Connect("no API key configured".into()));
        }

        let (socket, _response) = tokio_tungstenite::connect_async(endpoint_url(params))
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        let (writer, reader) = socket.split();

        let session = WsSession {
            writer: Arc::new(Mutex::new(writer)),
            closed: Arc::new(AtomicBool::new(false)),
            reader: std::sync::Mutex::new(None),
        };
        session
            .send("setup", &ClientMessage::Setup { model: &params.model })
            .await?;

        let closed = Arc::clone(&session.closed);
        let handle = tokio::spawn(read_loop(reader, sink, closed));
        if let Ok(mut slot) = session.reader.lock() {
            *slot = Some(handle);
        }

        Ok(Box::new(session))
    }
}

// ---------------------------------------------------------------------------
// Reader task
// ---------------------------------------------------------------------------

async fn read_loop(
    mut reader: futures::stream::SplitStream<Socket>,
    sink: EventSink,
    closed: Arc<AtomicBool>,
) {
    let id = sink.session();
    while let Some(frame) = reader.next().await {
        let payload = match frame {
            Ok(Message::Text(text)) => text.into_bytes(),
            // The service sends JSON in binary frames as well.
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(frame)) => {
                closed.store(true, Ordering::SeqCst);
                let info = match frame {
                    Some(f) => CloseInfo {
                        code: Some(u16::from(f.code)),
                        reason: f.reason.into_owned(),
                        clean: true,
                    },
                    None => CloseInfo {
                        code: None,
                        reason: String::new(),
                        clean: true,
                    },
                };
                log::debug!("session: {id} received close frame {info:?}");
                sink.closed(info);
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                closed.store(true, Ordering::SeqCst);
                sink.error(e.to_string());
                return;
            }
        };

        match serde_json::from_slice::<ServerMessage>(&payload) {
            Ok(msg) => {
                if !sink.message(msg) {
                    log::debug!("session: {id} receiver gone, stopping reader");
                    return;
                }
            }
            Err(e) => log::warn!("session: {id} sent undecodable message: {e}"),
        }
    }

    if !closed.swap(true, Ordering::SeqCst) {
        sink.closed(CloseInfo::dropped("stream ended without close frame"));
    }
}

// ---------------------------------------------------------------------------
// WsSession
// ---------------------------------------------------------------------------

/// A live WebSocket session.
pub struct WsSession {
    writer: Arc<Mutex<Writer>>,
    closed: Arc<AtomicBool>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WsSession {
    async fn send(&self, what: &'static str, msg: &ClientMessage<'_>) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        let json = serde_json::to_string(msg).map_err(|e| SessionError::Send {
            what,
            reason: e.to_string(),
        })?;
        self.writer
            .lock()
            .await
            .send(Message::Text(json))
            .await
            .map_err(|e| SessionError::Send {
                what,
                reason: e.to_string(),
            })
    }

    async fn control(&self, what: &'static str, control: PlaybackControl) -> Result<(), SessionError> {
        self.send(what, &ClientMessage::PlaybackControl(control)).await
    }
}

#[async_trait]
impl Session for WsSession {
    async fn set_weighted_prompts(&self, prompts: &[WirePrompt]) -> Result<(), SessionError> {
        self.send(
            "weighted prompts",
            &ClientMessage::ClientContent {
                weighted_prompts: prompts,
            },
        )
        .await
    }

    async fn set_music_generation_config(&self, config: &WireConfig) -> Result<(), SessionError> {
        self.send("generation config", &ClientMessage::MusicGenerationConfig(config))
            .await
    }

    async fn play(&self) -> Result<(), SessionError> {
        self.control("play", PlaybackControl::Play).await
    }

    async fn pause(&self) -> Result<(), SessionError> {
        self.control("pause", PlaybackControl::Pause).await
    }

    async fn stop(&self) -> Result<(), SessionError> {
        self.control("stop", PlaybackControl::Stop).await
    }

    async fn reset_context(&self) -> Result<(), SessionError> {
        self.control("reset context", PlaybackControl::ResetContext)
            .await
    }

    async fn close(&self) -> Result<(), SessionError> {
        if let Some(handle) = self.reader.lock().ok().and_then(|mut slot| slot.take()) {
            handle.abort();
        }
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| SessionError::Send {
                what: "close",
                reason: e.to_string(),
            })?;
        writer.close().await.map_err(|e| SessionError::Send {
            what: "close",
            reason: e.to_string(),
        })
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.reader.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(endpoint: &str, key: &str) -> SessionParams {
        SessionParams {
            endpoint: endpoint.into(),
            api_key: key.into(),
            model: "models/lyria-realtime-exp".into(),
        }
    }

    #[test]
    fn key_is_appended_as_query() {
        assert_eq!(endpoint_url(&params("wss://h/ws", "abc")), "wss://h/ws?key=abc");
        assert_eq!(
            endpoint_url(&params("wss://h/ws?alt=1", "abc")),
            "wss://h/ws?alt=1&key=abc"
        );
    }

    #[tokio::test]
    async fn missing_key_fails_before_dialing() {
        let sink = EventSink::new(
            crate::session::SessionId(1),
            std::sync::Arc::new(|_| true),
        );
        let err = WebSocketTransport::new()
            .connect(&params("wss://invalid.example", ""), sink)
            .await
            .err();
        assert!(matches!(err, Some(SessionError::Connect(_))));
    }
}
