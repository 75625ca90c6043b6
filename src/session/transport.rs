//! Transport boundary: the remote live-music session as seen by the engine.
//!
//! A [`Transport`] opens a [`Session`] and feeds everything the server sends
//! into an [`EventSink`].  The sink tags each event with the [`SessionId`] it
//! belongs to, so the engine can throw away late events from a session that
//! has since been replaced.
//!
//! The wire types mirror the service's JSON:
//!
//! ```text
//! client → server   {"setup": {"model": "..."}}
//!                   {"clientContent": {"weightedPrompts": [{"text", "weight"}]}}
//!                   {"musicGenerationConfig": {...}}
//!                   {"playbackControl": "PLAY" | "PAUSE" | "STOP" | "RESET_CONTEXT"}
//!
//! server → client   {"setupComplete": {}}
//!                   {"filteredPrompt": {"text", "filteredReason"}}
//!                   {"serverContent": {"audioChunks": [{"data", "mimeType"}]}}
//!                   {"warning": "..."}
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::{WireConfig, WirePrompt};

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Failures talking to the remote session.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    /// The connection could not be established.
    #[error("failed to connect: {0}")]
    Connect(String),

    /// A control message could not be delivered.
    #[error("failed to send {what}: {reason}")]
    Send { what: &'static str, reason: String },

    /// The session is already closed.
    #[error("session is closed")]
    Closed,

    /// The server sent something that could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),
}

// ---------------------------------------------------------------------------
// Identity / parameters
// ---------------------------------------------------------------------------

/// Identity of one connection attempt.  Strictly increasing per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a transport needs to open a session.
#[derive(Clone, PartialEq)]
pub struct SessionParams {
    /// WebSocket endpoint, without query string.
    pub endpoint: String,
    pub api_key: String,
    /// Model resource name, e.g. `models/lyria-realtime-exp`.
    pub model: String,
}

// Keeps the key out of logs.
impl fmt::Debug for SessionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionParams")
            .field("endpoint", &self.endpoint)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("model", &self.model)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Inbound wire types
// ---------------------------------------------------------------------------

/// One encoded audio payload: base64 text of little-endian 16-bit PCM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioChunk {
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A prompt the service's moderation rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteredPrompt {
    pub text: String,
    #[serde(default)]
    pub filtered_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub audio_chunks: Vec<AudioChunk>,
}

/// A server message.  Any combination of fields may be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered_prompt: Option<FilteredPrompt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    pub fn setup_complete() -> Self {
        Self {
            setup_complete: Some(serde_json::json!({})),
            ..Default::default()
        }
    }

    pub fn filtered(text: impl Into<String>, reason: Option<&str>) -> Self {
        Self {
            filtered_prompt: Some(FilteredPrompt {
                text: text.into(),
                filtered_reason: reason.map(str::to_string),
            }),
            ..Default::default()
        }
    }

    pub fn audio(chunks: Vec<AudioChunk>) -> Self {
        Self {
            server_content: Some(ServerContent { audio_chunks: chunks }),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackControl {
    Play,
    Pause,
    Stop,
    ResetContext,
}

/// Client → server message.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage<'a> {
    Setup {
        model: &'a str,
    },
    ClientContent {
        #[serde(rename = "weightedPrompts")]
        weighted_prompts: &'a [WirePrompt],
    },
    MusicGenerationConfig(&'a WireConfig),
    PlaybackControl(PlaybackControl),
}

// ---------------------------------------------------------------------------
// Session events
// ---------------------------------------------------------------------------

/// How a connection ended.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseInfo {
    /// WebSocket close code, if the peer sent one.
    pub code: Option<u16>,
    pub reason: String,
    /// `false` when the connection dropped without a close handshake.
    pub clean: bool,
}

impl CloseInfo {
    pub const NORMAL: u16 = 1000;

    pub fn normal() -> Self {
        Self {
            code: Some(Self::NORMAL),
            reason: String::new(),
            clean: true,
        }
    }

    pub fn dropped(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
            clean: false,
        }
    }

    /// Anything other than a clean close with code 1000 (or no code).
    pub fn is_abnormal(&self) -> bool {
        !(self.clean && matches!(self.code, None | Some(Self::NORMAL)))
    }
}

/// Everything a session can report.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Message(ServerMessage),
    Error(String),
    Closed(CloseInfo),
}

/// A [`SessionEvent`] tagged with its originating session.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub session: SessionId,
    pub event: SessionEvent,
}

/// Where tagged events are delivered.  Returns `false` once the receiver is gone.
pub type Deliver = Arc<dyn Fn(TaggedEvent) -> bool + Send + Sync>;

/// Callback endpoint handed to a transport when a session is opened.
///
/// Cheap to clone.  Every event is stamped with the session it was created for.
#[derive(Clone)]
pub struct EventSink {
    session: SessionId,
    deliver: Deliver,
}

impl EventSink {
    pub fn new(session: SessionId, deliver: Deliver) -> Self {
        Self { session, deliver }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn message(&self, message: ServerMessage) -> bool {
        self.emit(SessionEvent::Message(message))
    }

    pub fn error(&self, error: impl Into<String>) -> bool {
        self.emit(SessionEvent::Error(error.into()))
    }

    pub fn closed(&self, info: CloseInfo) -> bool {
        self.emit(SessionEvent::Closed(info))
    }

    fn emit(&self, event: SessionEvent) -> bool {
        (self.deliver)(TaggedEvent {
            session: self.session,
            event,
        })
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Opens sessions to the generation service.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        params: &SessionParams,
        sink: EventSink,
    ) -> Result<Box<dyn Session>, SessionError>;
}

/// A live bidirectional session.  Every operation may fail.
#[async_trait]
pub trait Session: Send + Sync {
    async fn set_weighted_prompts(&self, prompts: &[WirePrompt]) -> Result<(), SessionError>;

    async fn set_music_generation_config(&self, config: &WireConfig) -> Result<(), SessionError>;

    async fn play(&self) -> Result<(), SessionError>;

    async fn pause(&self) -> Result<(), SessionError>;

    async fn stop(&self) -> Result<(), SessionError>;

    async fn reset_context(&self) -> Result<(), SessionError>;

    async fn close(&self) -> Result<(), SessionError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
