//! Connection to the remote generation service.
//!
//! * [`Transport`] / [`Session`]: the boundary the engine talks through.
//! * [`WebSocketTransport`]: production transport over `tokio-tungstenite`.
//! * [`SessionManager`]: owns the single live session, reconnects and
//!   re-synchronises it, and classifies inbound events ([`Routed`]).
//!
//! # Event flow
//!
//! ```text
//! socket frame ─▶ reader task ─▶ EventSink (tags SessionId)
//!                                   │
//!                                   ▼
//!                       engine queue ─▶ SessionManager::route ─▶ Routed
//! ```

pub mod manager;
pub mod transport;
pub mod ws;

#[cfg(test)]
pub(crate) mod mock;

pub use manager::{Connect, Resync, Routed, SessionManager};
pub use transport::{
    AudioChunk, ClientMessage, CloseInfo, Deliver, EventSink, FilteredPrompt, PlaybackControl,
    ServerContent, ServerMessage, Session, SessionError, SessionEvent, SessionId, SessionParams,
    TaggedEvent, Transport,
};
pub use ws::{WebSocketTransport, WsSession};
