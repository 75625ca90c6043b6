//! Session lifecycle and inbound dispatch.
//!
//! [`SessionManager`] owns the single live [`Session`].  It is held by value
//! inside the engine loop, so every `ensure_connected` call has exclusive
//! access: two connect attempts can never be in flight at once.
//!
//! # Lifecycle
//!
//! ```text
//! ensure_connected()
//!   ├─ healthy, recently confirmed ─▶ Reused
//!   ├─ healthy, stale ─▶ probe (empty config push)
//!   │     ├─ ok  ─▶ Probed
//!   │     └─ err ─▶ reconnect
//!   └─ none / unhealthy ─▶ reconnect
//!                            ├─ close old session (errors swallowed)
//!                            ├─ connect with a fresh SessionId
//!                            └─ re-push prompts + config ─▶ Reconnected
//! ```
//!
//! A healthy session confirmed within `probe_interval` (setup complete, a
//! successful connect or probe) is reused without sending a probe at all.
//! This is a deliberate departure from probing on every call.  A zero
//! `probe_interval` restores it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::control::{Clock, WireConfig, WirePrompt};
use crate::pipeline::PlaybackState;
use crate::session::transport::{
    AudioChunk, Deliver, EventSink, Session, SessionError, SessionEvent, SessionId, SessionParams,
    TaggedEvent, Transport,
};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// What `ensure_connected` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connect {
    /// A healthy session was confirmed recently enough; nothing sent.
    Reused,
    /// A liveness probe succeeded on the existing session.
    Probed,
    /// A new session was opened and re-synchronised.
    Reconnected,
}

/// Server-side state to restore on a fresh session.
#[derive(Debug, Clone, Copy)]
pub struct Resync<'a> {
    pub prompts: &'a [WirePrompt],
    pub config: &'a WireConfig,
}

/// Where an inbound event should go.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// The server finished setup; the connection is healthy.
    Ready,
    /// Moderation rejected a prompt.
    Filtered { text: String, reason: Option<String> },
    /// Audio for the scheduler.
    Audio(Vec<AudioChunk>),
    /// Audio that arrived while playback was not wanted.
    DroppedAudio { chunks: usize },
    /// The connection failed; playback must pause.
    Lost { reason: String },
    /// The server closed the session cleanly while nothing was streaming.
    Closed,
    Warning(String),
    /// From a superseded session, or a repeat failure of one already lost.
    Ignored,
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

struct LiveSession {
    id: SessionId,
    handle: Box<dyn Session>,
    healthy: bool,
    last_good: Instant,
}

/// Owns the connection to the generation service.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    params: SessionParams,
    deliver: Deliver,
    clock: Arc<dyn Clock>,
    probe_interval: Duration,
    current: Option<LiveSession>,
    last_id: u64,
}

impl SessionManager {
    /// Create a manager with no session.
    ///
    /// * `deliver`       : receives every tagged event from every session.
    /// * `probe_interval`: a healthy session confirmed within this window is
    ///   reused without a liveness probe.
    pub fn new(
        transport: Arc<dyn Transport>,
        params: SessionParams,
        deliver: Deliver,
        clock: Arc<dyn Clock>,
        probe_interval: Duration,
    ) -> Self {
        Self {
            transport,
            params,
            deliver,
            clock,
            probe_interval,
            current: None,
            last_id: 0,
        }
    }

    pub fn current_id(&self) -> Option<SessionId> {
        self.current.as_ref().map(|s| s.id)
    }

    /// The live session, if any, regardless of health.
    pub fn session(&self) -> Option<&dyn Session> {
        self.current.as_ref().map(|s| s.handle.as_ref())
    }

    /// The live session if it is believed healthy.
    pub fn healthy_session(&self) -> Option<&dyn Session> {
        self.current
            .as_ref()
            .filter(|s| s.healthy)
            .map(|s| s.handle.as_ref())
    }

    pub fn is_healthy(&self) -> bool {
        self.current.as_ref().is_some_and(|s| s.healthy)
    }

    /// Mark the current session unusable; the next `ensure_connected`
    /// replaces it.
    pub fn mark_unhealthy(&mut self) {
        if let Some(live) = self.current.as_mut() {
            live.healthy = false;
        }
    }

    /// Make sure a healthy session exists, reconnecting if necessary.
    pub async fn ensure_connected(&mut self, resync: Resync<'_>) -> Result<Connect, SessionError> {
        let now = self.clock.now();
        if let Some(live) = self.current.as_mut().filter(|s| s.healthy) {
            if now.saturating_duration_since(live.last_good) < self.probe_interval {
                return Ok(Connect::Reused);
            }
            match live.handle.set_music_generation_config(&WireConfig::default()).await {
                Ok(()) => {
                    live.last_good = self.clock.now();
                    log::debug!("session: {} passed liveness probe", live.id);
                    return Ok(Connect::Probed);
                }
                Err(e) => {
                    log::warn!("session: {} failed liveness probe: {e}", live.id);
                    live.healthy = false;
                }
            }
        }

        self.reconnect(resync).await?;
        Ok(Connect::Reconnected)
    }

    async fn reconnect(&mut self, resync: Resync<'_>) -> Result<(), SessionError> {
        self.close().await;

        self.last_id += 1;
        let id = SessionId(self.last_id);
        log::info!("session: connecting {id} to {}", self.params.endpoint);

        let sink = EventSink::new(id, Arc::clone(&self.deliver));
        let handle = self.transport.connect(&self.params, sink).await?;

        if let Err(e) = Self::resync(handle.as_ref(), resync).await {
            log::warn!("session: {id} failed to re-synchronise: {e}");
            if let Err(close_err) = handle.close().await {
                log::warn!("session: closing {id} after failed resync: {close_err}");
            }
            return Err(e);
        }

        log::info!("session: {id} connected");
        self.current = Some(LiveSession {
            id,
            handle,
            healthy: true,
            last_good: self.clock.now(),
        });
        Ok(())
    }

    async fn resync(session: &dyn Session, resync: Resync<'_>) -> Result<(), SessionError> {
        if !resync.prompts.is_empty() {
            session.set_weighted_prompts(resync.prompts).await?;
        }
        session.set_music_generation_config(resync.config).await
    }

    /// Close the current session, if any.  Failures are logged and swallowed.
    pub async fn close(&mut self) {
        if let Some(live) = self.current.take() {
            log::debug!("session: closing {}", live.id);
            if let Err(e) = live.handle.close().await {
                log::warn!("session: error while closing {}: {e}", live.id);
            }
        }
    }

    /// Classify an inbound event given the current playback state.
    ///
    /// Events from any session other than the current one are ignored.
    /// Audio is only passed on while `state` is loading or playing.
    pub fn route(&mut self, tagged: TaggedEvent, state: PlaybackState) -> Vec<Routed> {
        let Some(live) = self.current.as_mut().filter(|s| s.id == tagged.session) else {
            log::debug!("session: ignoring event from superseded {}", tagged.session);
            return vec![Routed::Ignored];
        };

        match tagged.event {
            SessionEvent::Message(msg) => {
                let mut routed = Vec::new();
                if msg.is_setup_complete() {
                    live.healthy = true;
                    live.last_good = self.clock.now();
                    log::info!("session: {} setup complete", live.id);
                    routed.push(Routed::Ready);
                }
                if let Some(fp) = msg.filtered_prompt {
                    routed.push(Routed::Filtered {
                        text: fp.text,
                        reason: fp.filtered_reason,
                    });
                }
                if let Some(content) = msg.server_content {
                    let chunks = content.audio_chunks;
                    if !chunks.is_empty() {
                        if state.is_active() {
                            routed.push(Routed::Audio(chunks));
                        } else {
                            routed.push(Routed::DroppedAudio {
                                chunks: chunks.len(),
                            });
                        }
                    }
                }
                if let Some(warning) = msg.warning {
                    routed.push(Routed::Warning(warning));
                }
                routed
            }
            SessionEvent::Error(reason) => vec![Self::lose(live, reason)],
            SessionEvent::Closed(info) if info.is_abnormal() => {
                let reason = match info.code {
                    Some(code) => format!("closed with code {code}: {}", info.reason),
                    None => format!("connection dropped: {}", info.reason),
                };
                vec![Self::lose(live, reason)]
            }
            // No more audio can arrive, so a clean close mid-stream is a loss.
            SessionEvent::Closed(_) if state.is_active() => {
                vec![Self::lose(live, "closed by server while streaming".into())]
            }
            SessionEvent::Closed(_) => {
                log::info!("session: {} closed by server", live.id);
                live.healthy = false;
                vec![Routed::Closed]
            }
        }
    }

    fn lose(live: &mut LiveSession, reason: String) -> Routed {
        if !live.healthy {
            log::debug!("session: {} already lost ({reason})", live.id);
            return Routed::Ignored;
        }
        log::warn!("session: {} lost: {reason}", live.id);
        live.healthy = false;
        Routed::Lost { reason }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
