//! Playback engine for promptdj.
//!
//! This module wires sessions, steering and audio scheduling into one event
//! loop and exposes the shared state the presentation layer reads.
//!
//! # Architecture
//!
//! ```text
//! EngineHandle (intents) ──┐
//! EventSink (session)    ──┼─▶ mpsc ─▶ Engine::run()  ← async tokio task
//! timers                 ──┘               │
//!                                          ├─ SessionManager  (connect / route)
//!                                          ├─ ControlChannel  (throttled pushes)
//!                                          ├─ AudioScheduler  → AudioOutput
//!                                          └─ PlaybackStateMachine
//!
//! SharedState (Arc<Mutex<EngineState>>) ◀── read by the presentation layer
//! Notice (mpsc)                         ──▶ shown to the user
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use promptdj::config::{default_prompts, AppConfig};
//! use promptdj::control::SystemClock;
//! use promptdj::pipeline::{Engine, EngineSettings};
//! use promptdj::session::WebSocketTransport;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::default();
//!     let (notice_tx, _notices) = tokio::sync::mpsc::unbounded_channel();
//!
//!     let engine = Engine::new(
//!         EngineSettings::from_config(&config),
//!         Arc::new(WebSocketTransport::new()),
//!         None, // or Some(Arc::new(cpal_output))
//!         Arc::new(SystemClock),
//!         notice_tx,
//!     )
//!     .with_prompts(default_prompts());
//!
//!     let handle = engine.handle();
//!     tokio::spawn(engine.run());
//!     handle.play();
//! }
//! ```

pub mod notice;
pub mod runner;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use notice::Notice;
pub use runner::{Engine, EngineEvent, EngineHandle, EngineSettings, Intent};
pub use state::{
    new_shared_state, EngineState, PlaybackState, PlaybackStateMachine, SharedState, Transition,
    Trigger,
};
