//! Playback state machine and shared engine state.
//!
//! [`PlaybackStateMachine`] is the single source of truth for whether music
//! is playing.  The presentation layer reads a snapshot of it, together with
//! connection status and moderation results, via [`SharedState`].
//!
//! [`SharedState`] is a type alias for `Arc<Mutex<EngineState>>`, cheap to
//! clone and safe to share across threads.

use std::sync::{Arc, Mutex};

use crate::pipeline::notice::Notice;

// ---------------------------------------------------------------------------
// PlaybackState
// ---------------------------------------------------------------------------

/// States of the playback engine.
///
/// ```text
/// Stopped/Paused ──play──▶ Loading ──look-ahead elapsed──▶ Playing
///                          Loading ◀──────under-run─────── Playing
/// Loading/Playing ──pause──▶ Paused
/// any ──connection lost──▶ Paused
/// Loading/Playing/Paused ──stop──▶ Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Nothing scheduled; the initial state.
    #[default]
    Stopped,

    /// Audio is being buffered ahead of the output clock.
    Loading,

    /// Audio is audible.
    Playing,

    /// Halted by the user or by a connection failure.  Only an explicit play
    /// leaves this state.
    Paused,
}

impl PlaybackState {
    /// Returns `true` while incoming audio should be scheduled.
    ///
    /// ```
    /// use promptdj::pipeline::PlaybackState;
    ///
    /// assert!(PlaybackState::Loading.is_active());
    /// assert!(PlaybackState::Playing.is_active());
    /// assert!(!PlaybackState::Paused.is_active());
    /// assert!(!PlaybackState::Stopped.is_active());
    /// ```
    pub fn is_active(&self) -> bool {
        matches!(self, PlaybackState::Loading | PlaybackState::Playing)
    }

    /// A short human-readable label suitable for a status line.
    pub fn label(&self) -> &'static str {
        match self {
            PlaybackState::Stopped => "Stopped",
            PlaybackState::Loading => "Loading",
            PlaybackState::Playing => "Playing",
            PlaybackState::Paused => "Paused",
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackStateMachine
// ---------------------------------------------------------------------------

/// What drives a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// User play, once a healthy connection is in place.
    Play,
    /// The look-ahead timer fired.
    LookaheadElapsed,
    Underrun,
    Pause,
    /// Connection error, abnormal close or failed control send.
    ConnectionLost,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: PlaybackState,
    pub to: PlaybackState,
}

impl Transition {
    pub fn entered(&self, state: PlaybackState) -> bool {
        self.from != state && self.to == state
    }
}

#[derive(Debug, Default)]
pub struct PlaybackStateMachine {
    state: PlaybackState,
}

impl PlaybackStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// The state `trigger` leads to from `from`, or `None` when the trigger
    /// does not apply there.
    pub fn next(from: PlaybackState, trigger: Trigger) -> Option<PlaybackState> {
        use PlaybackState::*;
        match (from, trigger) {
            (Stopped | Paused, Trigger::Play) => Some(Loading),
            (Loading, Trigger::LookaheadElapsed) => Some(Playing),
            (Loading | Playing, Trigger::Underrun) => Some(Loading),
            (Loading | Playing, Trigger::Pause) => Some(Paused),
            (_, Trigger::ConnectionLost) => Some(Paused),
            (Loading | Playing | Paused, Trigger::Stop) => Some(Stopped),
            _ => None,
        }
    }

    /// Apply `trigger`.  Returns the transition taken, if any.
    pub fn apply(&mut self, trigger: Trigger) -> Option<Transition> {
        let from = self.state;
        let to = Self::next(from, trigger)?;
        self.state = to;
        if from != to {
            log::debug!("engine: {} → {} ({trigger:?})", from.label(), to.label());
        }
        Some(Transition { from, to })
    }
}

// ---------------------------------------------------------------------------
// EngineState
// ---------------------------------------------------------------------------

/// Snapshot of everything the presentation layer shows.
///
/// Held behind [`SharedState`].  The engine loop writes it; readers lock it
/// briefly to render.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub playback: PlaybackState,

    /// Whether a session is believed healthy.
    pub connected: bool,

    /// Prompt texts rejected by moderation, sorted.
    pub filtered: Vec<String>,

    /// The most recent notice, kept until the next one replaces it.
    pub last_notice: Option<Notice>,

    /// Under-runs since start-up.
    pub underruns: u64,
}

// ---------------------------------------------------------------------------
// SharedState
// ---------------------------------------------------------------------------

/// Thread-safe handle to [`EngineState`].
///
/// Do **not** hold the lock across `.await` points.
pub type SharedState = Arc<Mutex<EngineState>>;

pub fn new_shared_state() -> SharedState {
    Arc::new(Mutex::new(EngineState::default()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
