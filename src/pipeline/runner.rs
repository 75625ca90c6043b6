//! Engine loop: the single consumer of every intent, session event and timer.
//!
//! [`Engine`] owns the [`SessionManager`], [`ControlChannel`],
//! [`AudioScheduler`] and [`PlaybackStateMachine`].  Everything that can
//! change them arrives as an [`EngineEvent`] on one unbounded channel and is
//! handled to completion before the next event is read.
//!
//! # Event flow
//!
//! ```text
//! EngineHandle::play/pause/…  ─┐
//! EventSink (tagged session)  ─┼─▶ mpsc ─▶ Engine::run() ─▶ dispatch()
//! look-ahead / resume timers  ─┘
//!
//! Intent::Play
//!   └─▶ ensure_connected (resync prompts + config) ─▶ PLAY ─▶ Loading
//! Routed::Audio
//!   └─▶ AudioScheduler::accept
//!         ├─ FirstFill ─▶ arm look-ahead ─▶ LookaheadElapsed ─▶ Playing
//!         └─ Underrun  ─▶ Loading, arm look-ahead
//! Routed::Lost (error, abnormal close, clean close mid-stream)
//! control send failure
//!   └─▶ Paused + Notice
//! ```
//!
//! Awaited work (connect, close, pushes) runs inside a handler; inbound
//! events queue behind it and are handled in arrival order afterwards.

use std::ops::ControlFlow;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::audio::{AudioOutput, AudioScheduler, ChunkDecoder, ScheduleKind};
use crate::config::AppConfig;
use crate::control::{
    Clock, ControlChannel, FilterTracker, GenerationConfig, GenerationPatch, PromptSet, Push,
};
use crate::session::{
    AudioChunk, Deliver, PlaybackControl, Resync, Routed, Session, SessionError, SessionManager,
    SessionParams, TaggedEvent, Transport,
};

use super::notice::Notice;
use super::state::{
    new_shared_state, EngineState, PlaybackState, PlaybackStateMachine, SharedState, Transition,
    Trigger,
};

// ---------------------------------------------------------------------------
// Intents and events
// ---------------------------------------------------------------------------

/// What the presentation layer can ask for.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Play,
    Pause,
    Stop,
    /// Play/pause button: pause while playing, stop while loading, play
    /// otherwise.
    Toggle,
    /// Reset the service's context, clear moderation results and restore the
    /// default generation config.
    Reset,
    /// Replace the prompt set.
    UpdatePrompts(PromptSet),
    /// Merge a partial config change.
    UpdateConfig(GenerationPatch),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Intent(Intent),
    Session(TaggedEvent),
    /// The look-ahead timer armed under `epoch` fired.
    LookaheadElapsed { epoch: u64 },
    /// The post-reset resume delay armed under `epoch` passed.
    ResumeAfterReset { epoch: u64 },
}

// ---------------------------------------------------------------------------
// EngineHandle
// ---------------------------------------------------------------------------

/// Cloneable sender of intents.  Methods return `false` once the engine has
/// shut down.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineHandle {
    pub fn send(&self, intent: Intent) -> bool {
        self.tx.send(EngineEvent::Intent(intent)).is_ok()
    }

    pub fn play(&self) -> bool {
        self.send(Intent::Play)
    }

    pub fn pause(&self) -> bool {
        self.send(Intent::Pause)
    }

    pub fn stop(&self) -> bool {
        self.send(Intent::Stop)
    }

    pub fn toggle(&self) -> bool {
        self.send(Intent::Toggle)
    }

    pub fn reset(&self) -> bool {
        self.send(Intent::Reset)
    }

    pub fn update_prompts(&self, prompts: PromptSet) -> bool {
        self.send(Intent::UpdatePrompts(prompts))
    }

    pub fn update_config(&self, patch: GenerationPatch) -> bool {
        self.send(Intent::UpdateConfig(patch))
    }

    pub fn shutdown(&self) -> bool {
        self.send(Intent::Shutdown)
    }
}

// ---------------------------------------------------------------------------
// EngineSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub session: SessionParams,
    pub probe_interval: Duration,
    pub throttle: Duration,
    pub buffer_time: Duration,
    pub reset_resume_delay: Duration,
    /// Format of the incoming stream.
    pub sample_rate: u32,
    pub channels: u16,
    pub notify_on_underrun: bool,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            session: SessionParams {
                endpoint: config.session.endpoint.clone(),
                api_key: config.api_key().unwrap_or_default(),
                model: config.session.model.clone(),
            },
            probe_interval: config.probe_interval(),
            throttle: config.throttle(),
            buffer_time: config.buffer_time(),
            reset_resume_delay: config.reset_resume_delay(),
            sample_rate: config.playback.sample_rate,
            channels: config.playback.channels,
            notify_on_underrun: config.playback.notify_on_underrun,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The playback engine.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use promptdj::config::AppConfig;
/// use promptdj::control::SystemClock;
/// use promptdj::pipeline::{Engine, EngineSettings};
/// use promptdj::session::WebSocketTransport;
///
/// # async fn example() {
/// let config = AppConfig::default();
/// let (notice_tx, mut notices) = tokio::sync::mpsc::unbounded_channel();
/// let engine = Engine::new(
///     EngineSettings::from_config(&config),
///     Arc::new(WebSocketTransport::new()),
///     None,
///     Arc::new(SystemClock),
///     notice_tx,
/// );
/// let handle = engine.handle();
/// tokio::spawn(engine.run());
///
/// handle.play();
/// while let Some(notice) = notices.recv().await {
///     println!("{notice}");
/// }
/// # }
/// ```
pub struct Engine {
    settings: EngineSettings,
    sessions: SessionManager,
    control: ControlChannel,
    scheduler: AudioScheduler,
    output: Option<Arc<dyn AudioOutput>>,
    machine: PlaybackStateMachine,
    filter: FilterTracker,
    prompts: PromptSet,
    config: GenerationConfig,
    shared: SharedState,
    notices: mpsc::UnboundedSender<Notice>,
    tx: mpsc::UnboundedSender<EngineEvent>,
    rx: mpsc::UnboundedReceiver<EngineEvent>,
    /// Bumped whenever a pending timer should be ignored.
    epoch: u64,
}

impl Engine {
    /// Create an engine.
    ///
    /// # Arguments
    ///
    /// * `transport`: opens sessions to the generation service.
    /// * `output`   : audio device; `None` when none could be opened, in
    ///   which case play is refused with a blocking notice.
    /// * `clock`    : time source for throttling and liveness.
    /// * `notices`  : receives every user-facing notice.
    pub fn new(
        settings: EngineSettings,
        transport: Arc<dyn Transport>,
        output: Option<Arc<dyn AudioOutput>>,
        clock: Arc<dyn Clock>,
        notices: mpsc::UnboundedSender<Notice>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let session_tx = tx.clone();
        let deliver: Deliver = Arc::new(move |event: TaggedEvent| {
            session_tx.send(EngineEvent::Session(event)).is_ok()
        });

        let sessions = SessionManager::new(
            transport,
            settings.session.clone(),
            deliver,
            Arc::clone(&clock),
            settings.probe_interval,
        );
        let control = ControlChannel::new(settings.throttle, clock);
        let scheduler = AudioScheduler::new(
            settings.buffer_time,
            ChunkDecoder::new(settings.sample_rate, settings.channels),
        );

        Self {
            settings,
            sessions,
            control,
            scheduler,
            output,
            machine: PlaybackStateMachine::new(),
            filter: FilterTracker::new(),
            prompts: PromptSet::new(),
            config: GenerationConfig::default(),
            shared: new_shared_state(),
            notices,
            tx,
            rx,
            epoch: 0,
        }
    }

    /// Start with `prompts` instead of an empty set.
    pub fn with_prompts(mut self, prompts: PromptSet) -> Self {
        self.prompts = prompts;
        self
    }

    /// Start with `config` instead of all-auto.
    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn shared_state(&self) -> SharedState {
        Arc::clone(&self.shared)
    }

    pub fn state(&self) -> PlaybackState {
        self.machine.state()
    }

    // -----------------------------------------------------------------------
    // Main async loop
    // -----------------------------------------------------------------------

    /// Handle events until [`Intent::Shutdown`], then close the session.
    pub async fn run(mut self) {
        log::info!("engine: started");
        while let Some(event) = self.rx.recv().await {
            if self.dispatch(event).await.is_break() {
                break;
            }
        }
        self.sessions.close().await;
        log::info!("engine: shut down");
    }

    /// Handle one event to completion.
    pub async fn dispatch(&mut self, event: EngineEvent) -> ControlFlow<()> {
        match event {
            EngineEvent::Intent(Intent::Shutdown) => return ControlFlow::Break(()),
            EngineEvent::Intent(intent) => self.handle_intent(intent).await,
            EngineEvent::Session(tagged) => self.handle_session_event(tagged),
            EngineEvent::LookaheadElapsed { epoch } => self.handle_lookahead(epoch),
            EngineEvent::ResumeAfterReset { epoch } => {
                if epoch == self.epoch && self.state() == PlaybackState::Paused {
                    self.handle_play().await;
                } else {
                    log::debug!("engine: resume after reset superseded");
                }
            }
        }
        ControlFlow::Continue(())
    }

    // -----------------------------------------------------------------------
    // Intents
    // -----------------------------------------------------------------------

    async fn handle_intent(&mut self, intent: Intent) {
        log::debug!("engine: intent {intent:?}");
        match intent {
            Intent::Play => self.handle_play().await,
            Intent::Pause => self.handle_pause().await,
            Intent::Stop => self.handle_stop().await,
            Intent::Toggle => match self.state() {
                PlaybackState::Playing => self.handle_pause().await,
                PlaybackState::Loading => self.handle_stop().await,
                PlaybackState::Paused | PlaybackState::Stopped => self.handle_play().await,
            },
            Intent::Reset => self.handle_reset().await,
            Intent::UpdatePrompts(prompts) => {
                self.prompts = prompts;
                self.push_prompts().await;
            }
            Intent::UpdateConfig(patch) => {
                self.config.apply(&patch);
                self.push_config().await;
            }
            Intent::Shutdown => {}
        }
    }

    async fn handle_play(&mut self) {
        let Some(output) = self.output.clone() else {
            self.notify(Notice::OutputUnavailable("no audio output device".into()));
            return;
        };
        let state = self.state();
        if state.is_active() {
            log::debug!("engine: play ignored while {}", state.label());
            return;
        }

        let prompts = self.prompts.to_wire(&self.filter);
        if prompts.is_empty() {
            self.notify(Notice::NoActivePrompts);
            return;
        }
        if !self.connect().await {
            return;
        }

        let sent = self.send_playback(PlaybackControl::Play).await;
        if let Err(e) = sent {
            self.control_failed("Failed to start playback", e);
            return;
        }
        self.transition(Trigger::Play);
        output.resume();
    }

    async fn handle_pause(&mut self) {
        if !self.state().is_active() {
            return;
        }
        self.transition(Trigger::Pause);
        self.send_playback_best_effort(PlaybackControl::Pause).await;
    }

    async fn handle_stop(&mut self) {
        if self.state() == PlaybackState::Stopped {
            return;
        }
        self.transition(Trigger::Stop);
        self.send_playback_best_effort(PlaybackControl::Stop).await;
    }

    async fn handle_reset(&mut self) {
        let was_active = self.state().is_active();
        if !self.connect().await {
            return;
        }
        self.handle_pause().await;

        let sent = self.send_playback(PlaybackControl::ResetContext).await;
        if let Err(e) = sent {
            self.control_failed("Failed to reset context", e);
            return;
        }

        self.filter.clear();
        self.update_shared(|s| s.filtered.clear());
        self.config = GenerationConfig::default();
        self.control.reset();
        self.push_config().await;

        if was_active && self.state() == PlaybackState::Paused {
            let epoch = self.epoch;
            self.schedule(
                self.settings.reset_resume_delay,
                EngineEvent::ResumeAfterReset { epoch },
            );
        }
    }

    // -----------------------------------------------------------------------
    // Session events
    // -----------------------------------------------------------------------

    fn handle_session_event(&mut self, tagged: TaggedEvent) {
        for routed in self.sessions.route(tagged, self.machine.state()) {
            match routed {
                Routed::Ready => self.set_connected(true),
                Routed::Filtered { text, reason } => {
                    if self.filter.insert(&text) {
                        let texts: Vec<String> = self.filter.texts().map(str::to_owned).collect();
                        self.update_shared(|s| s.filtered = texts);
                        let text = crate::control::unwrap_prompt_text(&text).to_string();
                        self.notify(Notice::PromptFiltered { text, reason });
                    }
                }
                Routed::Audio(chunks) => self.schedule_audio(&chunks),
                Routed::DroppedAudio { chunks } => {
                    log::debug!("engine: dropped {chunks} chunk(s) while {}", self.state().label());
                }
                Routed::Lost { .. } => {
                    self.set_connected(false);
                    self.transition(Trigger::ConnectionLost);
                    self.notify(Notice::ConnectionLost);
                }
                Routed::Closed => self.set_connected(false),
                Routed::Warning(warning) => log::warn!("engine: service warning: {warning}"),
                Routed::Ignored => {}
            }
        }
    }

    fn schedule_audio(&mut self, chunks: &[AudioChunk]) {
        let Some(output) = self.output.clone() else {
            return;
        };
        for chunk in chunks {
            let placed = match self.scheduler.accept(chunk, output.as_ref()) {
                Ok(placed) => placed,
                Err(e) => {
                    log::warn!("engine: skipping undecodable chunk: {e}");
                    continue;
                }
            };
            log::debug!(
                "scheduler: {:.3}s at {:.3}s ({:?})",
                placed.duration,
                placed.start,
                placed.kind
            );
            if let ScheduleKind::Underrun { .. } = placed.kind {
                self.transition(Trigger::Underrun);
                self.update_shared(|s| s.underruns += 1);
                if self.settings.notify_on_underrun {
                    self.notify(Notice::Underrun);
                }
            }
            if placed.kind.needs_lookahead() {
                self.arm_lookahead();
            }
        }
    }

    fn handle_lookahead(&mut self, epoch: u64) {
        if epoch != self.epoch || self.state() != PlaybackState::Loading {
            log::debug!("engine: stale look-ahead timer ignored");
            return;
        }
        self.transition(Trigger::LookaheadElapsed);
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Make sure a healthy session exists.  On failure a notice is sent and
    /// `false` returned.
    async fn connect(&mut self) -> bool {
        let prompts = self.prompts.to_wire(&self.filter);
        let config = self.config.to_wire();
        let resync = Resync {
            prompts: &prompts,
            config: &config,
        };
        match self.sessions.ensure_connected(resync).await {
            Ok(outcome) => {
                log::debug!("engine: session {outcome:?}");
                self.set_connected(true);
                true
            }
            Err(e) => {
                self.set_connected(false);
                self.notify(Notice::ReconnectFailed(e.to_string()));
                false
            }
        }
    }

    async fn push_prompts(&mut self) {
        let Some(session) = self.sessions.healthy_session() else {
            log::debug!("engine: prompts stored until the next connect");
            return;
        };
        let pushed = self
            .control
            .push_prompts(session, &self.prompts, &self.filter)
            .await;
        match pushed {
            Ok(Push::Sent) => {}
            Ok(outcome) => log::debug!("engine: prompt push {outcome:?}"),
            Err(e) => self.control_failed("Failed to update prompts", e),
        }
    }

    async fn push_config(&mut self) {
        let Some(session) = self.sessions.healthy_session() else {
            log::debug!("engine: config stored until the next connect");
            return;
        };
        let pushed = self.control.push_config(session, &self.config).await;
        match pushed {
            Ok(Push::Sent) => {}
            Ok(outcome) => log::debug!("engine: config push {outcome:?}"),
            Err(e) => self.control_failed("Failed to update config", e),
        }
    }

    async fn send_playback(&self, control: PlaybackControl) -> Result<(), SessionError> {
        let session = self.sessions.healthy_session().ok_or(SessionError::Closed)?;
        send_playback(session, control).await
    }

    /// For pause and stop: the local state has already changed, so a
    /// failure only marks the session unhealthy.
    async fn send_playback_best_effort(&mut self, control: PlaybackControl) {
        let Some(session) = self.sessions.healthy_session() else {
            return;
        };
        let sent = send_playback(session, control).await;
        if let Err(e) = sent {
            log::warn!("engine: {control:?} not delivered: {e}");
            self.sessions.mark_unhealthy();
            self.set_connected(false);
        }
    }

    /// A steering send failed: pause and tell the user.
    fn control_failed(&mut self, what: &str, err: SessionError) {
        log::warn!("engine: {what}: {err}");
        self.sessions.mark_unhealthy();
        self.set_connected(false);
        self.transition(Trigger::ConnectionLost);
        self.notify(Notice::OperationFailed(format!("{what}: {err}")));
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn transition(&mut self, trigger: Trigger) -> Option<Transition> {
        let transition = self.machine.apply(trigger)?;
        if transition.entered(PlaybackState::Paused) || transition.entered(PlaybackState::Stopped)
        {
            self.scheduler.reset();
            self.epoch += 1;
            if let Some(output) = &self.output {
                output.flush();
            }
        }
        self.update_shared(|s| s.playback = transition.to);
        Some(transition)
    }

    fn arm_lookahead(&mut self) {
        self.epoch += 1;
        let epoch = self.epoch;
        self.schedule(
            self.settings.buffer_time,
            EngineEvent::LookaheadElapsed { epoch },
        );
    }

    /// Post `event` back to this loop after `delay`.
    fn schedule(&self, delay: Duration, event: EngineEvent) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Ignore send errors; the engine may have shut down.
            let _ = tx.send(event);
        });
    }

    fn set_connected(&self, connected: bool) {
        self.update_shared(|s| s.connected = connected);
    }

    fn notify(&self, notice: Notice) {
        if notice.is_blocking() {
            log::error!("engine: {notice}");
        } else {
            log::info!("engine: notice: {notice}");
        }
        self.update_shared(|s| s.last_notice = Some(notice.clone()));
        // Ignore send errors; nobody may be listening.
        let _ = self.notices.send(notice);
    }

    fn update_shared(&self, f: impl FnOnce(&mut EngineState)) {
        let mut state = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }
}

async fn send_playback(session: &dyn Session, control: PlaybackControl) -> Result<(), SessionError> {
    match control {
        PlaybackControl::Play => session.play().await,
        PlaybackControl::Pause => session.pause().await,
        PlaybackControl::Stop => session.stop().await,
        PlaybackControl::ResetContext => session.reset_context().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::scheduler::tests::{silent_chunk, FakeOutput};
    use crate::control::{wrap_prompt_text, ManualClock, Tunable, WeightedPrompt, WirePrompt};
    use crate::session::mock::{MockTransport, SentMessage};
    use crate::session::{CloseInfo, EventSink, ServerMessage};

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    struct Harness {
        engine: Engine,
        transport: MockTransport,
        output: Arc<FakeOutput>,
        clock: ManualClock,
        notices: mpsc::UnboundedReceiver<Notice>,
    }

    fn settings() -> EngineSettings {
        let mut settings = EngineSettings::from_config(&AppConfig::default());
        settings.session.api_key = "test".into();
        settings
    }

    fn one_prompt(weight: f32) -> PromptSet {
        PromptSet::from_prompts(vec![WeightedPrompt::new("prompt-0", "Shoegaze", weight)])
    }

    fn harness_with(prompts: PromptSet) -> Harness {
        let transport = MockTransport::new();
        let output = Arc::new(FakeOutput::default());
        let clock = ManualClock::new();
        let (notice_tx, notices) = mpsc::unbounded_channel();
        let engine = Engine::new(
            settings(),
            Arc::new(transport.clone()),
            Some(output.clone() as Arc<dyn AudioOutput>),
            Arc::new(clock.clone()),
            notice_tx,
        )
        .with_prompts(prompts);
        Harness {
            engine,
            transport,
            output,
            clock,
            notices,
        }
    }

    fn harness() -> Harness {
        harness_with(one_prompt(1.0))
    }

    impl Harness {
        async fn intent(&mut self, intent: Intent) {
            let _ = self.engine.dispatch(EngineEvent::Intent(intent)).await;
        }

        /// Handle everything already queued (session events, fired timers).
        async fn drain(&mut self) {
            while let Ok(event) = self.engine.rx.try_recv() {
                let _ = self.engine.dispatch(event).await;
            }
        }

        fn sink(&self) -> EventSink {
            self.transport.last_sink().expect("a session was opened")
        }

        async fn audio(&mut self, secs: f64) {
            self.sink()
                .message(ServerMessage::audio(vec![silent_chunk(secs)]));
            self.drain().await;
        }

        fn notices(&mut self) -> Vec<Notice> {
            let mut out = Vec::new();
            while let Ok(n) = self.notices.try_recv() {
                out.push(n);
            }
            out
        }
    }

    // -----------------------------------------------------------------------
    // Play
    // -----------------------------------------------------------------------

    /// Play while disconnected reconnects and re-sends prompts and config
    /// before leaving `Stopped`.
    #[tokio::test]
    async fn play_while_disconnected_resyncs_first() {
        let mut h = harness();
        let mut config = GenerationConfig::default();
        config.bpm = Tunable::Pinned(90);
        h.engine = h.engine.with_config(config.clone());

        h.intent(Intent::Play).await;

        assert_eq!(h.engine.state(), PlaybackState::Loading);
        assert_eq!(h.transport.connects(), 1);
        assert_eq!(
            h.transport.sent(),
            vec![
                SentMessage::Prompts(vec![WirePrompt {
                    text: wrap_prompt_text("Shoegaze"),
                    weight: 1.0
                }]),
                SentMessage::Config(config.to_wire()),
                SentMessage::Control(PlaybackControl::Play),
            ]
        );
        assert!(h.engine.shared_state().lock().unwrap().connected);
        assert_eq!(h.output.resumes(), 1);
    }

    #[tokio::test]
    async fn play_fails_cleanly_when_connect_fails() {
        let mut h = harness();
        h.transport.fail_connects(true);

        h.intent(Intent::Play).await;

        assert_eq!(h.engine.state(), PlaybackState::Stopped);
        assert!(matches!(h.notices()[..], [Notice::ReconnectFailed(_)]));
    }

    #[tokio::test]
    async fn play_without_active_prompts_is_refused() {
        let mut h = harness_with(one_prompt(0.0));

        h.intent(Intent::Play).await;

        assert_eq!(h.engine.state(), PlaybackState::Stopped);
        assert_eq!(h.transport.connects(), 0);
        assert_eq!(h.notices(), vec![Notice::NoActivePrompts]);
    }

    #[tokio::test]
    async fn play_without_output_is_blocked() {
        let transport = MockTransport::new();
        let (notice_tx, mut notices) = mpsc::unbounded_channel();
        let mut engine = Engine::new(
            settings(),
            Arc::new(transport.clone()),
            None,
            Arc::new(ManualClock::new()),
            notice_tx,
        )
        .with_prompts(one_prompt(1.0));

        let _ = engine.dispatch(EngineEvent::Intent(Intent::Play)).await;

        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert_eq!(transport.connects(), 0);
        assert!(notices.try_recv().unwrap().is_blocking());
    }

    #[tokio::test]
    async fn second_play_is_a_no_op() {
        let mut h = harness();
        h.intent(Intent::Play).await;
        h.transport.clear_sent();

        h.intent(Intent::Play).await;
        assert!(h.transport.sent().is_empty());
        assert_eq!(h.transport.connects(), 1);
    }

    // -----------------------------------------------------------------------
    // Audio scheduling
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn lookahead_promotes_loading_to_playing() {
        let mut h = harness();
        h.intent(Intent::Play).await;
        h.audio(0.5).await;
        assert_eq!(h.engine.state(), PlaybackState::Loading);

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        h.drain().await;
        assert_eq!(h.engine.state(), PlaybackState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_during_lookahead_suppresses_promotion() {
        let mut h = harness();
        h.intent(Intent::Play).await;
        h.audio(0.5).await;
        h.intent(Intent::Pause).await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        h.drain().await;
        assert_eq!(h.engine.state(), PlaybackState::Paused);
    }

    #[tokio::test]
    async fn chunks_are_scheduled_back_to_back() {
        let mut h = harness();
        h.intent(Intent::Play).await;
        h.output.set_now(1.0);
        for _ in 0..3 {
            h.audio(0.5).await;
        }

        assert_eq!(h.output.starts(), vec![3.0, 3.5, 4.0]);
        assert_eq!(h.engine.scheduler.next_start_time(), 4.5);
    }

    #[tokio::test(start_paused = true)]
    async fn underrun_returns_to_loading_and_rearms() {
        let mut h = harness();
        h.intent(Intent::Play).await;
        h.audio(0.5).await; // 2.0 .. 2.5
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        h.drain().await;
        assert_eq!(h.engine.state(), PlaybackState::Playing);

        h.output.set_now(4.0);
        h.audio(0.5).await;

        assert_eq!(h.engine.state(), PlaybackState::Loading);
        assert_eq!(h.output.starts(), vec![2.0, 6.0]);
        assert_eq!(h.engine.shared_state().lock().unwrap().underruns, 1);
        assert!(h.notices().is_empty());

        tokio::time::sleep(Duration::from_millis(2_100)).await;
        h.drain().await;
        assert_eq!(h.engine.state(), PlaybackState::Playing);
    }

    #[tokio::test]
    async fn audio_while_paused_is_dropped() {
        let mut h = harness();
        h.intent(Intent::Play).await;
        h.intent(Intent::Pause).await;

        h.audio(0.5).await;
        assert!(h.output.starts().is_empty());
        assert_eq!(h.engine.scheduler.next_start_time(), 0.0);
    }

    // -----------------------------------------------------------------------
    // Pause / stop / toggle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn pause_resets_timeline_and_flushes_output() {
        let mut h = harness();
        h.intent(Intent::Play).await;
        h.audio(0.5).await;
        assert!(h.engine.scheduler.next_start_time() > 0.0);

        h.intent(Intent::Pause).await;

        assert_eq!(h.engine.state(), PlaybackState::Paused);
        assert_eq!(h.engine.scheduler.next_start_time(), 0.0);
        assert_eq!(h.output.flushes(), 1);
        assert_eq!(
            h.transport.sent().last(),
            Some(&SentMessage::Control(PlaybackControl::Pause))
        );
    }

    #[tokio::test]
    async fn stop_from_paused() {
        let mut h = harness();
        h.intent(Intent::Play).await;
        h.intent(Intent::Pause).await;
        h.intent(Intent::Stop).await;

        assert_eq!(h.engine.state(), PlaybackState::Stopped);
        assert_eq!(
            h.transport.sent().last(),
            Some(&SentMessage::Control(PlaybackControl::Stop))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_follows_button_semantics() {
        let mut h = harness();
        h.intent(Intent::Toggle).await;
        assert_eq!(h.engine.state(), PlaybackState::Loading);

        h.intent(Intent::Toggle).await;
        assert_eq!(h.engine.state(), PlaybackState::Stopped);

        h.intent(Intent::Toggle).await;
        h.audio(0.5).await;
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        h.drain().await;
        assert_eq!(h.engine.state(), PlaybackState::Playing);

        h.intent(Intent::Toggle).await;
        assert_eq!(h.engine.state(), PlaybackState::Paused);
    }

    // -----------------------------------------------------------------------
    // Connection loss
    // -----------------------------------------------------------------------

    /// An error while playing pauses, resets the timeline and notifies once.
    #[tokio::test]
    async fn error_while_playing_pauses_once() {
        let mut h = harness();
        h.intent(Intent::Play).await;
        h.audio(0.5).await;

        let sink = h.sink();
        sink.error("connection reset");
        sink.closed(CloseInfo::dropped("eof"));
        h.drain().await;

        assert_eq!(h.engine.state(), PlaybackState::Paused);
        assert_eq!(h.engine.scheduler.next_start_time(), 0.0);
        assert_eq!(h.notices(), vec![Notice::ConnectionLost]);
        assert!(!h.engine.shared_state().lock().unwrap().connected);
    }

    /// A clean close mid-stream means no more audio; playback must not sit
    /// in `Playing` over silence.
    #[tokio::test(start_paused = true)]
    async fn clean_close_while_playing_pauses_with_notice() {
        let mut h = harness();
        h.intent(Intent::Play).await;
        h.audio(0.5).await;
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        h.drain().await;
        assert_eq!(h.engine.state(), PlaybackState::Playing);

        h.sink().closed(CloseInfo::normal());
        h.drain().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        h.drain().await;

        assert_eq!(h.engine.state(), PlaybackState::Paused);
        assert_eq!(h.engine.scheduler.next_start_time(), 0.0);
        assert_eq!(h.output.flushes(), 1);
        assert_eq!(h.notices(), vec![Notice::ConnectionLost]);
        assert!(!h.engine.shared_state().lock().unwrap().connected);
    }

    #[tokio::test]
    async fn clean_close_while_paused_changes_nothing_visible() {
        let mut h = harness();
        h.intent(Intent::Play).await;
        h.intent(Intent::Pause).await;
        h.sink().closed(CloseInfo::normal());
        h.drain().await;

        assert_eq!(h.engine.state(), PlaybackState::Paused);
        assert!(h.notices().is_empty());
        assert!(!h.engine.shared_state().lock().unwrap().connected);

        h.intent(Intent::Play).await;
        assert_eq!(h.transport.connects(), 2);
        assert_eq!(h.engine.state(), PlaybackState::Loading);
    }

    #[tokio::test]
    async fn replay_after_loss_reconnects_and_ignores_old_session() {
        let mut h = harness();
        h.intent(Intent::Play).await;
        let old = h.sink();
        old.error("gone");
        h.drain().await;

        h.intent(Intent::Play).await;
        assert_eq!(h.transport.connects(), 2);
        assert_eq!(h.engine.state(), PlaybackState::Loading);

        old.message(ServerMessage::audio(vec![silent_chunk(0.5)]));
        old.error("late");
        h.drain().await;
        assert!(h.output.starts().is_empty());
        assert_eq!(h.engine.state(), PlaybackState::Loading);
    }

    // -----------------------------------------------------------------------
    // Steering
    // -----------------------------------------------------------------------

    /// Weight 0 pushes nothing; raising it to 1 sends exactly one wrapped
    /// prompt.
    #[tokio::test]
    async fn zero_weight_prompt_is_not_pushed() {
        let mut h = harness_with(PromptSet::from_prompts(vec![WeightedPrompt::new(
            "prompt-0", "Funk", 1.0,
        )]));
        h.intent(Intent::Play).await;
        h.transport.clear_sent();

        let mut set = one_prompt(1.0);
        set.upsert(WeightedPrompt::new("prompt-0", "Funk", 0.0));
        set.upsert(WeightedPrompt::new("prompt-1", "Chiptune", 0.0));
        h.intent(Intent::UpdatePrompts(set.clone())).await;
        assert!(h.transport.sent().is_empty());

        set.set_weight("prompt-1", 1.0);
        h.intent(Intent::UpdatePrompts(set)).await;
        assert_eq!(
            h.transport.sent_prompts(),
            vec![vec![WirePrompt {
                text: wrap_prompt_text("Chiptune"),
                weight: 1.0
            }]]
        );
    }

    #[tokio::test]
    async fn prompt_updates_are_throttled() {
        let mut h = harness();
        h.intent(Intent::Play).await;
        h.transport.clear_sent();

        h.intent(Intent::UpdatePrompts(one_prompt(0.5))).await;
        h.clock.advance(Duration::from_millis(100));
        h.intent(Intent::UpdatePrompts(one_prompt(1.5))).await;
        assert_eq!(h.transport.sent_prompts().len(), 1);
        assert_eq!(h.transport.sent_prompts()[0][0].weight, 0.5);

        h.clock.advance(Duration::from_millis(200));
        h.intent(Intent::UpdatePrompts(one_prompt(2.0))).await;
        assert_eq!(h.transport.sent_prompts().len(), 2);
        assert_eq!(h.transport.sent_prompts()[1][0].weight, 2.0);
    }

    #[tokio::test]
    async fn filtered_prompt_stays_out_until_reset() {
        let mut set = one_prompt(1.0);
        set.upsert(WeightedPrompt::new("prompt-1", "Thrash", 1.0));
        let mut h = harness_with(set.clone());
        h.intent(Intent::Play).await;

        h.sink()
            .message(ServerMessage::filtered(wrap_prompt_text("Thrash"), Some("unsafe")));
        h.drain().await;
        assert_eq!(
            h.notices(),
            vec![Notice::PromptFiltered {
                text: "Thrash".into(),
                reason: Some("unsafe".into())
            }]
        );
        assert_eq!(h.engine.state(), PlaybackState::Loading);
        assert_eq!(
            h.engine.shared_state().lock().unwrap().filtered,
            vec!["Thrash".to_string()]
        );

        h.transport.clear_sent();
        set.set_weight("prompt-1", 2.0);
        h.intent(Intent::UpdatePrompts(set)).await;
        let pushed = h.transport.sent_prompts();
        assert_eq!(pushed.len(), 1);
        assert!(pushed[0].iter().all(|p| p.text != wrap_prompt_text("Thrash")));

        h.intent(Intent::Reset).await;
        assert!(h.engine.filter.is_empty());
        assert!(h.engine.shared_state().lock().unwrap().filtered.is_empty());
    }

    #[tokio::test]
    async fn config_patch_is_pushed_without_auto_fields() {
        let mut h = harness();
        h.intent(Intent::Play).await;
        h.transport.clear_sent();

        let patch = GenerationPatch::parse("bpm", "128").unwrap();
        h.intent(Intent::UpdateConfig(patch)).await;

        let configs = h.transport.sent_configs();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].bpm, Some(128));
        assert_eq!(configs[0].temperature, None);
    }

    #[tokio::test]
    async fn failed_push_pauses_with_notice() {
        let mut h = harness();
        h.intent(Intent::Play).await;
        h.audio(0.5).await;
        h.transport.fail_sends(true);

        h.intent(Intent::UpdatePrompts(one_prompt(1.5))).await;

        assert_eq!(h.engine.state(), PlaybackState::Paused);
        assert_eq!(h.engine.scheduler.next_start_time(), 0.0);
        assert!(matches!(h.notices()[..], [Notice::OperationFailed(_)]));
    }

    // -----------------------------------------------------------------------
    // Reset
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn reset_restores_defaults_and_resumes() {
        let mut h = harness();
        let mut config = GenerationConfig::default();
        config.density = Tunable::Pinned(0.8);
        h.engine = h.engine.with_config(config);
        h.intent(Intent::Play).await;
        h.transport.clear_sent();

        h.intent(Intent::Reset).await;

        assert_eq!(h.engine.state(), PlaybackState::Paused);
        assert_eq!(h.engine.config, GenerationConfig::default());
        assert_eq!(
            h.transport.sent(),
            vec![
                SentMessage::Control(PlaybackControl::Pause),
                SentMessage::Control(PlaybackControl::ResetContext),
                SentMessage::Config(GenerationConfig::default().to_wire()),
            ]
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        h.drain().await;
        assert_eq!(h.engine.state(), PlaybackState::Loading);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_while_stopped_stays_stopped() {
        let mut h = harness();
        h.intent(Intent::Reset).await;
        assert_eq!(h.transport.connects(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        h.drain().await;
        assert_eq!(h.engine.state(), PlaybackState::Stopped);
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn run_exits_on_shutdown_and_closes_session() {
        let h = harness();
        let handle = h.engine.handle();
        let state = h.engine.shared_state();

        assert!(handle.play());
        assert!(handle.shutdown());
        h.engine.run().await;

        assert_eq!(state.lock().unwrap().playback, PlaybackState::Loading);
        assert_eq!(h.transport.closes(), 1);
        assert!(!handle.play());
    }
}
