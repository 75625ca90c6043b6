//! In-memory [`Transport`] double for unit tests.
//!
//! Records every outbound message, counts connects and closes, keeps the
//! [`EventSink`] of each session so tests can play the server's side, and
//! can be told to fail connects, sends or closes.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::control::{WireConfig, WirePrompt};
use crate::session::transport::{
    EventSink, PlaybackControl, Session, SessionError, SessionParams, Transport,
};

#[derive(Debug, Clone, PartialEq)]
pub enum SentMessage {
    Prompts(Vec<WirePrompt>),
    Config(WireConfig),
    Control(PlaybackControl),
}

#[derive(Default)]
struct Inner {
    sent: Vec<SentMessage>,
    sinks: Vec<EventSink>,
    connects: usize,
    closes: usize,
    fail_connects: bool,
    fail_sends: bool,
    fail_closes: bool,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.inner.lock().unwrap().sent.clone()
    }

    pub fn sent_prompts(&self) -> Vec<Vec<WirePrompt>> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                SentMessage::Prompts(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn sent_configs(&self) -> Vec<WireConfig> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                SentMessage::Config(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn clear_sent(&self) {
        self.inner.lock().unwrap().sent.clear();
    }

    pub fn connects(&self) -> usize {
        self.inner.lock().unwrap().connects
    }

    pub fn closes(&self) -> usize {
        self.inner.lock().unwrap().closes
    }

    /// Sink of the most recently opened session.
    pub fn last_sink(&self) -> Option<EventSink> {
        self.inner.lock().unwrap().sinks.last().cloned()
    }

    /// Sink of the `n`-th opened session (0-based).
    pub fn sink(&self, n: usize) -> Option<EventSink> {
        self.inner.lock().unwrap().sinks.get(n).cloned()
    }

    pub fn fail_connects(&self, fail: bool) {
        self.inner.lock().unwrap().fail_connects = fail;
    }

    pub fn fail_sends(&self, fail: bool) {
        self.inner.lock().unwrap().fail_sends = fail;
    }

    pub fn fail_closes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_closes = fail;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        _params: &SessionParams,
        sink: EventSink,
    ) -> Result<Box<dyn Session>, SessionError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connects += 1;
        if inner.fail_connects {
            return Err(SessionError::Connect("refused".into()));
        }
        inner.sinks.push(sink);
        Ok(Box::new(MockSession {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockSession {
    inner: Arc<Mutex<Inner>>,
}

impl MockSession {
    fn record(&self, what: &'static str, msg: SentMessage) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_sends {
            return Err(SessionError::Send {
                what,
                reason: "broken pipe".into(),
            });
        }
        inner.sent.push(msg);
        Ok(())
    }
}

#[async_trait]
impl Session for MockSession {
    async fn set_weighted_prompts(&self, prompts: &[WirePrompt]) -> Result<(), SessionError> {
        self.record("prompts", SentMessage::Prompts(prompts.to_vec()))
    }

    async fn set_music_generation_config(&self, config: &WireConfig) -> Result<(), SessionError> {
        self.record("config", SentMessage::Config(config.clone()))
    }

    async fn play(&self) -> Result<(), SessionError> {
        self.record("play", SentMessage::Control(PlaybackControl::Play))
    }

    async fn pause(&self) -> Result<(), SessionError> {
        self.record("pause", SentMessage::Control(PlaybackControl::Pause))
    }

    async fn stop(&self) -> Result<(), SessionError> {
        self.record("stop", SentMessage::Control(PlaybackControl::Stop))
    }

    async fn reset_context(&self) -> Result<(), SessionError> {
        self.record("reset", SentMessage::Control(PlaybackControl::ResetContext))
    }

    async fn close(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().unwrap();
        inner.closes += 1;
        if inner.fail_closes {
            return Err(SessionError::Closed);
        }
        Ok(())
    }
}
