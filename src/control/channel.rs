//! Throttled delivery of prompts and generation config.
//!
//! Prompts and config each get their own [`RateLimiter`].  An update that
//! arrives inside the interval is dropped outright; what goes out on an
//! accepted update is the state current at that moment, so intermediate
//! edits are superseded rather than queued.
//!
//! A prompt push with nothing to send (every prompt switched off or
//! filtered) is skipped before the limiter is consulted, so it does not use
//! up the next slot.

use std::sync::Arc;
use std::time::Duration;

use crate::control::filter::FilterTracker;
use crate::control::generation::GenerationConfig;
use crate::control::prompt::PromptSet;
use crate::control::throttle::{Clock, RateLimiter, Throttle};
use crate::session::{Session, SessionError};

/// Result of a push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    Sent,
    /// Inside the throttle interval; discarded.
    Dropped,
    /// Nothing eligible to send.
    Empty,
}

/// Rate-limited outbound channel for steering updates.
pub struct ControlChannel {
    prompts: RateLimiter,
    config: RateLimiter,
    clock: Arc<dyn Clock>,
}

impl ControlChannel {
    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            prompts: RateLimiter::new(interval),
            config: RateLimiter::new(interval),
            clock,
        }
    }

    /// Push the currently active, unfiltered prompts.
    pub async fn push_prompts(
        &mut self,
        session: &dyn Session,
        prompts: &PromptSet,
        filtered: &FilterTracker,
    ) -> Result<Push, SessionError> {
        let wire = prompts.to_wire(filtered);
        if wire.is_empty() {
            log::debug!("control: no active prompts, nothing to push");
            return Ok(Push::Empty);
        }
        if self.prompts.try_accept(self.clock.now()) == Throttle::Dropped {
            log::debug!("control: prompt update dropped by throttle");
            return Ok(Push::Dropped);
        }
        log::debug!("control: pushing {} prompt(s)", wire.len());
        session.set_weighted_prompts(&wire).await?;
        Ok(Push::Sent)
    }

    /// Push the generation config.  Auto fields are omitted on the wire.
    pub async fn push_config(
        &mut self,
        session: &dyn Session,
        config: &GenerationConfig,
    ) -> Result<Push, SessionError> {
        if self.config.try_accept(self.clock.now()) == Throttle::Dropped {
            log::debug!("control: config update dropped by throttle");
            return Ok(Push::Dropped);
        }
        session.set_music_generation_config(&config.to_wire()).await?;
        Ok(Push::Sent)
    }

    /// Re-open both channels, e.g. after a context reset.
    pub fn reset(&mut self) {
        self.prompts.reset();
        self.config.reset();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
