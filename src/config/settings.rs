//! `settings.toml`: one section per subsystem, each with serde defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::control::GenerationConfig;

/// Environment variables consulted for the API key, in order.
pub const API_KEY_VARS: [&str; 2] = ["API_KEY", "GEMINI_API_KEY"];

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Connection to the live music service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Used when none of [`API_KEY_VARS`] is set.
    pub api_key: Option<String>,
    /// WebSocket endpoint of the bidirectional music generation service.
    pub endpoint: String,
    /// Model identifier sent in the setup message.
    pub model: String,
    /// A session confirmed healthy within this many milliseconds is reused
    /// without a liveness probe.
    pub probe_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateMusic".into(),
            model: "models/lyria-realtime-exp".into(),
            probe_interval_ms: 1_000,
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackConfig
// ---------------------------------------------------------------------------

/// Audio stream format and scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Sample rate of the incoming stream in Hz.
    pub sample_rate: u32,
    /// Interleaved channels in the incoming stream.
    pub channels: u16,
    /// Look-ahead buffered before playback starts and after an under-run.
    pub buffer_time_ms: u64,
    /// Length of the gain ramp on play, pause and stop.
    pub fade_ms: u64,
    /// Surface under-runs as a notice instead of only logging them.
    pub notify_on_underrun: bool,
    /// Delay between a context reset and resuming playback.
    pub reset_resume_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            buffer_time_ms: 2_000,
            fade_ms: 100,
            notify_on_underrun: false,
            reset_resume_ms: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// ControlConfig
// ---------------------------------------------------------------------------

/// Outbound steering updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Minimum spacing between accepted prompt (or config) pushes.
    pub throttle_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { throttle_ms: 250 }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Everything in `settings.toml`.  Missing sections and fields take their
/// defaults, so a partial file is fine.
///
/// ```rust,no_run
/// use promptdj::config::AppConfig;
///
/// let mut config = AppConfig::load().unwrap();
/// config.playback.buffer_time_ms = 3_000;
/// config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub playback: PlaybackConfig,
    pub control: ControlConfig,
    /// Generation settings the engine starts with.
    pub generation: GenerationConfig,
}

impl AppConfig {
    /// Read `settings.toml` from [`AppPaths`]; defaults on first run.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("config: {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Write to `path`, creating its directory if needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let content = toml::to_string_pretty(self).context("serialising settings")?;
        std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))
    }

    /// The API key: the first non-blank of `API_KEY`, `GEMINI_API_KEY` and
    /// `session.api_key`.
    pub fn api_key(&self) -> Option<String> {
        Self::api_key_with(|name| std::env::var(name).ok(), self.session.api_key.as_deref())
    }

    fn api_key_with(
        lookup: impl Fn(&str) -> Option<String>,
        configured: Option<&str>,
    ) -> Option<String> {
        API_KEY_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .chain(configured.map(str::to_owned))
            .find(|key| !key.trim().is_empty())
    }

    pub fn buffer_time(&self) -> Duration {
        Duration::from_millis(self.playback.buffer_time_ms)
    }

    pub fn fade(&self) -> Duration {
        Duration::from_millis(self.playback.fade_ms)
    }

    pub fn reset_resume_delay(&self) -> Duration {
        Duration::from_millis(self.playback.reset_resume_ms)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.control.throttle_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.session.probe_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
