//! Configuration and persisted user data.
//!
//! Provides `AppConfig` (top-level settings) with its per-subsystem sections,
//! `AppPaths` for cross-platform data directories, TOML persistence via
//! `AppConfig::load` / `AppConfig::save`, and the JSON prompt palette.

pub mod paths;
pub mod prompts;
pub mod settings;

pub use paths::{AppPaths, CONFIG_DIR_VAR};
pub use prompts::{default_prompts, PromptStore, PromptStoreError};
pub use settings::{AppConfig, ControlConfig, PlaybackConfig, SessionConfig};
