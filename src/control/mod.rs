//! User-driven steering: weighted prompts, generation config, moderation
//! bookkeeping and the rate-limited channel that ships them.
//!
//! * [`PromptSet`] / [`WeightedPrompt`]: ordered prompts with stable ids.
//! * [`GenerationConfig`] / [`Tunable`]: auto-or-pinned generation settings.
//! * [`FilterTracker`]: texts the service's moderation rejected.
//! * [`RateLimiter`]: lossy leading-edge throttle over a [`Clock`].
//! * [`ControlChannel`]: throttled pushes of prompts and config.

pub mod channel;
pub mod filter;
pub mod generation;
pub mod prompt;
pub mod throttle;

pub use channel::{ControlChannel, Push};
pub use filter::FilterTracker;
pub use generation::{GenerationConfig, GenerationPatch, PatchError, Scale, Tunable, WireConfig};
pub use prompt::{
    unwrap_prompt_text, wrap_prompt_text, PromptSet, WeightedPrompt, WirePrompt, MAX_WEIGHT,
    MIN_ACTIVE_WEIGHT, PROMPT_PREFIX, PROMPT_SUFFIX,
};
pub use throttle::{Clock, ManualClock, RateLimiter, SystemClock, Throttle};
