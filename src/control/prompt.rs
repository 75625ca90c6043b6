//! Weighted prompts: the text steering instructions sent to the generator.
//!
//! A [`PromptSet`] keeps prompts in a stable, user-visible order keyed by
//! [`WeightedPrompt::id`].  Only prompts whose weight exceeds
//! [`MIN_ACTIVE_WEIGHT`] and that the service has not filtered are ever sent;
//! their text is wrapped with [`PROMPT_PREFIX`] / [`PROMPT_SUFFIX`] on the way
//! out (see [`wrap_prompt_text`]).

use serde::{Deserialize, Serialize};

use crate::control::filter::FilterTracker;

// ---------------------------------------------------------------------------
// Wire template
// ---------------------------------------------------------------------------

/// Instruction placed in front of every prompt text sent to the service.
pub const PROMPT_PREFIX: &str = "Instrumental music in the style of ";

/// Instruction appended to every prompt text sent to the service.
pub const PROMPT_SUFFIX: &str = ", continuous and seamless";

/// Prompts at or below this weight are treated as switched off.
pub const MIN_ACTIVE_WEIGHT: f32 = 0.01;

/// Upper bound of a prompt weight.
pub const MAX_WEIGHT: f32 = 2.0;

/// Wrap a user prompt in the fixed instructional template.
///
/// ```
/// use promptdj::control::{wrap_prompt_text, PROMPT_PREFIX, PROMPT_SUFFIX};
///
/// let wrapped = wrap_prompt_text("Bossa Nova");
/// assert_eq!(wrapped, format!("{PROMPT_PREFIX}Bossa Nova{PROMPT_SUFFIX}"));
/// ```
pub fn wrap_prompt_text(text: &str) -> String {
    format!("{PROMPT_PREFIX}{text}{PROMPT_SUFFIX}")
}

/// Strip the instructional template from `text` if it carries one.
///
/// The service echoes the text it received when it rejects a prompt, so
/// this recovers the user's own wording.  Text without the template is
/// returned unchanged.
pub fn unwrap_prompt_text(text: &str) -> &str {
    text.strip_prefix(PROMPT_PREFIX)
        .and_then(|rest| rest.strip_suffix(PROMPT_SUFFIX))
        .unwrap_or(text)
}

// ---------------------------------------------------------------------------
// WeightedPrompt
// ---------------------------------------------------------------------------

/// A text instruction with an influence weight in `[0, 2]`.
///
/// `color` is presentation metadata carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedPrompt {
    pub id: String,
    pub text: String,
    pub weight: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl WeightedPrompt {
    /// Build a prompt; `weight` is clamped into `[0, MAX_WEIGHT]`.
    pub fn new(id: impl Into<String>, text: impl Into<String>, weight: f32) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            weight: clamp_weight(weight),
            color: None,
        }
    }

    /// Attach a display color.
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Whether the weight is high enough for the prompt to be sent.
    pub fn is_active(&self) -> bool {
        self.weight > MIN_ACTIVE_WEIGHT
    }
}

fn clamp_weight(weight: f32) -> f32 {
    if weight.is_nan() {
        0.0
    } else {
        weight.clamp(0.0, MAX_WEIGHT)
    }
}

// ---------------------------------------------------------------------------
// WirePrompt
// ---------------------------------------------------------------------------

/// A prompt in the shape the service expects: wrapped text plus weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePrompt {
    pub text: String,
    pub weight: f32,
}

// ---------------------------------------------------------------------------
// PromptSet
// ---------------------------------------------------------------------------

/// Ordered collection of prompts with stable identities.
///
/// Order is insertion order and is preserved across edits, so a persisted
/// set reloads with the same layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptSet {
    prompts: Vec<WeightedPrompt>,
}

impl PromptSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_prompts(prompts: Vec<WeightedPrompt>) -> Self {
        let mut set = Self::new();
        for prompt in prompts {
            set.upsert(prompt);
        }
        set
    }

    pub fn iter(&self) -> impl Iterator<Item = &WeightedPrompt> {
        self.prompts.iter()
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&WeightedPrompt> {
        self.prompts.iter().find(|p| p.id == id)
    }

    /// Insert `prompt`, replacing any existing entry with the same id in place.
    pub fn upsert(&mut self, mut prompt: WeightedPrompt) {
        prompt.weight = clamp_weight(prompt.weight);
        match self.prompts.iter_mut().find(|p| p.id == prompt.id) {
            Some(existing) => *existing = prompt,
            None => self.prompts.push(prompt),
        }
    }

    /// Remove the prompt with `id`; returns it when present.
    pub fn remove(&mut self, id: &str) -> Option<WeightedPrompt> {
        let idx = self.prompts.iter().position(|p| p.id == id)?;
        Some(self.prompts.remove(idx))
    }

    /// Change the weight of `id`.  Returns `false` for an unknown id.
    pub fn set_weight(&mut self, id: &str, weight: f32) -> bool {
        match self.prompts.iter_mut().find(|p| p.id == id) {
            Some(p) => {
                p.weight = clamp_weight(weight);
                true
            }
            None => false,
        }
    }

    /// Change the text of `id`.  Returns `false` for an unknown id.
    pub fn set_text(&mut self, id: &str, text: impl Into<String>) -> bool {
        match self.prompts.iter_mut().find(|p| p.id == id) {
            Some(p) => {
                p.text = text.into();
                true
            }
            None => false,
        }
    }

    /// Next free id of the form `prompt-N`.
    pub fn next_id(&self) -> String {
        let next = self
            .prompts
            .iter()
            .filter_map(|p| p.id.strip_prefix("prompt-")?.parse::<u32>().ok())
            .max()
            .map_or(0, |n| n + 1);
        format!("prompt-{next}")
    }

    /// The prompts that would be sent right now, already wrapped.
    ///
    /// Skips prompts at or below [`MIN_ACTIVE_WEIGHT`] and any whose text is
    /// in `filtered`.
    pub fn to_wire(&self, filtered: &FilterTracker) -> Vec<WirePrompt> {
        self.prompts
            .iter()
            .filter(|p| p.is_active() && !filtered.contains(&p.text))
            .map(|p| WirePrompt {
                text: wrap_prompt_text(&p.text),
                weight: p.weight,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
