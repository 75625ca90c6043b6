//! Moderation bookkeeping.
//!
//! [`FilterTracker`] remembers every prompt text the service rejected so the
//! control channel can leave it out of later pushes.  The set only grows;
//! [`FilterTracker::clear`] is called on an explicit context reset and
//! nowhere else.

use std::collections::BTreeSet;

use crate::control::prompt::unwrap_prompt_text;

/// Set of prompt texts rejected by the remote moderation.
#[derive(Debug, Clone, Default)]
pub struct FilterTracker {
    texts: BTreeSet<String>,
}

impl FilterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rejected text.  Returns `true` if it was not known before.
    ///
    /// The service reports the wrapped text it received; the instructional
    /// template is stripped so membership matches the user's prompt text.
    pub fn insert(&mut self, text: &str) -> bool {
        let text = unwrap_prompt_text(text);
        let added = self.texts.insert(text.to_string());
        if added {
            log::info!("control: prompt filtered by service: {text:?}");
        }
        added
    }

    pub fn contains(&self, text: &str) -> bool {
        self.texts.contains(text)
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Filtered texts in sorted order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.texts.iter().map(String::as_str)
    }

    /// Forget every rejection.  Only an explicit context reset calls this.
    pub fn clear(&mut self) {
        if !self.texts.is_empty() {
            log::debug!("control: clearing {} filtered prompt(s)", self.texts.len());
        }
        self.texts.clear();
    }
}
