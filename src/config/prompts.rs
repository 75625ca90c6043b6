//! Persisted prompt palette.
//!
//! [`PromptStore`] keeps the user's [`PromptSet`] as JSON next to
//! `settings.toml`.  A missing or unreadable file yields
//! [`default_prompts`] so the app always starts with something to play.

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::AppPaths;
use crate::control::{PromptSet, WeightedPrompt};

/// Style prompts offered on first run.
pub const DEFAULT_STYLES: [&str; 16] = [
    "Bossa Nova",
    "Chillwave",
    "Drum and Bass",
    "Post Punk",
    "Shoegaze",
    "Funk",
    "Chiptune",
    "Lush Strings",
    "Sparkling Arpeggios",
    "Staccato Rhythms",
    "Punchy Kick",
    "Dubstep",
    "K Pop",
    "Neo Soul",
    "Trip Hop",
    "Thrash",
];

/// How many of the default prompts start switched on.
pub const DEFAULT_ACTIVE: usize = 3;

const COLORS: [&str; 8] = [
    "#9900ff", "#5200ff", "#ff25f6", "#2af6de", "#ffdd28", "#3dffab", "#d8ff3e", "#d9b2ff",
];

// ---------------------------------------------------------------------------
// PromptStoreError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PromptStoreError {
    #[error("failed to access prompt file: {0}")]
    Io(#[from] std::io::Error),

    #[error("prompt file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// The first-run palette: [`DEFAULT_STYLES`] with the first
/// [`DEFAULT_ACTIVE`] at weight 1 and the rest at 0.
pub fn default_prompts() -> PromptSet {
    PromptSet::from_prompts(
        DEFAULT_STYLES
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let weight = if i < DEFAULT_ACTIVE { 1.0 } else { 0.0 };
                WeightedPrompt::new(format!("prompt-{i}"), *text, weight)
                    .with_color(COLORS[i % COLORS.len()])
            })
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// PromptStore
// ---------------------------------------------------------------------------

pub struct PromptStore {
    path: PathBuf,
}

impl PromptStore {
    /// Store at the platform-appropriate `prompts.json`.
    pub fn open_default() -> Self {
        Self::new(AppPaths::new().prompts_file)
    }

    /// Store at an explicit path (useful for tests).
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved set.  `Ok(None)` when nothing has been saved yet.
    pub fn load(&self) -> Result<Option<PromptSet>, PromptStoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Read the saved set, falling back to [`default_prompts`].
    pub fn load_or_default(&self) -> PromptSet {
        match self.load() {
            Ok(Some(set)) => set,
            Ok(None) => default_prompts(),
            Err(e) => {
                log::warn!("prompts: ignoring {}: {e}", self.path.display());
                default_prompts()
            }
        }
    }

    pub fn save(&self, prompts: &PromptSet) -> Result<(), PromptStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(prompts)?)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::FilterTracker;
    use tempfile::tempdir;

    fn store_in_temp() -> (PromptStore, tempfile::TempDir) {
        let dir = tempdir().expect("temp dir");
        let store = PromptStore::new(dir.path().join("prompts.json"));
        (store, dir)
    }

    #[test]
    fn default_palette_has_three_active() {
        let set = default_prompts();
        assert_eq!(set.len(), 16);
        assert_eq!(set.iter().filter(|p| p.is_active()).count(), 3);
        assert_eq!(set.to_wire(&FilterTracker::new()).len(), 3);
        assert!(set.iter().all(|p| p.color.is_some()));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let (store, _dir) = store_in_temp();
        assert!(store.load().unwrap().is_none());
        assert_eq!(store.load_or_default(), default_prompts());
    }

    #[test]
    fn corrupt_file_gives_defaults() {
        let (store, _dir) = store_in_temp();
        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(store.load(), Err(PromptStoreError::Json(_))));
        assert_eq!(store.load_or_default(), default_prompts());
    }

    #[test]
    fn save_then_load_keeps_order_and_edits() {
        let (store, _dir) = store_in_temp();
        let mut set = default_prompts();
        set.set_weight("prompt-5", 1.5);
        set.set_text("prompt-0", "Samba");
        store.save(&set).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, set);
        assert_eq!(loaded.iter().next().map(|p| p.text.as_str()), Some("Samba"));
    }

    #[test]
    fn save_creates_parent_dirs() {
        let dir = tempdir().expect("temp dir");
        let store = PromptStore::new(dir.path().join("nested/deeper/prompts.json"));
        store.save(&default_prompts()).unwrap();
        assert!(store.path().exists());
    }
}
