//! User-facing notices.
//!
//! Every failure the engine recovers from is turned into a state transition
//! plus one [`Notice`].  The `Display` text is what the presentation layer
//! shows.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The session failed while in use.  Playback is paused; the user has to
    /// press play again.
    ConnectionLost,
    /// Connecting (or re-connecting) on play failed.
    ReconnectFailed(String),
    /// A prompt was rejected by moderation.  Playback continues.
    PromptFiltered { text: String, reason: Option<String> },
    /// Play was requested with no prompt that could be sent.
    NoActivePrompts,
    /// Sending prompts, config or a playback control failed.
    OperationFailed(String),
    /// Playback drained before new audio arrived.  Only sent when enabled.
    Underrun,
    /// No usable output device; playback cannot start.
    OutputUnavailable(String),
}

impl Notice {
    /// Blocking notices mean playback cannot proceed until the cause is
    /// fixed outside the app.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Notice::OutputUnavailable(_))
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::ConnectionLost => write!(f, "Connection error, please restart audio."),
            Notice::ReconnectFailed(reason) => write!(f, "Could not connect: {reason}"),
            Notice::PromptFiltered { text, reason } => match reason {
                Some(reason) => write!(f, "Prompt \"{text}\" was filtered: {reason}"),
                None => write!(f, "Prompt \"{text}\" was filtered"),
            },
            Notice::NoActivePrompts => {
                write!(f, "There needs to be one active prompt to play.")
            }
            Notice::OperationFailed(what) => write!(f, "{what}"),
            Notice::Underrun => write!(f, "Playback ran dry, buffering"),
            Notice::OutputUnavailable(reason) => write!(f, "Audio output unavailable: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_texts() {
        assert_eq!(
            Notice::ConnectionLost.to_string(),
            "Connection error, please restart audio."
        );
        assert_eq!(
            Notice::NoActivePrompts.to_string(),
            "There needs to be one active prompt to play."
        );
        assert_eq!(
            Notice::PromptFiltered {
                text: "Thrash".into(),
                reason: Some("unsafe".into())
            }
            .to_string(),
            "Prompt \"Thrash\" was filtered: unsafe"
        );
    }

    #[test]
    fn only_missing_output_blocks() {
        assert!(Notice::OutputUnavailable("no device".into()).is_blocking());
        assert!(!Notice::ConnectionLost.is_blocking());
        assert!(!Notice::NoActivePrompts.is_blocking());
    }
}
