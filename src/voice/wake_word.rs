//! Wake word detection
//!
//! Detection runs on final transcripts from the streaming STT session: a
//! transcript activates the assistant when it contains one of the configured
//! wake words, case-insensitively.

use regex::Regex;

use crate::{Error, Result};

/// Characters trimmed from the start of the text following a wake word
const LEADING_NOISE: &[char] = &[',', '.', '!', '?', ':', ';', '-'];

/// A wake word found in a transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeMatch {
    /// The configured wake word that matched
    pub wake_word: String,
    /// Text after the first occurrence, trimmed; empty if nothing followed
    pub trailing: String,
}

/// Detects wake words in transcript text
#[derive(Debug, Clone)]
pub struct WakeWordDetector {
    wake_words: Vec<String>,
    pattern: Regex,
    leading: Regex,
}

impl WakeWordDetector {
    /// Create a new wake word detector
    ///
    /// # Arguments
    ///
    /// * `wake_words` - List of wake words to detect (e.g., "jarvis")
    ///
    /// # Errors
    ///
    /// Returns error if no usable wake word was given
    pub fn new(wake_words: Vec<String>) -> Result<Self> {
        let normalized: Vec<String> = wake_words
            .into_iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();

        if normalized.is_empty() {
            return Err(Error::Config("at least one wake word is required".to_string()));
        }

        let alternatives = normalized
            .iter()
            .map(|w| regex::escape(w))
            .collect::<Vec<_>>()
            .join("|");

        let pattern = Regex::new(&format!("(?i)(?:{alternatives})"))
            .map_err(|e| Error::Config(format!("invalid wake word: {e}")))?;
        let leading = Regex::new(&format!("(?is)^.*?(?:{alternatives})"))
            .map_err(|e| Error::Config(format!("invalid wake word: {e}")))?;

        tracing::debug!(wake_words = ?normalized, "wake word detector initialized");

        Ok(Self {
            wake_words: normalized,
            pattern,
            leading,
        })
    }

    /// Check if transcribed text contains a wake word
    #[must_use]
    pub fn detect(&self, transcript: &str) -> Option<WakeMatch> {
        let found = self.pattern.find(transcript)?;
        let wake_word = found.as_str().to_lowercase();
        let trailing = clean_fragment(&transcript[found.end()..]);

        tracing::info!(wake_word, transcript, "wake word detected");
        Some(WakeMatch {
            wake_word,
            trailing,
        })
    }

    /// Remove everything up to and including the first wake word occurrence
    ///
    /// Guards against the tail of a wake utterance being re-transcribed while
    /// capturing. Text without a wake word is returned trimmed.
    #[must_use]
    pub fn strip_leading(&self, transcript: &str) -> String {
        clean_fragment(&self.leading.replace(transcript, ""))
    }

    /// Get the configured wake words
    #[must_use]
    pub fn wake_words(&self) -> &[String] {
        &self.wake_words
    }
}

fn clean_fragment(text: &str) -> String {
    text.trim_start_matches(|c: char| c.is_whitespace() || LEADING_NOISE.contains(&c))
        .trim_end()
        .to_string()
}
