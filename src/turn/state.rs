//! Turn-taking state machine
//!
//! Pure and clock-injected: every operation takes `now`, so the engine and
//! the tests decide what time it is. The engine task is the only mutator.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::agent::ConversationTurn;
use crate::voice::WakeWordDetector;

/// Where the assistant is in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Waiting for the wake word
    #[default]
    Listening,
    /// Accumulating a query until the speaker goes quiet
    Capturing,
    /// A response cycle is in flight
    Processing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listening => write!(f, "LISTENING"),
            Self::Capturing => write!(f, "CAPTURING"),
            Self::Processing => write!(f, "PROCESSING"),
        }
    }
}

/// Generation carried by an armed silence timer
///
/// A firing whose token differs from the current generation is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SilenceTimerToken(pub u64);

impl fmt::Display for SilenceTimerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timing parameters
#[derive(Debug, Clone, Copy)]
pub struct TurnSettings {
    /// Silence that ends a query
    pub silence_timeout: Duration,
    /// Inactivity after which the conversation is dropped
    pub conversation_timeout: Duration,
    /// Slack for the elapsed-silence check at fire time
    pub silence_tolerance: Duration,
}

impl TurnSettings {
    /// Settings from the assistant configuration
    #[must_use]
    pub const fn from_config(config: &crate::config::AssistantConfig) -> Self {
        Self {
            silence_timeout: config.silence_timeout,
            conversation_timeout: config.conversation_timeout,
            silence_tolerance: config.silence_tolerance,
        }
    }
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self::from_config(&crate::config::AssistantConfig::default())
    }
}

/// What a final transcript did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalOutcome {
    /// Not a wake word while listening
    Ignored,
    /// Wake word heard; capture started (timer must be armed)
    Activated,
    /// Fragment appended to the query (timer must be re-armed)
    Appended,
    /// Speech arrived but left nothing after wake-word stripping (timer must be re-armed)
    Refreshed,
    /// A response is in flight; the transcript was discarded
    Dropped,
}

impl FinalOutcome {
    /// Whether the silence timer has to be (re-)armed
    #[must_use]
    pub const fn rearms_timer(&self) -> bool {
        matches!(self, Self::Activated | Self::Appended | Self::Refreshed)
    }
}

/// Verdict on a silence timer firing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerDecision {
    /// Token is not the current generation
    Stale,
    /// Not capturing anymore
    NotCapturing,
    /// Fired before the speaker was quiet long enough
    TooEarly {
        /// Silence still needed before the query is complete
        remaining: Duration,
    },
    /// Hand this query to the response generator; state is now PROCESSING
    Dispatch {
        /// Joined query buffer
        query: String,
        /// History snapshot for context
        history: Vec<ConversationTurn>,
    },
    /// Buffer empty, conversation still warm: keep waiting
    Continue,
    /// Buffer empty and idle too long: back to LISTENING, history gone
    ConversationExpired,
}

/// How a response cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// A reply was produced and spoken (or playback was attempted)
    Responded {
        /// The user's query
        query: String,
        /// The assistant's reply
        reply: String,
    },
    /// The speech was not meant for the assistant
    Ignored,
    /// The generator failed and an apology was spoken
    Fallback,
    /// The response task died
    Aborted,
}

/// Point-in-time copy of the state, for diagnostics and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSnapshot {
    pub state: SessionState,
    pub query_buffer: Vec<String>,
    pub history: Vec<ConversationTurn>,
    pub generation: SilenceTimerToken,
    pub dispatches: u64,
}

/// Turn-taking state
#[derive(Debug)]
pub struct TurnState {
    settings: TurnSettings,
    wake: WakeWordDetector,
    state: SessionState,
    query_buffer: Vec<String>,
    history: Vec<ConversationTurn>,
    generation: u64,
    dispatches: u64,
    last_fragment_at: Instant,
    last_conversation_at: Instant,
}

impl TurnState {
    /// Start in LISTENING
    #[must_use]
    pub const fn new(settings: TurnSettings, wake: WakeWordDetector, now: Instant) -> Self {
        Self {
            settings,
            wake,
            state: SessionState::Listening,
            query_buffer: Vec::new(),
            history: Vec::new(),
            generation: 0,
            dispatches: 0,
            last_fragment_at: now,
            last_conversation_at: now,
        }
    }

    /// Apply a final transcript
    pub fn handle_final(&mut self, text: &str, now: Instant) -> FinalOutcome {
        match self.state {
            SessionState::Listening => {
                let Some(found) = self.wake.detect(text) else {
                    tracing::trace!(text, "no wake word, still listening");
                    return FinalOutcome::Ignored;
                };

                self.history.clear();
                self.query_buffer.clear();
                if !found.trailing.is_empty() {
                    tracing::info!(fragment = %found.trailing, "captured");
                    self.query_buffer.push(found.trailing);
                }

                self.state = SessionState::Capturing;
                self.last_fragment_at = now;
                self.last_conversation_at = now;
                tracing::info!(state = %self.state, "wake word detected, capturing query");
                FinalOutcome::Activated
            }
            SessionState::Capturing => {
                let fragment = self.wake.strip_leading(text);
                self.last_fragment_at = now;

                if fragment.is_empty() {
                    return FinalOutcome::Refreshed;
                }

                tracing::info!(%fragment, "captured");
                self.query_buffer.push(fragment);
                FinalOutcome::Appended
            }
            SessionState::Processing => {
                tracing::debug!(text, "transcript during response cycle, dropping");
                FinalOutcome::Dropped
            }
        }
    }

    /// Advance the timer generation and return the new token
    ///
    /// Must be called once per arm; the returned token is the only one that
    /// can pass [`Self::evaluate_timer`].
    pub const fn bump_generation(&mut self) -> SilenceTimerToken {
        self.generation += 1;
        SilenceTimerToken(self.generation)
    }

    /// Decide what a timer firing means
    pub fn evaluate_timer(&mut self, token: SilenceTimerToken, now: Instant) -> TimerDecision {
        if token.0 != self.generation {
            tracing::trace!(%token, current = self.generation, "stale silence timer");
            return TimerDecision::Stale;
        }

        if self.state != SessionState::Capturing {
            return TimerDecision::NotCapturing;
        }

        let quiet = now.saturating_duration_since(self.last_fragment_at);
        let required = self
            .settings
            .silence_timeout
            .saturating_sub(self.settings.silence_tolerance);
        if quiet < required {
            tracing::debug!(quiet_ms = quiet.as_millis(), "silence timer fired early");
            return TimerDecision::TooEarly {
                remaining: self.settings.silence_timeout.saturating_sub(quiet),
            };
        }

        let idle = now.saturating_duration_since(self.last_conversation_at);
        let expired = idle > self.settings.conversation_timeout;

        if !self.query_buffer.is_empty() {
            let query = self.query_buffer.join(" ").trim().to_string();
            self.query_buffer.clear();

            if expired {
                tracing::info!("conversation went stale, clearing context before dispatch");
                self.history.clear();
            }

            self.state = SessionState::Processing;
            self.dispatches += 1;
            return TimerDecision::Dispatch {
                query,
                history: self.history.clone(),
            };
        }

        if expired {
            tracing::info!(
                idle_secs = idle.as_secs(),
                "conversation timed out, returning to wake word detection"
            );
            self.state = SessionState::Listening;
            self.history.clear();
            return TimerDecision::ConversationExpired;
        }

        TimerDecision::Continue
    }

    /// Close a response cycle and return to CAPTURING for a follow-up
    pub fn finish_response(&mut self, outcome: ResponseOutcome, now: Instant) {
        if self.state != SessionState::Processing {
            tracing::warn!(state = %self.state, "response finished outside a response cycle");
        }

        match outcome {
            ResponseOutcome::Responded { query, reply } => {
                self.history.push(ConversationTurn::user(query));
                self.history.push(ConversationTurn::assistant(reply));
                self.last_conversation_at = now;
            }
            ResponseOutcome::Ignored => {
                tracing::info!("ignoring unrelated speech");
            }
            ResponseOutcome::Fallback | ResponseOutcome::Aborted => {}
        }

        self.state = SessionState::Capturing;
        self.last_fragment_at = now;
        tracing::info!(history = self.history.len(), "ready for follow-up");
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Buffered fragments of the current query
    #[must_use]
    pub fn query_buffer(&self) -> &[String] {
        &self.query_buffer
    }

    /// Conversation so far
    #[must_use]
    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// Current timer generation
    #[must_use]
    pub const fn generation(&self) -> SilenceTimerToken {
        SilenceTimerToken(self.generation)
    }

    /// Copy out the observable state
    #[must_use]
    pub fn snapshot(&self) -> TurnSnapshot {
        TurnSnapshot {
            state: self.state,
            query_buffer: self.query_buffer.clone(),
            history: self.history.clone(),
            generation: self.generation(),
            dispatches: self.dispatches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SILENCE: Duration = Duration::from_secs(5);

    fn machine(now: Instant) -> TurnState {
        let wake = WakeWordDetector::new(vec!["jarvis".to_string()]).unwrap();
        let settings = TurnSettings {
            silence_timeout: SILENCE,
            conversation_timeout: Duration::from_secs(60),
            silence_tolerance: Duration::from_millis(100),
        };
        TurnState::new(settings, wake, now)
    }

    fn activate(turn: &mut TurnState, text: &str, now: Instant) -> SilenceTimerToken {
        assert_eq!(turn.handle_final(text, now), FinalOutcome::Activated);
        turn.bump_generation()
    }

    #[test]
    fn test_listening_ignores_unrelated_speech() {
        let now = Instant::now();
        let mut turn = machine(now);
        for text in ["good morning", "what's the weather", "turn on the lights"] {
            assert_eq!(turn.handle_final(text, now), FinalOutcome::Ignored);
        }
        assert_eq!(turn.state(), SessionState::Listening);
        assert!(turn.query_buffer().is_empty());
    }

    #[test]
    fn test_wake_seeds_buffer() {
        let now = Instant::now();
        let mut turn = machine(now);
        activate(&mut turn, "hey jarvis what time is it", now);
        assert_eq!(turn.state(), SessionState::Capturing);
        assert_eq!(turn.query_buffer(), ["what time is it"]);
    }

    #[test]
    fn test_capturing_strips_leading_wake_word() {
        let now = Instant::now();
        let mut turn = machine(now);
        activate(&mut turn, "jarvis", now);
        assert_eq!(turn.handle_final("Jarvis, play music", now), FinalOutcome::Appended);
        assert_eq!(turn.handle_final("jarvis", now), FinalOutcome::Refreshed);
        assert_eq!(turn.query_buffer(), ["play music"]);
    }

    #[test]
    fn test_stale_token_is_noop() {
        let start = Instant::now();
        let mut turn = machine(start);
        let first = activate(&mut turn, "jarvis what is rust", start);
        let _second = turn.bump_generation();

        let later = start + SILENCE * 2;
        assert_eq!(turn.evaluate_timer(first, later), TimerDecision::Stale);
        assert_eq!(turn.state(), SessionState::Capturing);
        assert_eq!(turn.query_buffer(), ["what is rust"]);
    }

    #[test]
    fn test_dispatch_after_silence() {
        let start = Instant::now();
        let mut turn = machine(start);
        activate(&mut turn, "jarvis tell me", start);
        turn.handle_final("a joke", start + Duration::from_secs(1));
        let token = turn.bump_generation();

        let early = start + Duration::from_secs(2);
        assert_eq!(
            turn.evaluate_timer(token, early),
            TimerDecision::TooEarly {
                remaining: Duration::from_secs(4)
            }
        );

        let fire = start + Duration::from_secs(6);
        let decision = turn.evaluate_timer(token, fire);
        assert_eq!(
            decision,
            TimerDecision::Dispatch {
                query: "tell me a joke".to_string(),
                history: Vec::new(),
            }
        );
        assert_eq!(turn.state(), SessionState::Processing);
        assert!(turn.query_buffer().is_empty());
        assert_eq!(turn.evaluate_timer(token, fire), TimerDecision::NotCapturing);
    }

    #[test]
    fn test_tolerance_window() {
        let start = Instant::now();
        let mut turn = machine(start);
        let token = activate(&mut turn, "jarvis hello", start);
        let within = start + SILENCE - Duration::from_millis(50);
        assert!(matches!(
            turn.evaluate_timer(token, within),
            TimerDecision::Dispatch { .. }
        ));
    }

    #[test]
    fn test_processing_drops_transcripts() {
        let start = Instant::now();
        let mut turn = machine(start);
        let token = activate(&mut turn, "jarvis hello", start);
        turn.evaluate_timer(token, start + SILENCE);
        assert_eq!(turn.handle_final("jarvis stop", start + SILENCE), FinalOutcome::Dropped);
        assert!(turn.query_buffer().is_empty());
    }

    #[test]
    fn test_responded_records_history() {
        let start = Instant::now();
        let mut turn = machine(start);
        let token = activate(&mut turn, "jarvis hello", start);
        turn.evaluate_timer(token, start + SILENCE);
        turn.finish_response(
            ResponseOutcome::Responded {
                query: "hello".to_string(),
                reply: "Hi there.".to_string(),
            },
            start + SILENCE,
        );
        assert_eq!(turn.state(), SessionState::Capturing);
        assert_eq!(
            turn.history(),
            [
                ConversationTurn::user("hello"),
                ConversationTurn::assistant("Hi there.")
            ]
        );
    }

    #[test]
    fn test_ignored_and_fallback_keep_history() {
        let start = Instant::now();
        let mut turn = machine(start);
        for outcome in [ResponseOutcome::Ignored, ResponseOutcome::Fallback] {
            assert!(turn.handle_final("jarvis something", start).rearms_timer());
            let token = turn.bump_generation();
            assert!(matches!(
                turn.evaluate_timer(token, start + SILENCE),
                TimerDecision::Dispatch { .. }
            ));
            turn.finish_response(outcome, start + SILENCE);
            assert!(turn.history().is_empty());
            assert_eq!(turn.state(), SessionState::Capturing);
        }
    }

    #[test]
    fn test_empty_buffer_continues_then_expires() {
        let start = Instant::now();
        let mut turn = machine(start);
        let token = activate(&mut turn, "jarvis", start);

        assert_eq!(turn.evaluate_timer(token, start + SILENCE), TimerDecision::Continue);
        assert_eq!(turn.state(), SessionState::Capturing);

        let token = turn.bump_generation();
        let late = start + Duration::from_secs(61);
        assert_eq!(
            turn.evaluate_timer(token, late),
            TimerDecision::ConversationExpired
        );
        assert_eq!(turn.state(), SessionState::Listening);
        assert!(turn.history().is_empty());
    }

    #[test]
    fn test_stale_conversation_cleared_before_dispatch() {
        let start = Instant::now();
        let mut turn = machine(start);
        let token = activate(&mut turn, "jarvis first", start);
        turn.evaluate_timer(token, start + SILENCE);
        turn.finish_response(
            ResponseOutcome::Responded {
                query: "first".to_string(),
                reply: "one".to_string(),
            },
            start + SILENCE,
        );

        let much_later = start + Duration::from_secs(120);
        turn.handle_final("second", much_later);
        let token = turn.bump_generation();
        let decision = turn.evaluate_timer(token, much_later + SILENCE);
        assert_eq!(
            decision,
            TimerDecision::Dispatch {
                query: "second".to_string(),
                history: Vec::new(),
            }
        );
    }

    #[test]
    fn test_wake_retrigger_clears_history() {
        let start = Instant::now();
        let mut turn = machine(start);
        let token = activate(&mut turn, "jarvis", start);
        let late = start + Duration::from_secs(61);
        turn.evaluate_timer(token, late);
        assert_eq!(turn.state(), SessionState::Listening);

        activate(&mut turn, "jarvis again", late);
        assert!(turn.history().is_empty());
        assert_eq!(turn.query_buffer(), ["again"]);
    }
}
