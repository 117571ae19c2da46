//! Jarvis - wake-word voice assistant
//!
//! This library provides the turn-taking core of a hands-free assistant:
//! - Audio capture on a dedicated thread feeding a bounded queue
//! - Streaming transcription with reconnect and echo suppression
//! - Wake word detection and debounced end-of-query detection
//! - Response generation with bounded conversation context
//! - Speech synthesis and playback
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌────────────────────┐  finals  ┌──────────────┐
//! │ Microphone   ├──────────►│ TranscriptSession  ├─────────►│ TurnEngine   │
//! │ (own thread) │  bounded  │ forward | receive  │  events  │ state, timer │
//! └──────────────┘   queue   └─────────▲──────────┘          └──────┬───────┘
//!                                      │ speaking flag              │ query
//!                            ┌─────────┴──────────┐          ┌──────▼───────┐
//!                            │ SpeechPlaybackSink │◄─────────┤ Response     │
//!                            │ synthesis, device  │  reply   │ Dispatcher   │
//!                            └────────────────────┘          └──────────────┘
//! ```

pub mod agent;
pub mod assistant;
pub mod config;
pub mod error;
pub mod session;
pub mod setup;
pub mod turn;
pub mod voice;

pub use agent::{ConversationTurn, Reply, ResponseDispatcher, ResponseGenerator, Role};
pub use assistant::Assistant;
pub use config::Config;
pub use error::{Error, Result};
pub use session::{SessionContext, Shutdown, SpeakingFlag, SpeakingGuard};
pub use turn::{EngineHandle, SessionState, TurnEngine, TurnSettings};
