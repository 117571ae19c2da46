//! Turn-taking: wake word, query capture, debounced silence, response cycle

mod engine;
mod state;
mod timer;

pub use engine::{EngineEvent, EngineHandle, TurnEngine};
pub use state::{
    FinalOutcome, ResponseOutcome, SessionState, SilenceTimerToken, TimerDecision, TurnSettings,
    TurnSnapshot, TurnState,
};
pub use timer::{SilenceTimer, TimerStatus};
