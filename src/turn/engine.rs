//! Turn engine task
//!
//! Owns the [`TurnState`] and applies events strictly in channel order:
//! transcripts from the transcription session, silence timer firings, and
//! response-cycle completions. Being the single writer is what makes the
//! generation check sufficient; no locks guard the state.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::state::{
    ResponseOutcome, SilenceTimerToken, TimerDecision, TurnSettings, TurnSnapshot, TurnState,
};
use super::timer::SilenceTimer;
use crate::agent::{ConversationTurn, Reply, ResponseDispatcher};
use crate::session::{SessionContext, SpeakingFlag};
use crate::voice::{Speaker, TranscriptEvent, WakeWordDetector};
use crate::{Error, Result};

/// Events buffered for the engine
const EVENT_CAPACITY: usize = 256;

/// Input to the turn engine
#[derive(Debug)]
pub enum EngineEvent {
    /// A transcript from the transcription session
    Transcript(TranscriptEvent),
    /// A silence timer for this generation expired
    TimerFired(SilenceTimerToken),
    /// A response cycle ended
    ResponseFinished(ResponseOutcome),
    /// Request a snapshot of the state
    Inspect(oneshot::Sender<TurnSnapshot>),
}

/// Cloneable handle for feeding the engine
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineEvent>,
}

impl EngineHandle {
    /// Submit a transcript
    ///
    /// # Errors
    ///
    /// Returns error if the engine has stopped
    pub async fn submit(&self, event: TranscriptEvent) -> Result<()> {
        self.send(EngineEvent::Transcript(event)).await
    }

    /// Send a raw event
    ///
    /// # Errors
    ///
    /// Returns error if the engine has stopped
    pub async fn send(&self, event: EngineEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| Error::Engine("turn engine stopped".to_string()))
    }

    /// Copy out the current state
    ///
    /// # Errors
    ///
    /// Returns error if the engine has stopped
    pub async fn snapshot(&self) -> Result<TurnSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineEvent::Inspect(tx)).await?;
        rx.await
            .map_err(|_| Error::Engine("turn engine stopped".to_string()))
    }
}

/// Drives turn-taking
pub struct TurnEngine {
    state: TurnState,
    timer: SilenceTimer,
    dispatcher: Arc<ResponseDispatcher>,
    speaker: Arc<dyn Speaker>,
    ctx: SessionContext,
    events_tx: mpsc::Sender<EngineEvent>,
    events_rx: mpsc::Receiver<EngineEvent>,
}

impl TurnEngine {
    /// Create an engine in LISTENING plus a handle to feed it
    #[must_use]
    pub fn new(
        settings: TurnSettings,
        wake: WakeWordDetector,
        dispatcher: Arc<ResponseDispatcher>,
        speaker: Arc<dyn Speaker>,
        ctx: SessionContext,
    ) -> (Self, EngineHandle) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let handle = EngineHandle {
            tx: events_tx.clone(),
        };

        let engine = Self {
            state: TurnState::new(settings, wake, Instant::now()),
            timer: SilenceTimer::new(settings.silence_timeout),
            dispatcher,
            speaker,
            ctx,
            events_tx,
            events_rx,
        };

        (engine, handle)
    }

    /// Process events until shutdown
    pub async fn run(mut self) {
        tracing::info!("listening for wake word");

        loop {
            tokio::select! {
                () = self.ctx.shutdown.wait() => break,
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }

        self.timer.cancel();
        tracing::debug!("turn engine stopped");
    }

    fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Transcript(transcript) => self.on_transcript(&transcript),
            EngineEvent::TimerFired(token) => self.on_timer(token),
            EngineEvent::ResponseFinished(outcome) => {
                self.state.finish_response(outcome, Instant::now());
                self.rearm();
            }
            EngineEvent::Inspect(reply) => {
                let _ = reply.send(self.state.snapshot());
            }
        }
    }

    fn on_transcript(&mut self, transcript: &TranscriptEvent) {
        let text = transcript.text.trim();
        if !transcript.is_final || text.is_empty() {
            return;
        }

        if self.state.handle_final(text, Instant::now()).rearms_timer() {
            self.rearm();
        }
    }

    fn on_timer(&mut self, token: SilenceTimerToken) {
        if !self.timer.fired(token) {
            tracing::trace!(%token, "timer firing for an abandoned arm");
        }

        match self.state.evaluate_timer(token, Instant::now()) {
            TimerDecision::Stale | TimerDecision::NotCapturing => {}
            TimerDecision::TooEarly { remaining } => {
                let token = self.state.bump_generation();
                self.timer.arm_after(token, remaining, &self.events_tx);
            }
            TimerDecision::Continue => self.rearm(),
            TimerDecision::Dispatch { query, history } => {
                self.timer.cancel();
                self.spawn_response(query, history);
            }
            TimerDecision::ConversationExpired => {
                self.timer.cancel();
                tracing::info!("listening for wake word");
            }
        }
    }

    fn rearm(&mut self) {
        let token = self.state.bump_generation();
        self.timer.arm(token, &self.events_tx);
    }

    fn spawn_response(&self, query: String, history: Vec<ConversationTurn>) {
        tracing::info!(%query, "query captured");

        let dispatcher = Arc::clone(&self.dispatcher);
        let speaker = Arc::clone(&self.speaker);
        let speaking = self.ctx.speaking.clone();
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            // Inner task so a panic still produces a completion event
            let cycle = tokio::spawn(respond(dispatcher, speaker, speaking, query, history));
            let outcome = cycle.await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "response cycle aborted");
                ResponseOutcome::Aborted
            });
            let _ = events.send(EngineEvent::ResponseFinished(outcome)).await;
        });
    }
}

/// One response cycle; microphone forwarding is suppressed throughout
async fn respond(
    dispatcher: Arc<ResponseDispatcher>,
    speaker: Arc<dyn Speaker>,
    speaking: SpeakingFlag,
    query: String,
    history: Vec<ConversationTurn>,
) -> ResponseOutcome {
    let _speaking = speaking.hold();

    match dispatcher.dispatch(&query, &history).await {
        Reply::Ignore => ResponseOutcome::Ignored,
        Reply::Speak(reply) if reply.is_empty() => {
            tracing::warn!("generator returned an empty reply");
            ResponseOutcome::Ignored
        }
        Reply::Speak(reply) => {
            tracing::info!(%reply, "responding");
            say(speaker.as_ref(), &reply).await;
            ResponseOutcome::Responded { query, reply }
        }
        Reply::Fallback(apology) => {
            say(speaker.as_ref(), &apology).await;
            ResponseOutcome::Fallback
        }
    }
}

async fn say(speaker: &dyn Speaker, text: &str) {
    if let Err(e) = speaker.speak(text).await {
        tracing::warn!(error = %e, "playback failed, skipping");
    }
}
