//! Assistant - the long-running foreground service
//!
//! Wires capture, transcription, turn-taking, response generation, and
//! playback together, then supervises the transcription session until
//! shutdown.

use std::sync::Arc;

use crate::agent::{GroqClient, NativeScreenCapture, ResponseDispatcher};
use crate::session::SessionContext;
use crate::turn::{TurnEngine, TurnSettings};
use crate::voice::{
    AudioCaptureSource, Microphone, SessionEnd, SpeechPlaybackSink, SpeechSynthesizer,
    SystemOutput, TranscriptSession, WakeWordDetector, synthesizer,
};
use crate::{Config, Result};

/// The Jarvis assistant
pub struct Assistant {
    config: Config,
    ctx: SessionContext,
}

impl Assistant {
    /// Create an assistant with a fresh session context
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ctx: SessionContext::new(),
        }
    }

    /// Session context shared by all components
    #[must_use]
    pub const fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Run until Ctrl-C
    ///
    /// Transport faults are retried internally; only missing configuration
    /// or a failure to start is returned.
    ///
    /// # Errors
    ///
    /// Returns error if a required key is missing or a component cannot start
    pub async fn run(self) -> Result<()> {
        let Self { config, ctx } = self;

        let smallest_key = config.require_smallest_key()?;
        let groq_key = config.require_groq_key()?;

        let wake = WakeWordDetector::new(config.assistant.wake_words.clone())?;
        let generator = Arc::new(GroqClient::new(groq_key, config.llm.clone())?);
        let mut dispatcher = ResponseDispatcher::new(generator, config.assistant.name.clone());
        if config.llm.screenshots {
            dispatcher = dispatcher.with_screen_capture(Arc::new(NativeScreenCapture));
        }
        let dispatcher = Arc::new(dispatcher);

        let tts: Arc<dyn SpeechSynthesizer> =
            Arc::from(synthesizer(config.tts.clone(), smallest_key.clone())?);
        let speaker = Arc::new(SpeechPlaybackSink::new(
            tts,
            Arc::new(SystemOutput),
            ctx.speaking.clone(),
            config.tts.guard,
        ));

        let (engine, handle) = TurnEngine::new(
            TurnSettings::from_config(&config.assistant),
            wake,
            dispatcher,
            speaker,
            ctx.clone(),
        );

        // Set up shutdown signal
        let shutdown = ctx.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                shutdown.trigger();
            }
        });

        let engine_task = tokio::spawn(engine.run());

        let (mut capture, mut audio) = AudioCaptureSource::spawn(
            Microphone::open,
            config.stt.queue_capacity,
            ctx.shutdown.clone(),
        )?;

        tracing::info!(
            wake_words = ?config.assistant.wake_words,
            tts_mode = %config.tts.mode,
            model = %config.llm.model,
            screenshots = config.llm.screenshots,
            "jarvis ready"
        );

        let session = TranscriptSession::new(config.stt.clone(), smallest_key);
        let end = session
            .run_supervised(&mut audio, &handle, &ctx, config.assistant.reconnect_backoff)
            .await;

        if end == SessionEnd::CaptureEnded {
            tracing::error!("audio capture ended; voice input unavailable until restart");
            ctx.shutdown.wait().await;
        }

        ctx.shutdown.trigger();
        capture.stop();
        if let Err(e) = engine_task.await {
            tracing::error!(error = %e, "turn engine task failed");
        }

        tracing::info!(
            frames = capture.frames_captured(),
            dropped = capture.frames_dropped(),
            "jarvis stopped"
        );
        Ok(())
    }
}
