//! Speech playback sink
//!
//! Synthesizes a reply and plays it while the "assistant speaking" flag is
//! held. The flag covers the full time the assistant can be heard in the
//! room: until the queue has drained and a trailing guard has elapsed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::frame::{pcm16_to_f32, samples_duration};
use super::playback::{PlaybackDevice, wait_drained};
use super::tts::SpeechSynthesizer;
use crate::Result;
use crate::session::SpeakingFlag;

/// Chunks buffered between synthesis and playback
const SYNTH_BUFFER: usize = 32;

/// Extra time allowed for the device to drain beyond the audio length
const DRAIN_SLACK: Duration = Duration::from_secs(2);

/// Speaks text aloud
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Say `text`, returning once it can no longer be heard
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback failed
    async fn speak(&self, text: &str) -> Result<()>;
}

/// Synthesis plus local playback
pub struct SpeechPlaybackSink {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    device: Arc<dyn PlaybackDevice>,
    speaking: SpeakingFlag,
    guard: Duration,
}

impl SpeechPlaybackSink {
    /// Create a sink that asserts `speaking` while audio can be heard
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        device: Arc<dyn PlaybackDevice>,
        speaking: SpeakingFlag,
        guard: Duration,
    ) -> Self {
        Self {
            synthesizer,
            device,
            speaking,
            guard,
        }
    }
}

#[async_trait]
impl Speaker for SpeechPlaybackSink {
    async fn speak(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let _speaking = self.speaking.hold();
        let sample_rate = self.synthesizer.sample_rate();
        let mut stream = self.device.open(sample_rate)?;

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(SYNTH_BUFFER);
        let synthesis = self.synthesizer.synthesize(text, tx);
        let playback = async {
            let mut total = 0usize;
            while let Some(pcm) = rx.recv().await {
                let samples = pcm16_to_f32(&pcm);
                total += samples.len();
                stream.enqueue(&samples);
            }
            total
        };

        let (synthesized, total) = tokio::join!(synthesis, playback);

        let deadline =
            Instant::now() + samples_duration(stream.pending_samples(), sample_rate) + DRAIN_SLACK;
        wait_drained(stream.as_ref(), deadline).await;

        // Device buffers may still be sounding
        tokio::time::sleep(self.guard).await;
        drop(stream);

        tracing::debug!(
            samples = total,
            audio_ms = samples_duration(total, sample_rate).as_millis(),
            "playback complete"
        );

        synthesized
    }
}
