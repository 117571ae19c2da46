//! Audio playback to speakers
//!
//! The cpal output stream lives on its own thread (cpal streams are not
//! `Send`) and pulls samples from a shared queue. Callers enqueue audio as it
//! arrives and poll the queue to know when it has been handed to the device.

use std::collections::VecDeque;
use std::f32::consts::TAU;
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::time::Instant;

use crate::{Error, Result};

/// How long to wait for the output device to come up
const OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// Poll interval while waiting for the queue to drain
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Something that can open an output stream
pub trait PlaybackDevice: Send + Sync {
    /// Open a mono stream at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    fn open(&self, sample_rate: u32) -> Result<Box<dyn PlaybackStream>>;
}

/// An open output stream; dropping it stops playback
pub trait PlaybackStream: Send + Sync {
    /// Queue mono samples in [-1.0, 1.0]
    fn enqueue(&mut self, samples: &[f32]);

    /// Samples queued but not yet handed to the device
    fn pending_samples(&self) -> usize;
}

/// Wait until `stream` has handed all queued samples to the device
///
/// Returns `false` if `deadline` passed first.
pub async fn wait_drained(stream: &dyn PlaybackStream, deadline: Instant) -> bool {
    while stream.pending_samples() > 0 {
        if Instant::now() >= deadline {
            tracing::warn!(
                pending = stream.pending_samples(),
                "playback did not drain in time"
            );
            return false;
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }
    true
}

/// Default system output device
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemOutput;

impl PlaybackDevice for SystemOutput {
    fn open(&self, sample_rate: u32) -> Result<Box<dyn PlaybackStream>> {
        Ok(Box::new(AudioPlayback::open(sample_rate)?))
    }
}

/// Plays audio to the default output device
pub struct AudioPlayback {
    queue: Arc<Mutex<VecDeque<f32>>>,
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioPlayback {
    /// Start an output stream on the default device
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open(sample_rate: u32) -> Result<Self> {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();

        let thread_queue = Arc::clone(&queue);
        let thread = std::thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let stream = match build_output_stream(sample_rate, thread_queue) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Blocks until the handle drops its sender
                let _ = stop_rx.recv();
                drop(stream);
                tracing::trace!("output stream closed");
            })?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                queue,
                stop: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(Error::Audio("output device did not start".to_string())),
        }
    }
}

impl PlaybackStream for AudioPlayback {
    fn enqueue(&mut self, samples: &[f32]) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.extend(samples.iter().copied());
        }
    }

    fn pending_samples(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or_default()
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn build_output_stream(sample_rate: u32, queue: Arc<Mutex<VecDeque<f32>>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let rate = SampleRate(sample_rate);
    let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
        c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
    };

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| supports(c, 1))
        .or_else(|| {
            // Fallback: stereo, mono duplicated into both channels
            device
                .supported_output_configs()
                .ok()?
                .find(|c| supports(c, 2))
        })
        .ok_or_else(|| Error::Audio(format!("no output config supports {sample_rate} Hz")))?;

    let config: StreamConfig = supported_config.with_sample_rate(rate).config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut queue) = queue.lock() else {
                    data.fill(0.0);
                    return;
                };
                for frame in data.chunks_mut(channels) {
                    let sample = queue.pop_front().unwrap_or(0.0);
                    frame.fill(sample);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

/// Sine tone at `frequency` Hz, for speaker checks
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn tone(frequency: f32, duration: Duration, sample_rate: u32) -> Vec<f32> {
    let count = (duration.as_secs_f32() * sample_rate as f32) as usize;
    (0..count)
        .map(|i| 0.3 * (TAU * frequency * i as f32 / sample_rate as f32).sin())
        .collect()
}
