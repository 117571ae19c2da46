//! Audio capture from microphone
//!
//! Capture runs on its own OS thread and hands fixed-size frames to the async
//! side through a bounded queue. The thread never waits on the consumer: when
//! the queue is full the newest frame is dropped, so wall-clock pacing of the
//! device is never disturbed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::frame::{AudioFrame, FRAME_SAMPLES, SAMPLE_RATE, f32_to_i16};
use crate::session::Shutdown;
use crate::{Error, Result};

/// Blocking source of fixed-size frames
///
/// `Ok(None)` means no frame was ready within the reader's poll interval;
/// the capture loop uses it to check for shutdown. An error ends capture.
pub trait FrameReader {
    /// Read the next frame
    ///
    /// # Errors
    ///
    /// Returns error if the device failed
    fn read_frame(&mut self) -> Result<Option<AudioFrame>>;
}

/// Counters shared between the capture thread and its handle
#[derive(Debug, Default)]
struct CaptureStats {
    captured: AtomicU64,
    dropped: AtomicU64,
}

/// Spawns and supervises the capture thread
pub struct AudioCaptureSource;

impl AudioCaptureSource {
    /// Start capturing on a dedicated thread
    ///
    /// `open` runs on the capture thread, so readers that are not `Send`
    /// (such as cpal streams) can be used. If `open` or any read fails the
    /// thread exits and the receiver observes end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned
    pub fn spawn<R, F>(
        open: F,
        capacity: usize,
        shutdown: Shutdown,
    ) -> Result<(CaptureHandle, mpsc::Receiver<AudioFrame>)>
    where
        R: FrameReader,
        F: FnOnce() -> Result<R> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(CaptureStats::default());

        let thread_stop = Arc::clone(&stop);
        let thread_stats = Arc::clone(&stats);

        let thread = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let mut reader = match open() {
                    Ok(reader) => reader,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to open capture device");
                        return;
                    }
                };

                tracing::debug!(capacity, "audio capture started");
                capture_loop(&mut reader, &tx, &thread_stop, &shutdown, &thread_stats);
                tracing::debug!(
                    captured = thread_stats.captured.load(Ordering::Relaxed),
                    dropped = thread_stats.dropped.load(Ordering::Relaxed),
                    "audio capture stopped"
                );
            })?;

        Ok((
            CaptureHandle {
                stop,
                stats,
                thread: Some(thread),
            },
            rx,
        ))
    }
}

fn capture_loop<R: FrameReader>(
    reader: &mut R,
    tx: &mpsc::Sender<AudioFrame>,
    stop: &AtomicBool,
    shutdown: &Shutdown,
    stats: &CaptureStats,
) {
    while !stop.load(Ordering::SeqCst) && !shutdown.is_triggered() {
        let frame = match reader.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!(error = %e, "audio capture failed");
                return;
            }
        };

        stats.captured.fetch_add(1, Ordering::Relaxed);
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(dropped, "audio queue full, dropping newest frame");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("audio queue consumer gone");
                return;
            }
        }
    }
}

/// Handle to a running capture thread
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Frames read from the device so far
    #[must_use]
    pub fn frames_captured(&self) -> u64 {
        self.stats.captured.load(Ordering::Relaxed)
    }

    /// Frames dropped because the queue was full
    #[must_use]
    pub fn frames_dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    /// Whether the capture thread is still running
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop capturing and wait for the thread to exit
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("audio capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// How long a microphone read waits before yielding `Ok(None)`
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Chunks buffered between the cpal callback and the reader
const CALLBACK_QUEUE: usize = 64;

/// Captures audio from the default input device
pub struct Microphone {
    _stream: Stream,
    chunks: std_mpsc::Receiver<Vec<f32>>,
    pending: Vec<i16>,
    failure: Arc<Mutex<Option<String>>>,
}

impl Microphone {
    /// Open the default input device at [`SAMPLE_RATE`], mono
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        let (tx, chunks) = std_mpsc::sync_channel(CALLBACK_QUEUE);
        let failure = Arc::new(Mutex::new(None));
        let callback_failure = Arc::clone(&failure);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Never block the device callback
                    let _ = tx.try_send(data.to_vec());
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    if let Ok(mut failure) = callback_failure.lock() {
                        *failure = Some(err.to_string());
                    }
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            chunks,
            pending: Vec::with_capacity(FRAME_SAMPLES * 2),
            failure,
        })
    }
}

impl FrameReader for Microphone {
    fn read_frame(&mut self) -> Result<Option<AudioFrame>> {
        if let Some(reason) = self.failure.lock().ok().and_then(|f| f.clone()) {
            return Err(Error::Audio(reason));
        }

        while self.pending.len() < FRAME_SAMPLES {
            match self.chunks.recv_timeout(POLL_INTERVAL) {
                Ok(chunk) => self.pending.extend(chunk.iter().map(|&s| f32_to_i16(s))),
                Err(std_mpsc::RecvTimeoutError::Timeout) => return Ok(None),
                Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(Error::Audio("input stream closed".to_string()));
                }
            }
        }

        let frame: Vec<i16> = self.pending.drain(..FRAME_SAMPLES).collect();
        Ok(Some(AudioFrame::new(frame)))
    }
}

/// Calculate RMS energy of audio samples, normalized to [0.0, 1.0]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
#[must_use]
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let s = f64::from(s) / 32768.0;
            s * s
        })
        .sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Encode PCM16 samples as a WAV file
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
