//! Fixed-duration PCM frames

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per captured frame (100ms at 16kHz)
pub const FRAME_SAMPLES: usize = 1600;

/// A fixed-duration slice of mono signed 16-bit PCM
///
/// Cheap to clone; the samples are shared.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    samples: Arc<[i16]>,
    captured_at: Instant,
}

impl AudioFrame {
    /// Wrap samples captured just now
    #[must_use]
    pub fn new(samples: Vec<i16>) -> Self {
        Self::captured(samples, Instant::now())
    }

    /// Wrap samples captured at a known instant
    #[must_use]
    pub fn captured(samples: Vec<i16>, captured_at: Instant) -> Self {
        Self {
            samples: samples.into(),
            captured_at,
        }
    }

    /// Build a frame from f32 samples in [-1.0, 1.0]
    #[must_use]
    pub fn from_f32(samples: &[f32]) -> Self {
        Self::new(samples.iter().map(|&s| f32_to_i16(s)).collect())
    }

    /// PCM samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// When the frame left the device
    #[must_use]
    pub const fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Playback duration at [`SAMPLE_RATE`]
    #[must_use]
    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len(), SAMPLE_RATE)
    }

    /// Little-endian wire encoding (linear16)
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Convert f32 [-1.0, 1.0] to i16
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Decode little-endian PCM16 bytes to f32 samples
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

/// Duration of `samples` mono samples at `sample_rate`
#[must_use]
pub fn samples_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let millis = (samples as u64).saturating_mul(1000) / u64::from(sample_rate);
    Duration::from_millis(millis)
}
