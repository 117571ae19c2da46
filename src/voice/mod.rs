//! Voice processing module
//!
//! Handles audio capture, streaming transcription, wake word detection,
//! synthesis, and playback.

mod capture;
mod frame;
mod playback;
mod speaker;
mod stt;
mod tts;
mod wake_word;

pub use capture::{
    AudioCaptureSource, CaptureHandle, FrameReader, Microphone, rms, samples_to_wav,
};
pub use frame::{AudioFrame, FRAME_SAMPLES, SAMPLE_RATE, f32_to_i16, pcm16_to_f32, samples_duration};
pub use playback::{
    AudioPlayback, PlaybackDevice, PlaybackStream, SystemOutput, tone, wait_drained,
};
pub use speaker::{Speaker, SpeechPlaybackSink};
pub use stt::{Inbound, SessionEnd, TranscriptEvent, TranscriptSession, parse_message};
pub use tts::{HttpSynthesizer, SpeechSynthesizer, StreamingSynthesizer, chunk_text, synthesizer};
pub use wake_word::{WakeMatch, WakeWordDetector};
