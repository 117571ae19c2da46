//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

mod common;

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio::time::Instant;

use common::{Action, MockServer, Observed};
use jarvis_voice::config::{TtsConfig, TtsMode};
use jarvis_voice::session::{Shutdown, SpeakingFlag};
use jarvis_voice::voice::{
    AudioCaptureSource, AudioFrame, FRAME_SAMPLES, FrameReader, PlaybackDevice, PlaybackStream,
    SAMPLE_RATE, Speaker, SpeechPlaybackSink, SpeechSynthesizer, StreamingSynthesizer,
    WakeWordDetector, samples_duration, samples_to_wav,
};
use jarvis_voice::{Error, Result};

/// Frame whose first sample identifies it
fn numbered_frame(n: i16) -> AudioFrame {
    let mut samples = vec![0; FRAME_SAMPLES];
    samples[0] = n;
    AudioFrame::new(samples)
}

/// Reader that replays a script, then fails
struct ScriptedReader {
    script: VecDeque<Result<Option<AudioFrame>>>,
}

impl FrameReader for ScriptedReader {
    fn read_frame(&mut self) -> Result<Option<AudioFrame>> {
        self.script
            .pop_front()
            .unwrap_or_else(|| Err(Error::Audio("device unplugged".to_string())))
    }
}

/// Reader that never produces audio
struct IdleReader;

impl FrameReader for IdleReader {
    fn read_frame(&mut self) -> Result<Option<AudioFrame>> {
        std::thread::sleep(Duration::from_millis(5));
        Ok(None)
    }
}

#[tokio::test]
async fn test_full_queue_drops_newest_frames() {
    let script = (0..5).map(|n| Ok(Some(numbered_frame(n)))).collect();
    let (handle, mut frames) =
        AudioCaptureSource::spawn(move || Ok(ScriptedReader { script }), 2, Shutdown::new())
            .unwrap();

    let first = frames.recv().await.unwrap();
    let second = frames.recv().await.unwrap();
    assert_eq!(first.samples()[0], 0);
    assert_eq!(second.samples()[0], 1);

    // Reader failure ends the stream
    assert!(frames.recv().await.is_none());
    assert_eq!(handle.frames_captured(), 5);
    assert_eq!(handle.frames_dropped(), 3);
}

#[tokio::test]
async fn test_open_failure_ends_stream() {
    let (handle, mut frames) = AudioCaptureSource::spawn(
        || -> Result<IdleReader> { Err(Error::Audio("no input device".to_string())) },
        4,
        Shutdown::new(),
    )
    .unwrap();

    assert!(frames.recv().await.is_none());
    assert_eq!(handle.frames_captured(), 0);
}

#[tokio::test]
async fn test_stop_and_shutdown_end_capture() {
    let (mut handle, mut frames) =
        AudioCaptureSource::spawn(|| Ok(IdleReader), 4, Shutdown::new()).unwrap();
    assert!(handle.is_capturing());
    handle.stop();
    assert!(!handle.is_capturing());
    assert!(frames.recv().await.is_none());

    let shutdown = Shutdown::new();
    let (_handle, mut frames) =
        AudioCaptureSource::spawn(|| Ok(IdleReader), 4, shutdown.clone()).unwrap();
    shutdown.trigger();
    assert!(frames.recv().await.is_none());
}

#[test]
fn test_wav_roundtrip() {
    let samples: Vec<i16> = vec![0, 16384, -16384, i16::MAX, i16::MIN, 8192];
    let wav_data = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    // Check WAV header magic
    assert_eq!(&wav_data[0..4], b"RIFF");
    assert_eq!(&wav_data[8..12], b"WAVE");

    let mut reader = hound::WavReader::new(Cursor::new(wav_data)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.channels, 1);

    let read_back: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(read_back, samples);
}

#[test]
fn test_wake_word_normalization() {
    let detector =
        WakeWordDetector::new(vec!["  Hey JARVIS  ".to_string(), "FRIDAY".to_string()]).unwrap();

    // Should be normalized to lowercase and trimmed
    assert_eq!(detector.wake_words(), &["hey jarvis", "friday"]);
    assert_eq!(detector.detect("ok friday, lights").unwrap().trailing, "lights");
    assert!(detector.detect("jarvis alone is not enough").is_none());
}

#[derive(Default)]
struct DeviceLog {
    opened: usize,
    enqueued: usize,
    speaking_seen: Vec<bool>,
}

/// Device that "plays" in simulated real time
struct FakeDevice {
    speaking: SpeakingFlag,
    log: Arc<Mutex<DeviceLog>>,
    fail_open: bool,
}

struct FakeStream {
    speaking: SpeakingFlag,
    log: Arc<Mutex<DeviceLog>>,
    sample_rate: u32,
    queued: usize,
    drained_at: Instant,
}

impl PlaybackDevice for FakeDevice {
    fn open(&self, sample_rate: u32) -> Result<Box<dyn PlaybackStream>> {
        if self.fail_open {
            return Err(Error::Audio("no output device".to_string()));
        }
        self.log.lock().unwrap().opened += 1;
        Ok(Box::new(FakeStream {
            speaking: self.speaking.clone(),
            log: Arc::clone(&self.log),
            sample_rate,
            queued: 0,
            drained_at: Instant::now(),
        }))
    }
}

impl PlaybackStream for FakeStream {
    fn enqueue(&mut self, samples: &[f32]) {
        let mut log = self.log.lock().unwrap();
        log.enqueued += samples.len();
        log.speaking_seen.push(self.speaking.is_speaking());

        self.queued += samples.len();
        self.drained_at = self.drained_at.max(Instant::now())
            + samples_duration(samples.len(), self.sample_rate);
    }

    fn pending_samples(&self) -> usize {
        if Instant::now() < self.drained_at {
            self.queued
        } else {
            0
        }
    }
}

/// Synthesizer that emits fixed chunks, then optionally fails
struct FakeSynthesizer {
    chunks: Vec<Vec<u8>>,
    fail: bool,
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, _text: &str, tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
        for chunk in &self.chunks {
            let _ = tx.send(chunk.clone()).await;
        }
        if self.fail {
            return Err(Error::Tts("connection reset".to_string()));
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        24000
    }
}

fn playback_sink(
    synthesizer: FakeSynthesizer,
    fail_open: bool,
    speaking: &SpeakingFlag,
) -> (SpeechPlaybackSink, Arc<Mutex<DeviceLog>>) {
    let log = Arc::new(Mutex::new(DeviceLog::default()));
    let device = FakeDevice {
        speaking: speaking.clone(),
        log: Arc::clone(&log),
        fail_open,
    };
    let sink = SpeechPlaybackSink::new(
        Arc::new(synthesizer),
        Arc::new(device),
        speaking.clone(),
        Duration::from_millis(300),
    );
    (sink, log)
}

#[tokio::test(start_paused = true)]
async fn test_sink_holds_flag_until_drained_and_guarded() {
    let speaking = SpeakingFlag::new();
    // Two 100 ms chunks at 24 kHz
    let synthesizer = FakeSynthesizer {
        chunks: vec![vec![0; 4800], vec![0; 4800]],
        fail: false,
    };
    let (sink, log) = playback_sink(synthesizer, false, &speaking);

    let started = Instant::now();
    sink.speak("Hello there.").await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(!speaking.is_speaking());
    assert!(speaking.released_at().is_some());

    let log = log.lock().unwrap();
    assert_eq!(log.enqueued, 4800);
    assert_eq!(log.speaking_seen, [true, true]);
}

#[tokio::test(start_paused = true)]
async fn test_sink_releases_flag_after_synthesis_error() {
    let speaking = SpeakingFlag::new();
    let synthesizer = FakeSynthesizer {
        chunks: vec![vec![0; 480]],
        fail: true,
    };
    let (sink, log) = playback_sink(synthesizer, false, &speaking);

    let result = sink.speak("This will be cut off").await;
    assert!(result.is_err());
    assert!(!speaking.is_speaking());
    // Audio received before the failure still played
    assert_eq!(log.lock().unwrap().enqueued, 240);
}

#[tokio::test(start_paused = true)]
async fn test_sink_device_failure_and_empty_text() {
    let speaking = SpeakingFlag::new();
    let synthesizer = FakeSynthesizer {
        chunks: vec![vec![0; 480]],
        fail: false,
    };
    let (sink, log) = playback_sink(synthesizer, true, &speaking);

    assert!(sink.speak("Hello").await.is_err());
    assert!(!speaking.is_speaking());
    assert_eq!(log.lock().unwrap().enqueued, 0);

    // Nothing to say never touches the device
    let synthesizer = FakeSynthesizer {
        chunks: vec![vec![0; 480]],
        fail: false,
    };
    let (sink, log) = playback_sink(synthesizer, false, &speaking);
    sink.speak("   ").await.unwrap();
    assert_eq!(log.lock().unwrap().opened, 0);
}

fn streaming(server: &MockServer) -> StreamingSynthesizer {
    let config = TtsConfig {
        mode: TtsMode::Stream,
        stream_url: server.url.clone(),
        chunk_words: 2,
        timeout: Duration::from_secs(2),
        ..TtsConfig::default()
    };
    StreamingSynthesizer::new(config, SecretString::from("tts-key".to_string()))
}

#[tokio::test]
async fn test_streaming_synthesis_until_complete() {
    let mut server = MockServer::start().await;
    let synthesizer = streaming(&server);

    let (tx, mut audio) = mpsc::channel(8);
    let task = tokio::spawn(async move { synthesizer.synthesize("turn the lights on", tx).await });

    let Observed::Connected { authorization, .. } = server.next().await else {
        panic!("expected a connection first");
    };
    assert_eq!(authorization.as_deref(), Some("Bearer tts-key"));

    for expected in ["turn the", "lights on"] {
        let Observed::Text { text, .. } = server.next().await else {
            panic!("expected a text chunk");
        };
        let chunk: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(chunk["text"], expected);
        assert_eq!(chunk["voice_id"], "sophia");
    }

    let encoded = base64::engine::general_purpose::STANDARD.encode([1u8, 0, 2, 0]);
    server.act(Action::Send(
        serde_json::json!({ "status": "chunk", "data": { "audio": encoded } }).to_string(),
    ));
    server.act(Action::Send(r#"{"status":"complete"}"#.to_string()));
    // Anything after completion is not read
    server.act(Action::Send(
        serde_json::json!({ "status": "chunk", "data": { "audio": encoded } }).to_string(),
    ));

    task.await.unwrap().unwrap();
    assert_eq!(audio.recv().await.unwrap(), [1, 0, 2, 0]);
    assert!(audio.recv().await.is_none());
}

#[tokio::test]
async fn test_streaming_synthesis_error_status() {
    let mut server = MockServer::start().await;
    let synthesizer = streaming(&server);

    let (tx, _audio) = mpsc::channel(8);
    let task = tokio::spawn(async move { synthesizer.synthesize("hello", tx).await });

    server.expect(|o| matches!(o, Observed::Text { .. })).await;
    server.act(Action::Send(
        r#"{"status":"error","message":"unknown voice"}"#.to_string(),
    ));

    let err = task.await.unwrap().unwrap_err();
    assert!(err.to_string().contains("unknown voice"));
}
