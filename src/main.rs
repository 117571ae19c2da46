use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use jarvis_voice::config::TtsMode;
use jarvis_voice::session::SpeakingFlag;
use jarvis_voice::voice::{
    AudioCaptureSource, Microphone, PlaybackDevice, SAMPLE_RATE, Speaker,
    SpeechPlaybackSink, SystemOutput, rms, samples_to_wav, synthesizer, tone, wait_drained,
};
use jarvis_voice::{Assistant, Config};

/// Jarvis - wake-word voice assistant
#[derive(Parser)]
#[command(name = "jarvis", version, about)]
struct Cli {
    /// Wake word(s), comma separated
    #[arg(short, long, env = "JARVIS_WAKE_WORD")]
    wake_word: Option<String>,

    /// Speech synthesis mode ("http" or "stream")
    #[arg(long)]
    tts_mode: Option<TtsMode>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Also record the capture to this WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Interactive first-run setup
    Setup,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,jarvis_voice=info",
        1 => "info,jarvis_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, output } => test_mic(duration, output).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&text, cli.tts_mode).await,
            Command::Setup => jarvis_voice::setup::run_setup(),
        };
    }

    // Load configuration; the flag overrides env (clap reads the same variable)
    let mut config = Config::load()?;
    if let Some(wake) = cli.wake_word {
        config.assistant.wake_words = wake.split(',').map(|w| w.trim().to_string()).collect();
        config.validate()?;
    }
    if let Some(mode) = cli.tts_mode {
        config.tts.mode = mode;
    }
    tracing::debug!(?config, "loaded configuration");

    tracing::info!(
        "say \"{}\" to start a conversation (Ctrl+C to exit)",
        config.assistant.wake_words.join("\" or \"")
    );

    Assistant::new(config).run().await?;
    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let shutdown = jarvis_voice::session::Shutdown::new();
    let (mut capture, mut frames) =
        AudioCaptureSource::spawn(Microphone::open, 64, shutdown.clone())?;

    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    let mut recording: Vec<i16> = Vec::new();
    let mut second: Vec<i16> = Vec::new();
    let mut elapsed = 0u64;

    while elapsed < duration {
        let Some(frame) = frames.recv().await else {
            anyhow::bail!("microphone stopped delivering audio");
        };
        second.extend_from_slice(frame.samples());
        if output.is_some() {
            recording.extend_from_slice(frame.samples());
        }

        if second.len() < SAMPLE_RATE as usize {
            continue;
        }

        elapsed += 1;
        let energy = rms(&second);
        let peak = second
            .iter()
            .map(|s| s.unsigned_abs())
            .max()
            .map_or(0.0, |p| f32::from(p) / 32768.0);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{elapsed:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]");
        second.clear();
    }

    shutdown.trigger();
    capture.stop();

    if let Some(path) = output {
        std::fs::write(&path, samples_to_wav(&recording, SAMPLE_RATE)?)?;
        println!("\nRecorded {} samples to {}", recording.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    const RATE: u32 = 24000;

    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let samples = tone(440.0, Duration::from_secs(2), RATE);
    println!("Playing {} samples at {RATE} Hz...", samples.len());

    let mut stream = SystemOutput.open(RATE)?;
    stream.enqueue(&samples);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(4);
    wait_drained(stream.as_ref(), deadline).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    drop(stream);

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test TTS output end to end
async fn test_tts(text: &str, mode: Option<TtsMode>) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let mut config = Config::load()?;
    if let Some(mode) = mode {
        config.tts.mode = mode;
    }

    let key = config.require_smallest_key()?;
    let tts = synthesizer(config.tts.clone(), key)?;
    let sink = SpeechPlaybackSink::new(
        Arc::from(tts),
        Arc::new(SystemOutput),
        SpeakingFlag::new(),
        config.tts.guard,
    );

    println!("Synthesizing and playing ({} mode)...", config.tts.mode);
    sink.speak(text).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
