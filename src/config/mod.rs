//! Configuration management for the Jarvis assistant
//!
//! Values resolve env > TOML file > defaults.

pub mod file;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::{Error, Result};
use file::JarvisConfigFile;

/// Jarvis configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Turn-taking behaviour
    pub assistant: AssistantConfig,

    /// Streaming transcription
    pub stt: SttConfig,

    /// Speech synthesis
    pub tts: TtsConfig,

    /// Response generator
    pub llm: LlmConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Turn-taking configuration
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Name used in prompts and history transcripts
    pub name: String,

    /// Wake words, matched case-insensitively
    pub wake_words: Vec<String>,

    /// Silence that ends a query
    pub silence_timeout: Duration,

    /// Inactivity after which the conversation resets to wake-word listening
    pub conversation_timeout: Duration,

    /// Slack allowed when checking elapsed silence at timer fire
    pub silence_tolerance: Duration,

    /// Fixed delay before reconnecting a dropped transcription session
    pub reconnect_backoff: Duration,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: "Jarvis".to_string(),
            wake_words: vec!["jarvis".to_string()],
            silence_timeout: Duration::from_secs(5),
            conversation_timeout: Duration::from_secs(60),
            silence_tolerance: Duration::from_millis(100),
            reconnect_backoff: Duration::from_secs(1),
        }
    }
}

/// Streaming transcription configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// WebSocket endpoint (without query string)
    pub url: String,

    /// Language code
    pub language: String,

    /// Capture sample rate sent to the service
    pub sample_rate: u32,

    /// Frames buffered between capture and the network
    pub queue_capacity: usize,

    /// Interval between keepalive pings
    pub keepalive: Duration,

    /// Limit on the WebSocket handshake before the attempt counts as failed
    pub connect_timeout: Duration,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            url: "wss://waves-api.smallest.ai/api/v1/pulse/get_text".to_string(),
            language: "en".to_string(),
            sample_rate: crate::voice::SAMPLE_RATE,
            queue_capacity: 64,
            keepalive: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// How synthesized audio is fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsMode {
    /// One HTTP request per utterance returning the whole clip
    #[default]
    Http,
    /// WebSocket session streaming audio per text chunk
    Stream,
}

impl FromStr for TtsMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "stream" | "ws" | "websocket" => Ok(Self::Stream),
            other => Err(Error::Config(format!("unknown TTS mode: {other}"))),
        }
    }
}

impl fmt::Display for TtsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Stream => write!(f, "stream"),
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Transport
    pub mode: TtsMode,

    /// HTTP endpoint
    pub url: String,

    /// WebSocket endpoint
    pub stream_url: String,

    /// Voice identifier
    pub voice: String,

    /// Output sample rate
    pub sample_rate: u32,

    /// Speed multiplier
    pub speed: f32,

    /// Language code
    pub language: String,

    /// Words per streamed text chunk
    pub chunk_words: usize,

    /// Microphone stays suppressed this long after the last sample is played
    pub guard: Duration,

    /// Request / per-message receive timeout
    pub timeout: Duration,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            mode: TtsMode::Http,
            url: "https://waves-api.smallest.ai/api/v1/lightning-v3.1/get_speech".to_string(),
            stream_url: "wss://waves-api.smallest.ai/api/v1/lightning-v3.1/get_speech/stream"
                .to_string(),
            voice: "sophia".to_string(),
            sample_rate: 24000,
            speed: 1.0,
            language: "en".to_string(),
            chunk_words: 10,
            guard: Duration::from_millis(300),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Response generator configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Chat completions endpoint
    pub url: String,

    /// Model identifier
    pub model: String,

    /// Model that reads screenshots
    pub vision_model: String,

    /// Capture the screen when a query mentions a screenshot
    pub screenshots: bool,

    /// Maximum response tokens
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Request timeout
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            vision_model: "meta-llama/llama-4-scout-17b-16e-instruct".to_string(),
            screenshots: true,
            max_tokens: 256,
            temperature: 0.7,
            timeout: Duration::from_secs(30),
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// Smallest AI key (transcription and synthesis)
    pub smallest: Option<SecretString>,

    /// Groq key (response generator)
    pub groq: Option<SecretString>,
}

impl Config {
    /// Load configuration from the environment and the TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the resolved configuration is inconsistent
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with environment lookups
    ///
    /// # Errors
    ///
    /// Returns error if the resolved configuration is inconsistent
    pub fn resolve<F>(fc: JarvisConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_keys = ApiKeys {
            smallest: env("SMALLEST_API_KEY")
                .or(fc.api_keys.smallest)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
            groq: env("GROQ_API_KEY")
                .or(fc.api_keys.groq)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
        };

        // Assistant config (env > toml > default)
        let defaults = AssistantConfig::default();
        let assistant = AssistantConfig {
            name: fc.assistant.name.unwrap_or(defaults.name),
            wake_words: env("JARVIS_WAKE_WORD")
                .map(|s| s.split(',').map(|w| w.trim().to_string()).collect())
                .or(fc.assistant.wake_words)
                .unwrap_or(defaults.wake_words),
            silence_timeout: secs(env("JARVIS_SILENCE_TIMEOUT"), fc.assistant.silence_timeout_secs)?
                .unwrap_or(defaults.silence_timeout),
            conversation_timeout: secs(
                env("JARVIS_CONVERSATION_TIMEOUT"),
                fc.assistant.conversation_timeout_secs,
            )?
            .unwrap_or(defaults.conversation_timeout),
            silence_tolerance: defaults.silence_tolerance,
            reconnect_backoff: secs(None, fc.assistant.reconnect_backoff_secs)?
                .unwrap_or(defaults.reconnect_backoff),
        };

        // STT config (env > toml > default)
        let defaults = SttConfig::default();
        let stt = SttConfig {
            url: fc.stt.url.unwrap_or(defaults.url),
            language: env("JARVIS_STT_LANGUAGE")
                .or(fc.stt.language)
                .unwrap_or(defaults.language),
            sample_rate: defaults.sample_rate,
            queue_capacity: fc.stt.queue_capacity.unwrap_or(defaults.queue_capacity),
            keepalive: defaults.keepalive,
            connect_timeout: secs(None, fc.stt.connect_timeout_secs)?
                .unwrap_or(defaults.connect_timeout),
        };

        // TTS config (env > toml > default)
        let defaults = TtsConfig::default();
        let mode = env("JARVIS_TTS_MODE")
            .or(fc.tts.mode)
            .map(|m| m.parse())
            .transpose()?
            .unwrap_or(defaults.mode);
        let tts = TtsConfig {
            mode,
            url: fc.tts.url.unwrap_or(defaults.url),
            stream_url: fc.tts.stream_url.unwrap_or(defaults.stream_url),
            voice: env("JARVIS_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or(defaults.voice),
            sample_rate: fc.tts.sample_rate.unwrap_or(defaults.sample_rate),
            speed: fc.tts.speed.unwrap_or(defaults.speed),
            language: defaults.language,
            chunk_words: fc.tts.chunk_words.unwrap_or(defaults.chunk_words).max(1),
            guard: fc
                .tts
                .guard_ms
                .map_or(defaults.guard, Duration::from_millis),
            timeout: defaults.timeout,
        };

        // LLM config (env > toml > default)
        let defaults = LlmConfig::default();
        let llm = LlmConfig {
            url: fc.llm.url.unwrap_or(defaults.url),
            model: env("JARVIS_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or(defaults.model),
            vision_model: fc.llm.vision_model.unwrap_or(defaults.vision_model),
            screenshots: fc.llm.screenshots.unwrap_or(defaults.screenshots),
            max_tokens: fc.llm.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: fc.llm.temperature.unwrap_or(defaults.temperature),
            timeout: defaults.timeout,
        };

        let config = Self {
            assistant,
            stt,
            tts,
            llm,
            api_keys,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants
    ///
    /// # Errors
    ///
    /// Returns error describing the first violated invariant
    pub fn validate(&self) -> Result<()> {
        let a = &self.assistant;

        if a.wake_words.iter().all(|w| w.trim().is_empty()) {
            return Err(Error::Config("at least one wake word is required".to_string()));
        }

        if a.silence_timeout <= a.silence_tolerance {
            return Err(Error::Config(
                "silence timeout must exceed the silence tolerance".to_string(),
            ));
        }

        if a.conversation_timeout <= a.silence_timeout {
            return Err(Error::Config(
                "conversation timeout must be longer than the silence timeout".to_string(),
            ));
        }

        Ok(())
    }

    /// Smallest AI key, required for transcription and synthesis
    ///
    /// # Errors
    ///
    /// Returns error if the key is not configured
    pub fn require_smallest_key(&self) -> Result<SecretString> {
        self.api_keys.smallest.clone().ok_or_else(|| {
            Error::Config("SMALLEST_API_KEY environment variable not set".to_string())
        })
    }

    /// Groq key, required for the response generator
    ///
    /// # Errors
    ///
    /// Returns error if the key is not configured
    pub fn require_groq_key(&self) -> Result<SecretString> {
        self.api_keys
            .groq
            .clone()
            .ok_or_else(|| Error::Config("GROQ_API_KEY environment variable not set".to_string()))
    }
}

/// Parse a seconds value from env (preferred) or file
fn secs(env_value: Option<String>, file_value: Option<f64>) -> Result<Option<Duration>> {
    let value = match env_value {
        Some(raw) => Some(
            raw.trim()
                .parse::<f64>()
                .map_err(|e| Error::Config(format!("invalid duration '{raw}': {e}")))?,
        ),
        None => file_value,
    };

    value
        .map(|v| {
            Duration::try_from_secs_f64(v)
                .map_err(|e| Error::Config(format!("invalid duration {v}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;
    use file::{AssistantFileConfig, TtsFileConfig};

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(JarvisConfigFile::default(), env_from(&[])).unwrap();
        assert_eq!(config.assistant.wake_words, vec!["jarvis"]);
        assert_eq!(config.assistant.silence_timeout, Duration::from_secs(5));
        assert_eq!(config.assistant.conversation_timeout, Duration::from_secs(60));
        assert_eq!(config.tts.mode, TtsMode::Http);
        assert!(config.api_keys.smallest.is_none());
        assert!(config.require_groq_key().is_err());
        assert_eq!(config.stt.connect_timeout, Duration::from_secs(10));
        assert!(config.llm.screenshots);
    }

    #[test]
    fn test_env_overrides_file() {
        let fc = JarvisConfigFile {
            assistant: AssistantFileConfig {
                wake_words: Some(vec!["computer".to_string()]),
                silence_timeout_secs: Some(3.0),
                ..AssistantFileConfig::default()
            },
            tts: TtsFileConfig {
                mode: Some("http".to_string()),
                ..TtsFileConfig::default()
            },
            ..JarvisConfigFile::default()
        };

        let config = Config::resolve(
            fc,
            env_from(&[
                ("JARVIS_WAKE_WORD", "friday, jarvis"),
                ("JARVIS_TTS_MODE", "stream"),
                ("GROQ_API_KEY", "gsk-test"),
            ]),
        )
        .unwrap();

        assert_eq!(config.assistant.wake_words, vec!["friday", "jarvis"]);
        assert_eq!(config.assistant.silence_timeout, Duration::from_secs(3));
        assert_eq!(config.tts.mode, TtsMode::Stream);
        assert_eq!(config.require_groq_key().unwrap().expose_secret(), "gsk-test");
    }

    #[test]
    fn test_conversation_timeout_must_exceed_silence() {
        let result = Config::resolve(
            JarvisConfigFile::default(),
            env_from(&[
                ("JARVIS_SILENCE_TIMEOUT", "10"),
                ("JARVIS_CONVERSATION_TIMEOUT", "5"),
            ]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_duration =
            Config::resolve(JarvisConfigFile::default(), env_from(&[("JARVIS_SILENCE_TIMEOUT", "soon")]));
        assert!(bad_duration.is_err());

        let bad_mode =
            Config::resolve(JarvisConfigFile::default(), env_from(&[("JARVIS_TTS_MODE", "carrier-pigeon")]));
        assert!(bad_mode.is_err());
    }

    #[test]
    fn test_empty_key_treated_as_missing() {
        let config =
            Config::resolve(JarvisConfigFile::default(), env_from(&[("SMALLEST_API_KEY", "")])).unwrap();
        assert!(config.require_smallest_key().is_err());
    }
}
