//! TOML configuration file loading
//!
//! Supports `~/.config/jarvis/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct JarvisConfigFile {
    /// Turn-taking behaviour
    #[serde(default)]
    pub assistant: AssistantFileConfig,

    /// Streaming transcription
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Speech synthesis
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Response generator
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Turn-taking configuration
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AssistantFileConfig {
    /// Name the assistant answers to in prompts (e.g. "Jarvis")
    pub name: Option<String>,

    /// Wake words (e.g. ["jarvis"])
    pub wake_words: Option<Vec<String>>,

    /// Seconds of silence that end a query
    pub silence_timeout_secs: Option<f64>,

    /// Seconds of inactivity before the conversation resets
    pub conversation_timeout_secs: Option<f64>,

    /// Seconds to wait before reconnecting the transcription session
    pub reconnect_backoff_secs: Option<f64>,
}

/// Streaming transcription configuration
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SttFileConfig {
    /// WebSocket endpoint
    pub url: Option<String>,

    /// Language code (e.g. "en")
    pub language: Option<String>,

    /// Frames buffered between capture and the network
    pub queue_capacity: Option<usize>,

    /// Seconds allowed for the WebSocket handshake
    pub connect_timeout_secs: Option<f64>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TtsFileConfig {
    /// "http" or "stream"
    pub mode: Option<String>,

    /// HTTP endpoint
    pub url: Option<String>,

    /// WebSocket endpoint
    pub stream_url: Option<String>,

    /// Voice identifier (e.g. "sophia")
    pub voice: Option<String>,

    /// Output sample rate
    pub sample_rate: Option<u32>,

    /// Speed multiplier
    pub speed: Option<f32>,

    /// Words per streamed text chunk
    pub chunk_words: Option<usize>,

    /// Trailing guard after playback, in milliseconds
    pub guard_ms: Option<u64>,
}

/// Response generator configuration
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LlmFileConfig {
    /// Chat completions endpoint
    pub url: Option<String>,

    /// Model identifier (e.g. "llama-3.3-70b-versatile")
    pub model: Option<String>,

    /// Model used to read screenshots
    pub vision_model: Option<String>,

    /// Whether "screenshot" queries capture the screen
    pub screenshots: Option<bool>,

    /// Maximum response tokens
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    pub temperature: Option<f32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ApiKeysFileConfig {
    pub smallest: Option<String>,
    pub groq: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `JarvisConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> JarvisConfigFile {
    config_file_path().map_or_else(JarvisConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Returns `JarvisConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_from(path: &Path) -> JarvisConfigFile {
    if !path.exists() {
        return JarvisConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                JarvisConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            JarvisConfigFile::default()
        }
    }
}

/// Parse TOML config file contents
///
/// # Errors
///
/// Returns error if the contents are not valid config TOML
pub fn parse_config(content: &str) -> Result<JarvisConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/jarvis/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("jarvis").join("config.toml"))
}
