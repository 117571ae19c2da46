//! Interactive first-run setup wizard (`jarvis setup`)

use std::path::{Path, PathBuf};

use dialoguer::{Input, Select};

use crate::config::file::{ApiKeysFileConfig, JarvisConfigFile, LlmFileConfig, TtsFileConfig};
use crate::config::{AssistantConfig, LlmConfig, TtsConfig};

/// Run the interactive setup wizard
///
/// # Errors
///
/// Returns error if user input fails or config cannot be written
pub fn run_setup() -> anyhow::Result<()> {
    println!("Jarvis Setup\n");

    // Load existing config if present
    let mut existing = crate::config::file::load_config_file();
    let config_path = crate::config::file::config_file_path()
        .unwrap_or_else(|| PathBuf::from("~/.config/jarvis/config.toml"));

    if config_path.exists() {
        println!("Existing config found at {}\n", config_path.display());
    }

    // 1. Wake word
    let default_wake = existing
        .assistant
        .wake_words
        .as_ref()
        .map_or_else(|| AssistantConfig::default().wake_words.join(", "), |w| w.join(", "));
    let wake_input: String = Input::new()
        .with_prompt("Wake word(s), comma separated")
        .default(default_wake)
        .interact_text()?;
    let wake_words: Vec<String> = wake_input
        .split(',')
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .collect();
    if wake_words.is_empty() {
        anyhow::bail!("at least one wake word is required");
    }
    existing.assistant.wake_words = Some(wake_words);

    // 2. Silence timeout
    let default_silence = existing
        .assistant
        .silence_timeout_secs
        .unwrap_or_else(|| AssistantConfig::default().silence_timeout.as_secs_f64());
    let silence: f64 = Input::new()
        .with_prompt("Seconds of silence that end a question")
        .default(default_silence)
        .interact_text()?;
    existing.assistant.silence_timeout_secs = Some(silence);

    // 3. API keys
    let smallest = prompt_key(
        "Smallest AI",
        "SMALLEST_API_KEY",
        existing.api_keys.smallest.as_deref(),
    )?;
    let groq = prompt_key("Groq", "GROQ_API_KEY", existing.api_keys.groq.as_deref())?;
    existing.api_keys = ApiKeysFileConfig { smallest, groq };

    // 4. Speech synthesis
    let modes = ["http", "stream"];
    let default_mode = existing
        .tts
        .mode
        .as_deref()
        .and_then(|m| modes.iter().position(|&l| l.eq_ignore_ascii_case(m)))
        .unwrap_or(0);
    let mode_idx = Select::new()
        .with_prompt("Speech synthesis mode")
        .items(&["http (simple)", "stream (lower latency)"])
        .default(default_mode)
        .interact()?;

    let voice: String = Input::new()
        .with_prompt("Voice")
        .default(
            existing
                .tts
                .voice
                .clone()
                .unwrap_or_else(|| TtsConfig::default().voice),
        )
        .interact_text()?;

    existing.tts = TtsFileConfig {
        mode: Some(modes[mode_idx].to_string()),
        voice: Some(voice),
        ..existing.tts
    };

    // 5. LLM model
    let model: String = Input::new()
        .with_prompt("LLM model")
        .default(
            existing
                .llm
                .model
                .clone()
                .unwrap_or_else(|| LlmConfig::default().model),
        )
        .interact_text()?;
    existing.llm = LlmFileConfig {
        model: Some(model),
        ..existing.llm
    };

    write_config(&config_path, &existing)?;
    println!("\nConfig written to {}", config_path.display());
    println!("\nSetup complete! Run `jarvis -v` to start.");

    Ok(())
}

fn prompt_key(service: &str, env_hint: &str, existing: Option<&str>) -> anyhow::Result<Option<String>> {
    let prompt = existing.map_or_else(
        || format!("{service} API key ({env_hint}, leave blank to use the environment)"),
        |k| format!("{service} API key (current: {}, leave blank to keep)", mask_key(k)),
    );

    let input: String = Input::new()
        .with_prompt(&prompt)
        .allow_empty(true)
        .interact_text()?;

    Ok(if input.trim().is_empty() {
        existing.map(str::to_string)
    } else {
        Some(input.trim().to_string())
    })
}

/// Show only the ends of a key
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "****".to_string()
    }
}

/// Serialize and write the config file
fn write_config(path: &Path, config: &JarvisConfigFile) -> anyhow::Result<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, toml::to_string_pretty(config)?)?;
    Ok(())
}
