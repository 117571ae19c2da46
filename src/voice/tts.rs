//! Text-to-speech (TTS) synthesis
//!
//! Both backends produce raw PCM16LE at the configured sample rate and push
//! it into a channel as it arrives, so playback can start before synthesis
//! finishes.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{Sink, SinkExt, Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use super::stt::authorized_request;
use crate::config::{TtsConfig, TtsMode};
use crate::{Error, Result};

/// Bytes per chunk handed to playback (100 ms at 24 kHz, 16-bit)
const PCM_CHUNK_BYTES: usize = 4800;

/// Produces PCM16LE audio for text
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text`, sending audio chunks to `tx` as they become available
    ///
    /// Returns once all audio was sent. Chunks always hold whole samples.
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails; audio sent before the failure stays valid
    async fn synthesize(&self, text: &str, tx: mpsc::Sender<Vec<u8>>) -> Result<()>;

    /// Sample rate of the produced audio
    fn sample_rate(&self) -> u32;
}

/// Build the synthesizer selected by `config.mode`
///
/// # Errors
///
/// Returns error if the HTTP client cannot be built
pub fn synthesizer(config: TtsConfig, api_key: SecretString) -> Result<Box<dyn SpeechSynthesizer>> {
    Ok(match config.mode {
        TtsMode::Http => Box::new(HttpSynthesizer::new(config, api_key)?),
        TtsMode::Stream => Box::new(StreamingSynthesizer::new(config, api_key)),
    })
}

/// One POST per utterance
pub struct HttpSynthesizer {
    client: reqwest::Client,
    api_key: SecretString,
    config: TtsConfig,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    voice_id: &'a str,
    sample_rate: u32,
    speed: f32,
    language: &'a str,
    output_format: &'static str,
}

impl HttpSynthesizer {
    /// Create a new HTTP synthesizer
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: TtsConfig, api_key: SecretString) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
        let request = SpeechRequest {
            text,
            voice_id: &self.config.voice,
            sample_rate: self.config.sample_rate,
            speed: self.config.speed,
            language: &self.config.language,
            output_format: "pcm",
        };

        tracing::debug!(chars = text.len(), voice = %self.config.voice, "requesting speech");

        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("speech API error {status}: {body}")));
        }

        let mut body = response.bytes_stream();
        let mut pending = Vec::with_capacity(PCM_CHUNK_BYTES * 2);
        let mut total = 0usize;

        while let Some(bytes) = body.next().await {
            pending.extend_from_slice(&bytes?);
            while pending.len() >= PCM_CHUNK_BYTES {
                let rest = pending.split_off(PCM_CHUNK_BYTES);
                total += PCM_CHUNK_BYTES;
                if tx.send(std::mem::replace(&mut pending, rest)).await.is_err() {
                    return Ok(());
                }
            }
        }

        // Odd trailing byte is not a sample
        pending.truncate(pending.len() & !1);
        if !pending.is_empty() {
            total += pending.len();
            let _ = tx.send(pending).await;
        }

        tracing::debug!(bytes = total, "speech received");
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }
}

/// Streaming synthesis over WebSocket, fed in word-bounded chunks
pub struct StreamingSynthesizer {
    api_key: SecretString,
    config: TtsConfig,
}

#[derive(Serialize)]
struct StreamChunk<'a> {
    text: &'a str,
    voice_id: &'a str,
    sample_rate: u32,
    speed: f32,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: Option<StreamData>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamData {
    #[serde(default)]
    audio: Option<String>,
}

impl StreamingSynthesizer {
    /// Create a new streaming synthesizer
    #[must_use]
    pub const fn new(config: TtsConfig, api_key: SecretString) -> Self {
        Self { api_key, config }
    }
}

#[async_trait]
impl SpeechSynthesizer for StreamingSynthesizer {
    async fn synthesize(&self, text: &str, tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
        let chunks = chunk_text(text, self.config.chunk_words);
        if chunks.is_empty() {
            return Ok(());
        }

        let request = authorized_request(&self.config.stream_url, &self.api_key)?;
        let (ws, _) = connect_async(request).await?;
        let (mut sink, mut stream) = ws.split();

        tracing::debug!(chunks = chunks.len(), "streaming speech request");

        let send = send_chunks(&mut sink, &chunks, &self.config);
        let receive = receive_audio(&mut stream, &tx, self.config.timeout);

        let (sent, received) = tokio::join!(send, receive);
        let _ = sink.close().await;
        sent?;
        received
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }
}

async fn send_chunks<S>(sink: &mut S, chunks: &[String], config: &TtsConfig) -> Result<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    for (i, chunk) in chunks.iter().enumerate() {
        tracing::trace!(index = i + 1, total = chunks.len(), chunk = %chunk, "sending text chunk");
        let payload = serde_json::to_string(&StreamChunk {
            text: chunk,
            voice_id: &config.voice,
            sample_rate: config.sample_rate,
            speed: config.speed,
        })?;
        sink.send(Message::Text(payload.into())).await?;
    }
    Ok(())
}

async fn receive_audio<S>(stream: &mut S, tx: &mpsc::Sender<Vec<u8>>, timeout: Duration) -> Result<()>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(timeout, stream.next())
            .await
            .map_err(|_| Error::Tts("timed out waiting for audio".to_string()))?;

        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                return Err(Error::Tts("stream closed before completion".to_string()));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        };

        let response: StreamResponse = serde_json::from_str(text.as_str())?;
        if response.status.as_deref() == Some("error") {
            return Err(Error::Tts(
                response.message.unwrap_or_else(|| "stream error".to_string()),
            ));
        }

        if let Some(audio) = response.data.and_then(|d| d.audio) {
            let pcm = BASE64
                .decode(audio)
                .map_err(|e| Error::Tts(format!("invalid audio frame: {e}")))?;
            if tx.send(pcm).await.is_err() {
                return Ok(());
            }
        }

        if response.status.as_deref() == Some("complete") {
            return Ok(());
        }
    }
}

/// Split text into chunks of at most `words` words
#[must_use]
pub fn chunk_text(text: &str, words: usize) -> Vec<String> {
    let all: Vec<&str> = text.split_whitespace().collect();
    all.chunks(words.max(1)).map(|c| c.join(" ")).collect()
}
