//! Streaming speech-to-text session
//!
//! One WebSocket connection per attempt. Two duties share the connection:
//! forwarding captured audio (skipping anything the assistant may have said)
//! and handing final transcripts to the turn engine in arrival order.

use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;
use uuid::Uuid;

use super::AudioFrame;
use crate::config::SttConfig;
use crate::session::SessionContext;
use crate::turn::EngineHandle;
use crate::{Error, Result};

/// Sent once the client has no more audio
const END_OF_AUDIO: &str = r#"{"type":"end"}"#;

/// How long to keep collecting transcripts after the audio stopped
const CAPTURE_END_DRAIN: Duration = Duration::from_secs(2);

/// A transcript from the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    /// Recognized text
    pub text: String,
    /// Whether the service considers the text stable
    pub is_final: bool,
}

impl TranscriptEvent {
    /// A final transcript
    #[must_use]
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Wire format of inbound messages
#[derive(Debug, Deserialize)]
struct ServerMessage {
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Interpreted inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Partial or final transcript
    Transcript(TranscriptEvent),
    /// Server-side timeout report; harmless
    TransientError(String),
    /// Any other server-side error
    ServerError(String),
    /// Nothing the engine cares about
    Ignored,
}

/// Parse one text message from the service
///
/// # Errors
///
/// Returns error if the message is not valid JSON
pub fn parse_message(raw: &str) -> Result<Inbound> {
    let msg: ServerMessage = serde_json::from_str(raw)?;

    let is_error = msg.status.as_deref() == Some("error")
        || msg.kind.as_deref() == Some("error")
        || msg.error.is_some();
    if is_error {
        let detail = msg.message.or(msg.error).unwrap_or_default();
        let lower = detail.to_lowercase();
        if lower.contains("timed out") || lower.contains("timeout") {
            return Ok(Inbound::TransientError(detail));
        }
        return Ok(Inbound::ServerError(detail));
    }

    Ok(msg.transcript.map_or(Inbound::Ignored, |text| {
        Inbound::Transcript(TranscriptEvent {
            text: text.trim().to_string(),
            is_final: msg.is_final,
        })
    }))
}

/// How a session ended without a transport fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Shutdown was requested
    Shutdown,
    /// The capture source stopped producing audio
    CaptureEnded,
}

/// Streaming transcription client
pub struct TranscriptSession {
    config: SttConfig,
    api_key: SecretString,
}

impl TranscriptSession {
    /// Create a client; no connection is made yet
    #[must_use]
    pub const fn new(config: SttConfig, api_key: SecretString) -> Self {
        Self { config, api_key }
    }

    /// Endpoint including the audio format parameters
    ///
    /// # Errors
    ///
    /// Returns error if the configured URL is invalid
    pub fn endpoint(&self) -> Result<Url> {
        Url::parse_with_params(
            &self.config.url,
            &[
                ("language", self.config.language.as_str()),
                ("encoding", "linear16"),
                ("sample_rate", &self.config.sample_rate.to_string()),
            ],
        )
        .map_err(|e| Error::Config(format!("invalid STT url: {e}")))
    }

    /// Run one connection until shutdown, end of audio, or a fault
    ///
    /// The handshake is bounded by the configured connect timeout and gives
    /// way to shutdown.
    ///
    /// `audio` and the engine outlive the connection, so calling this again
    /// after an error resumes exactly where the previous attempt stopped.
    ///
    /// # Errors
    ///
    /// Returns error if the connection fails or the server drops it
    pub async fn run(
        &self,
        audio: &mut mpsc::Receiver<AudioFrame>,
        engine: &EngineHandle,
        ctx: &SessionContext,
    ) -> Result<SessionEnd> {
        let request = authorized_request(self.endpoint()?.as_str(), &self.api_key)?;
        let connection_id = Uuid::new_v4();

        let handshake = tokio::time::timeout(self.config.connect_timeout, connect_async(request));
        let (ws, _) = tokio::select! {
            connected = handshake => connected.map_err(|_| {
                Error::Stt(format!(
                    "handshake not completed within {:?}",
                    self.config.connect_timeout
                ))
            })??,
            () = ctx.shutdown.wait() => {
                tracing::debug!(%connection_id, "shutdown during handshake");
                return Ok(SessionEnd::Shutdown);
            }
        };
        tracing::info!(%connection_id, "transcription session connected");

        let (mut sink, mut stream) = ws.split();

        let end = tokio::select! {
            end = forward_audio(&mut sink, audio, ctx, self.config.keepalive) => end?,
            received = receive_transcripts(&mut stream, engine) => {
                received?;
                return Err(Error::Stt("connection closed by server".to_string()));
            }
        };

        if end == SessionEnd::CaptureEnded {
            // Let the service flush transcripts for the tail of the audio
            let _ = tokio::time::timeout(
                CAPTURE_END_DRAIN,
                receive_transcripts(&mut stream, engine),
            )
            .await;
        }

        if let Err(e) = sink.close().await {
            tracing::debug!(%connection_id, error = %e, "close after end of audio failed");
        }

        tracing::info!(%connection_id, ?end, "transcription session ended");
        Ok(end)
    }

    /// Run sessions back to back, reconnecting after `backoff` on any fault
    ///
    /// This is the only retry boundary; it returns only on shutdown or when
    /// capture has ended.
    pub async fn run_supervised(
        &self,
        audio: &mut mpsc::Receiver<AudioFrame>,
        engine: &EngineHandle,
        ctx: &SessionContext,
        backoff: Duration,
    ) -> SessionEnd {
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            match self.run(audio, engine, ctx).await {
                Ok(end) => return end,
                Err(e) => {
                    if ctx.shutdown.is_triggered() {
                        return SessionEnd::Shutdown;
                    }
                    if e.is_transient() {
                        tracing::warn!(attempt, error = %e, "transcription session dropped, reconnecting");
                    } else {
                        tracing::error!(attempt, error = %e, "transcription session failed, reconnecting");
                    }
                }
            }

            tokio::select! {
                () = tokio::time::sleep(backoff) => {}
                () = ctx.shutdown.wait() => return SessionEnd::Shutdown,
            }
        }
    }
}

/// Build a WebSocket request carrying a bearer token
pub(crate) fn authorized_request(url: &str, api_key: &SecretString) -> Result<Request> {
    let mut request = url.into_client_request()?;
    let value = HeaderValue::from_str(&format!("Bearer {}", api_key.expose_secret()))
        .map_err(|e| Error::Config(format!("invalid API key: {e}")))?;
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(request)
}

async fn forward_audio<S>(
    sink: &mut S,
    audio: &mut mpsc::Receiver<AudioFrame>,
    ctx: &SessionContext,
    keepalive: Duration,
) -> Result<SessionEnd>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let mut ping = tokio::time::interval_at(Instant::now() + keepalive, keepalive);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut forwarded: u64 = 0;
    let mut suppressed: u64 = 0;

    let end = loop {
        tokio::select! {
            () = ctx.shutdown.wait() => break SessionEnd::Shutdown,
            _ = ping.tick() => sink.send(Message::Ping(Vec::new().into())).await?,
            frame = audio.recv() => match frame {
                None => break SessionEnd::CaptureEnded,
                Some(frame) if ctx.speaking.suppresses(&frame) => {
                    suppressed += 1;
                }
                Some(frame) => {
                    sink.send(Message::Binary(frame.to_le_bytes().into())).await?;
                    forwarded += 1;
                }
            },
        }
    };

    tracing::debug!(forwarded, suppressed, ?end, "audio forwarding stopped");
    sink.send(Message::Text(END_OF_AUDIO.to_string().into()))
        .await?;
    Ok(end)
}

async fn receive_transcripts<S>(stream: &mut S, engine: &EngineHandle) -> Result<()>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        match message? {
            Message::Text(text) => handle_text(text.as_str(), engine).await?,
            Message::Close(frame) => {
                tracing::debug!(?frame, "server closed transcription session");
                return Ok(());
            }
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
    Ok(())
}

async fn handle_text(raw: &str, engine: &EngineHandle) -> Result<()> {
    match parse_message(raw) {
        Ok(Inbound::Transcript(event)) if event.is_final && !event.text.is_empty() => {
            tracing::info!(text = %event.text, "transcript");
            engine.submit(event).await?;
        }
        Ok(Inbound::Transcript(event)) => {
            tracing::trace!(text = %event.text, "partial transcript");
        }
        Ok(Inbound::TransientError(detail)) => {
            tracing::debug!(%detail, "transient server error ignored");
        }
        Ok(Inbound::ServerError(detail)) => {
            tracing::warn!(%detail, "transcription server error");
        }
        Ok(Inbound::Ignored) => {}
        Err(e) => {
            tracing::warn!(error = %e, "malformed transcription message dropped");
        }
    }
    Ok(())
}
