//! OpenAI-compatible chat completion client (Groq by default)

use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::ResponseGenerator;
use super::screenshot::VISION_EXTRACTION_PROMPT;
use crate::config::LlmConfig;
use crate::{Error, Result};

/// Token limit for the vision model's description of a screenshot
const VISION_MAX_TOKENS: u32 = 1024;

/// Low temperature keeps extracted text literal
const VISION_TEMPERATURE: f32 = 0.3;

/// Token limit for answers about a screenshot
const SCREENSHOT_ANSWER_MAX_TOKENS: u32 = 512;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl<'a> ChatRequest<'a> {
    /// System directive plus one user message
    fn text(model: &'a str, system: &'a str, content: &'a str, max_tokens: u32, temperature: f32) -> Self {
        Self {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(system),
                },
                ChatMessage {
                    role: "user",
                    content: MessageContent::Text(content),
                },
            ],
            max_tokens,
            temperature,
        }
    }

    /// Ask the vision model to transcribe and describe a PNG
    fn extraction(model: &'a str, png: &[u8]) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png);
        Self {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: VISION_EXTRACTION_PROMPT,
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:image/png;base64,{encoded}"),
                        },
                    },
                ]),
            }],
            max_tokens: VISION_MAX_TOKENS,
            temperature: VISION_TEMPERATURE,
        }
    }
}

/// User message combining the extracted screen content with the question
fn screenshot_question(extraction: &str, query: &str) -> String {
    format!("Screenshot content:\n\n{extraction}\n\nUser's question: {query}")
}

/// Chat completion client
pub struct GroqClient {
    client: reqwest::Client,
    api_key: SecretString,
    config: LlmConfig,
}

impl GroqClient {
    /// Create a new client
    ///
    /// # Errors
    ///
    /// Returns error if API key is empty
    pub fn new(api_key: SecretString, config: LlmConfig) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Groq API key required".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    async fn complete(&self, request: &ChatRequest<'_>) -> Result<String> {
        let started = std::time::Instant::now();
        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(self.api_key.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, model = %request.model, "chat completion request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat completion API error");
            return Err(Error::Agent(format!("chat completion error {status}: {body}")));
        }

        let result: ChatResponse = response.json().await?;
        let text = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Agent("empty chat completion response".to_string()))?;

        tracing::debug!(
            response_len = text.len(),
            model = %request.model,
            elapsed_ms = started.elapsed().as_millis(),
            "chat completion received"
        );
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl ResponseGenerator for GroqClient {
    async fn generate(&self, system: &str, content: &str) -> Result<String> {
        let request = ChatRequest::text(
            &self.config.model,
            system,
            content,
            self.config.max_tokens,
            self.config.temperature,
        );
        self.complete(&request).await
    }

    async fn answer_about_image(&self, system: &str, query: &str, png: &[u8]) -> Result<String> {
        let extraction = self
            .complete(&ChatRequest::extraction(&self.config.vision_model, png))
            .await?;
        tracing::info!(extraction_len = extraction.len(), "screenshot content extracted");

        let question = screenshot_question(&extraction, query);
        let request = ChatRequest::text(
            &self.config.model,
            system,
            &question,
            SCREENSHOT_ANSWER_MAX_TOKENS,
            self.config.temperature,
        );
        self.complete(&request).await
    }
}
