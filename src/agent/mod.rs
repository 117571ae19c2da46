//! Response dispatch
//!
//! Turns a captured query plus conversation history into a reply. The
//! generator is asked to prefix every answer with a directive so background
//! speech that was not meant for the assistant can be dropped silently.

mod groq;
pub mod screenshot;

use std::sync::Arc;

use async_trait::async_trait;

pub use groq::GroqClient;
pub use screenshot::{NativeScreenCapture, ScreenCapture, wants_screenshot};

use crate::{Error, Result};

/// Exchanges kept from the start of a conversation, for topical continuity
const CONTEXT_HEAD_EXCHANGES: usize = 1;

/// Most recent exchanges kept, bounding request size
const CONTEXT_TAIL_EXCHANGES: usize = 3;

/// Spoken when the generator fails
pub const FALLBACK_REPLY: &str = "Sorry, I ran into a problem answering that. Could you try again?";

/// Spoken when a screenshot was taken but could not be analyzed
pub const SCREENSHOT_FALLBACK_REPLY: &str = "Sorry, I couldn't analyze the screenshot.";

/// Directive prefix for replies meant to be spoken
const SPEAK_PREFIX: &str = "SPEAK:";

/// Directive prefix for speech that was not directed at the assistant
const STOP_PREFIX: &str = "STOP:";

/// Who said a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The person talking to the assistant
    User,
    /// The assistant
    Assistant,
}

/// One entry of conversation history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    /// Speaker
    pub role: Role,
    /// What was said
    pub content: String,
}

impl ConversationTurn {
    /// A user turn
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant turn
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Backend that produces raw text for a prompt
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Generate a response for `content` under the `system` directive
    ///
    /// # Errors
    ///
    /// Returns error if the backend request fails
    async fn generate(&self, system: &str, content: &str) -> Result<String>;

    /// Answer `query` about a PNG screenshot under the `system` directive
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot read images or the request fails
    async fn answer_about_image(&self, _system: &str, _query: &str, _png: &[u8]) -> Result<String> {
        Err(Error::Agent("image input not supported".to_string()))
    }
}

/// Interpreted generator output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Speak this text and record the exchange
    Speak(String),
    /// The speech was not directed at the assistant; say nothing
    Ignore,
    /// The generator failed; speak an apology but keep history unchanged
    Fallback(String),
}

/// Invokes the response generator with bounded context
pub struct ResponseDispatcher {
    generator: Arc<dyn ResponseGenerator>,
    assistant_name: String,
    system_prompt: String,
    screen: Option<Arc<dyn ScreenCapture>>,
}

impl ResponseDispatcher {
    /// Create a dispatcher for an assistant called `assistant_name`
    #[must_use]
    pub fn new(generator: Arc<dyn ResponseGenerator>, assistant_name: impl Into<String>) -> Self {
        let assistant_name = assistant_name.into();
        let system_prompt = system_prompt(&assistant_name);
        Self {
            generator,
            assistant_name,
            system_prompt,
            screen: None,
        }
    }

    /// Capture the screen for queries that mention a screenshot
    #[must_use]
    pub fn with_screen_capture(mut self, screen: Arc<dyn ScreenCapture>) -> Self {
        self.screen = Some(screen);
        self
    }

    /// Get a reply for `query` given the conversation so far
    ///
    /// Never fails: generator errors become [`Reply::Fallback`].
    pub async fn dispatch(&self, query: &str, history: &[ConversationTurn]) -> Reply {
        if let Some(reply) = self.screenshot_reply(query).await {
            return reply;
        }

        let context = bounded_context(history);
        let content = build_prompt(query, &context, &self.assistant_name);

        tracing::info!(query, context_turns = context.len(), "dispatching query");
        let started = std::time::Instant::now();

        match self.generator.generate(&self.system_prompt, &content).await {
            Ok(text) => {
                tracing::debug!(
                    elapsed_ms = started.elapsed().as_millis(),
                    "generator responded"
                );
                interpret(&text)
            }
            Err(e) => {
                tracing::error!(error = %e, "response generator failed");
                Reply::Fallback(FALLBACK_REPLY.to_string())
            }
        }
    }

    /// Answer from a screenshot, or `None` to fall through to the text model
    async fn screenshot_reply(&self, query: &str) -> Option<Reply> {
        let screen = self.screen.as_ref().filter(|_| wants_screenshot(query))?;
        tracing::info!(query, "screenshot requested");

        let png = match screen.capture().await {
            Ok(Some(png)) => png,
            Ok(None) => {
                tracing::info!("no screenshot taken, using text model");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "screenshot failed, using text model");
                return None;
            }
        };

        let started = std::time::Instant::now();
        match self
            .generator
            .answer_about_image(&self.system_prompt, query, &png)
            .await
        {
            Ok(text) => {
                tracing::debug!(
                    elapsed_ms = started.elapsed().as_millis(),
                    png_bytes = png.len(),
                    "screenshot answered"
                );
                Some(interpret(&text))
            }
            Err(e) => {
                tracing::error!(error = %e, "screenshot analysis failed");
                Some(Reply::Fallback(SCREENSHOT_FALLBACK_REPLY.to_string()))
            }
        }
    }
}

fn interpret(text: &str) -> Reply {
    let reply = parse_directive(text);
    if reply == Reply::Ignore {
        tracing::info!("speech not directed at assistant, ignoring");
    }
    reply
}

/// System directive sent with every request
#[must_use]
pub fn system_prompt(assistant_name: &str) -> String {
    format!(
        "You are {assistant_name}, a helpful AI assistant.

Start EVERY response with exactly one of these prefixes:
- \"{SPEAK_PREFIX}\" if the user's message is directed at you
- \"{STOP_PREFIX}\" if it's unrelated background speech or not meant for you

Keep responses concise (1-3 sentences)."
    )
}

/// First exchange plus the last few, without overlap
#[must_use]
pub fn bounded_context(history: &[ConversationTurn]) -> Vec<ConversationTurn> {
    let head = CONTEXT_HEAD_EXCHANGES * 2;
    let tail = CONTEXT_TAIL_EXCHANGES * 2;

    if history.len() <= head {
        return history.to_vec();
    }

    let tail_start = history.len().saturating_sub(tail).max(head);
    history[..head]
        .iter()
        .chain(&history[tail_start..])
        .cloned()
        .collect()
}

/// Render the user message: optional history transcript plus the query
#[must_use]
pub fn build_prompt(query: &str, context: &[ConversationTurn], assistant_name: &str) -> String {
    if context.is_empty() {
        return format!("CURRENT QUERY: {query}");
    }

    let history = context
        .iter()
        .map(|turn| {
            let speaker = match turn.role {
                Role::User => "User",
                Role::Assistant => assistant_name,
            };
            format!("{speaker}: {}", turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!("CONVERSATION HISTORY:\n{history}\n\nCURRENT QUERY: {query}")
}

/// Interpret the directive prefix of a generator response
#[must_use]
pub fn parse_directive(text: &str) -> Reply {
    let text = text.trim();

    if starts_with_ignore_case(text, STOP_PREFIX) {
        return Reply::Ignore;
    }

    if starts_with_ignore_case(text, SPEAK_PREFIX) {
        return Reply::Speak(text[SPEAK_PREFIX.len()..].trim().to_string());
    }

    Reply::Speak(text.to_string())
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}
