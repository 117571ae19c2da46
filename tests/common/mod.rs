//! Shared test utilities
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use jarvis_voice::agent::{ResponseDispatcher, ResponseGenerator};
use jarvis_voice::turn::{EngineHandle, TurnEngine, TurnSettings, TurnSnapshot};
use jarvis_voice::voice::{Speaker, WakeWordDetector};
use jarvis_voice::{Error, Result, SessionContext};

/// Generator that replays scripted responses and records prompts
#[derive(Default)]
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    /// Replay `responses` in order, then answer "SPEAK: ok"
    pub fn new(responses: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        })
    }

    /// Always answer with `text`
    pub fn speaking(text: &str) -> Arc<Self> {
        Self::new(vec![Ok(text.to_string())])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    async fn generate(&self, _system: &str, content: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(content.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("SPEAK: ok".to_string()))
    }
}

/// A generator failure
pub fn generator_error() -> Result<String> {
    Err(Error::Agent("model unavailable".to_string()))
}

/// Speaker that records what it was asked to say
pub struct RecordingSpeaker {
    ctx: SessionContext,
    delay: Duration,
    spoken: Mutex<Vec<String>>,
    flag_seen: Mutex<Vec<bool>>,
}

impl RecordingSpeaker {
    pub fn new(ctx: &SessionContext) -> Arc<Self> {
        Self::with_delay(ctx, Duration::ZERO)
    }

    /// Each utterance takes `delay` to play
    pub fn with_delay(ctx: &SessionContext, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            ctx: ctx.clone(),
            delay,
            spoken: Mutex::new(Vec::new()),
            flag_seen: Mutex::new(Vec::new()),
        })
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    /// Whether the speaking flag was asserted for each utterance
    pub fn flag_seen(&self) -> Vec<bool> {
        self.flag_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Speaker for RecordingSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        self.flag_seen
            .lock()
            .unwrap()
            .push(self.ctx.speaking.is_speaking());
        tokio::time::sleep(self.delay).await;
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Default timing: 5 s silence, 60 s conversation
pub fn settings() -> TurnSettings {
    TurnSettings {
        silence_timeout: Duration::from_secs(5),
        conversation_timeout: Duration::from_secs(60),
        silence_tolerance: Duration::from_millis(100),
    }
}

/// Start an engine listening for "jarvis"
pub fn start_engine(
    settings: TurnSettings,
    generator: Arc<ScriptedGenerator>,
    speaker: Arc<dyn Speaker>,
    ctx: &SessionContext,
) -> (EngineHandle, JoinHandle<()>) {
    let wake = WakeWordDetector::new(vec!["jarvis".to_string()]).unwrap();
    let dispatcher = Arc::new(ResponseDispatcher::new(generator, "Jarvis"));
    let (engine, handle) = TurnEngine::new(settings, wake, dispatcher, speaker, ctx.clone());
    (handle, tokio::spawn(engine.run()))
}

/// Poll the engine until `check` passes or two seconds elapse
pub async fn wait_for_state<F>(handle: &EngineHandle, check: F) -> TurnSnapshot
where
    F: Fn(&TurnSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let snapshot = handle.snapshot().await.unwrap();
        if check(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "engine never reached expected state: {snapshot:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// What the mock transcription server saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Connected {
        conn: usize,
        authorization: Option<String>,
        query: Option<String>,
    },
    Binary {
        conn: usize,
        len: usize,
    },
    Text {
        conn: usize,
        text: String,
    },
    Closed {
        conn: usize,
    },
}

/// Instruction for the current mock connection
#[derive(Debug)]
pub enum Action {
    Send(String),
    Drop,
}

/// Local WebSocket server standing in for the transcription service
pub struct MockServer {
    pub url: String,
    observed: mpsc::UnboundedReceiver<Observed>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<Action>>>>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/stt", listener.local_addr().unwrap());
        let (observed_tx, observed) = mpsc::unbounded_channel();
        let current = Arc::new(Mutex::new(None));

        let accept_current = Arc::clone(&current);
        tokio::spawn(async move {
            let mut conn = 0;
            while let Ok((tcp, _)) = listener.accept().await {
                let headers = Arc::new(Mutex::new((None, None)));
                let seen = Arc::clone(&headers);
                let callback = move |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
                    let auth = req
                        .headers()
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let query = req.uri().query().map(str::to_string);
                    *seen.lock().unwrap() = (auth, query);
                    Ok(resp)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(tcp, callback).await else {
                    continue;
                };

                let (action_tx, mut actions) = mpsc::unbounded_channel();
                *accept_current.lock().unwrap() = Some(action_tx);

                let (authorization, query) = headers.lock().unwrap().clone();
                let _ = observed_tx.send(Observed::Connected {
                    conn,
                    authorization,
                    query,
                });

                let observed_tx = observed_tx.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            incoming = ws.next() => match incoming {
                                Some(Ok(Message::Binary(data))) => {
                                    let _ = observed_tx.send(Observed::Binary { conn, len: data.len() });
                                }
                                Some(Ok(Message::Text(text))) => {
                                    let text = text.as_str().to_string();
                                    let is_end = text.contains("\"end\"");
                                    let _ = observed_tx.send(Observed::Text { conn, text });
                                    if is_end {
                                        let _ = ws.close(None).await;
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                                    let _ = observed_tx.send(Observed::Closed { conn });
                                    break;
                                }
                                Some(Ok(_)) => {}
                            },
                            action = actions.recv() => match action {
                                Some(Action::Send(text)) => {
                                    let _ = ws.send(Message::Text(text.into())).await;
                                }
                                Some(Action::Drop) | None => break,
                            },
                        }
                    }
                });

                conn += 1;
            }
        });

        Self {
            url,
            observed,
            current,
        }
    }

    /// Act on the most recent connection
    pub fn act(&self, action: Action) {
        let current = self.current.lock().unwrap();
        current.as_ref().expect("no connection yet").send(action).unwrap();
    }

    /// Send a final transcript on the most recent connection
    pub fn send_final(&self, text: &str) {
        let payload = serde_json::json!({ "transcript": text, "is_final": true });
        self.act(Action::Send(payload.to_string()));
    }

    /// Next observation, failing the test after two seconds
    pub async fn next(&mut self) -> Observed {
        tokio::time::timeout(Duration::from_secs(2), self.observed.recv())
            .await
            .expect("mock server saw nothing")
            .expect("mock server stopped")
    }

    /// Skip observations until one matches
    pub async fn expect<F>(&mut self, matches: F) -> Observed
    where
        F: Fn(&Observed) -> bool,
    {
        loop {
            let observed = self.next().await;
            if matches(&observed) {
                return observed;
            }
        }
    }
}
