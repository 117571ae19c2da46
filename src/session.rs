//! Shared session context
//!
//! Everything that used to be ambient mutable state (the "assistant speaking"
//! flag, the running flag) lives here and is passed explicitly to each
//! component.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::time::Instant;

use crate::voice::AudioFrame;

/// Context handed to every component of a running assistant
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Asserted while the assistant is thinking or talking
    pub speaking: SpeakingFlag,
    /// Process-wide shutdown signal
    pub shutdown: Shutdown,
}

impl SessionContext {
    /// Create a fresh context with the flag released and no shutdown pending
    #[must_use]
    pub fn new() -> Self {
        Self {
            speaking: SpeakingFlag::new(),
            shutdown: Shutdown::new(),
        }
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct SpeakingInner {
    holders: AtomicUsize,
    released_at: Mutex<Option<Instant>>,
}

/// "Assistant speaking" flag
///
/// Held through RAII guards so that every exit path of a response cycle,
/// including errors and panics, releases it. Multiple holders nest: the
/// response cycle and the playback sink may both hold it, and the flag only
/// drops once the last guard is gone.
#[derive(Debug, Clone, Default)]
pub struct SpeakingFlag {
    inner: Arc<SpeakingInner>,
}

impl SpeakingFlag {
    /// Create a released flag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assert the flag until the returned guard is dropped
    #[must_use = "the flag is released as soon as the guard is dropped"]
    pub fn hold(&self) -> SpeakingGuard {
        if self.inner.holders.fetch_add(1, Ordering::SeqCst) == 0 {
            tracing::debug!("assistant speaking - suppressing microphone forwarding");
        }
        SpeakingGuard {
            flag: self.clone(),
        }
    }

    /// Whether the assistant is currently speaking
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.inner.holders.load(Ordering::SeqCst) > 0
    }

    /// When the flag was last released
    #[must_use]
    pub fn released_at(&self) -> Option<Instant> {
        *self
            .inner
            .released_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a captured frame must be kept away from the transcription service
    ///
    /// Frames captured while the flag was held are discarded even if they are
    /// only dequeued after release.
    #[must_use]
    pub fn suppresses(&self, frame: &AudioFrame) -> bool {
        if self.is_speaking() {
            return true;
        }
        self.released_at()
            .is_some_and(|released| frame.captured_at() < released)
    }

    fn release(&self) {
        // Decrement under the boundary lock so a reader that sees the count at
        // zero always reads the boundary set by the last release
        let mut released_at = self
            .inner
            .released_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.holders.fetch_sub(1, Ordering::SeqCst) == 1 {
            *released_at = Some(Instant::now());
            tracing::debug!("assistant finished speaking - forwarding resumed");
        }
    }
}

/// RAII guard returned by [`SpeakingFlag::hold`]
#[derive(Debug)]
pub struct SpeakingGuard {
    flag: SpeakingFlag,
}

impl Drop for SpeakingGuard {
    fn drop(&mut self) {
        self.flag.release();
    }
}

/// Cloneable shutdown signal backed by a watch channel
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Create a signal that has not fired
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Fire the signal; all waiters wake up
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the signal has fired
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the signal fires
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of self, so this only errors
        // if every handle is gone, which means nobody can trigger anymore
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
