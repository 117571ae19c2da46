//! Generation-tagged silence timer
//!
//! Arming schedules a `TimerFired(token)` event into the engine channel after
//! the silence delay. Aborting the previous sleep is only an optimization:
//! a firing that slips through is rejected by the generation check.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::engine::EngineEvent;
use super::state::SilenceTimerToken;

/// Where the timer is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerStatus {
    /// Nothing scheduled
    #[default]
    Idle,
    /// A firing for this generation is pending
    Armed(SilenceTimerToken),
    /// The firing for this generation was delivered
    Fired(SilenceTimerToken),
}

/// Debounced silence timer
#[derive(Debug)]
pub struct SilenceTimer {
    delay: Duration,
    status: TimerStatus,
    pending: Option<JoinHandle<()>>,
}

impl SilenceTimer {
    /// Timer that fires `delay` after each arm
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            status: TimerStatus::Idle,
            pending: None,
        }
    }

    /// Schedule a firing for `token`, abandoning any earlier one
    pub fn arm(&mut self, token: SilenceTimerToken, events: &mpsc::Sender<EngineEvent>) {
        self.arm_after(token, self.delay, events);
    }

    /// Schedule a firing for `token` after `delay` instead of the full window
    pub fn arm_after(
        &mut self,
        token: SilenceTimerToken,
        delay: Duration,
        events: &mpsc::Sender<EngineEvent>,
    ) {
        self.abort_pending();

        let events = events.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Engine gone means shutdown
            let _ = events.send(EngineEvent::TimerFired(token)).await;
        }));
        self.status = TimerStatus::Armed(token);
        tracing::trace!(%token, delay_ms = delay.as_millis(), "silence timer armed");
    }

    /// Record delivery of a firing
    ///
    /// Returns whether it belongs to the armed generation.
    pub fn fired(&mut self, token: SilenceTimerToken) -> bool {
        if self.status == TimerStatus::Armed(token) {
            self.status = TimerStatus::Fired(token);
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// Drop any pending firing
    pub fn cancel(&mut self) {
        self.abort_pending();
        self.status = TimerStatus::Idle;
    }

    /// Current status
    #[must_use]
    pub const fn status(&self) -> TimerStatus {
        self.status
    }

    fn abort_pending(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }
}

impl Drop for SilenceTimer {
    fn drop(&mut self) {
        self.abort_pending();
    }
}
