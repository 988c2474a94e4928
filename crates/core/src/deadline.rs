//! Forceable attempt deadline.
//!
//! Every suspension point inside an acquisition attempt races against a
//! `DeadlineSignal`. The registry and operator abort can force it, which is
//! the only way an attempt is cancelled from outside.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;

/// Longest deadline a signal will hold.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Debug, Clone, Copy)]
struct DeadlineState {
    at: Instant,
    forced: bool,
}

/// Shared deadline that can be moved or forced while tasks wait on it.
#[derive(Debug, Clone)]
pub struct DeadlineSignal {
    tx: Arc<watch::Sender<DeadlineState>>,
}

impl DeadlineSignal {
    pub fn new(at: Instant) -> Self {
        let (tx, _rx) = watch::channel(DeadlineState { at, forced: false });
        Self { tx: Arc::new(tx) }
    }

    /// Deadline `timeout` from now, clamped to `FAR_FUTURE`.
    pub fn after(timeout: Duration) -> Self {
        let now = Instant::now();
        let at = now
            .checked_add(timeout.min(FAR_FUTURE))
            .unwrap_or_else(|| now + FAR_FUTURE);
        Self::new(at)
    }

    pub fn deadline(&self) -> Instant {
        self.tx.borrow().at
    }

    /// Time left before the deadline (zero once forced or passed).
    pub fn remaining(&self) -> Duration {
        let state = *self.tx.borrow();
        if state.forced {
            Duration::ZERO
        } else {
            state.at.saturating_duration_since(Instant::now())
        }
    }

    /// Wall-clock equivalent of the deadline, for persisted state.
    pub fn wall_clock(&self) -> DateTime<Utc> {
        let remaining = chrono::Duration::from_std(self.remaining()).unwrap_or_default();
        Utc::now() + remaining
    }

    /// Move the deadline. Has no effect once forced.
    pub fn reset(&self, at: Instant) {
        self.tx.send_modify(|state| {
            if !state.forced {
                state.at = at;
            }
        });
    }

    /// Expire the deadline immediately.
    pub fn force(&self) {
        self.tx.send_modify(|state| state.forced = true);
    }

    pub fn is_forced(&self) -> bool {
        self.tx.borrow().forced
    }

    pub fn is_expired(&self) -> bool {
        let state = *self.tx.borrow();
        state.forced || Instant::now() >= state.at
    }

    /// Resolve once the deadline passes or is forced.
    pub async fn expired(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state.forced {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(state.at) => return,
                changed = rx.changed() => {
                    if changed.is_err() {
                        tokio::time::sleep_until(state.at).await;
                        return;
                    }
                }
            }
        }
    }
}
