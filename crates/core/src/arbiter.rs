//! Mutual exclusion for the single shared automation resource.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Errors returned by `ResourceArbiter::acquire`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArbiterError {
    /// The resource stayed busy for the whole wait.
    #[error("resource busy for {waited:?} (held by {holder:?})")]
    Timeout {
        waited: Duration,
        holder: Option<String>,
    },

    /// The resource has been retired and refuses new holders.
    #[error("resource retired: {0}")]
    Retired(String),
}

/// Current holder of the resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceHolder {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

/// Resource state as shown to observers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<ResourceHolder>,
    pub retired: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retired_reason: Option<String>,
}

#[derive(Debug, Default)]
struct ArbiterState {
    holder: Option<(u64, ResourceHolder)>,
    retired: Option<String>,
}

#[derive(Debug)]
struct ArbiterInner {
    permits: Arc<Semaphore>,
    state: Mutex<ArbiterState>,
    next_token: AtomicU64,
}

impl ArbiterInner {
    fn lock(&self) -> MutexGuard<'_, ArbiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Gate allowing at most one outstanding `ResourceToken`.
///
/// Waiting for the resource suspends only the calling task.
#[derive(Debug, Clone)]
pub struct ResourceArbiter {
    inner: Arc<ArbiterInner>,
}

impl Default for ResourceArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceArbiter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArbiterInner {
                permits: Arc::new(Semaphore::new(1)),
                state: Mutex::new(ArbiterState::default()),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    /// Wait up to `timeout` for the resource.
    pub async fn acquire(
        &self,
        holder: &str,
        timeout: Duration,
    ) -> Result<ResourceToken, ArbiterError> {
        if let Some(reason) = self.inner.lock().retired.clone() {
            return Err(ArbiterError::Retired(reason));
        }

        let permit =
            match tokio::time::timeout(timeout, self.inner.permits.clone().acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_closed)) => {
                    return Err(ArbiterError::Retired("resource closed".to_string()));
                }
                Err(_elapsed) => {
                    let current = self.inner.lock().holder.as_ref().map(|(_, h)| h.holder.clone());
                    return Err(ArbiterError::Timeout {
                        waited: timeout,
                        holder: current,
                    });
                }
            };

        let id = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let acquired_at = Utc::now();
        {
            let mut state = self.inner.lock();
            if let Some(reason) = state.retired.clone() {
                return Err(ArbiterError::Retired(reason));
            }
            state.holder = Some((
                id,
                ResourceHolder {
                    holder: holder.to_string(),
                    acquired_at,
                },
            ));
        }

        debug!(holder = %holder, token = id, "Resource acquired");

        Ok(ResourceToken {
            id,
            holder: holder.to_string(),
            acquired_at,
            inner: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Give the resource back. Equivalent to dropping the token.
    pub fn release(&self, token: ResourceToken) {
        drop(token);
    }

    /// Refuse new holders until `restore` is called. A current holder keeps
    /// its token.
    pub fn retire(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "Resource retired");
        self.inner.lock().retired = Some(reason);
    }

    /// Accept holders again. Returns false if the resource was not retired.
    pub fn restore(&self) -> bool {
        let was_retired = self.inner.lock().retired.take().is_some();
        if was_retired {
            info!("Resource restored");
        }
        was_retired
    }

    pub fn is_retired(&self) -> bool {
        self.inner.lock().retired.is_some()
    }

    pub fn holder(&self) -> Option<ResourceHolder> {
        self.inner.lock().holder.as_ref().map(|(_, h)| h.clone())
    }

    pub fn status(&self) -> ResourceStatus {
        let state = self.inner.lock();
        ResourceStatus {
            holder: state.holder.as_ref().map(|(_, h)| h.clone()),
            retired: state.retired.is_some(),
            retired_reason: state.retired.clone(),
        }
    }
}

/// Exclusive right to use the resource. Dropping it releases the resource.
#[derive(Debug)]
pub struct ResourceToken {
    id: u64,
    holder: String,
    acquired_at: DateTime<Utc>,
    inner: Arc<ArbiterInner>,
    _permit: OwnedSemaphorePermit,
}

impl ResourceToken {
    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }
}

impl Drop for ResourceToken {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        if matches!(state.holder, Some((id, _)) if id == self.id) {
            state.holder = None;
        }
        debug!(holder = %self.holder, token = self.id, "Resource released");
    }
}
