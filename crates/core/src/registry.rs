//! Bookkeeping of live acquisition workers.
//!
//! At most one handle exists per item id. A handle is removed when the
//! worker's `WorkerRegistration` guard drops, so every worker exit path
//! deregisters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::deadline::DeadlineSignal;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A live worker already owns this item.
    #[error("item {item_id} already has a live worker (attempt {attempt_id})")]
    Conflict { item_id: String, attempt_id: u64 },
}

/// Lifecycle phase of a live worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Executing,
    Completing,
}

/// Public view of a live worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub item_id: String,
    pub attempt_id: u64,
    pub generation: u64,
    pub started_at: DateTime<Utc>,
    pub phase: WorkerPhase,
}

#[derive(Debug)]
struct WorkerHandle {
    info: WorkerInfo,
    deadline: DeadlineSignal,
}

#[derive(Debug)]
struct RegistryInner {
    workers: Mutex<HashMap<String, WorkerHandle>>,
    live: watch::Sender<usize>,
    next_generation: AtomicU64,
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, WorkerHandle>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry of running acquisition workers.
#[derive(Debug, Clone)]
pub struct ActiveWorkerRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for ActiveWorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveWorkerRegistry {
    pub fn new() -> Self {
        let (live, _rx) = watch::channel(0);
        Self {
            inner: Arc::new(RegistryInner {
                workers: Mutex::new(HashMap::new()),
                live,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Record a new live worker for `item_id`.
    pub fn register(
        &self,
        item_id: &str,
        attempt_id: u64,
        deadline: DeadlineSignal,
    ) -> Result<WorkerRegistration, RegistryError> {
        let mut workers = self.inner.lock();
        if let Some(existing) = workers.get(item_id) {
            return Err(RegistryError::Conflict {
                item_id: item_id.to_string(),
                attempt_id: existing.info.attempt_id,
            });
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        workers.insert(
            item_id.to_string(),
            WorkerHandle {
                info: WorkerInfo {
                    item_id: item_id.to_string(),
                    attempt_id,
                    generation,
                    started_at: Utc::now(),
                    phase: WorkerPhase::Executing,
                },
                deadline: deadline.clone(),
            },
        );
        self.inner.live.send_replace(workers.len());

        Ok(WorkerRegistration {
            inner: self.inner.clone(),
            item_id: item_id.to_string(),
            attempt_id,
            generation,
            deadline,
        })
    }

    /// Move the worker to `Completing`. Returns false if the registration was
    /// already cleared.
    pub fn mark_completing(&self, registration: &WorkerRegistration) -> bool {
        let mut workers = self.inner.lock();
        match workers.get_mut(&registration.item_id) {
            Some(handle) if handle.info.generation == registration.generation => {
                handle.info.phase = WorkerPhase::Completing;
                true
            }
            _ => false,
        }
    }

    /// Phase of the live worker for `item_id`, if any.
    pub fn is_live(&self, item_id: &str) -> Option<WorkerPhase> {
        self.inner.lock().get(item_id).map(|h| h.info.phase)
    }

    pub fn live(&self) -> Vec<WorkerInfo> {
        let mut live: Vec<WorkerInfo> = self.inner.lock().values().map(|h| h.info.clone()).collect();
        live.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        live
    }

    pub fn live_count(&self) -> usize {
        *self.inner.live.borrow()
    }

    /// Wait until no worker is live. Returns false if `timeout` elapsed first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.live.subscribe();
        let drained = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|count| *count == 0)).await,
            Ok(Ok(_))
        );
        drained
    }

    /// Drop every handle and force the cleared workers' deadlines.
    ///
    /// Returns the cleared item ids. The workers keep running until they
    /// observe the forced deadline; their late deregistration is a no-op.
    pub fn force_clear(&self) -> Vec<String> {
        let cleared: Vec<WorkerHandle> = {
            let mut workers = self.inner.lock();
            let cleared: Vec<WorkerHandle> = workers.drain().map(|(_, h)| h).collect();
            self.inner.live.send_replace(0);
            cleared
        };

        let mut ids: Vec<String> = Vec::with_capacity(cleared.len());
        for handle in cleared {
            handle.deadline.force();
            ids.push(handle.info.item_id);
        }
        ids.sort();

        if !ids.is_empty() {
            warn!(items = ?ids, "Force-cleared live workers");
        }
        ids
    }

    /// Force the deadline of the live worker for `item_id` if it is still
    /// executing. A completing worker is returned untouched; its teardown is
    /// bounded by the teardown timeout alone.
    pub fn force_deadline(&self, item_id: &str) -> Option<WorkerInfo> {
        let workers = self.inner.lock();
        let handle = workers.get(item_id)?;
        if handle.info.phase == WorkerPhase::Executing {
            handle.deadline.force();
        }
        Some(handle.info.clone())
    }
}

/// Guard owned by a worker for its registration.
///
/// Dropping it removes the handle, unless the handle was force-cleared and a
/// newer registration took the slot.
#[derive(Debug)]
pub struct WorkerRegistration {
    inner: Arc<RegistryInner>,
    item_id: String,
    attempt_id: u64,
    generation: u64,
    deadline: DeadlineSignal,
}

impl WorkerRegistration {
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn attempt_id(&self) -> u64 {
        self.attempt_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn deadline(&self) -> &DeadlineSignal {
        &self.deadline
    }
}

impl Drop for WorkerRegistration {
    fn drop(&mut self) {
        let mut workers = self.inner.lock();
        let owned = workers
            .get(&self.item_id)
            .is_some_and(|h| h.info.generation == self.generation);
        if owned {
            workers.remove(&self.item_id);
            self.inner.live.send_replace(workers.len());
            debug!(item_id = %self.item_id, attempt_id = self.attempt_id, "Worker deregistered");
        }
    }
}
