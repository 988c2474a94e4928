//! Cycle orchestrator runner.
//!
//! One long-lived loop runs `Drain → AwaitAvailability → Reconcile → Publish
//! → Idle`. Drain waits (bounded) for the previous cycle's workers, so it
//! gates the next Reconcile without delaying the current Publish.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use super::config::CycleSettings;
use super::types::{CycleReport, OrchestratorError, OrchestratorStatus, TimerState};
use crate::acquisition::{AcquisitionAction, AcquisitionWorker, TeardownAction, WorkerContext};
use crate::activity::{ActivityEvent, ActivityHandle};
use crate::arbiter::ResourceArbiter;
use crate::broadcast::{
    CycleSnapshot, CycleTimer, DrainReport, EventBroadcaster, SnapshotSubscription,
    StateTransition, TransitionKind,
};
use crate::deadline::DeadlineSignal;
use crate::feed::{AvailabilityFeed, AvailabilityMap, FeedError};
use crate::metrics;
use crate::registry::{ActiveWorkerRegistry, WorkerInfo, WorkerPhase};
use crate::state::{ItemState, ItemStatus, StateError, StateStore, Transition};

/// How long past its persisted deadline a force-cleared attempt may still
/// land its terminal write before the item is reset anyway.
const CLEARED_ATTEMPT_GRACE_SECS: i64 = 5;

/// Collaborators handed to the orchestrator at construction.
pub struct OrchestratorDeps {
    pub store: Arc<StateStore>,
    pub feed: Arc<dyn AvailabilityFeed>,
    pub action: Arc<dyn AcquisitionAction>,
    pub teardown: Arc<dyn TeardownAction>,
    pub broadcaster: EventBroadcaster,
    pub activity: Option<ActivityHandle>,
}

#[derive(Debug, Default)]
struct CycleState {
    last_cycle_id: u64,
    last_cycle_at: Option<DateTime<Utc>>,
    last_publish: Option<Instant>,
    availability: AvailabilityMap,
    availability_stale: bool,
    idle_until: Option<Instant>,
}

/// State shared between the handle and the loop task.
struct CycleCore {
    workers: WorkerContext,
    feed: Arc<dyn AvailabilityFeed>,
    broadcaster: EventBroadcaster,
    settings: Mutex<Arc<CycleSettings>>,
    pending_settings: Mutex<Option<CycleSettings>>,
    state: Mutex<CycleState>,
    running: AtomicBool,
    refresh: Notify,
    cycle_lock: tokio::sync::Mutex<()>,
    next_cycle: AtomicU64,
    next_attempt: AtomicU64,
}

/// Periodic driver of acquisition attempts.
pub struct CycleOrchestrator {
    core: Arc<CycleCore>,
    shutdown_tx: broadcast::Sender<()>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl CycleOrchestrator {
    /// Create a stopped orchestrator. Call `start()` to run the loop.
    pub fn new(settings: CycleSettings, deps: OrchestratorDeps) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        // Attempt ids keep increasing across restarts.
        let last_attempt = deps
            .store
            .snapshot_all()
            .values()
            .filter_map(|s| s.attempt_id)
            .max()
            .unwrap_or(0);

        let core = CycleCore {
            workers: WorkerContext {
                store: deps.store,
                registry: ActiveWorkerRegistry::new(),
                arbiter: ResourceArbiter::new(),
                action: deps.action,
                teardown: deps.teardown,
                activity: deps.activity,
            },
            feed: deps.feed,
            broadcaster: deps.broadcaster,
            settings: Mutex::new(Arc::new(settings)),
            pending_settings: Mutex::new(None),
            state: Mutex::new(CycleState::default()),
            running: AtomicBool::new(false),
            refresh: Notify::new(),
            cycle_lock: tokio::sync::Mutex::new(()),
            next_cycle: AtomicU64::new(0),
            next_attempt: AtomicU64::new(last_attempt),
        };

        Self {
            core: Arc::new(core),
            shutdown_tx,
            loop_handle: Mutex::new(None),
        }
    }

    /// Start the cycle loop. Returns false if it was already running.
    pub fn start(&self) -> bool {
        if self.core.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return false;
        }

        info!("Starting cycle orchestrator");
        let handle = self.spawn_cycle_loop();
        *self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        true
    }

    /// Stop the loop and give in-flight attempts one drain period to finish.
    /// Returns false if it was not running.
    pub async fn stop(&self) -> bool {
        if !self.core.running.swap(false, Ordering::SeqCst) {
            return false;
        }

        info!("Stopping cycle orchestrator");
        let _ = self.shutdown_tx.send(());

        let handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Cycle loop task failed: {}", e);
            }
        }

        let drain_timeout = self.core.settings().drain_timeout();
        let registry = &self.core.workers.registry;
        if !registry.wait_for_drain(drain_timeout).await {
            let forced = registry.force_clear();
            warn!(forced = ?forced, "Workers still live at shutdown");
        }

        info!("Cycle orchestrator stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::SeqCst)
    }

    /// Run one cycle now, outside the loop. Cycles never overlap.
    pub async fn run_cycle(&self) -> CycleReport {
        self.core.run_cycle().await
    }

    /// End the current idle wait early.
    pub fn trigger_refresh(&self, requested_by: &str) {
        info!(requested_by, "Refresh requested");
        self.core.refresh.notify_one();
        self.core.emit(ActivityEvent::RefreshRequested {
            requested_by: requested_by.to_string(),
        });
    }

    /// Force the deadline of the item's live attempt. The worker records
    /// the failure itself and always deregisters. An attempt already in
    /// teardown is refused.
    pub fn abort_attempt(
        &self,
        item_id: &str,
        requested_by: &str,
    ) -> Result<WorkerInfo, OrchestratorError> {
        self.get_item_state(item_id)?;

        let info = self
            .core
            .workers
            .registry
            .force_deadline(item_id)
            .ok_or_else(|| OrchestratorError::NoLiveAttempt(item_id.to_string()))?;
        if info.phase == WorkerPhase::Completing {
            return Err(OrchestratorError::AttemptCompleting {
                item_id: item_id.to_string(),
                attempt_id: info.attempt_id,
            });
        }

        warn!(item_id, attempt_id = info.attempt_id, requested_by, "Attempt aborted by operator");
        self.core.emit(ActivityEvent::AttemptAborted {
            item_id: item_id.to_string(),
            attempt_id: info.attempt_id,
            requested_by: requested_by.to_string(),
        });
        Ok(info)
    }

    /// Queue new settings; they take effect at the top of the next cycle.
    pub fn update_settings(&self, settings: CycleSettings) -> Result<(), OrchestratorError> {
        settings
            .validate()
            .map_err(OrchestratorError::InvalidSettings)?;

        info!(items = settings.items.len(), "Settings update queued for next cycle");
        *self
            .core
            .pending_settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(settings);
        Ok(())
    }

    /// Settings used by the current (or next) cycle.
    pub fn settings(&self) -> Arc<CycleSettings> {
        self.core.settings()
    }

    /// Lift a quarantine put on the shared resource.
    pub fn restore_resource(&self, requested_by: &str) -> bool {
        let restored = self.core.workers.arbiter.restore();
        if restored {
            metrics::RESOURCE_RETIRED.set(0);
            info!(requested_by, "Shared resource restored");
            self.core.emit(ActivityEvent::ResourceRestored {
                requested_by: requested_by.to_string(),
            });
        }
        restored
    }

    pub fn status(&self) -> OrchestratorStatus {
        let core = &self.core;
        let mut items_by_status = BTreeMap::new();
        for state in core.workers.store.snapshot_all().values() {
            *items_by_status
                .entry(state.status.as_str().to_string())
                .or_insert(0) += 1;
        }

        let (last_cycle_id, availability_stale) = {
            let state = core.lock_state();
            (state.last_cycle_id, state.availability_stale)
        };

        OrchestratorStatus {
            running: self.is_running(),
            last_cycle_id,
            live_workers: core.workers.registry.live(),
            resource: core.workers.arbiter.status(),
            timer: self.timer(),
            items_by_status,
            availability_stale,
            storage: core.workers.store.backend_name().to_string(),
        }
    }

    pub fn timer(&self) -> TimerState {
        let (interval_min_secs, interval_max_secs) = self.core.settings().interval_bounds_secs();
        let state = self.core.lock_state();
        let remaining_secs = if self.is_running() {
            state
                .idle_until
                .map(|until| until.saturating_duration_since(Instant::now()).as_secs_f64())
        } else {
            None
        };

        TimerState {
            remaining_secs,
            interval_min_secs,
            interval_max_secs,
            last_cycle_id: state.last_cycle_id,
            last_cycle_at: state.last_cycle_at,
        }
    }

    pub fn get_item_state(&self, item_id: &str) -> Result<ItemState, OrchestratorError> {
        self.core.workers.store.get(item_id).map_err(|e| match e {
            StateError::UnknownItem(id) => OrchestratorError::ItemNotFound(id),
            other => OrchestratorError::State(other),
        })
    }

    /// Every tracked item in priority order.
    pub fn get_all_states(&self) -> Vec<ItemState> {
        let settings = self.core.settings();
        let availability = self.core.lock_state().availability.clone();
        self.core.ordered_states(&settings, &availability)
    }

    pub fn subscribe(&self) -> SnapshotSubscription {
        self.core.broadcaster.subscribe()
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.core.workers.store
    }

    pub fn registry(&self) -> &ActiveWorkerRegistry {
        &self.core.workers.registry
    }

    pub fn arbiter(&self) -> &ResourceArbiter {
        &self.core.workers.arbiter
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.core.broadcaster
    }

    fn spawn_cycle_loop(&self) -> JoinHandle<()> {
        let core = Arc::clone(&self.core);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Cycle loop started");

            loop {
                let report = tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Cycle loop received shutdown signal");
                        break;
                    }
                    report = core.run_cycle() => report,
                };

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Cycle loop received shutdown signal");
                        break;
                    }
                    _ = core.refresh.notified() => {
                        debug!(cycle_id = report.cycle_id, "Idle wait interrupted by refresh");
                    }
                    _ = sleep(report.next_idle) => {}
                }
                core.lock_state().idle_until = None;
            }

            core.lock_state().idle_until = None;
            info!("Cycle loop stopped");
        })
    }
}

impl CycleCore {
    fn lock_state(&self) -> MutexGuard<'_, CycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settings(&self) -> Arc<CycleSettings> {
        Arc::clone(&self.settings.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn emit(&self, event: ActivityEvent) {
        if let Some(ref activity) = self.workers.activity {
            activity.try_emit(event);
        }
    }

    fn take_pending_settings(&self) -> Arc<CycleSettings> {
        let pending = self
            .pending_settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut current = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(settings) = pending {
            info!(items = settings.items.len(), "Applying updated settings");
            *current = Arc::new(settings);
        }
        Arc::clone(&current)
    }

    async fn run_cycle(&self) -> CycleReport {
        let _cycle = self.cycle_lock.lock().await;
        let started = Instant::now();
        let settings = self.take_pending_settings();
        let cycle_id = self.next_cycle.fetch_add(1, Ordering::SeqCst) + 1;
        self.lock_state().idle_until = None;

        debug!(cycle_id, "Cycle started");

        let drain = self.drain(&settings, cycle_id).await;
        let (availability, availability_stale) = self.await_availability(&settings, cycle_id).await;
        let (transitions, launches_aborted) = self.reconcile(&settings, cycle_id, &availability);

        let next_idle = settings.pick_interval();
        self.publish(
            &settings,
            cycle_id,
            availability,
            availability_stale,
            transitions.clone(),
            drain.clone(),
            next_idle,
        );

        let duration = started.elapsed();
        metrics::CYCLES_TOTAL.inc();
        metrics::CYCLE_DURATION.observe(duration.as_secs_f64());

        info!(
            cycle_id,
            transitions = transitions.len(),
            stale = availability_stale,
            next_idle_secs = next_idle.as_secs_f64(),
            "Cycle complete"
        );

        CycleReport {
            cycle_id,
            drain,
            availability_stale,
            transitions,
            launches_aborted,
            next_idle,
            duration,
        }
    }

    async fn drain(&self, settings: &CycleSettings, cycle_id: u64) -> DrainReport {
        let registry = &self.workers.registry;
        let live = registry.live_count();
        if live == 0 {
            return DrainReport::default();
        }

        debug!(cycle_id, live, "Waiting for previous workers to drain");
        let started = Instant::now();
        if registry.wait_for_drain(settings.drain_timeout()).await {
            return DrainReport {
                timed_out: false,
                forced_items: Vec::new(),
                waited_secs: started.elapsed().as_secs_f64(),
            };
        }

        let waited = started.elapsed();
        let forced_items = registry.force_clear();
        warn!(
            cycle_id,
            waited_ms = waited.as_millis() as u64,
            forced = ?forced_items,
            "Drain timed out, proceeding without waiting further"
        );
        metrics::DRAIN_TIMEOUTS.inc();
        self.emit(ActivityEvent::DrainTimedOut {
            cycle_id,
            waited_ms: waited.as_millis() as u64,
            forced_items: forced_items.clone(),
        });

        DrainReport {
            timed_out: true,
            forced_items,
            waited_secs: waited.as_secs_f64(),
        }
    }

    /// Poll the feed with retries. A failed poll reuses the previous map.
    async fn await_availability(
        &self,
        settings: &CycleSettings,
        cycle_id: u64,
    ) -> (AvailabilityMap, bool) {
        let attempts = settings.feed_retry_attempts.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let result = match timeout(settings.feed_timeout(), self.feed.poll()).await {
                Ok(result) => result,
                Err(_) => Err(FeedError::Timeout(settings.feed_timeout_ms)),
            };

            match result {
                Ok(map) => {
                    let mut state = self.lock_state();
                    state.availability = map.clone();
                    return (map, false);
                }
                Err(e) => {
                    warn!(cycle_id, attempt, feed = self.feed.name(), error = %e, "Availability poll failed");
                    last_error = Some(e);
                }
            }

            if attempt < attempts {
                sleep(settings.feed_retry_delay()).await;
            }
        }

        let error = last_error.map(|e| e.to_string()).unwrap_or_default();
        warn!(cycle_id, error = %error, "Feed degraded, reusing previous availability");
        metrics::FEED_FAILURES.inc();
        self.emit(ActivityEvent::FeedDegraded {
            cycle_id,
            error,
            attempts,
        });

        let previous = self.lock_state().availability.clone();
        (previous, true)
    }

    /// Resets, then launches. No `.await` in here.
    fn reconcile(
        &self,
        settings: &CycleSettings,
        cycle_id: u64,
        availability: &AvailabilityMap,
    ) -> (Vec<StateTransition>, bool) {
        let store = &self.workers.store;
        let registry = &self.workers.registry;

        let seen = settings
            .items
            .iter()
            .map(|item| item.id.as_str())
            .chain(availability.keys().map(String::as_str));
        match store.ensure_tracked(seen) {
            Ok(created) if !created.is_empty() => {
                info!(cycle_id, items = ?created, "Tracking new items");
            }
            Ok(_) => {}
            Err(e) => error!(cycle_id, error = %e, "Failed to track new items"),
        }

        let order = self.priority_order(settings, availability);
        let mut transitions = Vec::new();

        let now = Utc::now();
        for id in &order {
            if registry.is_live(id).is_some() {
                continue;
            }
            if let Some(attempt_id) = self.unfinished_attempt(settings, id, now) {
                debug!(cycle_id, item_id = %id, attempt_id, "Cleared attempt still finishing, reset deferred");
                continue;
            }

            let mut cleared_outcome = None;
            let reset = store.compare_and_transition(id, &ItemStatus::NOT_READY, ItemStatus::Ready, |s| {
                cleared_outcome = s.final_outcome.take();
            });
            match reset {
                Ok(Transition::Applied { previous, .. }) => {
                    debug!(cycle_id, item_id = %id, from = %previous, "Item reset to ready");
                    transitions.push(StateTransition {
                        item_id: id.clone(),
                        kind: TransitionKind::Reset,
                        from: previous,
                        to: ItemStatus::Ready,
                        attempt_id: None,
                        attempt_deadline: None,
                        cleared_outcome,
                    });
                    self.emit(ActivityEvent::ItemReset {
                        item_id: id.clone(),
                        from_status: previous.as_str().to_string(),
                    });
                }
                Ok(Transition::Rejected { .. }) => {}
                Err(e) => error!(cycle_id, item_id = %id, error = %e, "Failed to reset item"),
            }
        }

        let mut launches_aborted = false;
        for id in &order {
            if !availability.get(id).copied().unwrap_or(false) {
                continue;
            }
            if !settings.is_enabled(id) {
                debug!(cycle_id, item_id = %id, "Item available but disabled");
                continue;
            }
            if registry.is_live(id).is_some() {
                continue;
            }
            match store.get(id) {
                Ok(state) if state.status == ItemStatus::Ready => {}
                Ok(_) => continue,
                Err(e) => {
                    error!(cycle_id, item_id = %id, error = %e, "Failed to read item state");
                    continue;
                }
            }

            let attempt_id = self.next_attempt.fetch_add(1, Ordering::SeqCst) + 1;
            let deadline = DeadlineSignal::after(settings.attempt_budget());
            let registration = match registry.register(id, attempt_id, deadline.clone()) {
                Ok(registration) => registration,
                Err(e) => {
                    error!(cycle_id, item_id = %id, error = %e, "Registry conflict, aborting remaining launches");
                    launches_aborted = true;
                    break;
                }
            };

            let started_at = Utc::now();
            let attempt_deadline = deadline.wall_clock();
            let moved = store.compare_and_transition(
                id,
                &[ItemStatus::Ready],
                ItemStatus::Attempting,
                |s| {
                    s.attempt_id = Some(attempt_id);
                    s.attempt_started_at = Some(started_at);
                    s.attempt_deadline = Some(attempt_deadline);
                },
            );
            match moved {
                Ok(t) if t.is_applied() => {}
                Ok(t) => {
                    debug!(cycle_id, item_id = %id, status = %t.state().status, "Item left ready before launch");
                    continue;
                }
                Err(e) => {
                    error!(cycle_id, item_id = %id, error = %e, "Failed to start attempt");
                    continue;
                }
            }

            info!(cycle_id, item_id = %id, attempt_id, deadline = %attempt_deadline, "Launching acquisition attempt");
            metrics::ATTEMPTS_STARTED.inc();
            transitions.push(StateTransition {
                item_id: id.clone(),
                kind: TransitionKind::AttemptStarted,
                from: ItemStatus::Ready,
                to: ItemStatus::Attempting,
                attempt_id: Some(attempt_id),
                attempt_deadline: Some(attempt_deadline),
                cleared_outcome: None,
            });
            self.emit(ActivityEvent::AttemptStarted {
                item_id: id.clone(),
                attempt_id,
                deadline: attempt_deadline,
            });

            let worker = AcquisitionWorker::new(
                self.workers.clone(),
                registration,
                settings.attempt_limits(),
            );
            tokio::spawn(worker.run());
        }

        (transitions, launches_aborted)
    }

    /// Attempt id of a force-cleared attempt that can still record its
    /// outcome: the item is mid-attempt, no handle is live, and the persisted
    /// deadline plus teardown allowance has not passed. Attempts orphaned by
    /// a restart are released the same way once that window is over.
    fn unfinished_attempt(
        &self,
        settings: &CycleSettings,
        id: &str,
        now: DateTime<Utc>,
    ) -> Option<u64> {
        let state = self.workers.store.get(id).ok()?;
        if !state.status.is_active() {
            return None;
        }
        let allowance = chrono::Duration::from_std(settings.attempt_limits().teardown_timeout)
            .ok()?
            .checked_add(&chrono::Duration::seconds(CLEARED_ATTEMPT_GRACE_SECS))?;
        let release_at = state.attempt_deadline?.checked_add_signed(allowance)?;
        (release_at > now).then_some(state.attempt_id).flatten()
    }

    #[allow(clippy::too_many_arguments)]
    fn publish(
        &self,
        settings: &CycleSettings,
        cycle_id: u64,
        availability: AvailabilityMap,
        availability_stale: bool,
        transitions: Vec<StateTransition>,
        drain: DrainReport,
        next_idle: std::time::Duration,
    ) {
        let items = self.ordered_states(settings, &availability);
        record_status_gauges(&items);
        let live_workers = self.workers.registry.live_count();
        metrics::LIVE_WORKERS.set(live_workers as i64);

        let drain_bound = if live_workers > 0 {
            settings.drain_timeout()
        } else {
            std::time::Duration::ZERO
        };
        let next_snapshot_max_delay = drain_bound.saturating_add(settings.feed_budget());

        let now = Instant::now();
        let elapsed_since_previous = {
            let mut state = self.lock_state();
            let elapsed = state.last_publish.map(|at| now.duration_since(at));
            state.last_publish = Some(now);
            state.last_cycle_id = cycle_id;
            state.last_cycle_at = Some(Utc::now());
            state.availability_stale = availability_stale;
            state.idle_until = Some(now + next_idle);
            elapsed
        };

        let (interval_min_secs, interval_max_secs) = settings.interval_bounds_secs();
        let snapshot = CycleSnapshot {
            cycle_id,
            timestamp: Utc::now(),
            availability,
            availability_stale,
            items,
            transitions,
            timer: CycleTimer {
                next_cycle_eta_secs: next_idle.as_secs_f64(),
                next_snapshot_max_delay_secs: next_snapshot_max_delay.as_secs_f64(),
                interval_min_secs,
                interval_max_secs,
                elapsed_since_previous_secs: elapsed_since_previous.map(|d| d.as_secs_f64()),
            },
            drain,
            resource: self.workers.arbiter.status(),
        };

        let report = self.broadcaster.publish(snapshot);
        debug!(
            cycle_id,
            delivered = report.delivered,
            dropped = report.dropped,
            "Snapshot published"
        );
    }

    /// Configured items first, then every other known id in lexical order.
    fn priority_order(&self, settings: &CycleSettings, availability: &AvailabilityMap) -> Vec<String> {
        let mut order: Vec<String> = settings.items.iter().map(|item| item.id.clone()).collect();

        let mut rest: BTreeSet<String> = availability.keys().cloned().collect();
        rest.extend(self.workers.store.snapshot_all().into_keys());
        rest.retain(|id| settings.item(id).is_none());

        order.extend(rest);
        order
    }

    fn ordered_states(&self, settings: &CycleSettings, availability: &AvailabilityMap) -> Vec<ItemState> {
        let mut all = self.workers.store.snapshot_all();
        self.priority_order(settings, availability)
            .into_iter()
            .filter_map(|id| all.remove(&id))
            .collect()
    }
}

fn record_status_gauges(items: &[ItemState]) {
    let statuses = std::iter::once(ItemStatus::Ready).chain(ItemStatus::NOT_READY);
    for status in statuses {
        let count = items.iter().filter(|s| s.status == status).count();
        metrics::ITEMS_BY_STATUS
            .with_label_values(&[status.as_str()])
            .set(count as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FailureReason;
    use crate::testing::fixtures;
    use crate::testing::{MockAcquisitionAction, MockAvailabilityFeed, MockTeardownAction};
    use std::time::Duration;

    struct Harness {
        orchestrator: CycleOrchestrator,
        feed: Arc<MockAvailabilityFeed>,
        action: Arc<MockAcquisitionAction>,
        teardown: Arc<MockTeardownAction>,
    }

    fn harness(settings: CycleSettings, feed: MockAvailabilityFeed) -> Harness {
        let feed = Arc::new(feed);
        let action = Arc::new(MockAcquisitionAction::new());
        let teardown = Arc::new(MockTeardownAction::new());
        let orchestrator = CycleOrchestrator::new(
            settings,
            OrchestratorDeps {
                store: Arc::new(StateStore::in_memory()),
                feed: feed.clone(),
                action: action.clone(),
                teardown: teardown.clone(),
                broadcaster: EventBroadcaster::default(),
                activity: None,
            },
        );
        Harness {
            orchestrator,
            feed,
            action,
            teardown,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_launches_available_ready_items() {
        let h = harness(
            fixtures::settings(&["a", "b"]),
            MockAvailabilityFeed::available(&["a"]),
        );

        let report = h.orchestrator.run_cycle().await;
        assert_eq!(report.cycle_id, 1);
        assert!(!report.availability_stale);

        let launched: Vec<&str> = report.launched().map(|t| t.item_id.as_str()).collect();
        assert_eq!(launched, vec!["a"]);
        assert_eq!(report.launched().next().unwrap().attempt_id, Some(1));

        let b = h.orchestrator.get_item_state("b").unwrap();
        assert_eq!(b.status, ItemStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_items_reset_before_relaunch() {
        let h = harness(
            fixtures::settings(&["a"]),
            MockAvailabilityFeed::available(&["a"]),
        );

        h.orchestrator.run_cycle().await;
        assert!(h.orchestrator.registry().wait_for_drain(Duration::from_secs(5)).await);
        assert_eq!(
            h.orchestrator.get_item_state("a").unwrap().status,
            ItemStatus::Purchased
        );

        let report = h.orchestrator.run_cycle().await;
        let kinds: Vec<TransitionKind> = report.transitions.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TransitionKind::Reset, TransitionKind::AttemptStarted]);
        assert_eq!(report.transitions[0].from, ItemStatus::Purchased);
        assert_eq!(report.launched().next().unwrap().attempt_id, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_item_not_launched() {
        let mut settings = fixtures::settings(&["a"]);
        settings.items[0].enabled = false;
        let h = harness(settings, MockAvailabilityFeed::available(&["a"]));

        let report = h.orchestrator.run_cycle().await;
        assert_eq!(report.launched().count(), 0);
        assert_eq!(h.action.call_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_order_config_then_lexical() {
        let h = harness(
            fixtures::settings(&["b", "a"]),
            MockAvailabilityFeed::available(&["z", "c"]),
        );
        let mut sub = h.orchestrator.subscribe();

        let report = h.orchestrator.run_cycle().await;
        let launched: Vec<&str> = report.launched().map(|t| t.item_id.as_str()).collect();
        assert_eq!(launched, vec!["c", "z"]);

        let snapshot = sub.recv().await.unwrap();
        let ids: Vec<&str> = snapshot.items.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c", "z"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_failure_reuses_previous_map() {
        let h = harness(
            fixtures::settings(&["a"]),
            MockAvailabilityFeed::available(&["a"]),
        );
        h.orchestrator.run_cycle().await;
        h.orchestrator.registry().wait_for_drain(Duration::from_secs(5)).await;

        h.feed
            .fail_next(2, FeedError::Unavailable("connection refused".to_string()))
            .await;
        let mut sub = h.orchestrator.subscribe();
        let report = h.orchestrator.run_cycle().await;

        assert!(report.availability_stale);
        assert_eq!(h.feed.poll_count().await, 3);
        let snapshot = sub.recv().await.unwrap();
        assert!(snapshot.availability_stale);
        assert_eq!(snapshot.availability.get("a"), Some(&true));
        assert!(h.orchestrator.status().availability_stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_failure_launches_nothing() {
        let feed = MockAvailabilityFeed::available(&["a"]);
        feed.fail_next(2, FeedError::Parse("bad json".to_string())).await;
        let h = harness(fixtures::settings(&["a"]), feed);

        let report = h.orchestrator.run_cycle().await;
        assert!(report.availability_stale);
        assert_eq!(report.launched().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_feed_times_out() {
        let h = harness(
            fixtures::settings(&["a"]),
            MockAvailabilityFeed::available(&["a"]),
        );
        h.feed.set_delay(Duration::from_secs(60)).await;

        let started = Instant::now();
        let report = h.orchestrator.run_cycle().await;
        assert!(report.availability_stale);
        // Two polls at 5s each plus one retry delay.
        assert!(started.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_attempt_forces_deadline() {
        let h = harness(
            fixtures::settings(&["a"]),
            MockAvailabilityFeed::available(&["a"]),
        );
        h.action.set_duration(Duration::from_secs(50)).await;

        h.orchestrator.run_cycle().await;
        sleep(Duration::from_millis(10)).await;

        let info = h.orchestrator.abort_attempt("a", "operator").unwrap();
        assert_eq!(info.attempt_id, 1);

        assert!(h.orchestrator.registry().wait_for_drain(Duration::from_secs(15)).await);
        let state = h.orchestrator.get_item_state("a").unwrap();
        assert_eq!(state.status, ItemStatus::Failed);
        let outcome = state.final_outcome.unwrap();
        assert_eq!(outcome.reason, Some(FailureReason::ActionTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_errors() {
        let h = harness(
            fixtures::settings(&["a"]),
            MockAvailabilityFeed::new(),
        );
        h.orchestrator.run_cycle().await;

        assert!(matches!(
            h.orchestrator.abort_attempt("a", "operator"),
            Err(OrchestratorError::NoLiveAttempt(_))
        ));
        assert!(matches!(
            h.orchestrator.abort_attempt("missing", "operator"),
            Err(OrchestratorError::ItemNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_refused_while_completing() {
        let h = harness(
            fixtures::settings(&["a"]),
            MockAvailabilityFeed::available(&["a"]),
        );
        h.action.set_duration(Duration::from_secs(1)).await;
        h.teardown.set_duration(Duration::from_secs(5)).await;

        h.orchestrator.run_cycle().await;
        sleep(Duration::from_secs(2)).await;
        assert_eq!(
            h.orchestrator.get_item_state("a").unwrap().status,
            ItemStatus::Completing
        );

        assert!(matches!(
            h.orchestrator.abort_attempt("a", "operator"),
            Err(OrchestratorError::AttemptCompleting { attempt_id: 1, .. })
        ));

        // Teardown runs to completion and the purchase stands.
        assert!(h.orchestrator.registry().wait_for_drain(Duration::from_secs(10)).await);
        let state = h.orchestrator.get_item_state("a").unwrap();
        assert_eq!(state.status, ItemStatus::Purchased);
        assert_eq!(h.teardown.call_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_completing_attempt_is_not_reset() {
        let h = harness(
            fixtures::settings(&["a"]),
            MockAvailabilityFeed::available(&["a"]),
        );
        h.action.set_duration(Duration::from_secs(1)).await;
        h.teardown.set_duration(Duration::from_secs(5)).await;

        h.orchestrator.run_cycle().await;
        sleep(Duration::from_secs(2)).await;
        h.orchestrator.registry().force_clear();

        // Cleared but still tearing down: left alone, nothing relaunched.
        let report = h.orchestrator.run_cycle().await;
        assert!(report.transitions.is_empty());
        let state = h.orchestrator.get_item_state("a").unwrap();
        assert_eq!(state.status, ItemStatus::Completing);
        assert_eq!(state.attempt_id, Some(1));

        // Teardown finishes, the purchase lands, and the next reset carries it.
        sleep(Duration::from_secs(5)).await;
        let state = h.orchestrator.get_item_state("a").unwrap();
        assert_eq!(state.status, ItemStatus::Purchased);

        let report = h.orchestrator.run_cycle().await;
        let reset = report.resets().next().unwrap();
        assert_eq!(reset.from, ItemStatus::Purchased);
        let cleared = reset.cleared_outcome.as_ref().unwrap();
        assert_eq!(cleared.order_number.as_deref(), Some("ORD-000001-01"));
        assert_eq!(report.launched().next().unwrap().attempt_id, Some(2));
        assert!(h.orchestrator.registry().wait_for_drain(Duration::from_secs(30)).await);
        assert_eq!(h.action.calls_for("a").await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphan_with_future_deadline_waits() {
        let store = Arc::new(StateStore::in_memory());
        store.ensure_tracked(["a"]).unwrap();
        store
            .compare_and_transition("a", &[ItemStatus::Ready], ItemStatus::Completing, |s| {
                s.attempt_id = Some(3);
                s.attempt_deadline = Some(Utc::now() + chrono::Duration::minutes(10));
            })
            .unwrap();

        let orchestrator = CycleOrchestrator::new(
            fixtures::settings(&["a"]),
            OrchestratorDeps {
                store,
                feed: Arc::new(MockAvailabilityFeed::available(&["a"])),
                action: Arc::new(MockAcquisitionAction::new()),
                teardown: Arc::new(MockTeardownAction::new()),
                broadcaster: EventBroadcaster::default(),
                activity: None,
            },
        );

        let report = orchestrator.run_cycle().await;
        assert_eq!(report.resets().count(), 0);
        assert_eq!(report.launched().count(), 0);
        assert_eq!(
            orchestrator.get_item_state("a").unwrap().status,
            ItemStatus::Completing
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_item_duration_queues_on_resource() {
        let mut settings = fixtures::settings(&["a", "b"]);
        settings.resource_timeout_ms = 30_000;
        let h = harness(settings, MockAvailabilityFeed::available(&["a", "b"]));
        h.action.set_item_duration("a", Duration::from_secs(10)).await;

        let started = Instant::now();
        h.orchestrator.run_cycle().await;
        assert!(h.orchestrator.registry().wait_for_drain(Duration::from_secs(20)).await);
        assert!(started.elapsed() >= Duration::from_secs(10));

        let calls = h.action.recorded_calls().await;
        let holders: Vec<&str> = calls.iter().map(|c| c.holder.as_str()).collect();
        assert_eq!(holders, vec!["a#1", "b#2"]);
        assert_eq!(h.action.calls_for("b").await, 1);
        assert_eq!(
            h.teardown.recorded_holders().await,
            vec!["a#1".to_string(), "b#2".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_budget_does_not_panic() {
        let mut settings = fixtures::settings(&["a"]);
        settings.resource_timeout_ms = u64::MAX - 1_000;
        settings.action_timeout_ms = u64::MAX - 1_000;
        let h = harness(settings, MockAvailabilityFeed::available(&["a"]));

        let report = h.orchestrator.run_cycle().await;
        assert_eq!(report.launched().count(), 1);
        assert!(h.orchestrator.registry().wait_for_drain(Duration::from_secs(5)).await);
        assert_eq!(
            h.orchestrator.get_item_state("a").unwrap().status,
            ItemStatus::Purchased
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_reports_worst_case_delay() {
        let h = harness(
            fixtures::settings(&["a"]),
            MockAvailabilityFeed::available(&["a"]),
        );
        h.action.set_duration(Duration::from_secs(60)).await;
        let mut sub = h.orchestrator.subscribe();

        h.orchestrator.run_cycle().await;
        let snapshot = sub.recv().await.unwrap();
        let settings = h.orchestrator.settings();
        let expected = settings.drain_timeout() + settings.feed_budget();
        assert_eq!(
            snapshot.timer.next_snapshot_max_delay_secs,
            expected.as_secs_f64()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_settings_applies_next_cycle() {
        let h = harness(fixtures::settings(&["a"]), MockAvailabilityFeed::new());
        h.orchestrator.run_cycle().await;

        h.orchestrator
            .update_settings(fixtures::settings(&["a", "b"]))
            .unwrap();
        assert_eq!(h.orchestrator.settings().items.len(), 1);

        h.orchestrator.run_cycle().await;
        assert_eq!(h.orchestrator.settings().items.len(), 2);
        assert!(h.orchestrator.get_item_state("b").is_ok());

        let mut invalid = fixtures::settings(&["a"]);
        invalid.interval_min_ms = invalid.interval_max_ms + 1;
        assert!(matches!(
            h.orchestrator.update_settings(invalid),
            Err(OrchestratorError::InvalidSettings(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop() {
        let h = harness(
            fixtures::settings(&["a"]),
            MockAvailabilityFeed::available(&["a"]),
        );

        assert!(h.orchestrator.start());
        assert!(!h.orchestrator.start());
        sleep(Duration::from_millis(10)).await;

        let status = h.orchestrator.status();
        assert!(status.running);
        assert_eq!(status.last_cycle_id, 1);
        let remaining = h.orchestrator.timer().remaining_secs.unwrap();
        assert!(remaining > 19.0 && remaining <= 20.0);

        assert!(h.orchestrator.stop().await);
        assert!(!h.orchestrator.stop().await);
        assert!(!h.orchestrator.status().running);
        assert!(h.orchestrator.timer().remaining_secs.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_cuts_idle_short() {
        let h = harness(fixtures::settings(&["a"]), MockAvailabilityFeed::new());
        h.orchestrator.start();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(h.orchestrator.status().last_cycle_id, 1);

        h.orchestrator.trigger_refresh("operator");
        sleep(Duration::from_millis(10)).await;
        assert_eq!(h.orchestrator.status().last_cycle_id, 2);

        h.orchestrator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_ids_continue_after_restart() {
        let store = Arc::new(StateStore::in_memory());
        store.ensure_tracked(["a"]).unwrap();
        store
            .compare_and_transition("a", &[ItemStatus::Ready], ItemStatus::Attempting, |s| {
                s.attempt_id = Some(41);
                s.attempt_deadline = Some(Utc::now() - chrono::Duration::minutes(10));
            })
            .unwrap();

        let orchestrator = CycleOrchestrator::new(
            fixtures::settings(&["a"]),
            OrchestratorDeps {
                store,
                feed: Arc::new(MockAvailabilityFeed::available(&["a"])),
                action: Arc::new(MockAcquisitionAction::new()),
                teardown: Arc::new(MockTeardownAction::new()),
                broadcaster: EventBroadcaster::default(),
                activity: None,
            },
        );

        // Orphaned attempt from the previous run is reset, then relaunched.
        let report = orchestrator.run_cycle().await;
        assert_eq!(report.resets().count(), 1);
        assert_eq!(report.launched().next().unwrap().attempt_id, Some(42));
    }
}
