use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::{debug, warn};

use super::{ItemState, ItemStatus, MemoryPersistence, StateError, StatePersistence, Transition};

/// Lock-protected state machines for every tracked item.
///
/// Every public method takes the lock exactly once and never calls another
/// public method while holding it. Writes are persisted inside the same
/// critical section and rolled back in memory if the backend fails.
pub struct StateStore {
    items: Mutex<BTreeMap<String, ItemState>>,
    persistence: Arc<dyn StatePersistence>,
}

impl StateStore {
    /// Create a store and load previously persisted records.
    ///
    /// Records found in an attempt phase are loaded as-is; the first cycle's
    /// reset returns them to `Ready` since no worker is live after a restart.
    pub fn open(persistence: Arc<dyn StatePersistence>) -> Result<Self, StateError> {
        let mut items = BTreeMap::new();
        for state in persistence.load()? {
            if let Err(msg) = state.check_invariant() {
                warn!(item_id = %state.id, "Discarding persisted record: {}", msg);
                continue;
            }
            items.insert(state.id.clone(), state);
        }

        debug!(
            backend = persistence.name(),
            count = items.len(),
            "Loaded item states"
        );

        Ok(Self {
            items: Mutex::new(items),
            persistence,
        })
    }

    /// Store backed by `MemoryPersistence`.
    pub fn in_memory() -> Self {
        Self {
            items: Mutex::new(BTreeMap::new()),
            persistence: Arc::new(MemoryPersistence::new()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.persistence.name()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ItemState>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state of one item.
    pub fn get(&self, id: &str) -> Result<ItemState, StateError> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| StateError::UnknownItem(id.to_string()))
    }

    /// Copy of every item state, keyed by id.
    pub fn snapshot_all(&self) -> BTreeMap<String, ItemState> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Create `Ready` records for ids seen for the first time.
    ///
    /// Returns the ids that were created.
    pub fn ensure_tracked<I, S>(&self, ids: I) -> Result<Vec<String>, StateError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut items = self.lock();

        let mut created = Vec::new();
        for id in ids {
            let id = id.as_ref();
            if !items.contains_key(id) && !created.iter().any(|s: &ItemState| s.id == id) {
                created.push(ItemState::ready(id));
            }
        }
        if created.is_empty() {
            return Ok(Vec::new());
        }

        for state in &created {
            items.insert(state.id.clone(), state.clone());
        }

        let refs: Vec<&ItemState> = created.iter().collect();
        if let Err(e) = self.persistence.persist(&refs, &items) {
            for state in &created {
                items.remove(&state.id);
            }
            return Err(e);
        }

        Ok(created.into_iter().map(|s| s.id).collect())
    }

    /// Move `id` to `to` if its current status is one of `from`.
    ///
    /// `mutator` fills in the fields that belong to the target status
    /// (deadline, outcome). Status changes made by the mutator are ignored.
    pub fn compare_and_transition<F>(
        &self,
        id: &str,
        from: &[ItemStatus],
        to: ItemStatus,
        mutator: F,
    ) -> Result<Transition, StateError>
    where
        F: FnOnce(&mut ItemState),
    {
        let mut items = self.lock();
        self.apply(&mut items, id, None, from, to, mutator)
    }

    /// Like `compare_and_transition`, but also requires the record to still
    /// belong to `attempt_id`.
    pub fn compare_and_transition_attempt<F>(
        &self,
        id: &str,
        attempt_id: u64,
        from: &[ItemStatus],
        to: ItemStatus,
        mutator: F,
    ) -> Result<Transition, StateError>
    where
        F: FnOnce(&mut ItemState),
    {
        let mut items = self.lock();
        self.apply(&mut items, id, Some(attempt_id), from, to, mutator)
    }

    fn apply<F>(
        &self,
        items: &mut BTreeMap<String, ItemState>,
        id: &str,
        attempt_id: Option<u64>,
        from: &[ItemStatus],
        to: ItemStatus,
        mutator: F,
    ) -> Result<Transition, StateError>
    where
        F: FnOnce(&mut ItemState),
    {
        let current = items
            .get(id)
            .cloned()
            .ok_or_else(|| StateError::UnknownItem(id.to_string()))?;

        let attempt_matches = attempt_id.is_none_or(|a| current.attempt_id == Some(a));
        if !from.contains(&current.status) || !attempt_matches {
            return Ok(Transition::Rejected { current });
        }

        let mut next = current.clone();
        mutator(&mut next);
        next.id = current.id.clone();
        next.status = to;
        next.updated_at = Utc::now();

        if !to.is_active() {
            next.attempt_deadline = None;
        }
        if !to.is_terminal() {
            next.final_outcome = None;
        }
        if to == ItemStatus::Ready {
            next.attempt_started_at = None;
        }
        next.check_invariant().map_err(StateError::Invariant)?;

        items.insert(next.id.clone(), next.clone());
        if let Err(e) = self.persistence.persist(&[&next], items) {
            warn!(item_id = %id, error = %e, "State write failed, rolling back");
            items.insert(current.id.clone(), current);
            return Err(e);
        }

        Ok(Transition::Applied {
            previous: current.status,
            state: next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{FailureReason, FinalOutcome};
    use rand::Rng;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    /// Records every persisted change in lock order.
    #[derive(Default)]
    struct RecordingPersistence {
        log: Mutex<Vec<ItemState>>,
    }

    impl StatePersistence for RecordingPersistence {
        fn load(&self) -> Result<Vec<ItemState>, StateError> {
            Ok(Vec::new())
        }

        fn persist(
            &self,
            changed: &[&ItemState],
            _all: &BTreeMap<String, ItemState>,
        ) -> Result<(), StateError> {
            let mut log = self.log.lock().unwrap();
            log.extend(changed.iter().map(|s| (*s).clone()));
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    #[derive(Default)]
    struct FlakyPersistence {
        fail: AtomicBool,
    }

    impl StatePersistence for FlakyPersistence {
        fn load(&self) -> Result<Vec<ItemState>, StateError> {
            Ok(Vec::new())
        }

        fn persist(
            &self,
            _changed: &[&ItemState],
            _all: &BTreeMap<String, ItemState>,
        ) -> Result<(), StateError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(StateError::Persistence("disk full".into()))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn deadline() -> impl FnOnce(&mut ItemState) {
        |s: &mut ItemState| {
            s.attempt_deadline = Some(Utc::now() + chrono::Duration::seconds(30));
            s.attempt_started_at = Some(Utc::now());
        }
    }

    fn is_valid_edge(from: ItemStatus, to: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (from, to),
            (Ready, Attempting)
                | (Attempting, Completing)
                | (Attempting, Failed)
                | (Completing, Purchased)
                | (Completing, Failed)
                | (Attempting, Ready)
                | (Completing, Ready)
                | (Purchased, Ready)
                | (Failed, Ready)
        )
    }

    #[test]
    fn test_get_unknown_item() {
        let store = StateStore::in_memory();
        assert!(matches!(store.get("nope"), Err(StateError::UnknownItem(_))));
    }

    #[test]
    fn test_ensure_tracked_creates_once() {
        let store = StateStore::in_memory();
        let created = store.ensure_tracked(["a", "b", "a"]).unwrap();
        assert_eq!(created, vec!["a".to_string(), "b".to_string()]);

        let created = store.ensure_tracked(["b", "c"]).unwrap();
        assert_eq!(created, vec!["c".to_string()]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_transition_applies_from_allowed_status() {
        let store = StateStore::in_memory();
        store.ensure_tracked(["a"]).unwrap();

        let result = store
            .compare_and_transition("a", &[ItemStatus::Ready], ItemStatus::Attempting, |s| {
                s.attempt_id = Some(1);
                deadline()(s);
            })
            .unwrap();

        match result {
            Transition::Applied { previous, state } => {
                assert_eq!(previous, ItemStatus::Ready);
                assert_eq!(state.status, ItemStatus::Attempting);
                assert!(state.attempt_deadline.is_some());
            }
            other => panic!("expected applied, got {:?}", other),
        }
    }

    #[test]
    fn test_transition_rejected_leaves_state() {
        let store = StateStore::in_memory();
        store.ensure_tracked(["a"]).unwrap();

        let result = store
            .compare_and_transition(
                "a",
                &[ItemStatus::Completing],
                ItemStatus::Purchased,
                |s| s.final_outcome = Some(FinalOutcome::purchased(None)),
            )
            .unwrap();

        assert!(!result.is_applied());
        assert_eq!(result.state().status, ItemStatus::Ready);
        assert_eq!(store.get("a").unwrap().status, ItemStatus::Ready);
    }

    #[test]
    fn test_active_transition_requires_deadline() {
        let store = StateStore::in_memory();
        store.ensure_tracked(["a"]).unwrap();

        let err = store
            .compare_and_transition("a", &[ItemStatus::Ready], ItemStatus::Attempting, |_| {})
            .unwrap_err();
        assert!(matches!(err, StateError::Invariant(_)));
        assert_eq!(store.get("a").unwrap().status, ItemStatus::Ready);
    }

    #[test]
    fn test_terminal_transition_clears_deadline() {
        let store = StateStore::in_memory();
        store.ensure_tracked(["a"]).unwrap();
        store
            .compare_and_transition("a", &[ItemStatus::Ready], ItemStatus::Attempting, deadline())
            .unwrap();

        let state = store
            .compare_and_transition("a", &[ItemStatus::Attempting], ItemStatus::Failed, |s| {
                s.final_outcome = Some(FinalOutcome::failed(
                    FailureReason::ResourceTimeout,
                    "resource busy",
                ))
            })
            .unwrap()
            .into_state();

        assert_eq!(state.status, ItemStatus::Failed);
        assert!(state.attempt_deadline.is_none());
        assert!(state.attempt_started_at.is_some());
    }

    #[test]
    fn test_reset_clears_outcome() {
        let store = StateStore::in_memory();
        store.ensure_tracked(["a"]).unwrap();
        store
            .compare_and_transition("a", &[ItemStatus::Ready], ItemStatus::Attempting, deadline())
            .unwrap();
        store
            .compare_and_transition("a", &[ItemStatus::Attempting], ItemStatus::Failed, |s| {
                s.final_outcome = Some(FinalOutcome::failed(FailureReason::ActionRejected, "x"))
            })
            .unwrap();

        let state = store
            .compare_and_transition("a", &ItemStatus::NOT_READY, ItemStatus::Ready, |_| {})
            .unwrap()
            .into_state();
        assert!(state.final_outcome.is_none());
        assert!(state.attempt_started_at.is_none());
    }

    #[test]
    fn test_attempt_guard_rejects_stale_writer() {
        let store = StateStore::in_memory();
        store.ensure_tracked(["a"]).unwrap();
        store
            .compare_and_transition("a", &[ItemStatus::Ready], ItemStatus::Attempting, |s| {
                s.attempt_id = Some(2);
                deadline()(s);
            })
            .unwrap();

        let stale = store
            .compare_and_transition_attempt(
                "a",
                1,
                &[ItemStatus::Attempting],
                ItemStatus::Completing,
                deadline(),
            )
            .unwrap();
        assert!(!stale.is_applied());

        let current = store
            .compare_and_transition_attempt(
                "a",
                2,
                &[ItemStatus::Attempting],
                ItemStatus::Completing,
                deadline(),
            )
            .unwrap();
        assert!(current.is_applied());
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let persistence = Arc::new(FlakyPersistence::default());
        let store = StateStore::open(persistence.clone()).unwrap();
        store.ensure_tracked(["a"]).unwrap();

        persistence.fail.store(true, Ordering::SeqCst);
        let err = store
            .compare_and_transition("a", &[ItemStatus::Ready], ItemStatus::Attempting, deadline())
            .unwrap_err();
        assert!(matches!(err, StateError::Persistence(_)));
        assert_eq!(store.get("a").unwrap().status, ItemStatus::Ready);

        let err = store.ensure_tracked(["b"]).unwrap_err();
        assert!(matches!(err, StateError::Persistence(_)));
        assert!(matches!(store.get("b"), Err(StateError::UnknownItem(_))));
    }

    #[test]
    fn test_open_loads_persisted_records() {
        let mut attempting = ItemState::ready("a");
        attempting.status = ItemStatus::Attempting;
        attempting.attempt_deadline = Some(Utc::now());

        let mut broken = ItemState::ready("b");
        broken.status = ItemStatus::Completing;

        let persistence = Arc::new(MemoryPersistence::with_records([attempting, broken]));
        let store = StateStore::open(persistence).unwrap();

        assert_eq!(store.get("a").unwrap().status, ItemStatus::Attempting);
        assert!(store.get("b").is_err());
    }

    #[test]
    fn test_concurrent_transitions_follow_valid_edges() {
        let persistence = Arc::new(RecordingPersistence::default());
        let store = Arc::new(StateStore::open(persistence.clone()).unwrap());
        store.ensure_tracked(["x", "y"]).unwrap();

        const CANDIDATES: &[(&[ItemStatus], ItemStatus)] = &[
            (&[ItemStatus::Ready], ItemStatus::Attempting),
            (&[ItemStatus::Attempting], ItemStatus::Completing),
            (&[ItemStatus::Attempting], ItemStatus::Failed),
            (&[ItemStatus::Completing], ItemStatus::Purchased),
            (&[ItemStatus::Completing], ItemStatus::Failed),
            (&ItemStatus::NOT_READY, ItemStatus::Ready),
        ];

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    for _ in 0..100 {
                        let id = if rng.gen_bool(0.5) { "x" } else { "y" };
                        let (from, to) = CANDIDATES[rng.gen_range(0..CANDIDATES.len())];
                        store
                            .compare_and_transition(id, from, to, |s| {
                                if to.is_active() {
                                    s.attempt_deadline = Some(Utc::now());
                                }
                                if to == ItemStatus::Purchased {
                                    s.final_outcome = Some(FinalOutcome::purchased(None));
                                } else if to == ItemStatus::Failed {
                                    s.final_outcome = Some(FinalOutcome::failed(
                                        FailureReason::ActionRejected,
                                        "rejected",
                                    ));
                                }
                            })
                            .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let log = persistence.log.lock().unwrap();
        for id in ["x", "y"] {
            let mut last = ItemStatus::Ready;
            let mut first = true;
            for state in log.iter().filter(|s| s.id == id) {
                if first {
                    // ensure_tracked write
                    assert_eq!(state.status, ItemStatus::Ready);
                    first = false;
                    continue;
                }
                assert!(
                    is_valid_edge(last, state.status),
                    "invalid edge {} -> {} for {}",
                    last,
                    state.status,
                    id
                );
                assert!(state.check_invariant().is_ok());
                last = state.status;
            }
            assert_eq!(store.get(id).unwrap().status, last);
        }
    }
}
