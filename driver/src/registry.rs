//! ExecutorRegistry (spec §4.2): the map of executor-id to ExecutorData,
//! plus the pending-executor count and the pending-removal set.
//!
//! Per spec §5 and §9: `total_core_count` and `total_registered_executors`
//! are atomics so readers outside the registry's lock see monotonic values,
//! while the registry map, `numPendingExecutors`, and `pending_remove` share
//! a single `std::sync::Mutex` — spec §9 warns against mixing the two
//! disciplines on the same field, so nothing here is protected by both.

use common::model::{ExecutorData, ExecutorId};
use common::CoordinatorError;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct RegistryState {
    executors: HashMap<ExecutorId, ExecutorData>,
    /// Executors requested from the cluster manager but not yet registered
    /// (spec §3: "must remain ≥ 0"). Kept as `i64` internally so
    /// intermediate arithmetic in the allocation API (spec §4.3) can't
    /// underflow before being clamped; the public getter exposes `u64`.
    pending_executors: i64,
    pending_remove: HashSet<ExecutorId>,
}

pub struct ExecutorRegistry {
    state: Mutex<RegistryState>,
    total_core_count: AtomicU64,
    total_registered_executors: AtomicUsize,
}

/// A point-in-time snapshot of one executor's free capacity, as produced by
/// `snapshot_offers` for the scheduler's `resourceOffers` (spec §4.2, §4.3).
#[derive(Debug, Clone)]
pub struct ExecutorOffer {
    pub executor_id: ExecutorId,
    pub host: String,
    pub free_cores: u32,
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            total_core_count: AtomicU64::new(0),
            total_registered_executors: AtomicUsize::new(0),
        }
    }

    /// Inserts a newly registered executor. Fails with `DuplicateExecutor`
    /// if the id already exists (spec §4.2); on success, the pending count
    /// is decremented and clamped at 0 (spec §4.3's `RegisterExecutor`
    /// handler), and the atomic counters are updated before the lock is
    /// released.
    pub fn insert(&self, data: ExecutorData) -> Result<(), CoordinatorError> {
        let mut state = self.state.lock().unwrap();
        if state.executors.contains_key(&data.executor_id) {
            return Err(CoordinatorError::DuplicateExecutor(data.executor_id));
        }
        let total_cores = u64::from(data.total_cores);
        state.pending_executors = (state.pending_executors - 1).max(0);
        state.executors.insert(data.executor_id.clone(), data);
        self.total_core_count.fetch_add(total_cores, Ordering::SeqCst);
        self.total_registered_executors.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Removes an executor and returns its prior data (spec §4.2). Also
    /// purges the id from `pending_remove` (spec §3 invariant: "removal
    /// from registry removes from this set").
    pub fn remove(&self, executor_id: &ExecutorId) -> Option<ExecutorData> {
        let mut state = self.state.lock().unwrap();
        let data = state.executors.remove(executor_id)?;
        state.pending_remove.remove(executor_id);
        self.total_core_count
            .fetch_sub(u64::from(data.total_cores), Ordering::SeqCst);
        self.total_registered_executors.fetch_sub(1, Ordering::SeqCst);
        Some(data)
    }

    /// Adjusts free cores by `delta` (positive to return cores on a
    /// terminal `StatusUpdate`, negative on dispatch). Clamped to
    /// `[0, total_cores]` so the spec §3 invariant
    /// `0 ≤ free_cores ≤ total_cores` never breaks even under a racing
    /// double-count.
    pub fn adjust_free_cores(&self, executor_id: &ExecutorId, delta: i64) -> Result<(), CoordinatorError> {
        let mut state = self.state.lock().unwrap();
        let data = state
            .executors
            .get_mut(executor_id)
            .ok_or_else(|| CoordinatorError::UnknownExecutor(executor_id.clone()))?;
        let new_free = (i64::from(data.free_cores) + delta)
            .clamp(0, i64::from(data.total_cores));
        data.free_cores = new_free as u32;
        Ok(())
    }

    /// Snapshot of `(id, host, free_cores)` for every registered executor
    /// (spec §4.2: "order unspecified").
    pub fn snapshot_offers(&self) -> Vec<ExecutorOffer> {
        let state = self.state.lock().unwrap();
        state
            .executors
            .values()
            .map(|data| ExecutorOffer {
                executor_id: data.executor_id.clone(),
                host: data.host.clone(),
                free_cores: data.free_cores,
            })
            .collect()
    }

    /// Snapshot of just one executor's offer, used when `makeOffers` is
    /// scoped to a single executor (spec §4.3).
    pub fn snapshot_offer(&self, executor_id: &ExecutorId) -> Option<ExecutorOffer> {
        let state = self.state.lock().unwrap();
        state.executors.get(executor_id).map(|data| ExecutorOffer {
            executor_id: data.executor_id.clone(),
            host: data.host.clone(),
            free_cores: data.free_cores,
        })
    }

    pub fn get(&self, executor_id: &ExecutorId) -> Option<ExecutorData> {
        self.state.lock().unwrap().executors.get(executor_id).cloned()
    }

    pub fn contains(&self, executor_id: &ExecutorId) -> bool {
        self.state.lock().unwrap().executors.contains_key(executor_id)
    }

    pub fn find_by_endpoint(&self, endpoint: &str) -> Option<ExecutorId> {
        self.state
            .lock()
            .unwrap()
            .executors
            .values()
            .find(|data| data.endpoint == endpoint)
            .map(|data| data.executor_id.clone())
    }

    pub fn total_core_count(&self) -> u64 {
        self.total_core_count.load(Ordering::SeqCst)
    }

    pub fn total_registered_executors(&self) -> usize {
        self.total_registered_executors.load(Ordering::SeqCst)
    }

    pub fn pending_executors(&self) -> u64 {
        self.state.lock().unwrap().pending_executors.max(0) as u64
    }

    pub fn pending_remove_count(&self) -> usize {
        self.state.lock().unwrap().pending_remove.len()
    }

    pub fn is_pending_remove(&self, executor_id: &ExecutorId) -> bool {
        self.state.lock().unwrap().pending_remove.contains(executor_id)
    }

    /// `request_executors(delta)` (spec §4.3): `delta` is assumed
    /// non-negative by the caller (the HTTP/API layer rejects negative
    /// values with `InvalidArgument` before reaching here). Returns the
    /// `new_total` to hand to `do_request_total_executors`.
    pub fn request_executors(&self, delta: u32) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.pending_executors += i64::from(delta);
        new_total(
            self.total_registered_executors(),
            state.pending_executors,
            state.pending_remove.len(),
        )
    }

    /// `request_total_executors(n)` (spec §4.3).
    pub fn request_total_executors(&self, n: u32) -> u64 {
        let mut state = self.state.lock().unwrap();
        let existing = self.total_registered_executors() as i64;
        let pending_remove = state.pending_remove.len() as i64;
        state.pending_executors = (i64::from(n) - existing + pending_remove).max(0);
        new_total(
            self.total_registered_executors(),
            state.pending_executors,
            state.pending_remove.len(),
        )
    }

    /// `kill_executors(ids)` (spec §4.3): filters `ids` to those currently
    /// registered, computes the post-kill target using the pre-kill
    /// `pending`/`pending_remove` state, delegates that target to
    /// `do_request_total_executors` (updating `pending_executors`), then
    /// marks the filtered ids as pending removal. Returns
    /// `(new_total, filtered_ids)`.
    pub fn kill_executors(&self, ids: &[ExecutorId]) -> (u64, Vec<ExecutorId>) {
        let mut state = self.state.lock().unwrap();
        let filtered: Vec<ExecutorId> = ids
            .iter()
            .filter(|id| state.executors.contains_key(id))
            .cloned()
            .collect();
        let existing = self.total_registered_executors() as i64;
        let pending_remove_before = state.pending_remove.len() as i64;
        let new_total_value =
            existing + state.pending_executors - pending_remove_before - filtered.len() as i64;
        // do_request_total_executors(new_total_value), using pending_remove
        // as it stood before this call's insertions.
        state.pending_executors =
            (new_total_value - existing + pending_remove_before).max(0);
        for id in &filtered {
            state.pending_remove.insert(id.clone());
        }
        (new_total_value.max(0) as u64, filtered)
    }
}

fn new_total(existing: usize, pending: i64, pending_remove: usize) -> u64 {
    (existing as i64 + pending - pending_remove as i64).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(id: &str, cores: u32) -> ExecutorData {
        ExecutorData::new(ExecutorId::from(id), format!("http://{id}:1"), id.into(), cores)
    }

    #[test]
    fn register_executor_updates_total_core_count() {
        let registry = ExecutorRegistry::new();
        registry.insert(executor("e1", 4)).unwrap();
        assert_eq!(registry.total_core_count(), 4);
        let offers = registry.snapshot_offers();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].free_cores, 4);
    }

    #[test]
    fn duplicate_register_is_rejected_and_registry_unchanged() {
        let registry = ExecutorRegistry::new();
        registry.insert(executor("e1", 4)).unwrap();
        let err = registry.insert(executor("e1", 8)).unwrap_err();
        assert!(matches!(err, CoordinatorError::DuplicateExecutor(_)));
        assert_eq!(registry.total_core_count(), 4);
    }

    #[test]
    fn free_cores_never_exceed_total_or_go_negative() {
        let registry = ExecutorRegistry::new();
        registry.insert(executor("e1", 2)).unwrap();
        let id = ExecutorId::from("e1");
        registry.adjust_free_cores(&id, 100).unwrap();
        assert_eq!(registry.get(&id).unwrap().free_cores, 2);
        registry.adjust_free_cores(&id, -100).unwrap();
        assert_eq!(registry.get(&id).unwrap().free_cores, 0);
    }

    #[test]
    fn remove_executor_decrements_counters_and_pending_remove() {
        let registry = ExecutorRegistry::new();
        let id = ExecutorId::from("e1");
        registry.insert(executor("e1", 4)).unwrap();
        registry.kill_executors(&[id.clone()]);
        assert!(registry.is_pending_remove(&id));
        registry.remove(&id).unwrap();
        assert_eq!(registry.total_core_count(), 0);
        assert_eq!(registry.total_registered_executors(), 0);
        assert!(!registry.is_pending_remove(&id));
    }

    #[test]
    fn request_then_kill_executors_matches_allocation_api_formula() {
        // Two executors E1(2), E2(2) registered (spec §8 scenario 2).
        // request_executors(3): pending 0 -> 3, new_total = existing(2) +
        // pending(3) - |pending_remove|(0) = 5.
        let registry = ExecutorRegistry::new();
        registry.insert(executor("e1", 2)).unwrap();
        registry.insert(executor("e2", 2)).unwrap();
        let new_total = registry.request_executors(3);
        assert_eq!(new_total, 5);
        assert_eq!(registry.pending_executors(), 3);

        // kill_executors([E1]): filtered = [E1]; new_total = existing(2) +
        // pending(3) - |pending_remove|(0) - |filtered|(1) = 4; that target
        // is delegated to do_request_total_executors, which recomputes
        // pending = max(4 - 2 + 0, 0) = 2; E1 is then added to pending_remove.
        let (final_total, filtered) = registry.kill_executors(&[ExecutorId::from("e1")]);
        assert_eq!(final_total, 4);
        assert_eq!(registry.pending_executors(), 2);
        assert_eq!(filtered, vec![ExecutorId::from("e1")]);
        assert!(registry.is_pending_remove(&ExecutorId::from("e1")));
    }

    #[test]
    fn pending_executors_never_goes_negative() {
        let registry = ExecutorRegistry::new();
        registry.insert(executor("e1", 2)).unwrap();
        registry.request_total_executors(0);
        assert_eq!(registry.pending_executors(), 0);
    }
}
