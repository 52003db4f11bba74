//! Per-task fetch iterator (spec §4.4, §4.5): the queue of shuffle blocks a
//! running task still needs to pull, plus the lock/unlock gate SkewTune
//! uses to pause a task while its queue is being rebalanced.
//!
//! The condvar spec §9 describes is realized with `tokio::sync::Notify`:
//! `wait_if_locked` re-checks the lock flag after every wakeup rather than
//! trusting the notification alone, since `Notify` permits spurious
//! wakeups and `lock`/`unlock` calls can race with `notified()` being
//! armed.

use common::model::{BlockId, BlockManagerId, SkewTuneBlockInfo, TaskId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

pub struct FetchIterator {
    task_id: TaskId,
    pending: Mutex<VecDeque<SkewTuneBlockInfo>>,
    fetched: Mutex<HashSet<BlockId>>,
    locked: AtomicBool,
    killed: AtomicBool,
    notify: Notify,
}

impl FetchIterator {
    pub fn new(task_id: TaskId, initial_blocks: Vec<SkewTuneBlockInfo>) -> Self {
        Self {
            task_id,
            pending: Mutex::new(initial_blocks.into_iter().collect()),
            fetched: Mutex::new(HashSet::new()),
            locked: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// `LockTask` (spec §4.4): the fetch loop must stop pulling new blocks
    /// until unlocked.
    pub fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    /// `UnlockTask` (spec §4.4).
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Suspends the caller while the iterator is locked, re-checking the
    /// flag after every wakeup; returns immediately if the task has been
    /// killed (spec §9: "re-check-after-wakeup + exit-on-kill semantics").
    pub async fn wait_if_locked(&self) {
        while self.locked.load(Ordering::SeqCst) && !self.killed.load(Ordering::SeqCst) {
            self.notify.notified().await;
        }
    }

    /// `AddFetchCommand` (spec §4.1, §4.5).
    pub fn add_fetch_requests(&self, blocks: Vec<SkewTuneBlockInfo>) {
        self.pending.lock().unwrap().extend(blocks);
    }

    /// `RemoveFetchCommand` (spec §4.1, §4.5): removes blocks matching the
    /// given hosts' ids from the pending queue and returns what was
    /// removed, so the caller can echo it back as `TransferRemovedFetch`.
    pub fn remove_fetch_requests(
        &self,
        blocks_by_host: &HashMap<BlockManagerId, Vec<BlockId>>,
    ) -> Vec<SkewTuneBlockInfo> {
        let mut pending = self.pending.lock().unwrap();
        let mut removed = Vec::new();
        pending.retain(|block| {
            let should_remove = blocks_by_host
                .get(&block.host_block_manager_id)
                .map(|ids| ids.contains(&block.block_id))
                .unwrap_or(false);
            if should_remove {
                removed.push(block.clone());
            }
            !should_remove
        });
        removed
    }

    pub fn mark_fetched(&self, block_id: BlockId) {
        self.fetched.lock().unwrap().insert(block_id);
    }

    /// `RemoveAndAddResultCommand`'s donor half: removes the given block
    /// ids from this task's fetched-results set, returning the ones that
    /// were actually present (spec §4.4's `remove_fetch_results`).
    pub fn remove_fetch_results(&self, block_ids: &[BlockId]) -> Vec<BlockId> {
        let mut fetched = self.fetched.lock().unwrap();
        block_ids
            .iter()
            .filter(|id| fetched.remove(id))
            .cloned()
            .collect()
    }

    /// `RemoveAndAddResultCommand`'s receiver half: adds already-fetched
    /// block ids to this task's fetched-results set (spec §4.4's
    /// `add_fetch_results`).
    pub fn add_fetch_results(&self, block_ids: Vec<BlockId>) {
        self.fetched.lock().unwrap().extend(block_ids);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().unwrap().is_empty()
    }

    pub fn pop_next(&self) -> Option<SkewTuneBlockInfo> {
        self.pending.lock().unwrap().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::model::BlockManagerId;

    fn block(id: &str, host: &str, size: u64) -> SkewTuneBlockInfo {
        SkewTuneBlockInfo {
            block_id: BlockId(id.into()),
            host_block_manager_id: BlockManagerId(host.into()),
            size_bytes: size,
        }
    }

    #[tokio::test]
    async fn wait_if_locked_returns_immediately_when_unlocked() {
        let iter = FetchIterator::new(1, vec![]);
        tokio::time::timeout(std::time::Duration::from_millis(50), iter.wait_if_locked())
            .await
            .expect("should not block");
    }

    #[tokio::test]
    async fn unlock_wakes_a_waiting_task() {
        let iter = std::sync::Arc::new(FetchIterator::new(1, vec![]));
        iter.lock();
        let waiter = {
            let iter = iter.clone();
            tokio::spawn(async move { iter.wait_if_locked().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        iter.unlock();
        tokio::time::timeout(std::time::Duration::from_millis(200), waiter)
            .await
            .expect("unlock should wake the waiter")
            .unwrap();
    }

    #[tokio::test]
    async fn kill_wakes_a_locked_waiter_without_unlocking() {
        let iter = std::sync::Arc::new(FetchIterator::new(1, vec![]));
        iter.lock();
        let waiter = {
            let iter = iter.clone();
            tokio::spawn(async move { iter.wait_if_locked().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        iter.kill();
        tokio::time::timeout(std::time::Duration::from_millis(200), waiter)
            .await
            .expect("kill should wake the waiter")
            .unwrap();
    }

    #[test]
    fn remove_fetch_requests_only_removes_matching_blocks() {
        let iter = FetchIterator::new(1, vec![block("b1", "h1", 10), block("b2", "h2", 20)]);
        let mut filter = HashMap::new();
        filter.insert(BlockManagerId("h1".into()), vec![BlockId("b1".into())]);
        let removed = iter.remove_fetch_requests(&filter);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].block_id, BlockId("b1".into()));
        assert!(!iter.is_empty());
    }

    #[test]
    fn remove_fetch_results_only_returns_blocks_actually_present() {
        let iter = FetchIterator::new(1, vec![]);
        iter.mark_fetched(BlockId("b1".into()));
        let removed = iter.remove_fetch_results(&[BlockId("b1".into()), BlockId("b2".into())]);
        assert_eq!(removed, vec![BlockId("b1".into())]);
    }

    #[test]
    fn add_fetch_results_moves_in_cleanly() {
        let iter = FetchIterator::new(1, vec![]);
        iter.add_fetch_results(vec![BlockId("b1".into()), BlockId("b2".into())]);
        assert_eq!(
            iter.remove_fetch_results(&[BlockId("b1".into()), BlockId("b2".into())]).len(),
            2
        );
    }
}
