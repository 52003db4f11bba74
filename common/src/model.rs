//! Core data model: executor identity, per-task-set SkewTune bookkeeping,
//! and the lifecycle events published when executors come and go.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Opaque executor identity, validated at the registration boundary rather
/// than passed around as a bare `String`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ExecutorId(pub String);

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ExecutorId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ExecutorId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// 64-bit task identifier, unique within the driver's lifetime (spec §3).
pub type TaskId = u64;

/// Identifies the task-set (stage) a SkewTuneMaster instance tracks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct TaskSetId(pub String);

impl fmt::Display for TaskSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier for a shuffle block (spec §3: "opaque identifiers").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct BlockId(pub String);

/// Opaque identifier for the block manager hosting a shuffle block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockManagerId(pub String);

/// Identity and resource accounting for one registered executor.
///
/// Created on successful registration, destroyed on removal. Mutated only
/// by the DriverEndpoint actor (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorData {
    pub executor_id: ExecutorId,
    /// Base URL of the executor's wire-transport endpoint, e.g.
    /// `http://10.0.0.4:7077`. This is the "addressable handle" spec §9
    /// asks for in place of a cyclic in-memory reference.
    pub endpoint: String,
    pub host: String,
    pub total_cores: u32,
    pub free_cores: u32,
    pub log_urls: HashMap<String, String>,
}

impl ExecutorData {
    pub fn new(executor_id: ExecutorId, endpoint: String, host: String, total_cores: u32) -> Self {
        Self {
            executor_id,
            endpoint,
            host,
            total_cores,
            free_cores: total_cores,
            log_urls: HashMap::new(),
        }
    }
}

/// One pending or already-fetched shuffle block as tracked by SkewTuneMaster.
///
/// `size_bytes == 0` means "unmeasured" (spec §3, §9): the size has not yet
/// been reported and the block should not contribute to weight estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkewTuneBlockInfo {
    pub block_id: BlockId,
    pub host_block_manager_id: BlockManagerId,
    pub size_bytes: u64,
}

impl SkewTuneBlockInfo {
    pub fn is_measured(&self) -> bool {
        self.size_bytes > 0
    }
}

/// Published when an executor successfully registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorAdded {
    pub timestamp_utc: chrono::DateTime<chrono::Utc>,
    pub executor_id: ExecutorId,
    pub data: ExecutorData,
}

/// Published when an executor is removed from the registry, whether by
/// explicit request or by RPC disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorRemoved {
    pub timestamp_utc: chrono::DateTime<chrono::Utc>,
    pub executor_id: ExecutorId,
    pub reason: String,
}

/// Per-task-set state tracked by one SkewTuneMaster instance (spec §3).
///
/// The ordering of `task_blocks`'s queues is significant (fetch order); the
/// ordering of `demon_tasks` is significant (lock order, first-locked
/// first-unlocked on an `is_last_task` drain).
#[derive(Debug, Default)]
pub struct SkewTuneState {
    pub registered_tasks: HashMap<TaskId, ExecutorId>,
    pub task_blocks: HashMap<TaskId, VecDeque<SkewTuneBlockInfo>>,
    pub task_results: HashMap<TaskId, HashSet<BlockId>>,
    pub task_compute_speed: HashMap<TaskId, f64>,
    pub network_speed: HashMap<(ExecutorId, ExecutorId), f64>,
    pub active_tasks: HashSet<TaskId>,
    pub finished_or_running_count: u64,
    pub demon_tasks: VecDeque<TaskId>,
    pub unlocked_task_id: Option<TaskId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_data_starts_with_full_free_cores() {
        let data = ExecutorData::new(ExecutorId::from("e1"), "http://h:1".into(), "h".into(), 4);
        assert_eq!(data.free_cores, data.total_cores);
    }

    #[test]
    fn unmeasured_block_has_zero_size() {
        let block = SkewTuneBlockInfo {
            block_id: BlockId("b1".into()),
            host_block_manager_id: BlockManagerId("bm1".into()),
            size_bytes: 0,
        };
        assert!(!block.is_measured());
    }
}
