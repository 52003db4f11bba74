//! The closed tagged-union message schema exchanged between the driver and
//! executors (spec §4.1). Every variant here is reachable over the wire
//! transport (§4.7 of SPEC_FULL.md) as a JSON body; `serde`'s internally
//! tagged representation gives the "reject unknown tags" behavior spec §9
//! asks of a sealed variant message by construction — an unrecognized `kind`
//! fails to deserialize instead of silently falling through.

use crate::model::{BlockId, BlockManagerId, ExecutorId, SkewTuneBlockInfo, TaskId, TaskSetId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Messages sent from the driver to an executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DriverToExecutor {
    /// Opaque pre-serialized task bytes; the driver never re-deserializes
    /// these (spec §4.1: "carries opaque bytes to avoid re-serialization").
    /// `task_set_id`/`is_last_task`/`blocks` ride alongside as plain
    /// (non-opaque) metadata the executor needs to register with the
    /// task-set's SkewTuneMaster on its own behalf (spec §4.1's
    /// `RegisterNewTask`), since the blocks a task must fetch are decided
    /// upstream of this wire boundary.
    LaunchTask {
        task_id: TaskId,
        task_set_id: TaskSetId,
        is_last_task: bool,
        blocks: Vec<SkewTuneBlockInfo>,
        serialized_task: Vec<u8>,
    },
    KillTask { task_id: TaskId, interrupt: bool },
    StopExecutor,
    RemoveFetchCommand {
        next_executor_id: ExecutorId,
        next_task_id: TaskId,
        task_id: TaskId,
        blocks_by_host: HashMap<BlockManagerId, Vec<BlockId>>,
    },
    AddFetchCommand {
        task_id: TaskId,
        blocks_with_size_by_host: HashMap<BlockManagerId, Vec<SkewTuneBlockInfo>>,
    },
    RemoveAndAddResultCommand {
        block_ids: Vec<BlockId>,
        from_task: TaskId,
        to_task: TaskId,
    },
    LockTask { task_id: TaskId },
    UnlockTask { task_id: TaskId },
}

/// Messages sent from an executor to the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ExecutorToDriver {
    RegisterExecutor {
        executor_id: ExecutorId,
        endpoint: String,
        host: String,
        total_cores: u32,
        log_urls: HashMap<String, String>,
    },
    StatusUpdate {
        executor_id: ExecutorId,
        task_id: TaskId,
        state: TaskState,
        data: Vec<u8>,
    },
    RegisterNewTask {
        task_set_id: TaskSetId,
        task_id: TaskId,
        executor_id: ExecutorId,
        blocks: Vec<SkewTuneBlockInfo>,
        /// True when this is the last task of the task-set to register.
        is_last_task: bool,
    },
    ReportBlockStatuses {
        task_set_id: TaskSetId,
        task_id: TaskId,
        updates: Vec<BlockStatusUpdate>,
        new_task_id: Option<TaskId>,
    },
    ReportTaskFinished {
        task_set_id: TaskSetId,
        task_id: TaskId,
    },
    ReportTaskComputeSpeed {
        task_set_id: TaskSetId,
        task_id: TaskId,
        executor_id: ExecutorId,
        bytes_per_ms: f64,
    },
    ReportBlockDownloadSpeed {
        task_set_id: TaskSetId,
        from_executor: ExecutorId,
        to_executor: ExecutorId,
        bytes_per_ms: f64,
    },
    TransferRemovedFetch {
        next_executor_id: ExecutorId,
        next_task_id: TaskId,
        blocks_with_size_by_host: HashMap<BlockManagerId, Vec<SkewTuneBlockInfo>>,
    },
}

/// One block's state transition as reported by `ReportBlockStatuses`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockStatusUpdate {
    pub block_id: BlockId,
    pub status: BlockStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Pending,
    Fetched,
    Consumed,
}

/// Lifecycle state of a task as carried in `StatusUpdate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Running,
    Finished,
    Failed,
    Killed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Failed | TaskState::Killed)
    }
}

/// Messages the DriverEndpoint actor sends to itself or schedules internally
/// (spec §4.1: "Driver-internal").
#[derive(Debug, Clone)]
pub enum DriverInternal {
    ReviveOffers,
    StopDriver,
    StopExecutors,
    RemoveExecutor { executor_id: ExecutorId, reason: String },
    OnDisconnected { remote_endpoint: String },
}

/// Messages exchanged between a cluster manager and the driver (spec §4.1).
/// Named collaborators in spec §1 ("cluster-manager-specific executor
/// provisioning" is out of scope); only the message shapes are specified
/// here so `request_executors`/`kill_executors` have a concrete wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ClusterManagerMessage {
    RegisterClusterManager,
    RequestExecutors { total: u32 },
    KillExecutors { executor_ids: Vec<ExecutorId> },
    RetrieveSparkProps,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_task_round_trips_through_json() {
        let msg = DriverToExecutor::LaunchTask {
            task_id: 7,
            task_set_id: TaskSetId("ts1".into()),
            is_last_task: false,
            blocks: vec![],
            serialized_task: vec![1, 2, 3],
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: DriverToExecutor = serde_json::from_str(&json).unwrap();
        match back {
            DriverToExecutor::LaunchTask { task_id, serialized_task, .. } => {
                assert_eq!(task_id, 7);
                assert_eq!(serialized_task, vec![1, 2, 3]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let bad = r#"{"kind":"NotARealMessage"}"#;
        let result: Result<DriverToExecutor, _> = serde_json::from_str(bad);
        assert!(result.is_err());
    }

    #[test]
    fn terminal_states_are_classified_correctly() {
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Finished.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Killed.is_terminal());
    }
}
