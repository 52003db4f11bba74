//! Minimal task execution stub.
//!
//! Closure/data serialization and the actual per-task compute are named
//! out-of-scope collaborators (spec §1: "closure/data serializer"). This
//! mirrors the donor's `TaskExecutor` dispatch shape (`agent/src/tasks.rs`)
//! without interpreting `serialized_task`'s contents: it waits out any
//! SkewTune lock on the task's fetch iterator, then reports completion,
//! echoing the opaque bytes back as the result payload the same way
//! `LaunchTask` carries them in without re-serializing (spec §4.1).

use std::sync::Arc;
use std::time::Instant;

use common::message::{BlockStatus, BlockStatusUpdate, ExecutorToDriver, TaskState};
use common::model::{ExecutorId, TaskId, TaskSetId};
use tracing::{debug, warn};

use crate::client::DriverClient;
use crate::fetch_iterator::FetchIterator;

pub struct TaskRunResult {
    pub task_id: TaskId,
    pub state: TaskState,
    pub data: Vec<u8>,
    pub execution_time_ms: f64,
}

#[derive(Clone, Default)]
pub struct TaskRunner;

impl TaskRunner {
    /// Runs one task to completion, respecting the fetch iterator's
    /// lock/unlock gate and killed flag (spec §4.4, §4.5), reporting each
    /// block it pulls back to the driver's SkewTuneMaster as
    /// `ReportBlockDownloadSpeed` + `ReportBlockStatuses` (spec §4.5) so
    /// skew mitigation has real data to act on.
    pub async fn run(
        &self,
        task_id: TaskId,
        serialized_task: Vec<u8>,
        fetch: Arc<FetchIterator>,
        task_set_id: TaskSetId,
        executor_id: ExecutorId,
        driver_client: DriverClient,
    ) -> TaskRunResult {
        let start = Instant::now();
        debug!(task_id, "task started");

        fetch.wait_if_locked().await;

        if fetch.is_killed() {
            return TaskRunResult {
                task_id,
                state: TaskState::Killed,
                data: Vec::new(),
                execution_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            };
        }

        while let Some(block) = fetch.pop_next() {
            fetch.wait_if_locked().await;
            if fetch.is_killed() {
                return TaskRunResult {
                    task_id,
                    state: TaskState::Killed,
                    data: Vec::new(),
                    execution_time_ms: start.elapsed().as_secs_f64() * 1000.0,
                };
            }

            let fetch_start = Instant::now();
            fetch.mark_fetched(block.block_id.clone());
            let elapsed_ms = fetch_start.elapsed().as_secs_f64().max(1e-6) * 1000.0;
            let bytes_per_ms = block.size_bytes as f64 / elapsed_ms;

            let speed_message = ExecutorToDriver::ReportBlockDownloadSpeed {
                task_set_id: task_set_id.clone(),
                from_executor: ExecutorId(block.host_block_manager_id.0.clone()),
                to_executor: executor_id.clone(),
                bytes_per_ms,
            };
            if let Err(e) = driver_client.send(&speed_message).await {
                warn!(error = %e, task_id, "failed to report block download speed");
            }

            let status_message = ExecutorToDriver::ReportBlockStatuses {
                task_set_id: task_set_id.clone(),
                task_id,
                updates: vec![BlockStatusUpdate { block_id: block.block_id, status: BlockStatus::Fetched }],
                new_task_id: None,
            };
            if let Err(e) = driver_client.send(&status_message).await {
                warn!(error = %e, task_id, "failed to report block status");
            }
        }

        TaskRunResult {
            task_id,
            state: TaskState::Finished,
            data: serialized_task,
            execution_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::ExecutorConfig;

    fn test_client() -> DriverClient {
        DriverClient::new(&ExecutorConfig {
            executor_id: "e1".into(),
            driver_url: "http://127.0.0.1:1".into(),
            hostname: "127.0.0.1".into(),
            cores: 2,
            app_id: "app-1".into(),
            worker_url: None,
            user_class_path: vec![],
            executor_port: 7077,
            graceful_shutdown_timeout_secs: 30,
        })
    }

    #[tokio::test]
    async fn completes_and_echoes_payload_when_unlocked() {
        let fetch = Arc::new(FetchIterator::new(1, vec![]));
        let runner = TaskRunner;
        let result = runner
            .run(1, vec![1, 2, 3], fetch, TaskSetId("ts1".into()), ExecutorId("e1".into()), test_client())
            .await;
        assert_eq!(result.state, TaskState::Finished);
        assert_eq!(result.data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn reports_killed_when_fetch_iterator_is_killed() {
        let fetch = Arc::new(FetchIterator::new(1, vec![]));
        fetch.lock();
        fetch.kill();
        let runner = TaskRunner;
        let result = runner
            .run(1, vec![], fetch, TaskSetId("ts1".into()), ExecutorId("e1".into()), test_client())
            .await;
        assert_eq!(result.state, TaskState::Killed);
    }
}
