//! The `SchedulerBackend` API surface (spec §4.6): the operations an
//! external task scheduler drives the driver through. `DriverEndpoint`
//! implements this trait; see `driver_endpoint.rs`.
//!
//! `TaskScheduler` is the mirror-image boundary: task-set manager internals
//! are explicitly out of scope (spec §1), so `resourceOffers`'s decision of
//! which task runs on which offer is modeled as an injected collaborator
//! rather than implemented here. `NoopTaskScheduler` is the default — it
//! never has tasks to hand out, which keeps the driver runnable standalone.

use async_trait::async_trait;
use common::model::{ExecutorId, TaskId, TaskSetId};
use common::model::SkewTuneBlockInfo;

use crate::registry::ExecutorOffer;

/// One task ready to launch against a specific offer, as handed back by a
/// `TaskScheduler`.
#[derive(Debug, Clone)]
pub struct TaskDescription {
    pub executor_id: ExecutorId,
    pub task_id: TaskId,
    pub task_set_id: TaskSetId,
    pub is_last_task: bool,
    pub blocks: Vec<SkewTuneBlockInfo>,
    pub serialized_task: Vec<u8>,
}

/// The out-of-scope collaborator that decides which tasks to run against a
/// round of resource offers (spec §1: "task-set manager internals").
pub trait TaskScheduler: Send + Sync {
    fn resource_offers(&self, offers: &[ExecutorOffer]) -> Vec<TaskDescription>;

    /// Called when `launchTasks` finds a task whose serialized form exceeds
    /// the frame budget (spec §4.3, scenario 3): the enclosing task-set is
    /// aborted rather than dispatched, and the task-set manager (this
    /// collaborator) is the one that receives that abort notice.
    fn abort_task_set(&self, task_set_id: &TaskSetId, reason: &str);
}

/// Default `TaskScheduler`: never has work. Lets the driver run and answer
/// registration/allocation traffic with no task-set manager wired in.
#[derive(Default)]
pub struct NoopTaskScheduler;

impl TaskScheduler for NoopTaskScheduler {
    fn resource_offers(&self, _offers: &[ExecutorOffer]) -> Vec<TaskDescription> {
        Vec::new()
    }

    fn abort_task_set(&self, _task_set_id: &TaskSetId, _reason: &str) {}
}

/// Public control surface a task scheduler (or CLI/test harness) drives the
/// driver through (spec §4.6).
#[async_trait]
pub trait SchedulerBackend: Send + Sync {
    async fn start(&self);
    async fn stop(&self);
    async fn stop_executors(&self);
    async fn revive_offers(&self);
    async fn kill_task(&self, task_id: TaskId, executor_id: &ExecutorId, interrupt: bool);
    fn default_parallelism(&self) -> u32;
    fn num_existing_executors(&self) -> usize;
    fn request_executors(&self, delta: u32) -> u64;
    fn request_total_executors(&self, total: u32) -> u64;
    fn kill_executors(&self, executor_ids: &[ExecutorId]) -> (u64, Vec<ExecutorId>);
    fn is_ready(&self) -> bool;
    async fn remove_executor(&self, executor_id: &ExecutorId, reason: &str);
}
