//! DriverEndpoint (spec §4.3): register/status-update handling, resource
//! offers and task dispatch, the executor-allocation API, and the
//! readiness gate.
//!
//! Spec §5/§9 ask for single-consumer actor semantics with suspension
//! points only at asks. The donor itself doesn't use an actor mailbox for
//! its central coordination point (`server/src/main.rs`'s `Server` and
//! `api::AppState` are shared state hit directly by axum handlers, guarded
//! by `Mutex`/atomics per field) — so here that's realized the same way:
//! `ExecutorRegistry`'s and `SkewTuneMaster`'s own internal locks give the
//! required per-field serialization, and the single background task this
//! struct owns (the revive timer) is the only thing that runs on a loop.
//! `reqwest` calls to executors are the suspension points the "ask"
//! semantics describe.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use common::config::DriverConfig;
use common::message::{BlockStatusUpdate, DriverToExecutor, TaskState};
use common::model::{ExecutorAdded, ExecutorData, ExecutorId, ExecutorRemoved, SkewTuneBlockInfo, TaskId, TaskSetId};
use common::CoordinatorError;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::client::ExecutorClient;
use crate::registry::ExecutorRegistry;
use crate::scheduler_backend::{SchedulerBackend, TaskDescription, TaskScheduler};
use crate::skewtune::SkewTuneMaster;

/// Lifecycle events published on registration/removal (spec §6).
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    ExecutorAdded(ExecutorAdded),
    ExecutorRemoved(ExecutorRemoved),
}

pub struct DriverEndpoint {
    registry: ExecutorRegistry,
    skewtune_masters: Mutex<HashMap<TaskSetId, Arc<SkewTuneMaster>>>,
    config: DriverConfig,
    client: ExecutorClient,
    scheduler: Arc<dyn TaskScheduler>,
    expected_total_cores: AtomicU64,
    started_at: Instant,
    events_tx: broadcast::Sender<LifecycleEvent>,
}

impl DriverEndpoint {
    pub fn new(config: DriverConfig, scheduler: Arc<dyn TaskScheduler>) -> Self {
        let (events_tx, _) = broadcast::channel(128);
        Self {
            registry: ExecutorRegistry::new(),
            skewtune_masters: Mutex::new(HashMap::new()),
            client: ExecutorClient::new(&config),
            config,
            scheduler,
            expected_total_cores: AtomicU64::new(0),
            started_at: Instant::now(),
            events_tx,
        }
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events_tx.subscribe()
    }

    /// `scheduler.maxRegisteredResourcesWaitingTime`'s companion: lets the
    /// allocation API compute a ratio against an expected core count when
    /// one is known (spec §6's `minRegisteredResourcesRatio`; the cluster
    /// manager that would normally supply "expected" is out of scope, so
    /// this is set explicitly by whoever owns that information).
    pub fn set_expected_total_cores(&self, cores: u64) {
        self.expected_total_cores.store(cores, Ordering::SeqCst);
    }

    fn skewtune_master_for(&self, task_set_id: &TaskSetId) -> Arc<SkewTuneMaster> {
        let mut masters = self.skewtune_masters.lock().unwrap();
        masters
            .entry(task_set_id.clone())
            .or_insert_with(|| {
                Arc::new(SkewTuneMaster::new(
                    self.config.skewtune_min_active_tasks_to_split,
                    self.config.skewtune_min_active_tasks_to_split_last_task,
                ))
            })
            .clone()
    }

    /// `RegisterExecutor` (spec §4.3).
    pub async fn register_executor(
        &self,
        executor_id: ExecutorId,
        endpoint: String,
        host: String,
        total_cores: u32,
        log_urls: HashMap<String, String>,
    ) -> Result<(), CoordinatorError> {
        let data = ExecutorData::new(executor_id.clone(), endpoint, host, total_cores);
        self.registry.insert(data.clone())?;

        let _ = self.events_tx.send(LifecycleEvent::ExecutorAdded(ExecutorAdded {
            timestamp_utc: chrono::Utc::now(),
            executor_id: executor_id.clone(),
            data,
        }));

        info!(%executor_id, total_cores, "executor registered");
        self.revive_offers_inner().await;
        Ok(())
    }

    /// `StatusUpdate` (spec §4.3): on a terminal state, returns the task's
    /// cores to the executor's free pool and revives offers.
    pub async fn status_update(
        &self,
        executor_id: ExecutorId,
        _task_id: TaskId,
        state: TaskState,
        _data: Vec<u8>,
    ) -> Result<(), CoordinatorError> {
        if state.is_terminal() {
            self.registry
                .adjust_free_cores(&executor_id, i64::from(self.config.cpus_per_task))?;
            self.revive_offers_inner().await;
        }
        Ok(())
    }

    async fn revive_offers_inner(&self) {
        let offers = self.registry.snapshot_offers();
        let descriptions = self.scheduler.resource_offers(&offers);
        self.launch_tasks(descriptions).await;
    }

    /// `launchTasks` (spec §4.3, scenario 3): dispatches each description in
    /// order. A task whose serialized form exceeds the frame budget aborts
    /// its enclosing task-set instead of being dispatched — every other
    /// still-undispatched description sharing that `task_set_id` in this
    /// same batch is dropped too, and `scheduler.abort_task_set` is called
    /// exactly once with the offending task's id/index/size/limit/reserved.
    async fn launch_tasks(&self, descriptions: Vec<TaskDescription>) {
        let budget = self.config.max_frame_size_bytes.saturating_sub(self.config.reserved_frame_bytes);
        let mut aborted_task_sets: HashSet<TaskSetId> = HashSet::new();

        for (index, task) in descriptions.into_iter().enumerate() {
            if aborted_task_sets.contains(&task.task_set_id) {
                continue;
            }

            if task.serialized_task.len() > budget {
                let err = CoordinatorError::FrameSizeExceeded {
                    task_id: task.task_id,
                    index,
                    size: task.serialized_task.len(),
                    limit: self.config.max_frame_size_bytes,
                    reserved: self.config.reserved_frame_bytes,
                };
                warn!(error = %err, task_set_id = %task.task_set_id, "task exceeds frame budget, aborting task-set");
                self.scheduler.abort_task_set(&task.task_set_id, &err.to_string());
                aborted_task_sets.insert(task.task_set_id.clone());
                continue;
            }

            let Some(offer) = self.registry.snapshot_offer(&task.executor_id) else {
                warn!(executor_id = %task.executor_id, "offer vanished before dispatch");
                continue;
            };
            if let Err(e) = self
                .registry
                .adjust_free_cores(&task.executor_id, -i64::from(self.config.cpus_per_task))
            {
                warn!(error = %e, "failed to reserve cores for dispatch");
                continue;
            }

            let message = DriverToExecutor::LaunchTask {
                task_id: task.task_id,
                task_set_id: task.task_set_id,
                is_last_task: task.is_last_task,
                blocks: task.blocks,
                serialized_task: task.serialized_task,
            };
            if let Some(data) = self.registry.get(&task.executor_id) {
                if let Err(e) = self.client.send(&data.endpoint, &message).await {
                    warn!(error = %e, executor_id = %task.executor_id, "failed to launch task");
                }
            }
            let _ = offer; // offer snapshot only used to validate existence above
        }
    }

    /// `KillTask` (spec §4.3).
    pub async fn kill_task(&self, task_id: TaskId, executor_id: &ExecutorId, interrupt: bool) {
        if let Some(data) = self.registry.get(executor_id) {
            let message = DriverToExecutor::KillTask { task_id, interrupt };
            if let Err(e) = self.client.send(&data.endpoint, &message).await {
                warn!(error = %e, "failed to deliver KillTask");
            }
        }
    }

    /// `StopExecutors` (spec §4.3).
    pub async fn stop_executors(&self) {
        for offer in self.registry.snapshot_offers() {
            if let Some(data) = self.registry.get(&offer.executor_id) {
                let _ = self.client.send(&data.endpoint, &DriverToExecutor::StopExecutor).await;
            }
        }
    }

    /// `RemoveExecutor` (spec §4.3).
    pub async fn remove_executor(&self, executor_id: &ExecutorId, reason: &str) {
        if let Some(_data) = self.registry.remove(executor_id) {
            let _ = self.events_tx.send(LifecycleEvent::ExecutorRemoved(ExecutorRemoved {
                timestamp_utc: chrono::Utc::now(),
                executor_id: executor_id.clone(),
                reason: reason.to_string(),
            }));
            info!(%executor_id, reason, "executor removed");
        }
    }

    /// `onDisconnected(remoteAddress)` (spec §4.3): an RPC disconnect is
    /// treated the same as an explicit `RemoveExecutor`.
    pub async fn on_disconnected(&self, remote_endpoint: &str) {
        if let Some(executor_id) = self.registry.find_by_endpoint(remote_endpoint) {
            self.remove_executor(&executor_id, "disconnected").await;
        }
    }

    /// `is_ready()` (spec §4.3): satisfied once the registered core ratio
    /// clears `minRegisteredResourcesRatio`, or the waiting-time deadline
    /// passes, whichever comes first.
    pub fn is_ready(&self) -> bool {
        let ratio = self.config.clamped_min_registered_resources_ratio();
        if ratio <= 0.0 {
            return true;
        }
        if self.started_at.elapsed() >= self.config.max_registered_resources_waiting_time() {
            return true;
        }
        let expected = self.expected_total_cores.load(Ordering::SeqCst);
        if expected == 0 {
            return true;
        }
        self.registry.total_core_count() as f64 >= expected as f64 * ratio
    }

    // --- SkewTune passthroughs (spec §4.5) ---

    pub async fn skewtune_register_new_task(
        &self,
        task_set_id: TaskSetId,
        task_id: TaskId,
        executor_id: ExecutorId,
        blocks: Vec<SkewTuneBlockInfo>,
        is_last_task: bool,
    ) {
        let master = self.skewtune_master_for(&task_set_id);
        let cap = self.registry.total_core_count();
        let outcome = master.register_new_task(task_id, executor_id, blocks, is_last_task, cap);
        for dispatch in outcome.dispatches {
            if let Some(data) = self.registry.get(&dispatch.executor_id) {
                if let Err(e) = self.client.send(&data.endpoint, &dispatch.message).await {
                    warn!(error = %e, "failed to deliver skewtune command");
                }
            }
        }
    }

    pub fn skewtune_report_task_finished(&self, task_set_id: &TaskSetId, task_id: TaskId) {
        self.skewtune_master_for(task_set_id).report_task_finished(task_id);
    }

    pub fn skewtune_report_block_statuses(
        &self,
        task_set_id: &TaskSetId,
        task_id: TaskId,
        updates: Vec<BlockStatusUpdate>,
        new_task_id: Option<TaskId>,
    ) {
        self.skewtune_master_for(task_set_id)
            .report_block_statuses(task_id, updates, new_task_id);
    }

    pub fn skewtune_report_task_compute_speed(
        &self,
        task_set_id: &TaskSetId,
        task_id: TaskId,
        bytes_per_ms: f64,
    ) {
        self.skewtune_master_for(task_set_id)
            .report_task_compute_speed(task_id, bytes_per_ms);
    }

    pub fn skewtune_report_block_download_speed(
        &self,
        task_set_id: &TaskSetId,
        from_executor: ExecutorId,
        to_executor: ExecutorId,
        bytes_per_ms: f64,
    ) {
        self.skewtune_master_for(task_set_id)
            .report_block_download_speed(from_executor, to_executor, bytes_per_ms);
    }
}

#[async_trait]
impl SchedulerBackend for DriverEndpoint {
    async fn start(&self) {
        info!("driver endpoint started");
    }

    async fn stop(&self) {
        self.stop_executors().await;
    }

    async fn stop_executors(&self) {
        DriverEndpoint::stop_executors(self).await;
    }

    async fn revive_offers(&self) {
        self.revive_offers_inner().await;
    }

    async fn kill_task(&self, task_id: TaskId, executor_id: &ExecutorId, interrupt: bool) {
        DriverEndpoint::kill_task(self, task_id, executor_id, interrupt).await;
    }

    fn default_parallelism(&self) -> u32 {
        self.config
            .default_parallelism
            .unwrap_or_else(|| (self.registry.total_core_count() as u32).max(2))
    }

    fn num_existing_executors(&self) -> usize {
        self.registry.total_registered_executors()
    }

    fn request_executors(&self, delta: u32) -> u64 {
        self.registry.request_executors(delta)
    }

    fn request_total_executors(&self, total: u32) -> u64 {
        self.registry.request_total_executors(total)
    }

    fn kill_executors(&self, executor_ids: &[ExecutorId]) -> (u64, Vec<ExecutorId>) {
        self.registry.kill_executors(executor_ids)
    }

    fn is_ready(&self) -> bool {
        DriverEndpoint::is_ready(self)
    }

    async fn remove_executor(&self, executor_id: &ExecutorId, reason: &str) {
        DriverEndpoint::remove_executor(self, executor_id, reason).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler_backend::NoopTaskScheduler;

    fn endpoint() -> DriverEndpoint {
        DriverEndpoint::new(DriverConfig::default(), Arc::new(NoopTaskScheduler))
    }

    #[tokio::test]
    async fn register_executor_is_reflected_in_registry_and_events() {
        let driver = endpoint();
        let mut events = driver.subscribe_events();
        driver
            .register_executor(
                ExecutorId::from("e1"),
                "http://127.0.0.1:7077".into(),
                "127.0.0.1".into(),
                4,
                HashMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(driver.registry().total_core_count(), 4);
        match events.try_recv().unwrap() {
            LifecycleEvent::ExecutorAdded(added) => assert_eq!(added.executor_id, ExecutorId::from("e1")),
            _ => panic!("expected ExecutorAdded"),
        }
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let driver = endpoint();
        driver
            .register_executor(ExecutorId::from("e1"), "http://h:1".into(), "h".into(), 2, HashMap::new())
            .await
            .unwrap();
        let err = driver
            .register_executor(ExecutorId::from("e1"), "http://h:1".into(), "h".into(), 2, HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::DuplicateExecutor(_)));
    }

    #[tokio::test]
    async fn terminal_status_update_returns_cores() {
        let driver = endpoint();
        let id = ExecutorId::from("e1");
        driver
            .register_executor(id.clone(), "http://h:1".into(), "h".into(), 2, HashMap::new())
            .await
            .unwrap();
        driver.registry().adjust_free_cores(&id, -1).unwrap();
        assert_eq!(driver.registry().get(&id).unwrap().free_cores, 1);

        driver
            .status_update(id.clone(), 1, TaskState::Finished, vec![])
            .await
            .unwrap();
        assert_eq!(driver.registry().get(&id).unwrap().free_cores, 2);
    }

    #[tokio::test]
    async fn on_disconnected_removes_executor_and_publishes_event() {
        let driver = endpoint();
        let mut events = driver.subscribe_events();
        driver
            .register_executor(ExecutorId::from("e1"), "http://h:1".into(), "h".into(), 2, HashMap::new())
            .await
            .unwrap();
        let _ = events.try_recv();

        driver.on_disconnected("http://h:1").await;
        assert!(!driver.registry().contains(&ExecutorId::from("e1")));
        match events.try_recv().unwrap() {
            LifecycleEvent::ExecutorRemoved(removed) => assert_eq!(removed.reason, "disconnected"),
            _ => panic!("expected ExecutorRemoved"),
        }
    }

    #[test]
    fn is_ready_with_zero_ratio_is_immediate() {
        let driver = endpoint();
        assert!(driver.is_ready());
    }

    #[test]
    fn is_ready_waits_for_ratio_unless_deadline_passed() {
        let mut config = DriverConfig::default();
        config.min_registered_resources_ratio = 1.0;
        config.max_registered_resources_waiting_time_secs = 9999;
        let driver = DriverEndpoint::new(config, Arc::new(NoopTaskScheduler));
        driver.set_expected_total_cores(8);
        assert!(!driver.is_ready());
    }

    #[derive(Default)]
    struct RecordingScheduler {
        aborted: Mutex<Vec<(TaskSetId, String)>>,
    }

    impl TaskScheduler for RecordingScheduler {
        fn resource_offers(&self, _offers: &[crate::registry::ExecutorOffer]) -> Vec<TaskDescription> {
            Vec::new()
        }

        fn abort_task_set(&self, task_set_id: &TaskSetId, reason: &str) {
            self.aborted.lock().unwrap().push((task_set_id.clone(), reason.to_string()));
        }
    }

    /// Matches spec §4.3 scenario 3: an oversized serialized task aborts its
    /// task-set (one `abort_task_set` call) and never dispatches, while a
    /// second, differently-task-set task in the same batch is unaffected.
    #[tokio::test]
    async fn oversized_task_aborts_its_task_set_and_does_not_dispatch() {
        let mut config = DriverConfig::default();
        config.max_frame_size_bytes = 16;
        config.reserved_frame_bytes = 0;
        let scheduler = Arc::new(RecordingScheduler::default());
        let driver = DriverEndpoint::new(config, scheduler.clone());

        driver
            .register_executor(ExecutorId::from("e1"), "http://127.0.0.1:1".into(), "h".into(), 2, HashMap::new())
            .await
            .unwrap();

        let oversized = TaskDescription {
            executor_id: ExecutorId::from("e1"),
            task_id: 1,
            task_set_id: TaskSetId("ts-big".into()),
            is_last_task: false,
            blocks: vec![],
            serialized_task: vec![0u8; 64],
        };
        let same_set_follow_up = TaskDescription {
            executor_id: ExecutorId::from("e1"),
            task_id: 2,
            task_set_id: TaskSetId("ts-big".into()),
            is_last_task: false,
            blocks: vec![],
            serialized_task: vec![0u8; 4],
        };

        driver.launch_tasks(vec![oversized, same_set_follow_up]).await;

        let aborted = scheduler.aborted.lock().unwrap();
        assert_eq!(aborted.len(), 1);
        assert_eq!(aborted[0].0, TaskSetId("ts-big".into()));
        assert!(aborted[0].1.contains('1'));
        // Free cores untouched: neither task in the aborted set was dispatched.
        assert_eq!(driver.registry().get(&ExecutorId::from("e1")).unwrap().free_cores, 2);
    }
}
