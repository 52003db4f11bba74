//! SkewTuneMaster (spec §4.5): per-task-set tracking of remaining shuffle
//! work and the split-trigger logic that rebalances it across in-flight
//! tasks.
//!
//! One instance exists per active task-set; the DriverEndpoint owns a map
//! keyed by `TaskSetId` and looks up the right instance on every SkewTune
//! report (spec §4.5's opening sentence).

use common::message::{BlockStatus, BlockStatusUpdate, DriverToExecutor};
use common::model::{BlockId, ExecutorId, SkewTuneBlockInfo, SkewTuneState, TaskId};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, warn};

/// One outbound command plus the executor it must be sent to.
pub struct Dispatch {
    pub executor_id: ExecutorId,
    pub message: DriverToExecutor,
}

/// The decision + dispatch plan `RegisterNewTask` produces. Empty
/// `dispatches` with `unlock` unset means "nothing to do this turn".
#[derive(Default)]
pub struct RegisterNewTaskOutcome {
    pub dispatches: Vec<Dispatch>,
}

pub struct SkewTuneMaster {
    state: Mutex<SkewTuneState>,
    min_active_tasks_to_split: usize,
    min_active_tasks_to_split_last_task: usize,
}

impl SkewTuneMaster {
    pub fn new(min_active_tasks_to_split: usize, min_active_tasks_to_split_last_task: usize) -> Self {
        Self {
            state: Mutex::new(SkewTuneState::default()),
            min_active_tasks_to_split,
            min_active_tasks_to_split_last_task,
        }
    }

    /// `RegisterNewTask(t, e, blocks)` (spec §4.5).
    pub fn register_new_task(
        &self,
        task_id: TaskId,
        executor_id: ExecutorId,
        blocks: Vec<SkewTuneBlockInfo>,
        is_last_task: bool,
        cap: u64,
    ) -> RegisterNewTaskOutcome {
        let mut state = self.state.lock().unwrap();

        if !state.registered_tasks.contains_key(&task_id) {
            state.registered_tasks.insert(task_id, executor_id.clone());
            state.task_blocks.insert(task_id, blocks.into_iter().collect());
            state.active_tasks.insert(task_id);
        }
        state.finished_or_running_count += 1;

        let mut dispatches = Vec::new();

        if cap > 0 && state.finished_or_running_count >= cap {
            match compute_and_split(&state, is_last_task, self.split_threshold(is_last_task)) {
                Some(plan) => {
                    apply_plan(&mut state, task_id, plan, &mut dispatches);
                }
                None => {
                    if state.demon_tasks.len() as u64 >= cap.saturating_sub(1) {
                        dispatches.push(Dispatch {
                            executor_id,
                            message: DriverToExecutor::UnlockTask { task_id },
                        });
                    }
                }
            }
        } else if (state.demon_tasks.len() as u64) < cap.saturating_sub(1) {
            state.demon_tasks.push_back(task_id);
            if is_last_task {
                for demon in state.demon_tasks.drain(..).collect::<Vec<_>>() {
                    if let Some(demon_executor) = state.registered_tasks.get(&demon).cloned() {
                        dispatches.push(Dispatch {
                            executor_id: demon_executor,
                            message: DriverToExecutor::UnlockTask { task_id: demon },
                        });
                    }
                }
            }
        }

        RegisterNewTaskOutcome { dispatches }
    }

    fn split_threshold(&self, is_last_task: bool) -> usize {
        if is_last_task {
            self.min_active_tasks_to_split_last_task
        } else {
            self.min_active_tasks_to_split
        }
    }

    /// `ReportTaskFinished(t)` (spec §4.5).
    pub fn report_task_finished(&self, task_id: TaskId) {
        let mut state = self.state.lock().unwrap();
        state.finished_or_running_count = state.finished_or_running_count.saturating_sub(1);
        state.active_tasks.remove(&task_id);
        state.demon_tasks.retain(|t| *t != task_id);
        if state.unlocked_task_id == Some(task_id) {
            state.unlocked_task_id = None;
        }
    }

    /// `ReportBlockStatuses(t, pairs, new_owner?)` (spec §4.5).
    pub fn report_block_statuses(
        &self,
        task_id: TaskId,
        updates: Vec<BlockStatusUpdate>,
        new_task_id: Option<TaskId>,
    ) {
        let mut state = self.state.lock().unwrap();
        for update in updates {
            match update.status {
                BlockStatus::Pending => {
                    // No-op: block already pending in the fetch queue.
                }
                BlockStatus::Fetched => {
                    remove_from_pending(&mut state, task_id, &update.block_id);
                    let owner = new_task_id.unwrap_or(task_id);
                    state
                        .task_results
                        .entry(owner)
                        .or_default()
                        .insert(update.block_id);
                }
                BlockStatus::Consumed => {
                    if let Some(results) = state.task_results.get_mut(&task_id) {
                        results.remove(&update.block_id);
                    }
                }
            }
        }
    }

    /// `ReportTaskComputeSpeed` (spec §4.5): overwrite.
    pub fn report_task_compute_speed(&self, task_id: TaskId, bytes_per_ms: f64) {
        self.state
            .lock()
            .unwrap()
            .task_compute_speed
            .insert(task_id, bytes_per_ms);
    }

    /// `ReportBlockDownloadSpeed` (spec §4.5): arithmetic mean with the
    /// previous observation, initializing with the new value if absent.
    pub fn report_block_download_speed(
        &self,
        from_executor: ExecutorId,
        to_executor: ExecutorId,
        bytes_per_ms: f64,
    ) {
        let mut state = self.state.lock().unwrap();
        let key = (from_executor, to_executor);
        let entry = state.network_speed.entry(key).or_insert(bytes_per_ms);
        *entry = (*entry + bytes_per_ms) / 2.0;
    }

    pub fn demon_task_count(&self) -> usize {
        self.state.lock().unwrap().demon_tasks.len()
    }

    pub fn active_task_count(&self) -> usize {
        self.state.lock().unwrap().active_tasks.len()
    }

    #[cfg(test)]
    fn with_state<R>(&self, f: impl FnOnce(&mut SkewTuneState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

fn remove_from_pending(state: &mut SkewTuneState, task_id: TaskId, block_id: &BlockId) {
    if let Some(queue) = state.task_blocks.get_mut(&task_id) {
        queue.retain(|b| &b.block_id != block_id);
    }
}

/// A computed rebalancing plan: move `moved_blocks` from `large_task_id`'s
/// fetch queue to `small_task_id`'s.
struct SplitPlan {
    large_task_id: TaskId,
    small_task_id: TaskId,
    moved_blocks: Vec<SkewTuneBlockInfo>,
}

/// Per-task remaining-work weight: `Σ measured_block.size / compute_speed +
/// network_time_estimate` (spec §4.5's exact formula). Unmeasured
/// (`size_bytes == 0`) blocks are excluded per SPEC_FULL.md §10.4.
fn task_weight(state: &SkewTuneState, task_id: TaskId) -> f64 {
    let Some(queue) = state.task_blocks.get(&task_id) else {
        return 0.0;
    };
    let remaining_bytes: u64 = queue.iter().filter(|b| b.is_measured()).map(|b| b.size_bytes).sum();
    if remaining_bytes == 0 {
        return 0.0;
    }
    let compute_speed = state.task_compute_speed.get(&task_id).copied().filter(|s| *s > 0.0);
    let compute_time = match compute_speed {
        Some(speed) => remaining_bytes as f64 / speed,
        None => remaining_bytes as f64,
    };
    let network_time = network_time_estimate(state, task_id, queue);
    compute_time + network_time
}

/// Estimated remaining network transfer time for one task's queue, using
/// reported `(source, destination)` download speeds. A block's source
/// executor is derived from its `host_block_manager_id` (spec §3 treats
/// both as opaque; this implementation keys `network_speed` by reusing the
/// block manager id's string as an executor id — see DESIGN.md). Host pairs
/// with no reported speed contribute nothing (conservative, documented).
fn network_time_estimate(
    state: &SkewTuneState,
    task_id: TaskId,
    queue: &VecDeque<SkewTuneBlockInfo>,
) -> f64 {
    let Some(destination) = state.registered_tasks.get(&task_id) else {
        return 0.0;
    };
    let mut total = 0.0;
    for block in queue.iter().filter(|b| b.is_measured()) {
        let source = ExecutorId(block.host_block_manager_id.0.clone());
        if let Some(speed) = state.network_speed.get(&(source, destination.clone())) {
            if *speed > 0.0 {
                total += block.size_bytes as f64 / speed;
            }
        }
    }
    total
}

/// `compute_and_split(is_last)` (spec §4.5). Declines (`None`) when fewer
/// than `min_active_tasks` tasks are active, when no task has a measurable
/// weight, or when the largest and smallest weight belong to the same task.
fn compute_and_split(
    state: &SkewTuneState,
    _is_last: bool,
    min_active_tasks: usize,
) -> Option<SplitPlan> {
    if state.active_tasks.len() < min_active_tasks {
        return None;
    }

    let mut weights: Vec<(TaskId, f64)> = state
        .active_tasks
        .iter()
        .map(|&t| (t, task_weight(state, t)))
        .collect();
    weights.sort_by(|a, b| a.0.cmp(&b.0));

    if weights.iter().all(|(_, w)| *w <= 0.0) {
        return None;
    }

    let large_task_id = weights
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(b.0.cmp(&a.0)))
        .map(|(t, _)| *t)?;

    let small_task_id = weights
        .iter()
        .filter(|(t, _)| *t != large_task_id)
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(a.0.cmp(&b.0)))
        .map(|(t, _)| *t)?;

    if large_task_id == small_task_id {
        return None;
    }

    let large_queue = state.task_blocks.get(&large_task_id)?;
    if large_queue.is_empty() {
        return None;
    }

    let large_weight = task_weight(state, large_task_id);
    let small_weight = task_weight(state, small_task_id);
    let compute_speed = state
        .task_compute_speed
        .get(&large_task_id)
        .copied()
        .filter(|s| *s > 0.0)
        .unwrap_or(1.0);

    // Move a prefix (fetch order) of large's queue until the projected
    // weights converge to within one block (spec §4.5).
    let mut moved_blocks = Vec::new();
    let mut remaining_large = large_weight;
    let mut projected_small = small_weight;
    for block in large_queue.iter() {
        if remaining_large <= projected_small {
            break;
        }
        if !block.is_measured() {
            moved_blocks.push(block.clone());
            continue;
        }
        let block_time = block.size_bytes as f64 / compute_speed;
        moved_blocks.push(block.clone());
        remaining_large -= block_time;
        projected_small += block_time;
    }

    if moved_blocks.is_empty() {
        return None;
    }

    Some(SplitPlan {
        large_task_id,
        small_task_id,
        moved_blocks,
    })
}

fn apply_plan(
    state: &mut SkewTuneState,
    new_task_id: TaskId,
    plan: SplitPlan,
    dispatches: &mut Vec<Dispatch>,
) {
    let SplitPlan {
        large_task_id,
        small_task_id,
        moved_blocks,
    } = plan;

    let Some(large_executor) = state.registered_tasks.get(&large_task_id).cloned() else {
        warn!(task_id = large_task_id, "large task has no registered executor, skipping split");
        return;
    };
    let Some(small_executor) = state.registered_tasks.get(&small_task_id).cloned() else {
        warn!(task_id = small_task_id, "small task has no registered executor, skipping split");
        return;
    };

    let moved_ids: Vec<BlockId> = moved_blocks.iter().map(|b| b.block_id.clone()).collect();
    if let Some(queue) = state.task_blocks.get_mut(&large_task_id) {
        queue.retain(|b| !moved_ids.contains(&b.block_id));
    }

    let mut blocks_by_host = std::collections::HashMap::new();
    for block in &moved_blocks {
        blocks_by_host
            .entry(block.host_block_manager_id.clone())
            .or_insert_with(Vec::new)
            .push(block.block_id.clone());
    }
    dispatches.push(Dispatch {
        executor_id: large_executor,
        message: DriverToExecutor::RemoveFetchCommand {
            next_executor_id: small_executor.clone(),
            next_task_id: small_task_id,
            task_id: large_task_id,
            blocks_by_host,
        },
    });

    let mut blocks_with_size_by_host: std::collections::HashMap<_, Vec<_>> =
        std::collections::HashMap::new();
    for block in moved_blocks {
        blocks_with_size_by_host
            .entry(block.host_block_manager_id.clone())
            .or_insert_with(Vec::new)
            .push(block);
    }
    state
        .task_blocks
        .entry(small_task_id)
        .or_default()
        .extend(blocks_with_size_by_host.values().flatten().cloned());
    dispatches.push(Dispatch {
        executor_id: small_executor.clone(),
        message: DriverToExecutor::AddFetchCommand {
            task_id: small_task_id,
            blocks_with_size_by_host,
        },
    });

    // Shift already-fetched results from the donor, if its remaining share
    // is now zero, to the receiver (spec §4.5).
    if state
        .task_blocks
        .get(&large_task_id)
        .map(|q| q.is_empty())
        .unwrap_or(true)
    {
        if let Some(results) = state.task_results.remove(&large_task_id) {
            if !results.is_empty() {
                let block_ids: Vec<BlockId> = results.into_iter().collect();
                dispatches.push(Dispatch {
                    executor_id: large_executor,
                    message: DriverToExecutor::RemoveAndAddResultCommand {
                        block_ids,
                        from_task: large_task_id,
                        to_task: small_task_id,
                    },
                });
            }
        }
    }

    // Dispatch rule (spec §4.5): small_task_id is the just-registered task,
    // a demon task being promoted, or neither.
    if small_task_id == new_task_id {
        dispatches.push(Dispatch {
            executor_id: small_executor,
            message: DriverToExecutor::UnlockTask { task_id: small_task_id },
        });
    } else if state.demon_tasks.contains(&small_task_id) {
        dispatches.push(Dispatch {
            executor_id: small_executor,
            message: DriverToExecutor::UnlockTask { task_id: small_task_id },
        });
        state.demon_tasks.retain(|t| *t != small_task_id);
        state.demon_tasks.push_back(new_task_id);
    } else {
        debug!(
            small_task_id,
            "split plan references a task no longer eligible for unlock; taking no action"
        );
    }
}
