//! Default values for configuration parameters.
//!
//! This module centralizes all default value functions used by the
//! configuration structures. They are used by serde when deserializing
//! configuration files that don't specify certain optional fields (spec §6:
//! "all optional with defaults").

/// Default `scheduler.minRegisteredResourcesRatio` (spec §6).
pub fn default_min_registered_resources_ratio() -> f64 {
    0.0
}

/// Default `scheduler.maxRegisteredResourcesWaitingTime` in seconds (spec §6: 30s).
pub fn default_max_registered_resources_waiting_time_secs() -> u64 {
    30
}

/// Default `scheduler.revive.interval` in seconds (spec §6: 1s).
pub fn default_revive_interval_secs() -> u64 {
    1
}

/// Default `default.parallelism` override; `None` means derive it from
/// `max(total_core_count, 2)` per spec §4.6.
pub fn default_parallelism_override() -> Option<u32> {
    None
}

/// Default `akka.frameSize`-equivalent maximum frame size in bytes (128 MiB,
/// matching Spark's own historical default for this knob).
pub fn default_max_frame_size_bytes() -> usize {
    128 * 1024 * 1024
}

/// Default fixed transport overhead reserved from the frame budget.
pub fn default_reserved_frame_bytes() -> usize {
    200 * 1024
}

/// Default `CPUS_PER_TASK`.
pub fn default_cpus_per_task() -> u32 {
    1
}

/// Default bounded retry count for ask-style RPC calls (spec §5, §6).
pub fn default_rpc_ask_max_attempts() -> u32 {
    3
}

/// Default base backoff between ask retries, in milliseconds.
pub fn default_rpc_ask_backoff_base_ms() -> u64 {
    250
}

/// Default decline threshold for an ordinary (non-last-task) SkewTune split
/// decision (spec §9 open question; resolved in SPEC_FULL.md §10.4).
pub fn default_min_active_tasks_to_split() -> usize {
    3
}

/// Default decline threshold when `is_last_task` is true (SPEC_FULL.md §10.4).
pub fn default_min_active_tasks_to_split_last_task() -> usize {
    2
}

/// Default executor listen port.
pub fn default_executor_port() -> u16 {
    7077
}

/// Default graceful shutdown timeout, in seconds.
pub fn default_graceful_shutdown_timeout_secs() -> u64 {
    30
}
