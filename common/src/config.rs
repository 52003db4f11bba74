//! Configuration types for the driver and executor processes, loaded from
//! TOML the way the donor's `AgentConfig`/`ServerConfig` are (spec §6: all
//! keys optional with defaults).

use crate::defaults::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Driver-side configuration: scheduler knobs (spec §6) plus the SkewTune
/// thresholds resolved in SPEC_FULL.md §10.4.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverConfig {
    /// Address the driver's HTTP surface binds to.
    #[serde(default = "default_driver_listen_address")]
    pub listen_address: String,

    /// `scheduler.minRegisteredResourcesRatio`, clamped to `[0, 1]`.
    #[serde(default = "default_min_registered_resources_ratio")]
    pub min_registered_resources_ratio: f64,

    /// `scheduler.maxRegisteredResourcesWaitingTime`.
    #[serde(default = "default_max_registered_resources_waiting_time_secs")]
    pub max_registered_resources_waiting_time_secs: u64,

    /// `scheduler.revive.interval`.
    #[serde(default = "default_revive_interval_secs")]
    pub revive_interval_secs: u64,

    /// `default.parallelism`; `None` derives `max(total_core_count, 2)`.
    #[serde(default = "default_parallelism_override")]
    pub default_parallelism: Option<u32>,

    /// `akka.frameSize`-equivalent maximum message size in bytes.
    #[serde(default = "default_max_frame_size_bytes")]
    pub max_frame_size_bytes: usize,

    /// Fixed transport overhead reserved from the frame budget.
    #[serde(default = "default_reserved_frame_bytes")]
    pub reserved_frame_bytes: usize,

    /// `CPUS_PER_TASK`, supplied by the external task scheduler in spec's
    /// model; configurable here since that collaborator is out of scope.
    #[serde(default = "default_cpus_per_task")]
    pub cpus_per_task: u32,

    #[serde(default = "default_rpc_ask_max_attempts")]
    pub rpc_ask_max_attempts: u32,

    #[serde(default = "default_rpc_ask_backoff_base_ms")]
    pub rpc_ask_backoff_base_ms: u64,

    /// SkewTune decline threshold for an ordinary registration.
    #[serde(default = "default_min_active_tasks_to_split")]
    pub skewtune_min_active_tasks_to_split: usize,

    /// SkewTune decline threshold when the registering task is the last one
    /// in its task-set.
    #[serde(default = "default_min_active_tasks_to_split_last_task")]
    pub skewtune_min_active_tasks_to_split_last_task: usize,

    #[serde(default = "default_graceful_shutdown_timeout_secs")]
    pub graceful_shutdown_timeout_secs: u64,
}

fn default_driver_listen_address() -> String {
    "127.0.0.1:7070".to_string()
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            listen_address: default_driver_listen_address(),
            min_registered_resources_ratio: default_min_registered_resources_ratio(),
            max_registered_resources_waiting_time_secs:
                default_max_registered_resources_waiting_time_secs(),
            revive_interval_secs: default_revive_interval_secs(),
            default_parallelism: default_parallelism_override(),
            max_frame_size_bytes: default_max_frame_size_bytes(),
            reserved_frame_bytes: default_reserved_frame_bytes(),
            cpus_per_task: default_cpus_per_task(),
            rpc_ask_max_attempts: default_rpc_ask_max_attempts(),
            rpc_ask_backoff_base_ms: default_rpc_ask_backoff_base_ms(),
            skewtune_min_active_tasks_to_split: default_min_active_tasks_to_split(),
            skewtune_min_active_tasks_to_split_last_task:
                default_min_active_tasks_to_split_last_task(),
            graceful_shutdown_timeout_secs: default_graceful_shutdown_timeout_secs(),
        }
    }
}

impl DriverConfig {
    pub fn revive_interval(&self) -> Duration {
        Duration::from_secs(self.revive_interval_secs)
    }

    pub fn max_registered_resources_waiting_time(&self) -> Duration {
        Duration::from_secs(self.max_registered_resources_waiting_time_secs)
    }

    /// `min_registered_resources_ratio` clamped to `[0, 1]` regardless of
    /// what the config file supplied (spec §6).
    pub fn clamped_min_registered_resources_ratio(&self) -> f64 {
        self.min_registered_resources_ratio.clamp(0.0, 1.0)
    }

    pub fn load_from_file(path: &std::path::Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read driver config {}: {}", path.display(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("failed to parse driver config {}: {}", path.display(), e))?;
        Ok(config)
    }
}

/// Executor-side configuration: the CLI-overridable fields plus the
/// executor's own listen port (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorConfig {
    pub executor_id: String,
    pub driver_url: String,
    pub hostname: String,
    pub cores: u32,
    pub app_id: String,
    #[serde(default)]
    pub worker_url: Option<String>,
    #[serde(default)]
    pub user_class_path: Vec<String>,
    #[serde(default = "default_executor_port")]
    pub executor_port: u16,
    #[serde(default = "default_graceful_shutdown_timeout_secs")]
    pub graceful_shutdown_timeout_secs: u64,
}

impl ExecutorConfig {
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.hostname, self.executor_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_config_defaults_match_spec() {
        let config = DriverConfig::default();
        assert_eq!(config.revive_interval_secs, 1);
        assert_eq!(config.max_registered_resources_waiting_time_secs, 30);
        assert_eq!(config.cpus_per_task, 1);
        assert_eq!(config.skewtune_min_active_tasks_to_split, 3);
        assert_eq!(config.skewtune_min_active_tasks_to_split_last_task, 2);
    }

    #[test]
    fn ratio_is_clamped_even_if_file_supplies_out_of_range_value() {
        let mut config = DriverConfig::default();
        config.min_registered_resources_ratio = 1.7;
        assert_eq!(config.clamped_min_registered_resources_ratio(), 1.0);
        config.min_registered_resources_ratio = -0.3;
        assert_eq!(config.clamped_min_registered_resources_ratio(), 0.0);
    }

    #[test]
    fn driver_config_round_trips_through_toml() {
        let config = DriverConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let back: DriverConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn executor_endpoint_formats_host_and_port() {
        let config = ExecutorConfig {
            executor_id: "e1".into(),
            driver_url: "http://driver:7070".into(),
            hostname: "worker-1".into(),
            cores: 4,
            app_id: "app-1".into(),
            worker_url: None,
            user_class_path: vec![],
            executor_port: 7077,
            graceful_shutdown_timeout_secs: 30,
        };
        assert_eq!(config.endpoint(), "http://worker-1:7077");
    }
}
