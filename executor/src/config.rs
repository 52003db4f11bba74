//! Configuration management for the executor process.
//!
//! Unlike the driver, the executor's configuration is primarily supplied
//! on the command line (spec §6's CLI contract) rather than from a TOML
//! file — an executor process is launched once per task-set allocation,
//! not reconfigured in place. `ConfigManager` keeps the same shape as the
//! driver's for consistency, but `load` takes the already-parsed CLI
//! arguments rather than a file path.

use common::config::ExecutorConfig;

pub struct ConfigManager {
    pub executor_config: ExecutorConfig,
}

impl ConfigManager {
    pub fn from_cli(executor_config: ExecutorConfig) -> Self {
        Self { executor_config }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_the_given_config_unchanged() {
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
        let manager = ConfigManager::from_cli(config.clone());
        assert_eq!(manager.executor_config, config);
    }
}
