//! Outbound executor→driver RPC client, the mirror image of
//! `driver::client::ExecutorClient` (SPEC_FULL.md §4.7), grounded in the
//! donor agent's own `reqwest::Client` usage in `agent/src/main.rs`.

use common::config::ExecutorConfig;
use common::message::ExecutorToDriver;
use common::CoordinatorError;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct DriverClient {
    http: reqwest::Client,
    driver_url: String,
    max_attempts: u32,
    backoff_base: Duration,
}

impl DriverClient {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            driver_url: config.driver_url.trim_end_matches('/').to_string(),
            max_attempts: 3,
            backoff_base: Duration::from_millis(250),
        }
    }

    pub async fn send(&self, message: &ExecutorToDriver) -> Result<(), CoordinatorError> {
        let url = format!("{}/executor-message", self.driver_url);
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.http.post(&url).json(message).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    last_error = format!("driver returned status {}", response.status());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < self.max_attempts {
                warn!(attempt, error = %last_error, "executor->driver call failed, retrying");
                tokio::time::sleep(self.backoff_base * attempt).await;
            }
        }

        Err(CoordinatorError::RpcAskFailed {
            endpoint: self.driver_url.clone(),
            attempts: self.max_attempts,
            message: last_error,
        })
    }
}
