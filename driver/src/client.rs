//! Outbound driver→executor RPC client.
//!
//! Realizes spec §9's "addressable handles resolved through an RPC
//! environment" as plain HTTP POSTs against an executor's wire endpoint
//! (SPEC_FULL.md §4.7), grounded in the donor agent's own `reqwest::Client`
//! usage in `agent/src/main.rs`. Calls are bounded-retried with a simple
//! linear backoff (spec §5: "asks are suspension points"; §9 asks for
//! bounded retry, not infinite).

use common::config::DriverConfig;
use common::message::DriverToExecutor;
use common::CoordinatorError;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct ExecutorClient {
    http: reqwest::Client,
    max_attempts: u32,
    backoff_base: Duration,
}

impl ExecutorClient {
    pub fn new(config: &DriverConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            max_attempts: config.rpc_ask_max_attempts.max(1),
            backoff_base: Duration::from_millis(config.rpc_ask_backoff_base_ms),
        }
    }

    /// Sends one `DriverToExecutor` message to `endpoint`, retrying transport
    /// failures up to `max_attempts` times.
    pub async fn send(&self, endpoint: &str, message: &DriverToExecutor) -> Result<(), CoordinatorError> {
        let url = format!("{}/driver-message", endpoint.trim_end_matches('/'));
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.http.post(&url).json(message).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    last_error = format!("executor returned status {}", response.status());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < self.max_attempts {
                warn!(endpoint, attempt, error = %last_error, "driver->executor call failed, retrying");
                tokio::time::sleep(self.backoff_base * attempt).await;
            }
        }

        Err(CoordinatorError::RpcAskFailed {
            endpoint: endpoint.to_string(),
            attempts: self.max_attempts,
            message: last_error,
        })
    }
}
