//! Typed error kinds for the coordinator core (spec §7). Modeled the same
//! way the donor's `ApiError` is: a `thiserror` enum with an `IntoResponse`
//! impl living alongside the HTTP layer that uses it (see `driver::api` and
//! `executor::api`), so the typed variant and its wire status code stay in
//! one place.

use crate::model::{ExecutorId, TaskId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("executor {0} is already registered")]
    DuplicateExecutor(ExecutorId),

    #[error("unknown executor {0}")]
    UnknownExecutor(ExecutorId),

    #[error(
        "task {task_id} (index {index}) serialized to {size} bytes, which exceeds the frame \
         limit of {limit} bytes (reserved {reserved} bytes)"
    )]
    FrameSizeExceeded {
        task_id: TaskId,
        index: usize,
        size: usize,
        limit: usize,
        reserved: usize,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("rpc ask to {endpoint} failed after {attempts} attempts: {message}")]
    RpcAskFailed {
        endpoint: String,
        attempts: u32,
        message: String,
    },

    #[error("executor {0} disconnected")]
    ExecutorDisconnected(ExecutorId),

    #[error("executor registration failed: {0}")]
    RegistrationFailed(String),

    #[error("driver disconnected: {0}")]
    DriverDisconnected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_exceeded_message_names_task_and_sizes() {
        let err = CoordinatorError::FrameSizeExceeded {
            task_id: 3,
            index: 0,
            size: 2048,
            limit: 1024,
            reserved: 128,
        };
        let msg = err.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains("2048"));
        assert!(msg.contains("1024"));
        assert!(msg.contains("128"));
    }
}
