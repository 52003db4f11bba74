//! Shared types for the scheduling coordinator: message schema, data model,
//! configuration, and error kinds used by both the driver and the executor.

pub mod config;
pub mod defaults;
pub mod error;
pub mod message;
pub mod model;

pub use error::CoordinatorError;
pub use model::{
    BlockId, BlockManagerId, ExecutorAdded, ExecutorData, ExecutorId, ExecutorRemoved,
    SkewTuneBlockInfo, TaskId, TaskSetId,
};

/// Result type alias used at process boundaries (config loading, HTTP calls)
/// where callers want `anyhow`'s causal context rather than a typed error.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    #[test]
    fn test_basic_imports() {
        // Smoke test: the crate's public surface links.
    }
}
