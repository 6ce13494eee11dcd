//! Error taxonomy shared by the submitting and processing sides.

use crate::job::{JobId, JobStatus};

/// A malformed submission. No job is created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("processor must not be empty")]
    EmptyProcessor,

    #[error("group must not be empty")]
    EmptyGroup,

    #[error("unknown priority: {0}")]
    UnknownPriority(String),
}

/// An illegal job status change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("job {job_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}

/// Failure reported by a bus port.
///
/// Ports must make a failed call safe to retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    #[error("bus rejected the message: {0}")]
    Rejected(String),

    #[error("bus call timed out")]
    Timeout,
}

/// Batch publish abandoned after the retry budget ran out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("publish failed after {attempts} attempts: {last_error}")]
pub struct PublishError {
    pub attempts: u32,
    pub last_error: BusError,
}

/// A processing callback fault, downgraded to a `ProcessedError` result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessingError {
    #[error("handler error: {0}")]
    Handler(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("handler timed out after {0}ms")]
    Timeout(u64),

    #[error("no handler for group: {0}")]
    NoHandler(String),
}

/// Rejected configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_batch_size for {0} must be at least 1")]
    ZeroBatchSize(&'static str),

    #[error("max_linger_ms for {0} must be at least 1")]
    ZeroLinger(&'static str),

    #[error("publish_retry_limit must be at least 1")]
    ZeroRetryLimit,

    #[error("backoff_base_ms ({base}) must not exceed backoff_max_ms ({max})")]
    BackoffRange { base: u64, max: u64 },

    #[error("{0} must be at least 1")]
    Zero(&'static str),
}
