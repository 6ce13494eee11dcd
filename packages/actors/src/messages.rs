//! Message types for actor communication.

use batchalier_core::{BatchId, BatchKey, Job, JobId, JobRecord, LifecycleError, ValidationError};
use chrono::{DateTime, Utc};
use ractor::RpcReplyPort;

use crate::processor::ProcessorStats;
use crate::submitter::ShutdownReport;

/// Messages for the SubmitterActor.
#[derive(Debug)]
pub(crate) enum SubmitterMessage {
    /// Queue a validated job on its key's accumulator.
    Submit {
        job: Box<Job>,
        reply: RpcReplyPort<Result<Job, SubmitError>>,
    },

    /// A key actor finished publishing a batch.
    BatchSettled {
        batch_id: BatchId,
        job_ids: Vec<JobId>,
        outcome: SettledOutcome,
    },

    /// A key actor has been empty for the idle grace period.
    KeyIdle { key: BatchKey, accepted: u64 },

    /// Look up a job's lifecycle record.
    GetJob {
        job_id: JobId,
        reply: RpcReplyPort<Option<JobRecord>>,
    },

    /// List keys currently in the arena.
    ListKeys { reply: RpcReplyPort<Vec<BatchKey>> },

    /// Force every key to publish what it holds.
    FlushAll { reply: RpcReplyPort<usize> },

    /// Flush every key, then stop accepting jobs and stop.
    Shutdown { reply: RpcReplyPort<ShutdownReport> },

    /// Second half of a shutdown, queued behind the final flush's settlements.
    Stop {
        flushed: usize,
        reply: RpcReplyPort<ShutdownReport>,
    },
}

/// How a published batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SettledOutcome {
    Submitted { at: DateTime<Utc> },
    Failed,
}

/// Messages for a KeyActor.
#[derive(Debug)]
pub(crate) enum KeyMessage {
    /// Append a queued job.
    Add { job: Box<Job> },

    /// The linger timer armed under `generation` expired.
    LingerExpired { generation: u64 },

    /// The idle timer armed under `generation` expired.
    IdleCheck { generation: u64 },

    /// Publish whatever is buffered, replying with the number of jobs flushed.
    Flush { reply: RpcReplyPort<usize> },
}

/// Messages for the ProcessorActor.
#[derive(Debug)]
pub(crate) enum ProcessorMessage {
    /// Consume and process the next batch, if any.
    Poll,

    /// Get processing counters.
    GetStats { reply: RpcReplyPort<ProcessorStats> },
}

/// Error returned to callers of `submit`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("invalid job: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("submitter is shutting down")]
    ShuttingDown,

    #[error("too many active batch keys (limit {0})")]
    ArenaFull(usize),

    #[error("accumulator unavailable: {0}")]
    Unavailable(String),
}

/// Error starting an engine instance.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] batchalier_core::ConfigError),

    #[error("failed to spawn actor: {0}")]
    Spawn(#[from] ractor::SpawnErr),
}
