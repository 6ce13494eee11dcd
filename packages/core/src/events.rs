//! Out-of-band notifications from the submitting and processing sides.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BatchId, BatchKey, JobId};

/// Why a batch left its accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    /// The size threshold was reached (always the case for realtime).
    Size,
    /// The linger timer expired.
    Linger,
    /// An explicit flush or shutdown.
    Forced,
}

impl std::fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlushTrigger::Size => write!(f, "size"),
            FlushTrigger::Linger => write!(f, "linger"),
            FlushTrigger::Forced => write!(f, "forced"),
        }
    }
}

/// Events emitted by the submitting side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    /// A batch was accepted by the bus; its jobs are now submitted.
    BatchSubmitted {
        batch_id: BatchId,
        key: BatchKey,
        job_ids: Vec<JobId>,
        trigger: FlushTrigger,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    /// A publish attempt failed and will be retried.
    BatchRetrying {
        batch_id: BatchId,
        key: BatchKey,
        attempt: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// Retries ran out; every job of the batch is now failed.
    BatchFailed {
        batch_id: BatchId,
        key: BatchKey,
        job_ids: Vec<JobId>,
        attempts: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// An idle key was removed from the arena.
    KeyEvicted {
        key: BatchKey,
        timestamp: DateTime<Utc>,
    },
}

impl BatchEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            BatchEvent::BatchSubmitted { timestamp, .. } => *timestamp,
            BatchEvent::BatchRetrying { timestamp, .. } => *timestamp,
            BatchEvent::BatchFailed { timestamp, .. } => *timestamp,
            BatchEvent::KeyEvicted { timestamp, .. } => *timestamp,
        }
    }

    pub fn key(&self) -> &BatchKey {
        match self {
            BatchEvent::BatchSubmitted { key, .. } => key,
            BatchEvent::BatchRetrying { key, .. } => key,
            BatchEvent::BatchFailed { key, .. } => key,
            BatchEvent::KeyEvicted { key, .. } => key,
        }
    }

    pub fn batch_id(&self) -> Option<BatchId> {
        match self {
            BatchEvent::BatchSubmitted { batch_id, .. } => Some(*batch_id),
            BatchEvent::BatchRetrying { batch_id, .. } => Some(*batch_id),
            BatchEvent::BatchFailed { batch_id, .. } => Some(*batch_id),
            BatchEvent::KeyEvicted { .. } => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            BatchEvent::BatchSubmitted {
                batch_id,
                key,
                job_ids,
                trigger,
                ..
            } => format!(
                "Batch {} ({} jobs, {}) submitted on {}",
                batch_id,
                job_ids.len(),
                trigger,
                key
            ),
            BatchEvent::BatchRetrying {
                batch_id,
                attempt,
                error,
                ..
            } => format!("Batch {} attempt {} failed: {}", batch_id, attempt, error),
            BatchEvent::BatchFailed {
                batch_id,
                job_ids,
                error,
                ..
            } => format!(
                "Batch {} ({} jobs) failed: {}",
                batch_id,
                job_ids.len(),
                error
            ),
            BatchEvent::KeyEvicted { key, .. } => format!("Key {} evicted", key),
        }
    }
}

/// Events emitted by the processing side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProcessorEvent {
    /// Results were published and the source batch acknowledged.
    BatchProcessed {
        batch_id: BatchId,
        ok: usize,
        errors: usize,
        timestamp: DateTime<Utc>,
    },
    /// Result publish failed for good; the source batch stays unacknowledged.
    ResultPublishFailed {
        batch_id: BatchId,
        attempts: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// The bus refused the acknowledgement.
    AckFailed {
        batch_id: BatchId,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl ProcessorEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ProcessorEvent::BatchProcessed { timestamp, .. } => *timestamp,
            ProcessorEvent::ResultPublishFailed { timestamp, .. } => *timestamp,
            ProcessorEvent::AckFailed { timestamp, .. } => *timestamp,
        }
    }

    pub fn batch_id(&self) -> BatchId {
        match self {
            ProcessorEvent::BatchProcessed { batch_id, .. } => *batch_id,
            ProcessorEvent::ResultPublishFailed { batch_id, .. } => *batch_id,
            ProcessorEvent::AckFailed { batch_id, .. } => *batch_id,
        }
    }
}
