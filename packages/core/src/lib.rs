//! Core domain types for the micro-batching job engine.
//!
//! This crate contains shared types used by the submitting and processing
//! sides:
//! - Job, JobResult and the job lifecycle
//! - BatchKey and the batch envelopes handed to the bus
//! - The per-key accumulator and retry policy
//! - Configuration, events and errors

mod accumulator;
mod batch;
mod config;
mod error;
mod events;
mod job;

pub use accumulator::{AddOutcome, BatchAccumulator};
pub use batch::{Batch, BatchId, BatchKey, ResultBatch};
pub use config::{BatchingConfig, PerPriority, ProcessorConfig, RetryPolicy};
pub use error::{
    BusError, ConfigError, LifecycleError, ProcessingError, PublishError, ValidationError,
};
pub use events::{BatchEvent, FlushTrigger, ProcessorEvent};
pub use job::{Job, JobId, JobRecord, JobResult, JobStatus, Payload, Priority, ResultCode};
