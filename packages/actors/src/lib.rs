//! Actor system for the micro-batching job engine.
//!
//! This crate provides the Ractor-based actors that batch jobs on the
//! submitting side and process them on the consuming side.
//!
//! # Architecture
//!
//! - `SubmitterActor` - Routes submitted jobs and owns the arena of keys
//! - `KeyActor` - Accumulator, linger timer and publish loop for one batch key
//! - `ProcessorActor` - Consumes batches, runs the handler, publishes results
//!
//! # Usage
//!
//! ```ignore
//! use batchalier_actors::{JobSubmitter, MemoryBus};
//!
//! let bus = Arc::new(MemoryBus::new());
//! let (submitter, _handle) = JobSubmitter::start(BatchingConfig::default(), bus).await?;
//! let job = submitter.submit("payments", "refund", Priority::Normal, payload).await?;
//! ```

mod handler;
mod key_actor;
mod ledger;
mod memory_bus;
mod messages;
mod ports;
mod processor;
mod registry;
mod retry;
mod submitter;

pub use handler::{FnHandler, HandlerFuture, HandlerResult, JobHandler, JobHandlerRegistry};
pub use memory_bus::{BusOp, MemoryBus};
pub use messages::{EngineError, SubmitError};
pub use ports::{BusConsumePort, BusPublishPort, BusResultPort, PortFuture};
pub use processor::{JobProcessor, ProcessorHandle, ProcessorStats};
pub use submitter::{JobSubmitter, ShutdownReport};

/// Re-export core types for convenience.
pub use batchalier_core::{
    Batch, BatchEvent, BatchId, BatchKey, BatchingConfig, BusError, Job, JobId, JobRecord,
    JobResult, JobStatus, Payload, Priority, ProcessorConfig, ProcessorEvent, ResultBatch,
    ResultCode,
};
