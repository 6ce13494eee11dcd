//! Bus ports the engine calls through.
//!
//! The concrete transport (partitioning, offsets, serialization) lives behind
//! these traits. Every call must be safe to retry after a failure: the engine
//! re-sends the same envelope with the same batch id.

use std::future::Future;
use std::pin::Pin;

use batchalier_core::{Batch, BatchId, BusError, ResultBatch};

/// Future type returned by bus ports.
pub type PortFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Publishes job batches from the submitting side.
pub trait BusPublishPort: Send + Sync + 'static {
    fn publish_batch<'a>(&'a self, batch: &'a Batch) -> PortFuture<'a, Result<(), BusError>>;
}

/// Delivers job batches to the processing side.
pub trait BusConsumePort: Send + Sync + 'static {
    /// Next available batch, or `None` when there is nothing to deliver now.
    fn consume(&self) -> PortFuture<'_, Result<Option<Batch>, BusError>>;

    /// Commit a consumed batch. Only called after its results were published.
    fn ack(&self, batch_id: BatchId) -> PortFuture<'_, Result<(), BusError>>;
}

/// Publishes result batches from the processing side.
pub trait BusResultPort: Send + Sync + 'static {
    fn publish_results<'a>(
        &'a self,
        results: &'a ResultBatch,
    ) -> PortFuture<'a, Result<(), BusError>>;
}
