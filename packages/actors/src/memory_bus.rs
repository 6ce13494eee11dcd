//! In-process bus implementing every port.
//!
//! Useful for local wiring and tests: published batches are queued for
//! consumption, consumed batches stay in flight until acked, and failures
//! can be injected per operation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use batchalier_core::{Batch, BatchId, BusError, ResultBatch};

use crate::ports::{BusConsumePort, BusPublishPort, BusResultPort, PortFuture};

/// One observable bus operation, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    Published(BatchId),
    PublishRejected,
    Consumed(BatchId),
    ResultsPublished(BatchId),
    ResultsRejected(BatchId),
    Acked(BatchId),
}

#[derive(Default)]
struct Inner {
    ready: VecDeque<Batch>,
    in_flight: HashMap<BatchId, Batch>,
    published: Vec<Batch>,
    results: Vec<ResultBatch>,
    log: Vec<BusOp>,
    fail_publishes: u32,
    fail_results: u32,
    fail_consumes: u32,
}

/// Shared in-memory bus. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject the next `n` batch publishes.
    pub fn fail_next_publishes(&self, n: u32) {
        self.lock().fail_publishes = n;
    }

    /// Reject the next `n` result publishes.
    pub fn fail_next_result_publishes(&self, n: u32) {
        self.lock().fail_results = n;
    }

    /// Fail the next `n` consume calls.
    pub fn fail_next_consumes(&self, n: u32) {
        self.lock().fail_consumes = n;
    }

    /// Queue a batch for consumption as if another process had published it.
    pub fn deliver(&self, batch: Batch) {
        self.lock().ready.push_back(batch);
    }

    /// Put every consumed-but-unacked batch back in front of the queue.
    pub fn redeliver_unacked(&self) -> usize {
        let mut inner = self.lock();
        let mut pending: Vec<Batch> = inner.in_flight.drain().map(|(_, batch)| batch).collect();
        pending.sort_by_key(|batch| batch.batch_id);
        let count = pending.len();
        for batch in pending.into_iter().rev() {
            inner.ready.push_front(batch);
        }
        count
    }

    /// Every batch accepted by `publish_batch`, in order.
    pub fn published(&self) -> Vec<Batch> {
        self.lock().published.clone()
    }

    /// Every result batch accepted by `publish_results`, in order.
    pub fn results(&self) -> Vec<ResultBatch> {
        self.lock().results.clone()
    }

    pub fn log(&self) -> Vec<BusOp> {
        self.lock().log.clone()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }
}

impl BusPublishPort for MemoryBus {
    fn publish_batch<'a>(&'a self, batch: &'a Batch) -> PortFuture<'a, Result<(), BusError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if inner.fail_publishes > 0 {
                inner.fail_publishes -= 1;
                inner.log.push(BusOp::PublishRejected);
                return Err(BusError::Unavailable("injected publish failure".into()));
            }
            inner.log.push(BusOp::Published(batch.batch_id));
            inner.published.push(batch.clone());
            inner.ready.push_back(batch.clone());
            Ok(())
        })
    }
}

impl BusConsumePort for MemoryBus {
    fn consume(&self) -> PortFuture<'_, Result<Option<Batch>, BusError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if inner.fail_consumes > 0 {
                inner.fail_consumes -= 1;
                return Err(BusError::Unavailable("injected consume failure".into()));
            }
            let Some(batch) = inner.ready.pop_front() else {
                return Ok(None);
            };
            inner.log.push(BusOp::Consumed(batch.batch_id));
            inner.in_flight.insert(batch.batch_id, batch.clone());
            Ok(Some(batch))
        })
    }

    fn ack(&self, batch_id: BatchId) -> PortFuture<'_, Result<(), BusError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if inner.in_flight.remove(&batch_id).is_none() {
                return Err(BusError::Rejected(format!("batch {} is not in flight", batch_id)));
            }
            inner.log.push(BusOp::Acked(batch_id));
            Ok(())
        })
    }
}

impl BusResultPort for MemoryBus {
    fn publish_results<'a>(
        &'a self,
        results: &'a ResultBatch,
    ) -> PortFuture<'a, Result<(), BusError>> {
        Box::pin(async move {
            let mut inner = self.lock();
            if inner.fail_results > 0 {
                inner.fail_results -= 1;
                inner.log.push(BusOp::ResultsRejected(results.batch_id));
                return Err(BusError::Unavailable("injected result publish failure".into()));
            }
            inner.log.push(BusOp::ResultsPublished(results.batch_id));
            inner.results.push(results.clone());
            Ok(())
        })
    }
}
