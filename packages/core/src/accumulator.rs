//! Per-key job buffer that decides when a batch is ready.

use crate::batch::BatchKey;
use crate::job::Job;

/// What happened to a job handed to [`BatchAccumulator::add`].
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// The job is buffered. `first` is set when the buffer was empty before,
    /// which is when a linger timer has to be armed.
    Buffered { first: bool },
    /// The size threshold was reached; these jobs must be published now.
    FlushNow(Vec<Job>),
}

/// FIFO buffer of jobs sharing one [`BatchKey`].
///
/// The accumulator itself is not synchronized: it is owned by exactly one
/// actor, whose mailbox serializes `add` and `drain`.
#[derive(Debug)]
pub struct BatchAccumulator {
    key: BatchKey,
    max_batch_size: usize,
    pending: Vec<Job>,
    accepted: u64,
}

impl BatchAccumulator {
    pub fn new(key: BatchKey, max_batch_size: usize) -> Self {
        let max_batch_size = if key.priority.is_realtime() {
            1
        } else {
            max_batch_size.max(1)
        };
        Self {
            key,
            max_batch_size,
            pending: Vec::with_capacity(max_batch_size.min(1_024)),
            accepted: 0,
        }
    }

    pub fn key(&self) -> &BatchKey {
        &self.key
    }

    /// Append a job. Realtime jobs are never buffered.
    pub fn add(&mut self, job: Job) -> AddOutcome {
        debug_assert_eq!(job.key(), self.key, "job routed to the wrong accumulator");
        self.accepted += 1;

        if self.key.priority.is_realtime() {
            return AddOutcome::FlushNow(vec![job]);
        }

        let first = self.pending.is_empty();
        self.pending.push(job);

        if self.pending.len() >= self.max_batch_size {
            AddOutcome::FlushNow(self.drain())
        } else {
            AddOutcome::Buffered { first }
        }
    }

    /// Take every buffered job in arrival order and reset to empty.
    pub fn drain(&mut self) -> Vec<Job> {
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Total jobs ever handed to `add`.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobId, Payload, Priority};

    fn key(priority: Priority) -> BatchKey {
        BatchKey::new("payments", "refund", priority)
    }

    fn job(priority: Priority, n: u8) -> Job {
        match Job::new("payments", "refund", priority, Payload::from(vec![n])) {
            Ok(job) => job,
            Err(e) => panic!("valid job rejected: {e}"),
        }
    }

    fn ids(jobs: &[Job]) -> Vec<JobId> {
        jobs.iter().map(|j| j.id).collect()
    }

    #[test]
    fn realtime_is_always_a_singleton() {
        let mut acc = BatchAccumulator::new(key(Priority::Realtime), 50);
        for n in 0..10 {
            match acc.add(job(Priority::Realtime, n)) {
                AddOutcome::FlushNow(batch) => assert_eq!(batch.len(), 1),
                other => panic!("realtime job was buffered: {other:?}"),
            }
            assert!(acc.is_empty());
        }
        assert_eq!(acc.accepted(), 10);
    }

    #[test]
    fn flushes_exactly_at_threshold() {
        let mut acc = BatchAccumulator::new(key(Priority::Normal), 3);
        let jobs: Vec<Job> = (0..5).map(|n| job(Priority::Normal, n)).collect();

        assert_eq!(acc.add(jobs[0].clone()), AddOutcome::Buffered { first: true });
        assert_eq!(acc.add(jobs[1].clone()), AddOutcome::Buffered { first: false });
        match acc.add(jobs[2].clone()) {
            AddOutcome::FlushNow(batch) => assert_eq!(ids(&batch), ids(&jobs[0..3])),
            other => panic!("expected a size flush, got {other:?}"),
        }
        assert!(acc.is_empty());

        assert_eq!(acc.add(jobs[3].clone()), AddOutcome::Buffered { first: true });
        assert_eq!(acc.add(jobs[4].clone()), AddOutcome::Buffered { first: false });
        assert_eq!(ids(&acc.drain()), ids(&jobs[3..5]));
    }

    #[test]
    fn drain_on_empty_is_a_no_op() {
        let mut acc = BatchAccumulator::new(key(Priority::Slow), 10);
        assert!(acc.drain().is_empty());
        acc.add(job(Priority::Slow, 1));
        assert_eq!(acc.drain().len(), 1);
        assert!(acc.drain().is_empty());
    }

    #[test]
    fn interleaved_adds_and_drains_lose_nothing() {
        let mut acc = BatchAccumulator::new(key(Priority::Normal), 4);
        let mut submitted = Vec::new();
        let mut emitted = Vec::new();

        for n in 0..37u8 {
            let job = job(Priority::Normal, n);
            submitted.push(job.id);
            if let AddOutcome::FlushNow(batch) = acc.add(job) {
                emitted.extend(ids(&batch));
            }
            if n % 7 == 0 {
                emitted.extend(ids(&acc.drain()));
            }
        }
        emitted.extend(ids(&acc.drain()));

        assert_eq!(emitted, submitted);
    }
}
