//! Status records for submitted jobs.

use std::collections::{HashMap, VecDeque};

use batchalier_core::{BatchId, BatchKey, JobId, JobRecord, JobStatus, LifecycleError};
use chrono::{DateTime, Utc};

/// Payload-free lifecycle records, polled through `JobSubmitter::job_status`.
///
/// Queued jobs are always tracked. Terminal records are kept up to
/// `retention` entries, oldest dropped first.
pub(crate) struct JobLedger {
    records: HashMap<JobId, JobRecord>,
    retired: VecDeque<JobId>,
    retention: usize,
}

impl JobLedger {
    pub fn new(retention: usize) -> Self {
        Self {
            records: HashMap::new(),
            retired: VecDeque::new(),
            retention,
        }
    }

    pub fn insert(&mut self, record: JobRecord) {
        self.records.insert(record.id, record);
    }

    pub fn remove(&mut self, id: &JobId) -> Option<JobRecord> {
        self.records.remove(id)
    }

    pub fn get(&self, id: &JobId) -> Option<&JobRecord> {
        self.records.get(id)
    }

    /// Retained records currently in `status`.
    pub fn count(&self, status: JobStatus) -> usize {
        self.records.values().filter(|record| record.status == status).count()
    }

    /// `Queued -> Submitted` for every job of a published batch.
    pub fn settle_submitted(
        &mut self,
        job_ids: &[JobId],
        batch_id: BatchId,
        at: DateTime<Utc>,
    ) -> Vec<LifecycleError> {
        self.settle(job_ids, batch_id, |record| record.mark_submitted(at))
    }

    /// `Queued -> Failed` for every job of an abandoned batch.
    pub fn settle_failed(&mut self, job_ids: &[JobId], batch_id: BatchId) -> Vec<LifecycleError> {
        self.settle(job_ids, batch_id, JobRecord::mark_failed)
    }

    /// Fail every still-queued job of `key`. Used when its actor died.
    pub fn fail_queued_for_key(&mut self, key: &BatchKey) -> Vec<JobId> {
        let mut failed = Vec::new();
        for record in self.records.values_mut() {
            if &record.key == key && record.mark_failed().is_ok() {
                failed.push(record.id);
            }
        }
        for id in &failed {
            self.retire(*id);
        }
        failed
    }

    fn settle<F>(
        &mut self,
        job_ids: &[JobId],
        batch_id: BatchId,
        mut step: F,
    ) -> Vec<LifecycleError>
    where
        F: FnMut(&mut JobRecord) -> Result<(), LifecycleError>,
    {
        let mut errors = Vec::new();
        for id in job_ids {
            let Some(record) = self.records.get_mut(id) else {
                // Already evicted from retention.
                continue;
            };
            if let Err(e) = step(record) {
                errors.push(e);
                continue;
            }
            record.batch_id = Some(batch_id);
            self.retire(*id);
        }
        errors
    }

    fn retire(&mut self, id: JobId) {
        self.retired.push_back(id);
        while self.retired.len() > self.retention {
            if let Some(old) = self.retired.pop_front() {
                self.records.remove(&old);
            }
        }
    }
}
