//! Batch keys and the envelopes handed to the bus.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::job::{Job, JobId, JobResult, Priority};

pub(crate) fn uuid_string(id: Ulid) -> String {
    let hex = format!("{:032x}", u128::from(id));
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Unique identifier for a batch envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Ulid);

impl BatchId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }

    pub fn as_uuid_string(&self) -> String {
        uuid_string(self.0)
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The grouping unit for batching: two jobs share an accumulator iff their
/// keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchKey {
    pub processor: String,
    pub group: String,
    pub priority: Priority,
}

impl BatchKey {
    pub fn new(processor: impl Into<String>, group: impl Into<String>, priority: Priority) -> Self {
        Self {
            processor: processor.into(),
            group: group.into(),
            priority,
        }
    }
}

impl std::fmt::Display for BatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.processor, self.group, self.priority)
    }
}

/// An ordered set of jobs sharing one key, published as a single unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: BatchId,
    #[serde(flatten)]
    pub key: BatchKey,
    pub jobs: Vec<Job>,
}

impl Batch {
    pub fn new(key: BatchKey, jobs: Vec<Job>) -> Self {
        Self {
            batch_id: BatchId::new(),
            key,
            jobs,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs.iter().map(|job| job.id).collect()
    }
}

/// Results for one consumed batch, in the batch's job order.
///
/// Carries the id of the batch it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultBatch {
    pub batch_id: BatchId,
    pub results: Vec<JobResult>,
}

impl ResultBatch {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
