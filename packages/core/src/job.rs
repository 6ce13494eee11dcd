//! Job domain types for units of work and their results.

use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::batch::BatchKey;
use crate::error::{LifecycleError, ValidationError};

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }

    /// The same 128 bits rendered as a hyphenated UUID.
    pub fn as_uuid_string(&self) -> String {
        crate::batch::uuid_string(self.0)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery urgency of a job. Selects the batching policy for its key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Never batched; every job is published on its own.
    Realtime,
    #[default]
    Normal,
    /// Larger batches, longer linger.
    Slow,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::Realtime, Priority::Normal, Priority::Slow];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Realtime => "realtime",
            Priority::Normal => "normal",
            Priority::Slow => "slow",
        }
    }

    /// Whether jobs of this priority bypass buffering.
    pub fn is_realtime(&self) -> bool {
        matches!(self, Priority::Realtime)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "realtime" => Ok(Priority::Realtime),
            "normal" => Ok(Priority::Normal),
            "slow" => Ok(Priority::Slow),
            _ => Err(ValidationError::UnknownPriority(s.to_string())),
        }
    }
}

/// Lifecycle status of a job on the submitting side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Constructed but not yet handed to an accumulator.
    #[default]
    New,
    /// Buffered, waiting for its batch to be published.
    Queued,
    /// The batch holding this job was accepted by the bus.
    Submitted,
    /// Publishing the batch was abandoned after exhausting retries.
    Failed,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Submitted | JobStatus::Failed)
    }

    /// Whether `self -> next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::New, JobStatus::Queued)
                | (JobStatus::Queued, JobStatus::Submitted)
                | (JobStatus::Queued, JobStatus::Failed)
        )
    }

    /// Move to `next`, rejecting anything the lifecycle forbids.
    pub fn advance(&mut self, job_id: JobId, next: JobStatus) -> Result<(), LifecycleError> {
        if !self.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                job_id,
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Queued => "queued",
            JobStatus::Submitted => "submitted",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque payload carried by jobs and results.
///
/// The engine moves these bytes around without ever looking inside; only the
/// processing callback and whoever produced the payload know the format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(pub Bytes);

impl Payload {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn empty() -> Self {
        Self(Bytes::new())
    }

    /// Encode any serializable value as a JSON payload.
    pub fn from_json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self(Bytes::from(serde_json::to_vec(value)?)))
    }

    /// Decode a JSON payload.
    pub fn to_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<&'static str> for Payload {
    fn from(value: &'static str) -> Self {
        Self(Bytes::from_static(value.as_bytes()))
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

/// A job represents a unit of work to be delivered to a processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Destination application; part of the batch key and bus routing.
    pub processor: String,
    /// Tells the processor how to interpret `data`.
    pub group: String,
    pub priority: Priority,
    pub status: JobStatus,
    pub data: Payload,
    /// When the job entered its accumulator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    /// When the batch holding this job was accepted by the bus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new job in the `New` state after validating its routing fields.
    pub fn new(
        processor: impl Into<String>,
        group: impl Into<String>,
        priority: Priority,
        data: impl Into<Payload>,
    ) -> Result<Self, ValidationError> {
        let processor = processor.into();
        let group = group.into();
        if processor.trim().is_empty() {
            return Err(ValidationError::EmptyProcessor);
        }
        if group.trim().is_empty() {
            return Err(ValidationError::EmptyGroup);
        }

        Ok(Self {
            id: JobId::new(),
            processor,
            group,
            priority,
            status: JobStatus::New,
            data: data.into(),
            queued_at: None,
            submitted_at: None,
        })
    }

    /// The accumulator key this job belongs to.
    pub fn key(&self) -> BatchKey {
        BatchKey::new(self.processor.clone(), self.group.clone(), self.priority)
    }

    /// `New -> Queued`, stamping `queued_at`.
    pub fn mark_queued(&mut self, at: DateTime<Utc>) -> Result<(), LifecycleError> {
        self.status.advance(self.id, JobStatus::Queued)?;
        self.queued_at = Some(at);
        Ok(())
    }

    /// `Queued -> Submitted`, stamping `submitted_at` no earlier than `queued_at`.
    pub fn mark_submitted(&mut self, at: DateTime<Utc>) -> Result<(), LifecycleError> {
        self.status.advance(self.id, JobStatus::Submitted)?;
        self.submitted_at = Some(submission_stamp(self.queued_at, at));
        Ok(())
    }

    /// `Queued -> Failed`. `submitted_at` stays unset.
    pub fn mark_failed(&mut self) -> Result<(), LifecycleError> {
        self.status.advance(self.id, JobStatus::Failed)
    }
}

/// `submitted_at` never precedes `queued_at`, whatever the clocks say.
fn submission_stamp(queued_at: Option<DateTime<Utc>>, at: DateTime<Utc>) -> DateTime<Utc> {
    queued_at.map_or(at, |queued| queued.max(at))
}

/// Outcome code of processing a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    ProcessedOk,
    /// The job was accepted for processing but resulted in some kind of error.
    ProcessedError,
}

impl ResultCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, ResultCode::ProcessedOk)
    }
}

/// The processed result of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    /// Copied from the job so results can be routed without it.
    pub job_group: String,
    pub priority: Priority,
    pub result: ResultCode,
    pub data: Payload,
    pub processed_at: DateTime<Utc>,
}

impl JobResult {
    /// Build the result for `job`, stamped at `processed_at`.
    pub fn for_job(
        job: &Job,
        result: ResultCode,
        data: Payload,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job.id,
            job_group: job.group.clone(),
            priority: job.priority,
            result,
            data,
            processed_at,
        }
    }

    /// A `ProcessedError` result whose payload is the error message.
    pub fn error(job: &Job, message: &str, processed_at: DateTime<Utc>) -> Self {
        Self::for_job(
            job,
            ResultCode::ProcessedError,
            Payload::new(Bytes::copy_from_slice(message.as_bytes())),
            processed_at,
        )
    }
}

/// Payload-free snapshot of a job's lifecycle, kept for status polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub key: BatchKey,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<crate::BatchId>,
}

impl JobRecord {
    /// Same transition and stamp as [`Job::mark_submitted`], on the record.
    pub fn mark_submitted(&mut self, at: DateTime<Utc>) -> Result<(), LifecycleError> {
        self.status.advance(self.id, JobStatus::Submitted)?;
        self.submitted_at = Some(submission_stamp(self.queued_at, at));
        Ok(())
    }

    pub fn mark_failed(&mut self) -> Result<(), LifecycleError> {
        self.status.advance(self.id, JobStatus::Failed)
    }
}

impl From<&Job> for JobRecord {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            key: job.key(),
            status: job.status,
            queued_at: job.queued_at,
            submitted_at: job.submitted_at,
            batch_id: None,
        }
    }
}
