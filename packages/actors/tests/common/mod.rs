#![allow(dead_code)]

use std::error::Error;
use std::future::Future;
use std::time::Duration;

use batchalier_actors::{
    Batch, BatchEvent, BatchId, BatchKey, BatchingConfig, Job, JobId, Payload, Priority,
    ProcessorConfig, ProcessorEvent,
};
use batchalier_core::{FlushTrigger, PerPriority};
use chrono::Utc;
use tokio::sync::broadcast;

pub type TestResult = Result<(), Box<dyn Error>>;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Submitter config with one threshold and linger for both batched priorities.
pub fn batching(batch_size: usize, linger_ms: u64) -> BatchingConfig {
    BatchingConfig {
        max_batch_size: PerPriority {
            realtime: 1,
            normal: batch_size,
            slow: batch_size,
        },
        max_linger_ms: PerPriority {
            realtime: 0,
            normal: linger_ms,
            slow: linger_ms,
        },
        publish_retry_limit: 3,
        backoff_base_ms: 10,
        backoff_max_ms: 40,
        ..BatchingConfig::default()
    }
}

pub fn processing() -> ProcessorConfig {
    ProcessorConfig {
        consume_idle_ms: 10,
        backoff_base_ms: 10,
        backoff_max_ms: 40,
        ..ProcessorConfig::default()
    }
}

/// A job as the processing side receives it.
pub fn queued_job(group: &str, data: &'static str) -> Result<Job, Box<dyn Error>> {
    let mut job = Job::new("payments", group, Priority::Normal, Payload::from(data))?;
    job.mark_queued(Utc::now())?;
    Ok(job)
}

pub fn batch_of(jobs: Vec<Job>) -> Batch {
    Batch::new(BatchKey::new("payments", "refund", Priority::Normal), jobs)
}

/// Receive events until one matches, failing after `WAIT`.
pub async fn recv_until<T, F>(
    rx: &mut broadcast::Receiver<T>,
    mut wanted: F,
) -> Result<T, Box<dyn Error>>
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    let found = tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if wanted(&event) => return Ok(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    })
    .await??;
    Ok(found)
}

/// The fields of a `BatchSubmitted` event that tests look at.
#[derive(Debug)]
pub struct Submitted {
    pub batch_id: BatchId,
    pub job_ids: Vec<JobId>,
    pub trigger: FlushTrigger,
    pub attempts: u32,
}

pub async fn next_submitted(
    rx: &mut broadcast::Receiver<BatchEvent>,
) -> Result<Submitted, Box<dyn Error>> {
    let event = recv_until(rx, |event| matches!(event, BatchEvent::BatchSubmitted { .. })).await?;
    match event {
        BatchEvent::BatchSubmitted {
            batch_id,
            job_ids,
            trigger,
            attempts,
            ..
        } => Ok(Submitted {
            batch_id,
            job_ids,
            trigger,
            attempts,
        }),
        other => Err(format!("unexpected event: {}", other.description()).into()),
    }
}

pub async fn next_processed(
    rx: &mut broadcast::Receiver<ProcessorEvent>,
) -> Result<ProcessorEvent, Box<dyn Error>> {
    recv_until(rx, |event| matches!(event, ProcessorEvent::BatchProcessed { .. })).await
}

/// Poll `check` until it holds, failing after `WAIT`.
pub async fn eventually<F, Fut>(mut check: F) -> TestResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    Ok(())
}
