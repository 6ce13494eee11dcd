//! Integration tests for the submitting side: batching, linger, retries and
//! the job lifecycle as seen through `JobSubmitter`.

mod common;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use batchalier_actors::{
    BatchEvent, BatchKey, BatchingConfig, BusOp, JobId, JobStatus, JobSubmitter, MemoryBus,
    Payload, Priority, SubmitError,
};
use batchalier_core::{FlushTrigger, ValidationError};
use common::*;

async fn start(config: BatchingConfig, bus: &MemoryBus) -> Result<JobSubmitter, SubmitError> {
    let (submitter, _handle) = JobSubmitter::start(config, Arc::new(bus.clone()))
        .await
        .map_err(|e| SubmitError::Unavailable(e.to_string()))?;
    Ok(submitter)
}

async fn submit_n(
    submitter: &JobSubmitter,
    group: &str,
    priority: Priority,
    n: usize,
) -> Result<Vec<JobId>, SubmitError> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let job = submitter
            .submit("payments", group, priority, Payload::from(vec![i as u8]))
            .await?;
        ids.push(job.id);
    }
    Ok(ids)
}

#[tokio::test]
async fn five_normal_jobs_flush_by_size_then_linger() -> TestResult {
    init_tracing();
    let bus = MemoryBus::new();
    let submitter = start(batching(3, 300), &bus).await?;
    let mut events = submitter.subscribe();

    let first = submit_n(&submitter, "refund", Priority::Normal, 3).await?;
    let batch = next_submitted(&mut events).await?;
    assert_eq!(batch.trigger, FlushTrigger::Size);
    assert_eq!(batch.job_ids, first);

    let lingering_since = Instant::now();
    let rest = submit_n(&submitter, "refund", Priority::Normal, 2).await?;
    let batch = next_submitted(&mut events).await?;
    assert_eq!(batch.trigger, FlushTrigger::Linger);
    assert_eq!(batch.job_ids, rest);
    assert!(lingering_since.elapsed() >= Duration::from_millis(290));

    let sizes: Vec<usize> = bus.published().iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![3, 2]);

    for id in first.iter().chain(&rest) {
        let record = submitter.job_status(*id).await.ok_or("job record missing")?;
        assert_eq!(record.status, JobStatus::Submitted);
        assert!(record.batch_id.is_some());
        let queued_at = record.queued_at.ok_or("queued_at unset")?;
        let submitted_at = record.submitted_at.ok_or("submitted_at unset")?;
        assert!(queued_at <= submitted_at);
    }
    Ok(())
}

#[tokio::test]
async fn realtime_jobs_publish_alone_and_immediately() -> TestResult {
    init_tracing();
    let bus = MemoryBus::new();
    let submitter = start(batching(100, 10_000), &bus).await?;
    let mut events = submitter.subscribe();

    let started = Instant::now();
    let ids = submit_n(&submitter, "refund", Priority::Realtime, 3).await?;
    for id in &ids {
        let batch = next_submitted(&mut events).await?;
        assert_eq!(batch.job_ids, vec![*id]);
        assert_eq!(batch.trigger, FlushTrigger::Size);
    }
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(bus.published().iter().all(|b| b.len() == 1));
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_fail_every_job_of_the_batch() -> TestResult {
    init_tracing();
    let bus = MemoryBus::new();
    bus.fail_next_publishes(3);
    let submitter = start(batching(2, 10_000), &bus).await?;
    let mut events = submitter.subscribe();

    let ids = submit_n(&submitter, "refund", Priority::Normal, 2).await?;

    let mut retried = Vec::new();
    let failed = recv_until(&mut events, |event| match event {
        BatchEvent::BatchRetrying { attempt, .. } => {
            retried.push(*attempt);
            false
        }
        BatchEvent::BatchFailed { .. } => true,
        _ => false,
    })
    .await?;
    assert_eq!(retried, vec![1, 2]);
    let BatchEvent::BatchFailed {
        job_ids, attempts, ..
    } = failed
    else {
        return Err("expected BatchFailed".into());
    };
    assert_eq!(job_ids, ids);
    assert_eq!(attempts, 3);

    for id in &ids {
        let record = submitter.job_status(*id).await.ok_or("job record missing")?;
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.submitted_at.is_none());
    }

    // Failed jobs stay failed; nothing republishes them.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(bus.published().is_empty());
    assert_eq!(bus.log(), vec![BusOp::PublishRejected; 3]);
    Ok(())
}

#[tokio::test]
async fn retry_republishes_the_same_batch() -> TestResult {
    init_tracing();
    let bus = MemoryBus::new();
    bus.fail_next_publishes(2);
    let submitter = start(batching(2, 10_000), &bus).await?;
    let mut events = submitter.subscribe();

    let ids = submit_n(&submitter, "refund", Priority::Normal, 2).await?;
    let batch = next_submitted(&mut events).await?;
    assert_eq!(batch.attempts, 3);
    assert_eq!(batch.job_ids, ids);

    assert_eq!(
        bus.log(),
        vec![
            BusOp::PublishRejected,
            BusOp::PublishRejected,
            BusOp::Published(batch.batch_id)
        ]
    );
    let published = bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].job_ids(), ids);
    Ok(())
}

#[tokio::test]
async fn jobs_of_one_key_keep_submission_order_across_batches() -> TestResult {
    init_tracing();
    let bus = MemoryBus::new();
    let submitter = start(batching(4, 50), &bus).await?;
    let mut events = submitter.subscribe();

    let mut submitted = submit_n(&submitter, "refund", Priority::Slow, 6).await?;
    // Let the two leftovers go out by linger before continuing.
    tokio::time::sleep(Duration::from_millis(150)).await;
    submitted.extend(submit_n(&submitter, "refund", Priority::Slow, 7).await?);

    let mut seen = Vec::new();
    while seen.len() < submitted.len() {
        seen.extend(next_submitted(&mut events).await?.job_ids);
    }
    assert_eq!(seen, submitted);
    Ok(())
}

#[tokio::test]
async fn concurrent_submitters_lose_and_duplicate_nothing() -> TestResult {
    init_tracing();
    let bus = MemoryBus::new();
    let submitter = start(batching(5, 30), &bus).await?;

    let mut tasks = Vec::new();
    for task in 0..8 {
        let submitter = submitter.clone();
        let group = if task % 2 == 0 { "refund" } else { "charge" };
        tasks.push(tokio::spawn(async move {
            submit_n(&submitter, group, Priority::Normal, 25).await
        }));
    }
    let mut per_task = Vec::new();
    for task in tasks {
        per_task.push(task.await??);
    }
    submitter.flush().await?;

    let published = bus.published();
    let mut positions: HashMap<JobId, usize> = HashMap::new();
    let mut per_key: HashMap<BatchKey, usize> = HashMap::new();
    for batch in &published {
        assert!(!batch.is_empty() && batch.len() <= 5);
        for job in &batch.jobs {
            assert_eq!(job.key(), batch.key);
            let next = per_key.entry(batch.key.clone()).or_default();
            assert!(positions.insert(job.id, *next).is_none(), "job published twice");
            *next += 1;
        }
    }

    let all: HashSet<JobId> = per_task.iter().flatten().copied().collect();
    assert_eq!(all.len(), 200);
    assert_eq!(positions.len(), 200);
    assert!(all.iter().all(|id| positions.contains_key(id)));

    for ids in &per_task {
        let order: Vec<usize> = ids.iter().map(|id| positions[id]).collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }
    Ok(())
}

#[tokio::test]
async fn invalid_submissions_create_nothing() -> TestResult {
    init_tracing();
    let bus = MemoryBus::new();
    let submitter = start(BatchingConfig::default(), &bus).await?;

    let err = submitter
        .submit("", "refund", Priority::Normal, Payload::empty())
        .await;
    assert_eq!(err, Err(SubmitError::Validation(ValidationError::EmptyProcessor)));

    let err = submitter
        .submit("payments", "  ", Priority::Normal, Payload::empty())
        .await;
    assert_eq!(err, Err(SubmitError::Validation(ValidationError::EmptyGroup)));

    let err = submitter
        .submit_named("payments", "refund", "urgent", Payload::empty())
        .await;
    assert_eq!(
        err,
        Err(SubmitError::Validation(ValidationError::UnknownPriority(
            "urgent".to_string()
        )))
    );
    assert!(submitter.active_keys().await.is_empty());

    let job = submitter
        .submit_named("payments", "refund", "SLOW", "{}")
        .await?;
    assert_eq!(job.priority, Priority::Slow);
    assert_eq!(job.status, JobStatus::Queued);
    assert!(job.queued_at.is_some());
    assert_eq!(
        submitter.active_keys().await,
        vec![BatchKey::new("payments", "refund", Priority::Slow)]
    );
    Ok(())
}

#[tokio::test]
async fn flush_publishes_buffered_jobs_now() -> TestResult {
    init_tracing();
    let bus = MemoryBus::new();
    let submitter = start(batching(100, 10_000), &bus).await?;
    let mut events = submitter.subscribe();

    let ids = submit_n(&submitter, "refund", Priority::Normal, 2).await?;
    assert_eq!(submitter.flush().await?, 2);

    let batch = next_submitted(&mut events).await?;
    assert_eq!(batch.trigger, FlushTrigger::Forced);
    assert_eq!(batch.job_ids, ids);
    assert_eq!(submitter.flush().await?, 0);
    Ok(())
}

#[tokio::test]
async fn shutdown_flushes_every_key_then_refuses_jobs() -> TestResult {
    init_tracing();
    let bus = MemoryBus::new();
    let (submitter, handle) =
        JobSubmitter::start(batching(100, 10_000), Arc::new(bus.clone())).await?;

    submit_n(&submitter, "refund", Priority::Slow, 3).await?;
    submit_n(&submitter, "charge", Priority::Normal, 2).await?;

    let report = submitter.shutdown().await?;
    assert_eq!(report.flushed, 5);
    assert_eq!(report.submitted, 5);
    assert_eq!(report.unsettled, 0);
    tokio::time::timeout(WAIT, handle).await??;

    let published: usize = bus.published().iter().map(|b| b.len()).sum();
    assert_eq!(published, 5);

    let late = submitter
        .submit("payments", "refund", Priority::Normal, Payload::empty())
        .await;
    assert_eq!(late, Err(SubmitError::ShuttingDown));
    Ok(())
}

#[tokio::test]
async fn shutdown_reports_outcomes_of_its_own_flush() -> TestResult {
    init_tracing();
    let bus = MemoryBus::new();
    let (submitter, handle) =
        JobSubmitter::start(batching(100, 10_000), Arc::new(bus.clone())).await?;
    let mut events = submitter.subscribe();

    let ids = submit_n(&submitter, "refund", Priority::Normal, 2).await?;
    bus.fail_next_publishes(3);

    let report = submitter.shutdown().await?;
    tokio::time::timeout(WAIT, handle).await??;
    assert_eq!(report.flushed, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(report.submitted, 0);
    assert_eq!(report.unsettled, 0);

    let failed = recv_until(&mut events, |event| matches!(event, BatchEvent::BatchFailed { .. }))
        .await?;
    let BatchEvent::BatchFailed { job_ids, .. } = failed else {
        return Err("expected BatchFailed".into());
    };
    assert_eq!(job_ids, ids);
    assert!(submitter.job_status(ids[0]).await.is_none());
    Ok(())
}

#[tokio::test]
async fn idle_keys_are_evicted_and_recreated_on_demand() -> TestResult {
    init_tracing();
    let bus = MemoryBus::new();
    let config = BatchingConfig {
        idle_eviction_ms: 100,
        ..batching(100, 10_000)
    };
    let submitter = start(config, &bus).await?;
    let mut events = submitter.subscribe();

    submit_n(&submitter, "refund", Priority::Realtime, 1).await?;
    let evicted = recv_until(&mut events, |event| {
        matches!(event, BatchEvent::KeyEvicted { .. })
    })
    .await?;
    assert_eq!(
        evicted.key(),
        &BatchKey::new("payments", "refund", Priority::Realtime)
    );
    assert!(submitter.active_keys().await.is_empty());

    let ids = submit_n(&submitter, "refund", Priority::Realtime, 1).await?;
    assert_eq!(next_submitted(&mut events).await?.job_ids, ids);
    assert_eq!(submitter.active_keys().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn arena_limit_rejects_new_keys() -> TestResult {
    init_tracing();
    let bus = MemoryBus::new();
    let config = BatchingConfig {
        max_active_keys: Some(1),
        ..batching(100, 10_000)
    };
    let submitter = start(config, &bus).await?;

    submit_n(&submitter, "refund", Priority::Normal, 1).await?;
    let err = submit_n(&submitter, "charge", Priority::Normal, 1).await;
    assert_eq!(err, Err(SubmitError::ArenaFull(1)));

    // The existing key still takes jobs.
    submit_n(&submitter, "refund", Priority::Normal, 1).await?;
    assert_eq!(submitter.flush().await?, 2);
    Ok(())
}

#[tokio::test]
async fn invalid_config_is_rejected_at_start() {
    let config = BatchingConfig {
        publish_retry_limit: 0,
        ..BatchingConfig::default()
    };
    let started = JobSubmitter::start(config, Arc::new(MemoryBus::new())).await;
    assert!(started.is_err());
}
