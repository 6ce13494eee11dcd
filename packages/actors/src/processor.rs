//! Processor actor: consumes batches, runs the handler, publishes results.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use batchalier_core::{
    Batch, BusError, Job, JobResult, ProcessingError, ProcessorConfig, ProcessorEvent,
    ResultBatch, RetryPolicy,
};
use chrono::Utc;
use futures_util::{FutureExt, StreamExt, stream};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::handler::JobHandler;
use crate::messages::{EngineError, ProcessorMessage};
use crate::ports::{BusConsumePort, BusResultPort};
use crate::retry::with_retry;

/// Counters kept by a running processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Batches whose results were published and acknowledged.
    pub batches_processed: u64,
    pub jobs_ok: u64,
    pub jobs_error: u64,
    /// Batches left unacknowledged because result publish gave up.
    pub batches_unpublished: u64,
    pub consume_errors: u64,
}

/// Run the handler for one job, turning every fault into an error result.
async fn process_job(handler: &dyn JobHandler, job: Job, timeout: Option<Duration>) -> JobResult {
    let call = AssertUnwindSafe(async { handler.handle(&job).await }).catch_unwind();

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let error = ProcessingError::Timeout(limit.as_millis() as u64);
                return JobResult::error(&job, &error.to_string(), Utc::now());
            }
        },
        None => call.await,
    };
    let processed_at = Utc::now();

    match outcome {
        Ok(Ok((code, data))) => JobResult::for_job(&job, code, data, processed_at),
        Ok(Err(message)) => {
            let error = ProcessingError::Handler(message);
            tracing::debug!("Job {} failed: {}", job.id, error);
            JobResult::error(&job, &error.to_string(), processed_at)
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let error = ProcessingError::Panicked(message);
            tracing::warn!("Job {} handler panicked: {}", job.id, error);
            JobResult::error(&job, &error.to_string(), processed_at)
        }
    }
}

/// Process every job of `batch`, results in the batch's order.
async fn process_batch(
    handler: &dyn JobHandler,
    batch: Batch,
    concurrency: usize,
    timeout: Option<Duration>,
) -> ResultBatch {
    let batch_id = batch.batch_id;
    // `buffered` yields in input order however the calls interleave.
    let results = stream::iter(batch.jobs)
        .map(|job| process_job(handler, job, timeout))
        .buffered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await;
    ResultBatch { batch_id, results }
}

/// Arguments for spawning a processor actor.
pub(crate) struct ProcessorArgs {
    pub config: ProcessorConfig,
    pub consume: Arc<dyn BusConsumePort>,
    pub results: Arc<dyn BusResultPort>,
    pub handler: Arc<dyn JobHandler>,
    pub event_tx: broadcast::Sender<ProcessorEvent>,
}

/// State for the processor actor.
pub(crate) struct ProcessorState {
    config: ProcessorConfig,
    retry: RetryPolicy,
    consume: Arc<dyn BusConsumePort>,
    results: Arc<dyn BusResultPort>,
    handler: Arc<dyn JobHandler>,
    event_tx: broadcast::Sender<ProcessorEvent>,
    consecutive_consume_failures: u32,
    stats: ProcessorStats,
}

impl ProcessorState {
    fn new(args: ProcessorArgs) -> Self {
        Self {
            retry: args.config.retry_policy(),
            config: args.config,
            consume: args.consume,
            results: args.results,
            handler: args.handler,
            event_tx: args.event_tx,
            consecutive_consume_failures: 0,
            stats: ProcessorStats::default(),
        }
    }

    /// Publish results, then ack the source batch. Never acks on failure.
    async fn deliver(&mut self, results: ResultBatch) {
        let batch_id = results.batch_id;
        let ok = results.results.iter().filter(|r| r.result.is_ok()).count();
        let errors = results.len() - ok;

        let port = &self.results;
        let results_ref = &results;
        let published = with_retry(
            &self.retry,
            move || port.publish_results(results_ref),
            |attempt, error, delay| {
                tracing::warn!(
                    "Result publish for batch {} failed (attempt {}), retrying in {:?}: {}",
                    batch_id,
                    attempt,
                    delay,
                    error
                );
            },
        )
        .await;

        if let Err(error) = published {
            tracing::error!(
                "Giving up on results for batch {}, leaving it unacknowledged: {}",
                batch_id,
                error
            );
            self.stats.batches_unpublished += 1;
            let _ = self.event_tx.send(ProcessorEvent::ResultPublishFailed {
                batch_id,
                attempts: error.attempts,
                error: error.last_error.to_string(),
                timestamp: Utc::now(),
            });
            return;
        }

        let consume = &self.consume;
        let acked = with_retry(
            &self.retry,
            move || consume.ack(batch_id),
            |attempt, error, _| {
                tracing::warn!("Ack of batch {} failed (attempt {}): {}", batch_id, attempt, error);
            },
        )
        .await;

        if let Err(error) = acked {
            tracing::error!("Could not acknowledge batch {}: {}", batch_id, error);
            let _ = self.event_tx.send(ProcessorEvent::AckFailed {
                batch_id,
                error: error.to_string(),
                timestamp: Utc::now(),
            });
            return;
        }

        self.stats.batches_processed += 1;
        self.stats.jobs_ok += ok as u64;
        self.stats.jobs_error += errors as u64;
        let _ = self.event_tx.send(ProcessorEvent::BatchProcessed {
            batch_id,
            ok,
            errors,
            timestamp: Utc::now(),
        });
    }

    /// Delay before the next poll after a consume failure.
    fn consume_backoff(&mut self, error: &BusError) -> Duration {
        self.consecutive_consume_failures = self.consecutive_consume_failures.saturating_add(1);
        self.stats.consume_errors += 1;
        let delay = self.retry.backoff(self.consecutive_consume_failures);
        tracing::warn!(
            "Consume failed ({} in a row), retrying in {:?}: {}",
            self.consecutive_consume_failures,
            delay,
            error
        );
        delay
    }
}

fn poll_after(myself: &ActorRef<ProcessorMessage>, delay: Duration) {
    let myself = myself.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = myself.send_message(ProcessorMessage::Poll);
    });
}

/// Actor running the consume loop.
///
/// Each `Poll` handles at most one batch, so a stop request is honoured
/// between batches and never interrupts one.
pub(crate) struct ProcessorActor;

impl Actor for ProcessorActor {
    type Msg = ProcessorMessage;
    type State = ProcessorState;
    type Arguments = ProcessorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting job processor");
        myself.send_message(ProcessorMessage::Poll)?;
        Ok(ProcessorState::new(args))
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            "Stopped job processor after {} batches",
            state.stats.batches_processed
        );
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ProcessorMessage::Poll => match state.consume.consume().await {
                Ok(Some(batch)) => {
                    state.consecutive_consume_failures = 0;
                    tracing::debug!("Processing batch {} ({} jobs)", batch.batch_id, batch.len());
                    let results = process_batch(
                        state.handler.as_ref(),
                        batch,
                        state.config.processing_concurrency,
                        state.config.processing_timeout(),
                    )
                    .await;
                    state.deliver(results).await;
                    myself.send_message(ProcessorMessage::Poll)?;
                }
                Ok(None) => {
                    state.consecutive_consume_failures = 0;
                    poll_after(&myself, state.config.consume_idle());
                }
                Err(error) => {
                    let delay = state.consume_backoff(&error);
                    poll_after(&myself, delay);
                }
            },

            ProcessorMessage::GetStats { reply } => {
                let _ = reply.send(state.stats);
            }
        }

        Ok(())
    }
}

/// A processor ready to run: configuration plus its bus ports.
pub struct JobProcessor {
    config: ProcessorConfig,
    consume: Arc<dyn BusConsumePort>,
    results: Arc<dyn BusResultPort>,
    events: broadcast::Sender<ProcessorEvent>,
}

impl JobProcessor {
    pub fn new(
        config: ProcessorConfig,
        consume: Arc<dyn BusConsumePort>,
        results: Arc<dyn BusResultPort>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        Ok(Self {
            config,
            consume,
            results,
            events,
        })
    }

    /// Subscribe to processing events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessorEvent> {
        self.events.subscribe()
    }

    /// Start consuming, invoking `handler` for every job.
    pub async fn run<H: JobHandler>(self, handler: H) -> Result<ProcessorHandle, EngineError> {
        let args = ProcessorArgs {
            config: self.config,
            consume: self.consume,
            results: self.results,
            handler: Arc::new(handler),
            event_tx: self.events.clone(),
        };
        let (actor, join) = Actor::spawn(None, ProcessorActor, args).await?;
        Ok(ProcessorHandle {
            actor,
            join,
            events: self.events,
        })
    }
}

/// Handle to a running processor.
pub struct ProcessorHandle {
    actor: ActorRef<ProcessorMessage>,
    join: JoinHandle<()>,
    events: broadcast::Sender<ProcessorEvent>,
}

impl ProcessorHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessorEvent> {
        self.events.subscribe()
    }

    /// Current counters, or `None` once the processor has stopped.
    pub async fn stats(&self) -> Option<ProcessorStats> {
        match ractor::rpc::call(&self.actor, |reply| ProcessorMessage::GetStats { reply }, None)
            .await
        {
            Ok(CallResult::Success(stats)) => Some(stats),
            _ => None,
        }
    }

    /// Stop consuming, let the in-flight batch finish, and wait for the
    /// processor to exit.
    pub async fn shutdown(self) {
        self.actor.stop(Some("shutdown".to_string()));
        if let Err(e) = self.join.await {
            tracing::warn!("Processor task ended abnormally: {}", e);
        }
    }
}
