//! Key actor: the accumulator, linger timer and publish loop of one batch key.

use std::sync::Arc;
use std::time::Duration;

use batchalier_core::{
    AddOutcome, Batch, BatchAccumulator, BatchEvent, BatchId, BatchKey, BatchingConfig,
    FlushTrigger, Job, JobId, RetryPolicy,
};
use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::messages::{KeyMessage, SettledOutcome, SubmitterMessage};
use crate::ports::BusPublishPort;
use crate::retry::with_retry;

/// A pending self-message, cancelled by aborting its task.
struct Timer {
    generation: u64,
    task: JoinHandle<()>,
}

impl Timer {
    fn arm(
        myself: &ActorRef<KeyMessage>,
        generation: u64,
        delay: Duration,
        message: fn(u64) -> KeyMessage,
    ) -> Self {
        let myself = myself.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = myself.send_message(message(generation));
        });
        Self { generation, task }
    }
}

/// Arguments for spawning a key actor.
pub(crate) struct KeyArgs {
    pub key: BatchKey,
    pub config: Arc<BatchingConfig>,
    pub publisher: Arc<dyn BusPublishPort>,
    pub submitter: ActorRef<SubmitterMessage>,
    pub event_tx: broadcast::Sender<BatchEvent>,
}

/// State for the key actor.
pub(crate) struct KeyActorState {
    accumulator: BatchAccumulator,
    linger: Option<Duration>,
    idle_after: Option<Duration>,
    retry: RetryPolicy,
    publisher: Arc<dyn BusPublishPort>,
    submitter: ActorRef<SubmitterMessage>,
    event_tx: broadcast::Sender<BatchEvent>,
    /// Bumped whenever a timer is cancelled, so an expiry already in the
    /// mailbox is recognized as stale.
    generation: u64,
    linger_timer: Option<Timer>,
    idle_timer: Option<Timer>,
}

impl KeyActorState {
    fn new(args: KeyArgs) -> Self {
        let KeyArgs {
            key,
            config,
            publisher,
            submitter,
            event_tx,
        } = args;
        let idle = config.idle_eviction();
        Self {
            linger: config.linger(key.priority),
            idle_after: (!idle.is_zero()).then_some(idle),
            retry: config.retry_policy(),
            accumulator: BatchAccumulator::new(key.clone(), config.batch_size(key.priority)),
            publisher,
            submitter,
            event_tx,
            generation: 0,
            linger_timer: None,
            idle_timer: None,
        }
    }

    fn key(&self) -> &BatchKey {
        self.accumulator.key()
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn arm_linger(&mut self, myself: &ActorRef<KeyMessage>) {
        let Some(linger) = self.linger else {
            return;
        };
        self.cancel_linger();
        let generation = self.next_generation();
        self.linger_timer = Some(Timer::arm(myself, generation, linger, |generation| {
            KeyMessage::LingerExpired { generation }
        }));
    }

    fn cancel_linger(&mut self) {
        if let Some(timer) = self.linger_timer.take() {
            timer.task.abort();
            self.next_generation();
        }
    }

    fn arm_idle(&mut self, myself: &ActorRef<KeyMessage>) {
        let Some(idle_after) = self.idle_after else {
            return;
        };
        self.cancel_idle();
        let generation = self.next_generation();
        self.idle_timer = Some(Timer::arm(myself, generation, idle_after, |generation| {
            KeyMessage::IdleCheck { generation }
        }));
    }

    fn cancel_idle(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.task.abort();
            self.next_generation();
        }
    }

    /// Publish `jobs` as one batch, retrying with backoff, and settle the
    /// outcome with the submitter.
    async fn publish(&mut self, jobs: Vec<Job>, trigger: FlushTrigger) -> usize {
        if jobs.is_empty() {
            return 0;
        }

        let batch = Batch::new(self.key().clone(), jobs);
        let batch_id = batch.batch_id;
        let count = batch.len();
        tracing::debug!(
            "Flushing batch {} on {} ({} jobs, trigger {})",
            batch_id,
            batch.key,
            count,
            trigger
        );

        let publisher = &self.publisher;
        let event_tx = &self.event_tx;
        let batch_ref = &batch;
        let outcome = with_retry(
            &self.retry,
            move || publisher.publish_batch(batch_ref),
            |attempt, error, delay| {
                tracing::warn!(
                    "Publish of batch {} failed (attempt {}), retrying in {:?}: {}",
                    batch_id,
                    attempt,
                    delay,
                    error
                );
                let _ = event_tx.send(BatchEvent::BatchRetrying {
                    batch_id,
                    key: batch_ref.key.clone(),
                    attempt,
                    error: error.to_string(),
                    timestamp: Utc::now(),
                });
            },
        )
        .await;

        let job_ids = batch.job_ids();
        // The bus owns the jobs from here on; only ids are kept.
        let Batch { key, .. } = batch;
        let now = Utc::now();

        match outcome {
            Ok(((), attempts)) => {
                self.settle(batch_id, job_ids.clone(), SettledOutcome::Submitted { at: now });
                let _ = self.event_tx.send(BatchEvent::BatchSubmitted {
                    batch_id,
                    key,
                    job_ids,
                    trigger,
                    attempts,
                    timestamp: now,
                });
            }
            Err(error) => {
                tracing::error!("Giving up on batch {} for {}: {}", batch_id, key, error);
                self.settle(batch_id, job_ids.clone(), SettledOutcome::Failed);
                let _ = self.event_tx.send(BatchEvent::BatchFailed {
                    batch_id,
                    key,
                    job_ids,
                    attempts: error.attempts,
                    error: error.last_error.to_string(),
                    timestamp: now,
                });
            }
        }

        count
    }

    fn settle(&self, batch_id: BatchId, job_ids: Vec<JobId>, outcome: SettledOutcome) {
        if let Err(e) = self.submitter.send_message(SubmitterMessage::BatchSettled {
            batch_id,
            job_ids,
            outcome,
        }) {
            tracing::warn!("Could not report batch {} outcome: {}", batch_id, e);
        }
    }
}

/// Actor owning the accumulator for a single batch key.
pub(crate) struct KeyActor;

impl Actor for KeyActor {
    type Msg = KeyMessage;
    type State = KeyActorState;
    type Arguments = KeyArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting key actor: {}", args.key);
        Ok(KeyActorState::new(args))
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.cancel_linger();
        state.cancel_idle();
        if !state.accumulator.is_empty() {
            tracing::warn!(
                "Key actor {} stopped with {} buffered jobs",
                state.key(),
                state.accumulator.len()
            );
        }
        tracing::info!("Stopped key actor: {}", state.key());
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            KeyMessage::Add { job } => {
                state.cancel_idle();
                match state.accumulator.add(*job) {
                    AddOutcome::Buffered { first } => {
                        if first {
                            state.arm_linger(&myself);
                        }
                    }
                    AddOutcome::FlushNow(jobs) => {
                        state.cancel_linger();
                        state.publish(jobs, FlushTrigger::Size).await;
                        state.arm_idle(&myself);
                    }
                }
            }

            KeyMessage::LingerExpired { generation } => {
                let current = state
                    .linger_timer
                    .as_ref()
                    .is_some_and(|timer| timer.generation == generation);
                if !current {
                    // Lost the race against a size flush.
                    return Ok(());
                }
                state.linger_timer = None;
                let jobs = state.accumulator.drain();
                state.publish(jobs, FlushTrigger::Linger).await;
                state.arm_idle(&myself);
            }

            KeyMessage::IdleCheck { generation } => {
                let current = state
                    .idle_timer
                    .as_ref()
                    .is_some_and(|timer| timer.generation == generation);
                if current && state.accumulator.is_empty() {
                    state.idle_timer = None;
                    state.submitter.send_message(SubmitterMessage::KeyIdle {
                        key: state.key().clone(),
                        accepted: state.accumulator.accepted(),
                    })?;
                }
            }

            KeyMessage::Flush { reply } => {
                state.cancel_linger();
                let jobs = state.accumulator.drain();
                let flushed = state.publish(jobs, FlushTrigger::Forced).await;
                if flushed > 0 {
                    state.arm_idle(&myself);
                }
                let _ = reply.send(flushed);
            }
        }

        Ok(())
    }
}
