//! Submitter actor and the public `JobSubmitter` handle.

use std::sync::Arc;

use batchalier_core::{
    BatchEvent, BatchKey, BatchingConfig, Job, JobId, JobRecord, JobStatus, Payload, Priority,
};
use chrono::Utc;
use futures_util::future::join_all;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::key_actor::{KeyActor, KeyArgs};
use crate::ledger::JobLedger;
use crate::messages::{EngineError, KeyMessage, SettledOutcome, SubmitError, SubmitterMessage};
use crate::ports::BusPublishPort;
use crate::registry::KeyArena;

/// Arguments for spawning the submitter actor.
pub(crate) struct SubmitterArgs {
    pub config: Arc<BatchingConfig>,
    pub publisher: Arc<dyn BusPublishPort>,
    pub event_tx: broadcast::Sender<BatchEvent>,
}

/// State for the submitter actor.
pub(crate) struct SubmitterState {
    config: Arc<BatchingConfig>,
    publisher: Arc<dyn BusPublishPort>,
    event_tx: broadcast::Sender<BatchEvent>,
    arena: KeyArena,
    ledger: JobLedger,
    shutting_down: bool,
}

impl SubmitterState {
    fn new(args: SubmitterArgs) -> Self {
        Self {
            arena: KeyArena::new(args.config.max_active_keys),
            ledger: JobLedger::new(args.config.status_retention),
            config: args.config,
            publisher: args.publisher,
            event_tx: args.event_tx,
            shutting_down: false,
        }
    }

    /// The key actor for `key`, spawned on first use.
    async fn key_actor(
        &mut self,
        myself: &ActorRef<SubmitterMessage>,
        key: &BatchKey,
    ) -> Result<ActorRef<KeyMessage>, SubmitError> {
        if let Some(actor) = self.arena.get(key) {
            return Ok(actor);
        }
        if self.arena.is_full() {
            return Err(SubmitError::ArenaFull(self.arena.max_keys().unwrap_or_default()));
        }

        let args = KeyArgs {
            key: key.clone(),
            config: self.config.clone(),
            publisher: self.publisher.clone(),
            submitter: myself.clone(),
            event_tx: self.event_tx.clone(),
        };
        let (actor, _handle) = Actor::spawn_linked(None, KeyActor, args, myself.get_cell())
            .await
            .map_err(|e| SubmitError::Unavailable(format!("failed to spawn key actor: {}", e)))?;

        self.arena.insert(key.clone(), actor.clone());
        Ok(actor)
    }
}

/// Flush every key actor concurrently, returning how many jobs were published.
async fn flush_keys(actors: Vec<ActorRef<KeyMessage>>) -> usize {
    let calls = actors.iter().map(|actor| {
        ractor::rpc::call(actor, |reply| KeyMessage::Flush { reply }, None)
    });
    join_all(calls)
        .await
        .into_iter()
        .map(|result| match result {
            Ok(CallResult::Success(flushed)) => flushed,
            Ok(_) => 0,
            Err(e) => {
                tracing::warn!("Failed to flush key actor: {}", e);
                0
            }
        })
        .sum()
}

/// Supervisor of the key arena; the single router for submitted jobs.
pub(crate) struct SubmitterActor;

impl Actor for SubmitterActor {
    type Msg = SubmitterMessage;
    type State = SubmitterState;
    type Arguments = SubmitterArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting job submitter");
        Ok(SubmitterState::new(args))
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SubmitterMessage::Submit { job, reply } => {
                let mut job = *job;
                if state.shutting_down {
                    let _ = reply.send(Err(SubmitError::ShuttingDown));
                    return Ok(());
                }

                let key = job.key();
                let actor = match state.key_actor(&myself, &key).await {
                    Ok(actor) => actor,
                    Err(error) => {
                        let _ = reply.send(Err(error));
                        return Ok(());
                    }
                };

                if let Err(e) = job.mark_queued(Utc::now()) {
                    let _ = reply.send(Err(e.into()));
                    return Ok(());
                }
                state.ledger.insert(JobRecord::from(&job));

                if let Err(e) = actor.send_message(KeyMessage::Add {
                    job: Box::new(job.clone()),
                }) {
                    state.ledger.remove(&job.id);
                    let _ = reply.send(Err(SubmitError::Unavailable(e.to_string())));
                    return Ok(());
                }
                state.arena.note_routed(&key);

                let _ = reply.send(Ok(job));
            }

            SubmitterMessage::BatchSettled {
                batch_id,
                job_ids,
                outcome,
            } => {
                let errors = match outcome {
                    SettledOutcome::Submitted { at } => {
                        state.ledger.settle_submitted(&job_ids, batch_id, at)
                    }
                    SettledOutcome::Failed => state.ledger.settle_failed(&job_ids, batch_id),
                };
                for error in errors {
                    tracing::warn!("Batch {}: {}", batch_id, error);
                }
            }

            SubmitterMessage::KeyIdle { key, accepted } => {
                if let Some(actor) = state.arena.remove_if_idle(&key, accepted) {
                    tracing::debug!("Evicting idle key {}", key);
                    actor.stop(Some("idle".to_string()));
                    let _ = state.event_tx.send(BatchEvent::KeyEvicted {
                        key,
                        timestamp: Utc::now(),
                    });
                }
            }

            SubmitterMessage::GetJob { job_id, reply } => {
                let _ = reply.send(state.ledger.get(&job_id).cloned());
            }

            SubmitterMessage::ListKeys { reply } => {
                let _ = reply.send(state.arena.keys());
            }

            SubmitterMessage::FlushAll { reply } => {
                let flushed = flush_keys(state.arena.actors()).await;
                let _ = reply.send(flushed);
            }

            SubmitterMessage::Shutdown { reply } => {
                tracing::info!("Shutting down job submitter");
                state.shutting_down = true;

                let entries = state.arena.drain();
                let actors: Vec<ActorRef<KeyMessage>> =
                    entries.into_iter().map(|(_, actor)| actor).collect();
                let flushed = flush_keys(actors.clone()).await;
                for actor in actors {
                    actor.stop(Some("shutdown".to_string()));
                }

                // The flush's settlements are already in the mailbox; stop behind them.
                if let Err(e) = myself.send_message(SubmitterMessage::Stop { flushed, reply }) {
                    tracing::warn!("Could not finish shutdown in order: {}", e);
                    myself.stop(None);
                }
            }

            SubmitterMessage::Stop { flushed, reply } => {
                let report = ShutdownReport {
                    flushed,
                    submitted: state.ledger.count(JobStatus::Submitted),
                    failed: state.ledger.count(JobStatus::Failed),
                    unsettled: state.ledger.count(JobStatus::Queued),
                };
                if report.unsettled > 0 {
                    tracing::warn!("{} jobs were never settled", report.unsettled);
                }
                tracing::info!("Flushed {} jobs on shutdown", flushed);
                let _ = reply.send(report);
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let SupervisionEvent::ActorFailed(cell, reason) = message
            && let Some(key) = state.arena.remove_by_actor(cell.get_id())
        {
            let orphaned = state.ledger.fail_queued_for_key(&key);
            tracing::error!(
                "Key actor for {} failed ({}); {} queued jobs marked failed",
                key,
                reason,
                orphaned.len()
            );
        }
        Ok(())
    }
}

/// Final state of the status ledger when a submitter stops.
///
/// Counts cover every retained record, not only the last flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Jobs handed to the bus by the shutdown flush.
    pub flushed: usize,
    pub submitted: usize,
    pub failed: usize,
    /// Jobs still queued when the engine stopped. Zero unless a key actor
    /// died mid-publish.
    pub unsettled: usize,
}

/// Handle to a running submitter engine.
///
/// Cheap to clone; every clone talks to the same engine instance.
#[derive(Clone)]
pub struct JobSubmitter {
    actor: ActorRef<SubmitterMessage>,
    events: broadcast::Sender<BatchEvent>,
}

impl JobSubmitter {
    /// Validate `config` and start a submitter publishing through `publisher`.
    pub async fn start(
        config: BatchingConfig,
        publisher: Arc<dyn BusPublishPort>,
    ) -> Result<(Self, JoinHandle<()>), EngineError> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        let args = SubmitterArgs {
            config: Arc::new(config),
            publisher,
            event_tx: events.clone(),
        };
        let (actor, handle) = Actor::spawn(None, SubmitterActor, args).await?;
        Ok((Self { actor, events }, handle))
    }

    /// Queue one job for batched delivery.
    ///
    /// Returns as soon as the job is queued on its key; publishing happens in
    /// the background. The returned job is in the `Queued` state.
    pub async fn submit(
        &self,
        processor: impl Into<String>,
        group: impl Into<String>,
        priority: Priority,
        data: impl Into<Payload>,
    ) -> Result<Job, SubmitError> {
        let job = Job::new(processor, group, priority, data)?;
        self.call(|reply| SubmitterMessage::Submit {
            job: Box::new(job),
            reply,
        })
        .await?
    }

    /// Like [`submit`](Self::submit), with the priority given by name.
    pub async fn submit_named(
        &self,
        processor: impl Into<String>,
        group: impl Into<String>,
        priority: &str,
        data: impl Into<Payload>,
    ) -> Result<Job, SubmitError> {
        let priority: Priority = priority.parse()?;
        self.submit(processor, group, priority, data).await
    }

    /// Current lifecycle record of a job, if still retained.
    pub async fn job_status(&self, job_id: JobId) -> Option<JobRecord> {
        self.call(|reply| SubmitterMessage::GetJob { job_id, reply })
            .await
            .ok()
            .flatten()
    }

    /// Keys that currently hold an accumulator.
    pub async fn active_keys(&self) -> Vec<BatchKey> {
        self.call(|reply| SubmitterMessage::ListKeys { reply })
            .await
            .unwrap_or_default()
    }

    /// Subscribe to batch outcome events.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.events.subscribe()
    }

    /// Publish everything currently buffered, returning the number of jobs.
    pub async fn flush(&self) -> Result<usize, SubmitError> {
        self.call(|reply| SubmitterMessage::FlushAll { reply }).await
    }

    /// Flush every key and stop the engine. Later submits fail with
    /// [`SubmitError::ShuttingDown`], and `job_status` returns `None`, so the
    /// final outcomes come back in the report.
    pub async fn shutdown(&self) -> Result<ShutdownReport, SubmitError> {
        self.call(|reply| SubmitterMessage::Shutdown { reply }).await
    }

    async fn call<T, F>(&self, msg: F) -> Result<T, SubmitError>
    where
        T: Send + 'static,
        F: FnOnce(ractor::RpcReplyPort<T>) -> SubmitterMessage,
    {
        match ractor::rpc::call(&self.actor, msg, None).await {
            Ok(CallResult::Success(value)) => Ok(value),
            Ok(CallResult::Timeout) => Err(SubmitError::Unavailable("call timed out".into())),
            Ok(CallResult::SenderError) | Err(_) => Err(SubmitError::ShuttingDown),
        }
    }
}
