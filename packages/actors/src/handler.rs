//! Job handler trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use batchalier_core::{Job, Payload, ProcessingError, ResultCode};

/// Result type for job handlers: the result code and payload to send back.
pub type HandlerResult = Result<(ResultCode, Payload), String>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Trait for job handlers.
///
/// Implement this trait to define how the processor turns a job into a
/// result. An `Err` (or a panic) becomes a `ProcessedError` result for that
/// job only.
pub trait JobHandler: Send + Sync + 'static {
    /// Process a job and return the result.
    fn handle(&self, job: &Job) -> HandlerFuture;
}

impl<H: JobHandler + ?Sized> JobHandler for Arc<H> {
    fn handle(&self, job: &Job) -> HandlerFuture {
        (**self).handle(job)
    }
}

/// Routes jobs to handlers by job group.
///
/// Jobs whose group has no handler resolve to an error result.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a job group, replacing any previous one.
    pub fn register<H: JobHandler>(&mut self, group: impl Into<String>, handler: H) {
        self.handlers.insert(group.into(), Arc::new(handler));
    }

    /// Get the handler for a job group.
    pub fn get(&self, group: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(group).cloned()
    }

    pub fn has_handler(&self, group: &str) -> bool {
        self.handlers.contains_key(group)
    }

    /// List all registered groups.
    pub fn groups(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }
}

impl JobHandler for JobHandlerRegistry {
    fn handle(&self, job: &Job) -> HandlerFuture {
        match self.get(&job.group) {
            Some(handler) => handler.handle(job),
            None => {
                let error = ProcessingError::NoHandler(job.group.clone()).to_string();
                Box::pin(async move { Err(error) })
            }
        }
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    fn handle(&self, job: &Job) -> HandlerFuture {
        (self.handler)(job)
    }
}

/// Helper macro for creating job handlers from async bodies.
///
/// ```ignore
/// let echo = job_handler!(|job| Ok((ResultCode::ProcessedOk, job.data)));
/// ```
#[macro_export]
macro_rules! job_handler {
    (|$job:ident| $body:expr) => {
        $crate::FnHandler::new(|$job: &$crate::Job| {
            let $job = $job.clone();
            Box::pin(async move { $body })
        })
    };
}
