//! Serial execution contexts.
//!
//! The paginator issues fetches on a "background" context and delivers notifications on a
//! "foreground" context. Both only need to run posted jobs one at a time, in posting order.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{error, trace};

use crate::PagerError;

/// Unit of work posted to an [`ExecutionContext`].
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A serial FIFO task queue. Implementations must run each posted job to completion before
/// starting the next one.
pub trait ExecutionContext: Send + Sync + 'static {
    /// Schedules `job`.
    ///
    /// Fails with [`PagerError::ContextClosed`] if the context no longer runs jobs.
    fn post(&self, job: Job) -> Result<(), PagerError>;
}

/// [`ExecutionContext`] running jobs on a single tokio task.
///
/// Dropping the last handle lets the worker drain the queue and exit.
#[derive(Clone)]
pub struct SerialQueue {
    name: &'static str,
    sender: mpsc::UnboundedSender<Job>,
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue")
            .field("name", &self.name)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl SerialQueue {
    /// Starts a queue on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn spawn(name: &'static str) -> Self {
        Self::spawn_on(name, &Handle::current())
    }

    /// Starts a queue on the runtime behind `handle`.
    pub fn spawn_on(name: &'static str, handle: &Handle) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let worker = handle.clone();
        handle.spawn(async move {
            while let Some(job) = receiver.recv().await {
                trace!(queue = name, "running job");
                // Each job gets its own task so a panic is contained and the queue keeps going.
                if let Err(e) = worker.spawn(job).await {
                    error!(queue = name, "job failed: {e}");
                }
            }
            trace!(queue = name, "queue closed");
        });
        Self { name, sender }
    }

    /// Name of the queue, for logging.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl ExecutionContext for SerialQueue {
    fn post(&self, job: Job) -> Result<(), PagerError> {
        self.sender
            .send(job)
            .map_err(|_| PagerError::ContextClosed { context: self.name })
    }
}
