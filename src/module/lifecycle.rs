//! Authoritative lifecycle context
//!
//! Every lifecycle hook, and every drop of a module instance, runs on the host's
//! authoritative context. Two implementations are provided: a dedicated serial thread
//! and an inline context for hosts whose caller already is that thread.

use async_trait::async_trait;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::module::traits::ModuleError;

/// Unit of work marshaled onto the lifecycle context
pub type LifecycleJob = Box<dyn FnOnce() -> Result<(), ModuleError> + Send>;

/// Where lifecycle hooks run
#[async_trait]
pub trait AuthoritativeContext: Send + Sync {
    /// Run a job and wait for its result
    ///
    /// A panicking job is reported as `ModuleError::HookPanicked`.
    async fn run(&self, job: LifecycleJob) -> Result<(), ModuleError>;
}

/// Run a job, turning a panic into an error
pub fn run_contained(job: LifecycleJob) -> Result<(), ModuleError> {
    match catch_unwind(AssertUnwindSafe(job)) {
        Ok(result) => result,
        Err(payload) => Err(ModuleError::HookPanicked(panic_message(payload.as_ref()))),
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

type Envelope = (LifecycleJob, oneshot::Sender<Result<(), ModuleError>>);

/// Runs jobs one at a time, in submission order, on a dedicated thread
pub struct SerialContext {
    sender: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
}

impl SerialContext {
    /// Spawn the lifecycle thread
    pub fn new() -> std::io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Envelope>();

        std::thread::Builder::new()
            .name("module-lifecycle".to_string())
            .spawn(move || {
                debug!("Lifecycle thread started");
                while let Some((job, reply)) = receiver.blocking_recv() {
                    let result = run_contained(job);
                    if reply.send(result).is_err() {
                        debug!("Lifecycle job finished after its caller went away");
                    }
                }
                debug!("Lifecycle thread stopped");
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
        })
    }

    /// Stop accepting jobs; queued jobs still run
    pub fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

#[async_trait]
impl AuthoritativeContext for SerialContext {
    async fn run(&self, job: LifecycleJob) -> Result<(), ModuleError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
            let sender = guard.as_ref().ok_or(ModuleError::LifecycleContextClosed)?;
            sender
                .send((job, reply_tx))
                .map_err(|_| ModuleError::LifecycleContextClosed)?;
        }

        reply_rx.await.map_err(|_| {
            error!("Lifecycle thread dropped a job without replying");
            ModuleError::LifecycleContextClosed
        })?
    }
}

/// Runs jobs directly on the calling task
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineContext;

#[async_trait]
impl AuthoritativeContext for InlineContext {
    async fn run(&self, job: LifecycleJob) -> Result<(), ModuleError> {
        run_contained(job)
    }
}
