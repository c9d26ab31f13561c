//! Detached work that outlives the response path, such as cache writes.

use std::fmt;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

/// Work that runs after the response has been handed back.
pub type DetachedTask = BoxFuture<'static, ()>;

/// Runs futures after the caller has moved on. Completion is best effort; the future itself
/// is responsible for logging its failures.
pub trait Spawn: Send + Sync {
    fn spawn(&self, task: DetachedTask);
}

/// Queues detached work until the host drives it, the way edge runtimes keep an invocation
/// alive through `waitUntil`.
#[derive(Clone, Default)]
pub struct DeferredTasks {
    pending: Arc<Mutex<Vec<DetachedTask>>>,
}

impl DeferredTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tasks that have not run yet.
    pub fn len(&self) -> usize {
        self.pending.lock().map(|pending| pending.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain the queue and await every task in submission order. Tasks queued while draining
    /// run in the same call. Returns how many tasks ran.
    pub async fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let batch = match self.pending.lock() {
                Ok(mut pending) => std::mem::take(&mut *pending),
                Err(_) => {
                    log::warn!("deferred task queue poisoned; dropping pending work");
                    return ran;
                }
            };
            if batch.is_empty() {
                return ran;
            }
            for task in batch {
                task.await;
                ran += 1;
            }
        }
    }
}

impl Spawn for DeferredTasks {
    fn spawn(&self, task: DetachedTask) {
        match self.pending.lock() {
            Ok(mut pending) => pending.push(task),
            Err(_) => log::warn!("deferred task queue poisoned; dropping task"),
        }
    }
}

impl fmt::Debug for DeferredTasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredTasks")
            .field("pending", &self.len())
            .finish()
    }
}
