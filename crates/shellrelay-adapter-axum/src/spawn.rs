use shellrelay_core::task::{DetachedTask, Spawn};
use tokio::runtime::Handle;

/// Hands detached work to a Tokio runtime.
#[derive(Clone, Debug)]
pub struct TokioSpawner {
    handle: Handle,
}

impl TokioSpawner {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Spawner bound to the runtime of the calling task.
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Spawn for TokioSpawner {
    fn spawn(&self, task: DetachedTask) {
        drop(self.handle.spawn(task));
    }
}
