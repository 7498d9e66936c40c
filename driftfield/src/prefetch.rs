use std::{future::Future, sync::Arc};

use tokio::{runtime::Handle, sync::Semaphore};

/// A bounded pool of background tasks for best effort tile loads.
///
/// Tasks are spawned onto the runtime the caller of `spawn` runs on, and at most `workers` of them
/// run at once. Spawning never blocks the caller. A `Prefetcher` with no workers drops every task
/// it's handed, and so does `spawn` called outside of a runtime. Fields may therefore be built
/// before the runtime starts.
///
#[derive(Clone)]
pub struct Prefetcher {
    permits: Option<Arc<Semaphore>>,
}

impl Prefetcher {
    pub fn new(workers: usize) -> Self {
        if workers == 0 {
            return Self::disabled();
        }

        Self {
            permits: Some(Arc::new(Semaphore::new(workers))),
        }
    }

    pub fn disabled() -> Self {
        Self { permits: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.permits.is_some()
    }

    /// Run `task` in the background once a worker is free.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = match &self.permits {
            Some(permits) => Arc::clone(permits),
            None => return,
        };
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!("no async runtime running, skipping tile prefetch");
                return;
            }
        };

        runtime.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            task.await;
        });
    }
}
