//! Composition root (spec.md §9 "Process-wide singletons" design note):
//! one `Services` value is constructed at startup and threaded into every
//! component that needs shared state. Nothing in this crate reaches for a
//! global — generalizes the teacher's `AppContext`-shaped dependency
//! bundle (`app_context.rs`, UI-specific and removed) to this crate's own
//! four subsystems.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::download::DownloadFacade;
use crate::queue::OperationQueue;
use crate::store::Store;

#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub queue: OperationQueue,
    pub downloads: Arc<DownloadFacade>,
}

impl Services {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        let queue = OperationQueue::new(
            config.max_parallel_operations,
            Duration::from_secs(config.operation_timeout_secs),
            Duration::from_secs(config.completed_retention_secs),
        );
        let downloads = Arc::new(DownloadFacade::new(
            config.torrent_client.clone(),
            config.usenet_client.clone(),
        ));

        Services {
            config: Arc::new(config),
            store,
            queue,
            downloads,
        }
    }

    /// Spawn the queue's periodic stale-operation/retention sweep
    /// (spec.md §4.5). Intended to be called once from the binary's
    /// startup wiring.
    pub fn spawn_queue_sweep(&self) {
        let queue = self.queue.clone();
        let interval = Duration::from_secs(self.config.stale_sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                queue.sweep().await;
            }
        });
    }
}
