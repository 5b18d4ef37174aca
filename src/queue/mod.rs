//! Background-operation queue: enqueue, run, cancel, and stream progress
//! for scan/organize/metadata-fetch/backup jobs (spec.md §4.5).
//!
//! Grounded in the teacher's `progress_service.rs` (`broadcast::Sender`
//! wrapped for fan-out) and `import_service.rs`'s worker-loop shape, with
//! the registry generalized from "one import at a time" to an
//! `Arc<RwLock<HashMap<OperationId, OperationHandle>>>` of bounded
//! concurrency, per spec.md §5's "process-wide map protected by a single
//! mutex" resource policy.

mod events;
mod handle;
mod worker;

pub use events::QueueEvent;
pub use handle::{Operation, OperationHandle};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::models::{new_id, LogEntry, LogLevel, OperationStatus, OperationType};

pub const DEFAULT_LOG_RING_CAPACITY: usize = 1000;
pub const DEFAULT_MAX_PARALLEL_OPERATIONS: usize = 2;
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_COMPLETED_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
const SUBSCRIBER_BUFFER: usize = 100;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("operation not found: {0}")]
    NotFound(String),
    #[error("operation is already in a terminal state")]
    AlreadyTerminal,
}

/// A unit of work submitted to the queue. Runs take an `OperationHandle`
/// they use to report progress/log lines and observe cancellation, and
/// return `Ok(())` on success or any boxed error on failure (the queue
/// truncates the message to 1 KiB per spec.md §7).
pub type OperationFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), String>> + Send>>;
pub type OperationRunner = Box<dyn FnOnce(OperationHandle) -> OperationFuture + Send>;

struct PendingJob {
    operation_id: String,
    runner: OperationRunner,
}

/// Owns the operation registry, a bounded worker pool, and the SSE
/// broadcast hub. Cloning is cheap (all fields are `Arc`); every clone
/// shares the same registry and event stream.
#[derive(Clone)]
pub struct OperationQueue {
    operations: Arc<RwLock<HashMap<String, Operation>>>,
    cancels: Arc<RwLock<HashMap<String, CancellationToken>>>,
    events: Arc<broadcast::Sender<QueueEvent>>,
    jobs_tx: mpsc::UnboundedSender<PendingJob>,
    max_parallel_operations: usize,
    operation_timeout: Duration,
    completed_retention: Duration,
    log_ring_capacity: usize,
}

impl OperationQueue {
    pub fn new(
        max_parallel_operations: usize,
        operation_timeout: Duration,
        completed_retention: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();

        let queue = OperationQueue {
            operations: Arc::new(RwLock::new(HashMap::new())),
            cancels: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(events),
            jobs_tx,
            max_parallel_operations: max_parallel_operations.max(1),
            operation_timeout,
            completed_retention,
            log_ring_capacity: DEFAULT_LOG_RING_CAPACITY,
        };

        worker::spawn_dispatcher(queue.clone(), jobs_rx);
        queue
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Persist a new `queued` operation and schedule `runner` to execute it.
    /// Returns immediately with the assigned id (spec.md §4.5 `Enqueue`).
    pub async fn enqueue(
        &self,
        op_type: OperationType,
        runner: OperationRunner,
    ) -> String {
        let id = new_id();
        let operation = Operation::new(id.clone(), op_type, self.log_ring_capacity);
        self.operations.write().await.insert(id.clone(), operation);
        self.cancels
            .write()
            .await
            .insert(id.clone(), CancellationToken::new());

        let _ = self.jobs_tx.send(PendingJob {
            operation_id: id.clone(),
            runner,
        });

        id
    }

    /// If `queued`, remove and mark `cancelled` directly. If `running`,
    /// fire the cancellation token and let the runner observe it. A
    /// terminal operation is a no-op (spec.md §4.5 `Cancel`).
    pub async fn cancel(&self, operation_id: &str) -> Result<(), QueueError> {
        let mut operations = self.operations.write().await;
        let op = operations
            .get_mut(operation_id)
            .ok_or_else(|| QueueError::NotFound(operation_id.to_string()))?;

        match op.status {
            OperationStatus::Queued => {
                op.transition(OperationStatus::Cancelled, None);
                let event = QueueEvent::status(op);
                drop(operations);
                let _ = self.events.send(event);
            }
            OperationStatus::Running => {
                drop(operations);
                if let Some(token) = self.cancels.read().await.get(operation_id) {
                    token.cancel();
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub async fn get(&self, operation_id: &str) -> Option<Operation> {
        self.operations.read().await.get(operation_id).cloned()
    }

    pub async fn list(&self) -> Vec<Operation> {
        self.operations.read().await.values().cloned().collect()
    }

    pub async fn logs(&self, operation_id: &str, tail: usize) -> Result<Vec<LogEntry>, QueueError> {
        let operations = self.operations.read().await;
        let op = operations
            .get(operation_id)
            .ok_or_else(|| QueueError::NotFound(operation_id.to_string()))?;
        let len = op.log_ring.len();
        let start = if tail == 0 { 0 } else { len.saturating_sub(tail) };
        Ok(op.log_ring.iter().skip(start).cloned().collect())
    }

    /// Remove all terminal operations matching `status`, or every terminal
    /// operation if `status` is `None` (spec.md §4.5 `Clear`).
    pub async fn clear(&self, status: Option<OperationStatus>) -> usize {
        let mut operations = self.operations.write().await;
        let before = operations.len();
        operations.retain(|_, op| {
            if !op.status.is_terminal() {
                return true;
            }
            match status {
                Some(want) => op.status != want,
                None => false,
            }
        });
        before - operations.len()
    }

    /// Periodic sweep: fail operations whose last progress update predates
    /// `operation_timeout`, and purge terminal operations older than
    /// `completed_retention` (spec.md §4.5 "Stale-operation detection" /
    /// "Retention"). Intended to be driven by a `tokio::time::interval`
    /// loop in the binary's startup wiring.
    pub async fn sweep(&self) {
        let now = chrono::Utc::now();
        let mut to_timeout = Vec::new();
        {
            let operations = self.operations.read().await;
            for op in operations.values() {
                if op.status == OperationStatus::Running {
                    let age = now.signed_duration_since(op.last_progress_at);
                    if age.to_std().unwrap_or_default() > self.operation_timeout {
                        to_timeout.push(op.id.clone());
                    }
                }
            }
        }
        for id in &to_timeout {
            if let Some(token) = self.cancels.read().await.get(id) {
                token.cancel();
            }
            let mut operations = self.operations.write().await;
            if let Some(op) = operations.get_mut(id) {
                op.transition(OperationStatus::Failed, Some("operation timed out".into()));
                let event = QueueEvent::status(op);
                drop(operations);
                let _ = self.events.send(event);
                warn!(operation_id = %id, "operation timed out");
            }
        }

        let mut operations = self.operations.write().await;
        operations.retain(|_, op| {
            if !op.status.is_terminal() {
                return true;
            }
            let Some(finished_at) = op.finished_at else {
                return true;
            };
            now.signed_duration_since(finished_at)
                .to_std()
                .unwrap_or_default()
                <= self.completed_retention
        });
    }

    pub(crate) fn events_sender(&self) -> Arc<broadcast::Sender<QueueEvent>> {
        self.events.clone()
    }

    pub(crate) fn operations_map(&self) -> Arc<RwLock<HashMap<String, Operation>>> {
        self.operations.clone()
    }

    pub(crate) fn cancels_map(&self) -> Arc<RwLock<HashMap<String, CancellationToken>>> {
        self.cancels.clone()
    }

    pub(crate) fn semaphore_permits(&self) -> usize {
        self.max_parallel_operations
    }

    pub(crate) fn log_ring_capacity(&self) -> usize {
        self.log_ring_capacity
    }
}

pub(crate) fn new_semaphore(permits: usize) -> Arc<Semaphore> {
    Arc::new(Semaphore::new(permits.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool as StdAtomicBool, Ordering};
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn enqueue_runs_and_completes() {
        let queue = OperationQueue::new(2, DEFAULT_OPERATION_TIMEOUT, DEFAULT_COMPLETED_RETENTION);
        let id = queue
            .enqueue(
                OperationType::Scan,
                Box::new(|handle| {
                    Box::pin(async move {
                        handle.report_progress(1, 1, Some("done".into())).await;
                        Ok(())
                    })
                }),
            )
            .await;

        for _ in 0..50 {
            if queue.get(&id).await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }

        let op = queue.get(&id).await.unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_queued_operation_short_circuits() {
        let queue = OperationQueue::new(0, DEFAULT_OPERATION_TIMEOUT, DEFAULT_COMPLETED_RETENTION);
        // max_parallel_operations of 0 is clamped to 1 internally but we
        // cancel before the dispatcher can acquire the permit by racing a
        // slow first job into the single slot.
        let blocker_ran = Arc::new(StdAtomicBool::new(false));
        let blocker_flag = blocker_ran.clone();
        let _blocker_id = queue
            .enqueue(
                OperationType::Scan,
                Box::new(move |handle| {
                    Box::pin(async move {
                        blocker_flag.store(true, Ordering::SeqCst);
                        tokio::time::sleep(StdDuration::from_millis(200)).await;
                        handle.report_progress(1, 1, None).await;
                        Ok(())
                    })
                }),
            )
            .await;

        let id = queue
            .enqueue(
                OperationType::Scan,
                Box::new(|_handle| Box::pin(async move { Ok(()) })),
            )
            .await;

        queue.cancel(&id).await.unwrap();
        let op = queue.get(&id).await.unwrap();
        assert_eq!(op.status, OperationStatus::Cancelled);
    }

    #[tokio::test]
    async fn failing_runner_populates_error() {
        let queue = OperationQueue::new(2, DEFAULT_OPERATION_TIMEOUT, DEFAULT_COMPLETED_RETENTION);
        let id = queue
            .enqueue(
                OperationType::Organize,
                Box::new(|_handle| Box::pin(async move { Err("boom".to_string()) })),
            )
            .await;

        for _ in 0..50 {
            if queue.get(&id).await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }

        let op = queue.get(&id).await.unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn clear_removes_only_terminal_operations() {
        let queue = OperationQueue::new(2, DEFAULT_OPERATION_TIMEOUT, DEFAULT_COMPLETED_RETENTION);
        let id = queue
            .enqueue(
                OperationType::Scan,
                Box::new(|_handle| Box::pin(async move { Ok(()) })),
            )
            .await;
        for _ in 0..50 {
            if queue.get(&id).await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        let removed = queue.clear(None).await;
        assert_eq!(removed, 1);
        assert!(queue.get(&id).await.is_none());
    }
}
