//! The dispatcher loop: pulls queued jobs off an unbounded channel and
//! runs up to `max_parallel_operations` concurrently, bounded by a
//! `Semaphore`. Mirrors the teacher's `progress_service.rs` pattern of a
//! background task draining a channel and re-publishing onto a
//! `broadcast::Sender`, generalized here to also own job execution.

use tracing::{error, info};

use crate::models::OperationStatus;

use super::handle::OperationHandle;
use super::{new_semaphore, OperationQueue, PendingJob};

pub(crate) fn spawn_dispatcher(
    queue: OperationQueue,
    mut jobs_rx: tokio::sync::mpsc::UnboundedReceiver<PendingJob>,
) {
    let semaphore = new_semaphore(queue.semaphore_permits());
    tokio::spawn(async move {
        while let Some(job) = jobs_rx.recv().await {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
            let queue = queue.clone();
            tokio::spawn(async move {
                run_job(queue, job).await;
                drop(permit);
            });
        }
    });
}

async fn run_job(queue: OperationQueue, job: PendingJob) {
    let operations = queue.operations_map();
    let cancels = queue.cancels_map();
    let events = queue.events_sender();
    let id = job.operation_id;

    let cancel = {
        let cancels = cancels.read().await;
        match cancels.get(&id) {
            Some(token) => token.clone(),
            None => return, // cancelled while queued and already removed
        }
    };

    {
        let mut operations = operations.write().await;
        let Some(op) = operations.get_mut(&id) else { return };
        if op.status != OperationStatus::Queued {
            // Cancelled while queued; nothing to run.
            drop(operations);
            cancels.write().await.remove(&id);
            return;
        }
        op.transition(OperationStatus::Running, None);
        let event = super::events::QueueEvent::status(op);
        drop(operations);
        let _ = events.send(event);
    }

    info!(operation_id = %id, "operation started");

    let handle = OperationHandle {
        operation_id: id.clone(),
        operations: operations.clone(),
        events: events.clone(),
        cancel: cancel.clone(),
    };

    let result = (job.runner)(handle).await;

    let final_status = if cancel.is_cancelled() {
        OperationStatus::Cancelled
    } else {
        match &result {
            Ok(()) => OperationStatus::Completed,
            Err(_) => OperationStatus::Failed,
        }
    };

    let mut operations_guard = operations.write().await;
    if let Some(op) = operations_guard.get_mut(&id) {
        let error = result.err();
        if let Some(ref e) = error {
            error!(operation_id = %id, error = %e, "operation failed");
        }
        op.transition(final_status, error);
        let event = super::events::QueueEvent::status(op);
        drop(operations_guard);
        let _ = events.send(event);
    }

    cancels.write().await.remove(&id);
}
