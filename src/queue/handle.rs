//! `Operation`, the persisted record, and `OperationHandle`, the
//! capability a running job uses to report progress/log lines and observe
//! cancellation (spec.md §4.5).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::models::{LogEntry, LogLevel, OperationStatus, OperationType};

use super::events::QueueEvent;

#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    pub id: String,
    pub op_type: OperationType,
    pub status: OperationStatus,
    pub progress: u64,
    pub total: u64,
    pub message: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub log_ring: VecDeque<LogEntry>,
    #[serde(skip)]
    pub(crate) last_progress_at: DateTime<Utc>,
    #[serde(skip)]
    log_ring_capacity: usize,
}

impl Operation {
    pub(crate) fn new(id: String, op_type: OperationType, log_ring_capacity: usize) -> Self {
        let now = Utc::now();
        Operation {
            id,
            op_type,
            status: OperationStatus::Queued,
            progress: 0,
            total: 0,
            message: None,
            error: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            log_ring: VecDeque::with_capacity(log_ring_capacity.min(64)),
            last_progress_at: now,
            log_ring_capacity,
        }
    }

    /// Terminal status is monotonic: calling this once already-terminal is
    /// a logic error in the caller, not guarded here (callers only invoke
    /// it from the dispatcher/cancel paths that already checked).
    pub(crate) fn transition(&mut self, status: OperationStatus, error: Option<String>) {
        let now = Utc::now();
        match status {
            OperationStatus::Running => self.started_at = Some(now),
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled => {
                self.finished_at = Some(now)
            }
            OperationStatus::Queued => {}
        }
        self.status = status;
        if error.is_some() {
            // Truncate to 1 KiB per spec.md §7 "Propagation policy".
            self.error = error.map(|e| e.chars().take(1024).collect());
        }
    }

    fn push_log(&mut self, entry: LogEntry) {
        if self.log_ring.len() >= self.log_ring_capacity.max(1) {
            self.log_ring.pop_front();
        }
        self.log_ring.push_back(entry);
    }
}

/// Coalescing threshold for progress broadcasts: only re-broadcast when
/// progress has advanced by at least 1% of `total`, or the message text
/// changed. Every update is still applied to in-memory state regardless
/// (spec.md §4.5 "Progress").
fn should_broadcast(prev_progress: u64, prev_total: u64, new_progress: u64, new_total: u64, message_changed: bool) -> bool {
    if message_changed {
        return true;
    }
    if new_total == 0 {
        return new_progress != prev_progress;
    }
    let prev_pct = (prev_progress.min(prev_total) * 100) / prev_total.max(1);
    let new_pct = (new_progress.min(new_total) * 100) / new_total;
    new_pct != prev_pct
}

#[derive(Clone)]
pub struct OperationHandle {
    pub(crate) operation_id: String,
    pub(crate) operations: Arc<RwLock<HashMap<String, Operation>>>,
    pub(crate) events: Arc<broadcast::Sender<QueueEvent>>,
    pub(crate) cancel: CancellationToken,
}

impl OperationHandle {
    pub fn id(&self) -> &str {
        &self.operation_id
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Apply a progress update and broadcast it if it clears the
    /// coalescing threshold.
    pub async fn report_progress(&self, progress: u64, total: u64, message: Option<String>) {
        let mut operations = self.operations.write().await;
        let Some(op) = operations.get_mut(&self.operation_id) else {
            return;
        };
        let message_changed = message.is_some() && message != op.message;
        let broadcast = should_broadcast(op.progress, op.total, progress, total, message_changed);
        op.progress = progress;
        op.total = total;
        if message.is_some() {
            op.message = message;
        }
        op.last_progress_at = Utc::now();
        if broadcast {
            let event = QueueEvent::progress(op);
            drop(operations);
            let _ = self.events.send(event);
        }
    }

    /// Append a log line to the operation's FIFO ring and broadcast it
    /// unconditionally (log entries are not coalesced).
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            level,
            message: message.into(),
            ts: Utc::now(),
        };
        let mut operations = self.operations.write().await;
        if let Some(op) = operations.get_mut(&self.operation_id) {
            op.push_log(entry.clone());
        }
        drop(operations);
        let _ = self.events.send(QueueEvent::log(&self.operation_id, &entry));
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message).await;
    }

    pub async fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message).await;
    }

    pub async fn notify_library_changed(&self) {
        let _ = self.events.send(QueueEvent::LibraryChanged);
    }
}
