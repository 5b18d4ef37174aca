//! SSE event payloads (spec.md §4.5 "SSE fan-out").

use serde::Serialize;

use super::handle::Operation;
use crate::models::{LogLevel, OperationStatus};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum QueueEvent {
    #[serde(rename = "operation.progress")]
    OperationProgress {
        id: String,
        progress: u64,
        total: u64,
        message: Option<String>,
    },
    #[serde(rename = "operation.log")]
    OperationLog {
        id: String,
        level: LogLevel,
        message: String,
        ts: chrono::DateTime<chrono::Utc>,
    },
    #[serde(rename = "operation.status")]
    OperationStatus {
        id: String,
        status: OperationStatus,
        error: Option<String>,
    },
    #[serde(rename = "library.changed")]
    LibraryChanged,
    #[serde(rename = "subscriber.dropped")]
    SubscriberDropped { skipped: u64 },
}

impl QueueEvent {
    pub fn status(op: &Operation) -> QueueEvent {
        QueueEvent::OperationStatus {
            id: op.id.clone(),
            status: op.status,
            error: op.error.clone(),
        }
    }

    pub fn progress(op: &Operation) -> QueueEvent {
        QueueEvent::OperationProgress {
            id: op.id.clone(),
            progress: op.progress,
            total: op.total,
            message: op.message.clone(),
        }
    }

    pub fn log(id: &str, entry: &crate::models::LogEntry) -> QueueEvent {
        QueueEvent::OperationLog {
            id: id.to_string(),
            level: entry.level,
            message: entry.message.clone(),
            ts: entry.ts,
        }
    }
}
