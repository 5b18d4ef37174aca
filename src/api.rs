//! Operations HTTP/SSE surface (spec.md §6), a mountable sub-router.
//! Grounded in the teacher's `subsonic.rs` axum shape: a `State<Arc<..>>`
//! extractor, `Json`/`IntoResponse` handlers, `StatusCode` mapped from
//! domain errors, and a `Router::new().route(...)` builder, generalized
//! from the music-streaming REST surface to the five operation endpoints
//! this crate exposes plus an SSE event stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::models::{LogLevel, OperationStatus, OperationType};
use crate::organizer::{organize, OrganizerConfig};
use crate::queue::{Operation, OperationHandle, QueueError, QueueEvent};
use crate::scanner::{scan, ScannerConfig};
use crate::services::Services;

pub fn router(services: Services) -> Router {
    Router::new()
        .route("/operations", post(enqueue))
        .route("/operations/:id", get(get_operation).delete(cancel_operation))
        .route("/operations/:id/logs", get(get_logs))
        .route("/events", get(events))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(services)
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct OperationResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub status: OperationStatus,
    pub progress: u64,
    pub total: u64,
    pub message: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Operation> for OperationResponse {
    fn from(op: Operation) -> Self {
        OperationResponse {
            id: op.id,
            op_type: op.op_type,
            status: op.status,
            progress: op.progress,
            total: op.total,
            message: op.message,
            error: op.error,
            started_at: op.started_at,
            finished_at: op.finished_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for QueueError {
    fn into_response(self) -> Response {
        let status = match self {
            QueueError::NotFound(_) => StatusCode::NOT_FOUND,
            QueueError::AlreadyTerminal => StatusCode::CONFLICT,
        };
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ScanParams {
    root: std::path::PathBuf,
}

#[derive(Debug, Deserialize)]
struct OrganizeParams {
    book_id: String,
    #[serde(default)]
    author_name: String,
    #[serde(default)]
    series_name: String,
}

fn bad_params(err: serde_json::Error) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: format!("invalid params: {err}") }),
    )
}

/// Build the job that will actually execute for a `scan` operation: walk
/// `params.root` with the configured pool size, upserting through this
/// process's `Store` (spec.md §4.3).
fn scan_runner(services: &Services, params: ScanParams) -> crate::queue::OperationRunner {
    let store = services.store.clone();
    let scanner_config = ScannerConfig {
        concurrent_scans: services.config.concurrent_scans,
        ..ScannerConfig::default()
    };
    let known_series_dirs = services.config.known_series_dirs.clone();

    Box::new(move |handle: OperationHandle| {
        Box::pin(async move {
            handle.info(format!("scanning {}", params.root.display())).await;
            let cancel = handle.cancellation_token().clone();
            let progress_handle = handle.clone();
            let count = scan(params.root, scanner_config, store, known_series_dirs, cancel, move |done, total| {
                let progress_handle = progress_handle.clone();
                tokio::spawn(async move {
                    progress_handle.report_progress(done, total, None).await;
                });
            })
            .await
            .map_err(|e| e.to_string())?;

            handle.info(format!("scan finished: {count} files processed")).await;
            handle.notify_library_changed().await;
            Ok(())
        })
    })
}

/// Build the job for an `organize` operation: place one already-scanned
/// book into the canonical tree (spec.md §4.4). `author_name`/`series_name`
/// are passed through verbatim since name resolution from an id is an
/// HTTP-layer/UI concern, not something the core `Store` seam exposes.
fn organize_runner(services: &Services, params: OrganizeParams) -> crate::queue::OperationRunner {
    let store = services.store.clone();
    let organizer_config = OrganizerConfig {
        library_root: services.config.library_root.clone(),
        folder_pattern: services.config.folder_naming_pattern.clone(),
        file_pattern: services.config.file_naming_pattern.clone(),
        strategy: services.config.organization_strategy,
    };

    Box::new(move |handle: OperationHandle| {
        Box::pin(async move {
            let book = store
                .get_book(&params.book_id)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("book not found: {}", params.book_id))?;

            handle.report_progress(0, 1, Some(format!("organizing {}", book.title))).await;
            let target = organize(&organizer_config, &book, &params.author_name, &params.series_name, store.as_ref())
                .await
                .map_err(|e| e.to_string())?;

            let mut organized = book;
            organized.file_path = target.to_string_lossy().to_string();
            organized.library_state = crate::models::LibraryState::Organized;
            organized.updated_at = chrono::Utc::now();
            store.save_book(organized).await.map_err(|e| e.to_string())?;

            handle.report_progress(1, 1, Some(format!("organized at {}", target.display()))).await;
            handle.notify_library_changed().await;
            Ok(())
        })
    })
}

fn unimplemented_runner(op_type: OperationType) -> crate::queue::OperationRunner {
    Box::new(move |handle: OperationHandle| {
        Box::pin(async move {
            handle
                .log(LogLevel::Error, format!("{op_type:?} is provided by an external collaborator, not this service"))
                .await;
            Err(format!("{op_type:?} is not implemented by this service"))
        })
    })
}

/// `POST enqueue(type, params) -> {id}` (spec.md §6). Metadata-provider
/// lookups and backup archiving are explicit collaborators (spec.md §1
/// non-goals); operations of those types are accepted and immediately
/// fail with a descriptive error rather than silently no-op'ing.
async fn enqueue(
    State(services): State<Services>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), (StatusCode, Json<ErrorResponse>)> {
    let op_type = request.op_type;
    let runner = match op_type {
        OperationType::Scan => {
            let params: ScanParams = serde_json::from_value(request.params).map_err(bad_params)?;
            scan_runner(&services, params)
        }
        OperationType::Organize => {
            let params: OrganizeParams = serde_json::from_value(request.params).map_err(bad_params)?;
            organize_runner(&services, params)
        }
        OperationType::MetadataFetch | OperationType::Backup => unimplemented_runner(op_type),
    };

    let id = services.queue.enqueue(op_type, runner).await;
    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse { id })))
}

async fn get_operation(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> Result<Json<OperationResponse>, QueueError> {
    let op = services
        .queue
        .get(&id)
        .await
        .ok_or_else(|| QueueError::NotFound(id.clone()))?;
    Ok(Json(op.into()))
}

async fn cancel_operation(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> Result<StatusCode, QueueError> {
    services.queue.cancel(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    #[serde(default)]
    tail: usize,
}

async fn get_logs(
    State(services): State<Services>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<crate::models::LogEntry>>, QueueError> {
    let logs = services.queue.logs(&id, query.tail).await?;
    Ok(Json(logs))
}

/// `GET events (SSE)` (spec.md §6, §4.5 "SSE fan-out"). Each broadcast
/// lag (a slow subscriber falling behind the bounded channel) is
/// translated into a `subscriber.dropped` event rather than silently
/// resubscribing, per spec.md §9 "SSE fan-out with slow subscribers".
async fn events(
    State(services): State<Services>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = services.queue.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| async move {
        match item {
            Ok(event) => to_sse_event(&event).map(Ok),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                to_sse_event(&QueueEvent::SubscriberDropped { skipped }).map(Ok)
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn to_sse_event(event: &QueueEvent) -> Option<Event> {
    let (name, body) = match event {
        QueueEvent::OperationProgress { .. } => ("operation.progress", event),
        QueueEvent::OperationLog { .. } => ("operation.log", event),
        QueueEvent::OperationStatus { .. } => ("operation.status", event),
        QueueEvent::LibraryChanged => ("library.changed", event),
        QueueEvent::SubscriberDropped { .. } => ("subscriber.dropped", event),
    };
    serde_json::to_string(body).ok().map(|json| Event::default().event(name).data(json))
}
