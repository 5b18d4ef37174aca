//! Crate-wide error types.
//!
//! Each subsystem owns a focused `thiserror` enum (see `hash`, `path_utils`,
//! `scanner`, `organizer`, `queue`, `download`, `store`). `CoreError` only
//! exists at the service boundary (the `api` handlers and `Services`
//! composition root) where errors from more than one subsystem can occur.

use thiserror::Error;

use crate::download::FacadeError;
use crate::hash::HashError;
use crate::organizer::OrganizeError;
use crate::path_utils::PatternError;
use crate::queue::QueueError;
use crate::scanner::ScanError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Organize(#[from] OrganizeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Facade(#[from] FacadeError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("operation not found: {0}")]
    OperationNotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
}
