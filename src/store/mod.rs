//! The `Store` seam (spec.md §5 "Shared resource policy", §9 design note
//! on process-wide singletons): every component that needs persistence
//! takes an `Arc<dyn Store>` rather than reaching for a global. SQL schema
//! and migrations are the collaborator's job (spec.md §1 non-goals); this
//! module defines the interface the core consumes, an in-memory
//! reference implementation for tests, and a `sqlx`-backed implementation
//! that follows the teacher's `db/client.rs` (`CREATE TABLE IF NOT
//! EXISTS`, `SqlitePool`, `chrono`/`uuid` column conventions) closely
//! enough to be a drop-in once real migrations land.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Author, BlockedHash, Book, Series, Work};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("book not found: {0}")]
    BookNotFound(String),
    #[error("conflict could not be resolved after retry: {0}")]
    UnresolvableConflict(String),
}

/// Persistence seam for Books/Authors/Series/Work/Operations/Blocklist.
///
/// Every get-or-create helper must tolerate two concurrent callers racing
/// to create the same row by name (spec.md §4.3 "Concurrency"): attempt an
/// insert, and on a unique-constraint conflict re-select instead of
/// surfacing the error.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_or_create_author(&self, name: &str) -> Result<Author, StoreError>;
    async fn get_or_create_series(
        &self,
        name: &str,
        author_id: Option<String>,
    ) -> Result<Series, StoreError>;

    /// Get or create the Work grouping Books sharing a `(normalized_title,
    /// author_id?)` identity (spec.md §3). `title` is normalized internally,
    /// same as `get_or_create_author`/`get_or_create_series`.
    async fn get_or_create_work(
        &self,
        title: &str,
        author_id: Option<String>,
    ) -> Result<Work, StoreError>;

    /// Create the book if `file_path` is new, otherwise update the mutable
    /// fields of the existing row with the same path (spec.md §4.3 step 4,
    /// §8 "Scanner dedup").
    async fn upsert_book_by_path(&self, book: Book) -> Result<Book, StoreError>;

    async fn get_book(&self, id: &str) -> Result<Option<Book>, StoreError>;
    async fn find_book_by_path(&self, file_path: &str) -> Result<Option<Book>, StoreError>;
    async fn find_book_by_hash(&self, file_hash: &str) -> Result<Option<Book>, StoreError>;
    async fn list_books(&self) -> Result<Vec<Book>, StoreError>;
    async fn save_book(&self, book: Book) -> Result<Book, StoreError>;

    async fn is_blocked(&self, hash: &str) -> Result<bool, StoreError>;
    async fn block_hash(&self, hash: &str, reason: &str) -> Result<BlockedHash, StoreError>;
    async fn unblock_hash(&self, hash: &str) -> Result<(), StoreError>;
}
