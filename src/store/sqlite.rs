//! `sqlx`/SQLite-backed `Store`, grounded in the teacher's `db/client.rs`
//! (`SqlitePool`, `CREATE TABLE IF NOT EXISTS` bootstrap, `TEXT` timestamp
//! columns). Full schema ownership and versioned migrations are a
//! collaborator's job (spec.md §1); `create_tables` only bootstraps enough
//! structure for this crate's own reads/writes to work standalone.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use async_trait::async_trait;
use tracing::info;

use crate::models::{new_id, normalize_name, Author, BlockedHash, Book, LibraryState, Series, Work};

use super::{Store, StoreError};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite://{}?mode=rwc", database_path);
        info!(url = %url, "connecting to store database");
        let pool = SqlitePool::connect(&url).await?;
        let store = SqliteStore { pool };
        store.create_tables().await?;
        Ok(store)
    }

    async fn create_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS authors (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                normalized_name TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS series (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                author_id TEXT,
                normalized_name TEXT NOT NULL,
                UNIQUE(normalized_name, author_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS works (
                id TEXT PRIMARY KEY,
                normalized_title TEXT NOT NULL,
                author_id TEXT,
                UNIQUE(normalized_title, author_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                author_ref TEXT,
                series_ref TEXT,
                series_position REAL,
                file_path TEXT NOT NULL UNIQUE,
                file_hash TEXT NOT NULL,
                format TEXT NOT NULL,
                duration_seconds INTEGER,
                narrator TEXT,
                publisher TEXT,
                language TEXT,
                edition TEXT,
                print_year INTEGER,
                isbn10 TEXT,
                isbn13 TEXT,
                bitrate_kbps INTEGER,
                codec TEXT,
                sample_rate_hz INTEGER,
                channels INTEGER,
                bit_depth INTEGER,
                quality TEXT,
                library_state TEXT NOT NULL,
                marked_for_deletion INTEGER NOT NULL DEFAULT 0,
                version_group_id TEXT,
                is_primary_version INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blocked_hashes (
                hash TEXT PRIMARY KEY,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_book(row: &sqlx::sqlite::SqliteRow) -> Result<Book, StoreError> {
        let library_state: String = row.try_get("library_state")?;
        let library_state = match library_state.as_str() {
            "organized" => LibraryState::Organized,
            _ => LibraryState::Import,
        };
        Ok(Book {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            author_ref: row.try_get("author_ref")?,
            series_ref: row.try_get("series_ref")?,
            series_position: row.try_get("series_position")?,
            file_path: row.try_get("file_path")?,
            file_hash: row.try_get("file_hash")?,
            format: row.try_get("format")?,
            duration_seconds: row
                .try_get::<Option<i64>, _>("duration_seconds")?
                .map(|v| v as u64),
            narrator: row.try_get("narrator")?,
            publisher: row.try_get("publisher")?,
            language: row.try_get("language")?,
            edition: row.try_get("edition")?,
            print_year: row.try_get("print_year")?,
            isbn10: row.try_get("isbn10")?,
            isbn13: row.try_get("isbn13")?,
            media: crate::models::MediaInfo {
                bitrate_kbps: row
                    .try_get::<Option<i64>, _>("bitrate_kbps")?
                    .map(|v| v as u32),
                codec: row.try_get("codec")?,
                sample_rate_hz: row
                    .try_get::<Option<i64>, _>("sample_rate_hz")?
                    .map(|v| v as u32),
                channels: row.try_get::<Option<i64>, _>("channels")?.map(|v| v as u8),
                bit_depth: row.try_get::<Option<i64>, _>("bit_depth")?.map(|v| v as u8),
                quality: row.try_get("quality")?,
            },
            library_state,
            marked_for_deletion: row.try_get::<i64, _>("marked_for_deletion")? != 0,
            version_group_id: row.try_get("version_group_id")?,
            is_primary_version: row
                .try_get::<Option<i64>, _>("is_primary_version")?
                .map(|v| v != 0),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_or_create_author(&self, name: &str) -> Result<Author, StoreError> {
        let normalized = normalize_name(name);
        let trimmed = name.trim();
        let id = new_id();

        // Insert, and on a unique-constraint conflict for `normalized_name`
        // re-select instead of surfacing the error — two scan workers are
        // allowed to race on the same author name (spec.md §4.3).
        let inserted = sqlx::query(
            "INSERT INTO authors (id, name, normalized_name) VALUES (?, ?, ?) \
             ON CONFLICT(normalized_name) DO NOTHING",
        )
        .bind(&id)
        .bind(trimmed)
        .bind(&normalized)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(Author {
                id,
                name: trimmed.to_string(),
            });
        }

        let row = sqlx::query("SELECT id, name FROM authors WHERE normalized_name = ?")
            .bind(&normalized)
            .fetch_one(&self.pool)
            .await?;
        Ok(Author {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    }

    async fn get_or_create_series(
        &self,
        name: &str,
        author_id: Option<String>,
    ) -> Result<Series, StoreError> {
        let normalized = normalize_name(name);
        let trimmed = name.trim();
        let id = new_id();

        let inserted = sqlx::query(
            "INSERT INTO series (id, name, author_id, normalized_name) VALUES (?, ?, ?, ?) \
             ON CONFLICT(normalized_name, author_id) DO NOTHING",
        )
        .bind(&id)
        .bind(trimmed)
        .bind(&author_id)
        .bind(&normalized)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(Series {
                id,
                name: trimmed.to_string(),
                author_id,
            });
        }

        let row = sqlx::query(
            "SELECT id, name, author_id FROM series WHERE normalized_name = ? AND author_id IS ?",
        )
        .bind(&normalized)
        .bind(&author_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(Series {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            author_id: row.try_get("author_id")?,
        })
    }

    async fn get_or_create_work(&self, title: &str, author_id: Option<String>) -> Result<Work, StoreError> {
        let normalized_title = normalize_name(title);
        let id = new_id();

        let inserted = sqlx::query(
            "INSERT INTO works (id, normalized_title, author_id) VALUES (?, ?, ?) \
             ON CONFLICT(normalized_title, author_id) DO NOTHING",
        )
        .bind(&id)
        .bind(&normalized_title)
        .bind(&author_id)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(Work {
                id,
                normalized_title,
                author_id,
            });
        }

        let row = sqlx::query(
            "SELECT id, normalized_title, author_id FROM works WHERE normalized_title = ? AND author_id IS ?",
        )
        .bind(&normalized_title)
        .bind(&author_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(Work {
            id: row.try_get("id")?,
            normalized_title: row.try_get("normalized_title")?,
            author_id: row.try_get("author_id")?,
        })
    }

    async fn upsert_book_by_path(&self, book: Book) -> Result<Book, StoreError> {
        if let Some(existing) = self.find_book_by_path(&book.file_path).await? {
            let mut book = book;
            book.id = existing.id;
            book.created_at = existing.created_at;
            return self.save_book(book).await;
        }
        self.save_book(book).await
    }

    async fn get_book(&self, id: &str) -> Result<Option<Book>, StoreError> {
        let row = sqlx::query("SELECT * FROM books WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_book).transpose()
    }

    async fn find_book_by_path(&self, file_path: &str) -> Result<Option<Book>, StoreError> {
        let row = sqlx::query("SELECT * FROM books WHERE file_path = ?")
            .bind(file_path)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_book).transpose()
    }

    async fn find_book_by_hash(&self, file_hash: &str) -> Result<Option<Book>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM books WHERE file_hash = ? AND marked_for_deletion = 0 LIMIT 1",
        )
        .bind(file_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_book).transpose()
    }

    async fn list_books(&self) -> Result<Vec<Book>, StoreError> {
        let rows = sqlx::query("SELECT * FROM books").fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_book).collect()
    }

    async fn save_book(&self, book: Book) -> Result<Book, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO books (
                id, title, author_ref, series_ref, series_position, file_path, file_hash,
                format, duration_seconds, narrator, publisher, language, edition, print_year,
                isbn10, isbn13, bitrate_kbps, codec, sample_rate_hz, channels, bit_depth, quality,
                library_state, marked_for_deletion, version_group_id, is_primary_version,
                created_at, updated_at
            ) VALUES (
                ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            )
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                author_ref = excluded.author_ref,
                series_ref = excluded.series_ref,
                series_position = excluded.series_position,
                file_path = excluded.file_path,
                file_hash = excluded.file_hash,
                format = excluded.format,
                duration_seconds = excluded.duration_seconds,
                narrator = excluded.narrator,
                publisher = excluded.publisher,
                language = excluded.language,
                edition = excluded.edition,
                print_year = excluded.print_year,
                isbn10 = excluded.isbn10,
                isbn13 = excluded.isbn13,
                bitrate_kbps = excluded.bitrate_kbps,
                codec = excluded.codec,
                sample_rate_hz = excluded.sample_rate_hz,
                channels = excluded.channels,
                bit_depth = excluded.bit_depth,
                quality = excluded.quality,
                library_state = excluded.library_state,
                marked_for_deletion = excluded.marked_for_deletion,
                version_group_id = excluded.version_group_id,
                is_primary_version = excluded.is_primary_version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&book.id)
        .bind(&book.title)
        .bind(&book.author_ref)
        .bind(&book.series_ref)
        .bind(book.series_position)
        .bind(&book.file_path)
        .bind(&book.file_hash)
        .bind(&book.format)
        .bind(book.duration_seconds.map(|v| v as i64))
        .bind(&book.narrator)
        .bind(&book.publisher)
        .bind(&book.language)
        .bind(&book.edition)
        .bind(book.print_year)
        .bind(&book.isbn10)
        .bind(&book.isbn13)
        .bind(book.media.bitrate_kbps.map(|v| v as i64))
        .bind(&book.media.codec)
        .bind(book.media.sample_rate_hz.map(|v| v as i64))
        .bind(book.media.channels.map(|v| v as i64))
        .bind(book.media.bit_depth.map(|v| v as i64))
        .bind(&book.media.quality)
        .bind(book.library_state.as_str())
        .bind(book.marked_for_deletion as i64)
        .bind(&book.version_group_id)
        .bind(book.is_primary_version.map(|v| v as i64))
        .bind(book.created_at)
        .bind(book.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(book)
    }

    async fn is_blocked(&self, hash: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM blocked_hashes WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn block_hash(&self, hash: &str, reason: &str) -> Result<BlockedHash, StoreError> {
        let created_at: DateTime<Utc> = Utc::now();
        sqlx::query(
            "INSERT INTO blocked_hashes (hash, reason, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(hash) DO UPDATE SET reason = excluded.reason",
        )
        .bind(hash)
        .bind(reason)
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(BlockedHash {
            hash: hash.to_string(),
            reason: reason.to_string(),
            created_at,
        })
    }

    async fn unblock_hash(&self, hash: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM blocked_hashes WHERE hash = ?")
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
