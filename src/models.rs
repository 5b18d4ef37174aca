//! Core data model (spec.md §3).
//!
//! Entities are plain data structs; persistence lives behind the `store`
//! module's `Store` trait. ID/timestamp conventions follow the teacher's
//! `db/client.rs`: `String` UUIDs, `chrono::DateTime<Utc>` timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LibraryState {
    Import,
    Organized,
}

impl LibraryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryState::Import => "import",
            LibraryState::Organized => "organized",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub bitrate_kbps: Option<u32>,
    pub codec: Option<String>,
    pub sample_rate_hz: Option<u32>,
    pub channels: Option<u8>,
    pub bit_depth: Option<u8>,
    pub quality: Option<String>,
}

impl Default for MediaInfo {
    fn default() -> Self {
        MediaInfo {
            bitrate_kbps: None,
            codec: None,
            sample_rate_hz: None,
            channels: None,
            bit_depth: None,
            quality: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author_ref: Option<String>,
    pub series_ref: Option<String>,
    pub series_position: Option<f64>,
    pub file_path: String,
    pub file_hash: String,
    pub format: String,
    pub duration_seconds: Option<u64>,
    pub narrator: Option<String>,
    pub publisher: Option<String>,
    pub language: Option<String>,
    pub edition: Option<String>,
    pub print_year: Option<i32>,
    pub isbn10: Option<String>,
    pub isbn13: Option<String>,
    pub media: MediaInfo,
    pub library_state: LibraryState,
    pub marked_for_deletion: bool,
    pub version_group_id: Option<String>,
    pub is_primary_version: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    /// Lowercased extension with a leading dot, derived from `file_path`.
    pub fn format_from_path(path: &str) -> String {
        std::path::Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub name: String,
}

impl Author {
    /// Case-insensitive, whitespace-collapsed identity used for dedup.
    pub fn normalize_name(name: &str) -> String {
        normalize_name(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    pub id: String,
    pub name: String,
    pub author_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Work {
    pub id: String,
    pub normalized_title: String,
    pub author_id: Option<String>,
}

/// Trim, collapse internal whitespace, ASCII-fold, and casefold — the
/// shared identity key for Author/Series/Work dedup across the scanner and
/// the `Store`'s get-or-create helpers. ASCII-folding means "Müller" and
/// "Muller" collide, which is the point: torrent/Usenet release names
/// frequently drop diacritics that an iTunes export or embedded tag keeps.
pub fn normalize_name(name: &str) -> String {
    unidecode::unidecode(name)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Scan,
    Organize,
    MetadataFetch,
    Backup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedHash {
    pub hash: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadClientKind {
    Deluge,
    Qbittorrent,
    Sabnzbd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadReference {
    pub client_type: DownloadClientKind,
    pub client_id: String,
    pub source_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_path_lowercases_and_keeps_dot() {
        assert_eq!(Book::format_from_path("/x/Book.M4B"), ".m4b");
        assert_eq!(Book::format_from_path("/x/book"), "");
    }

    #[test]
    fn normalize_name_collapses_whitespace_and_casefolds() {
        assert_eq!(normalize_name("  Jane   Doe "), "jane doe");
        assert_eq!(normalize_name("Jane Doe"), normalize_name("  jane  doe  "));
    }

    #[test]
    fn normalize_name_ascii_folds_diacritics() {
        assert_eq!(normalize_name("Müller"), normalize_name("Muller"));
    }
}
