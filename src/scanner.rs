//! Parallel filesystem discovery (spec.md §4.3).
//!
//! A single walker thread discovers candidate files and feeds a bounded
//! channel; a worker pool of `concurrent_scans` tasks hashes and extracts
//! metadata for each one, then upserts through the `Store`. Grounded in
//! `import/folder_scanner.rs`'s recursive-walk-with-leaf-detection shape,
//! generalized from "detect release boundaries" to "walk everything and
//! upsert every supported file", and in the teacher's use of `tracing`
//! (`debug!`/`info!`/`warn!`) for per-file skip/error logging.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::hash::{hash_file, HashError};
use crate::metadata::{extract_from_path, read_embedded_tags, merge_embedded};
use crate::models::{Book, LibraryState};
use crate::store::{Store, StoreError};

pub const EXCLUSION_SENTINEL: &str = ".jabexclude";

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("root does not exist or is not a directory: {0}")]
    InvalidRoot(PathBuf),
    #[error("io error reading root {path}: {source}")]
    RootIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub concurrent_scans: usize,
    pub supported_extensions: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            concurrent_scans: 4,
            supported_extensions: ["m4b", "mp3", "m4a", "flac", "aac", "ogg", "wma"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// (device, inode) on POSIX; canonical path on platforms without inodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DirIdentity {
    Inode(u64, u64),
    CanonicalPath(PathBuf),
}

#[cfg(unix)]
fn dir_identity(path: &Path) -> DirIdentity {
    use std::os::unix::fs::MetadataExt;
    match std::fs::metadata(path) {
        Ok(meta) => DirIdentity::Inode(meta.dev(), meta.ino()),
        Err(_) => DirIdentity::CanonicalPath(
            std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()),
        ),
    }
}

#[cfg(not(unix))]
fn dir_identity(path: &Path) -> DirIdentity {
    DirIdentity::CanonicalPath(std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()))
}

struct CandidateFile {
    path: PathBuf,
}

/// Discover files under `root`, skipping excluded subtrees and loop-prone
/// symlinked directories, and send each candidate whose extension is
/// supported to `tx`. Runs on a blocking thread (it's synchronous
/// filesystem recursion) and observes `cancel` between directory entries.
fn walk(
    root: PathBuf,
    config: ScannerConfig,
    tx: std::sync::mpsc::Sender<CandidateFile>,
    cancel: CancellationToken,
    discovered: Arc<std::sync::atomic::AtomicUsize>,
) -> Result<(), ScanError> {
    if !root.is_dir() {
        return Err(ScanError::InvalidRoot(root));
    }
    let mut visited: HashSet<DirIdentity> = HashSet::new();
    let mut stack = vec![root.clone()];

    while let Some(dir) = stack.pop() {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let identity = dir_identity(&dir);
        if !visited.insert(identity) {
            warn!(path = %dir.display(), "skipping already-visited directory (symlink loop guard)");
            continue;
        }
        if dir.join(EXCLUSION_SENTINEL).is_file() {
            debug!(path = %dir.display(), "skipping excluded directory");
            continue;
        }

        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(source) => {
                if dir == root {
                    return Err(ScanError::RootIo { path: dir, source });
                }
                warn!(path = %dir.display(), error = %source, "skipping unreadable directory");
                continue;
            }
        };

        for entry in entries {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let entry = match entry {
                Ok(e) => e,
                Err(source) => {
                    warn!(error = %source, "skipping unreadable directory entry");
                    continue;
                }
            };
            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(source) => {
                    warn!(path = %path.display(), error = %source, "skipping entry with unreadable file type");
                    continue;
                }
            };
            if file_type.is_dir() || (file_type.is_symlink() && path.is_dir()) {
                stack.push(path);
                continue;
            }
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase());
            match ext {
                Some(ext) if config.supported_extensions.contains(&ext) => {
                    if tx.send(CandidateFile { path }).is_err() {
                        return Ok(()); // receiver dropped, e.g. cancellation
                    }
                    discovered.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Run one full scan of `root`, upserting every supported file it finds
/// through `store`. File-level errors are logged and skipped; root-level
/// errors are propagated (spec.md §4.3, §7).
pub async fn scan(
    root: PathBuf,
    config: ScannerConfig,
    store: Arc<dyn Store>,
    known_series_dirs: Vec<String>,
    cancel: CancellationToken,
    on_progress: impl Fn(u64, u64) + Send + Sync + 'static,
) -> Result<usize, ScanError> {
    let on_progress = Arc::new(on_progress);
    let (tx, rx) = std::sync::mpsc::channel::<CandidateFile>();
    let walk_root = root.clone();
    let walk_config = config.clone();
    let walk_cancel = cancel.clone();
    let discovered = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let walk_discovered = discovered.clone();
    let walk_handle =
        std::thread::spawn(move || walk(walk_root, walk_config, tx, walk_cancel, walk_discovered));

    let rx = Arc::new(std::sync::Mutex::new(rx));
    let mut join_set = tokio::task::JoinSet::new();
    let processed = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for _ in 0..config.concurrent_scans.max(1) {
        let rx = rx.clone();
        let store = store.clone();
        let cancel = cancel.clone();
        let known_series_dirs = known_series_dirs.clone();
        let processed = processed.clone();
        let discovered = discovered.clone();
        let on_progress = on_progress.clone();
        join_set.spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let candidate = {
                    let rx = rx.lock().unwrap();
                    rx.recv()
                };
                let Ok(candidate) = candidate else { break };
                if let Err(e) =
                    process_candidate(&candidate.path, &store, &known_series_dirs, &cancel).await
                {
                    warn!(path = %candidate.path.display(), error = %e, "skipping file after error");
                }
                let done = processed.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
                let total_so_far = discovered.load(std::sync::atomic::Ordering::Relaxed).max(done);
                on_progress(done as u64, total_so_far as u64);
            }
        });
    }

    while join_set.join_next().await.is_some() {}
    walk_handle.join().expect("scanner walk thread panicked")?;

    let total = processed.load(std::sync::atomic::Ordering::Relaxed);
    Ok(total)
}

#[derive(Debug, Error)]
enum CandidateError {
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

async fn process_candidate(
    path: &Path,
    store: &Arc<dyn Store>,
    known_series_dirs: &[String],
    cancel: &CancellationToken,
) -> Result<(), CandidateError> {
    let hash = hash_file(path, cancel).await?;

    if store.is_blocked(&hash).await? {
        debug!(path = %path.display(), hash = %hash, "skipping blocklisted hash");
        return Ok(());
    }

    let meta = extract_from_path(path, known_series_dirs);
    let tags = read_embedded_tags(path);
    let meta = merge_embedded(meta, &tags);

    let author_id = match &meta.author.or(tags.author.clone()) {
        Some(name) if !name.trim().is_empty() => Some(store.get_or_create_author(name).await?.id),
        _ => None,
    };
    let series_id = match &meta.series {
        Some(name) if !name.trim().is_empty() => {
            Some(store.get_or_create_series(name, author_id.clone()).await?.id)
        }
        _ => None,
    };

    let title = meta.title.unwrap_or_else(|| "Unknown Title".to_string());

    // Group this Book under its Work — the (normalized_title, author_id?)
    // identity shared by different versions/formats of the same underlying
    // title (spec.md §3). The grouping itself is the persisted side effect;
    // Book carries no work_ref field per spec.md's essentials list.
    store.get_or_create_work(&title, author_id.clone()).await?;

    let format = Book::format_from_path(&path.to_string_lossy());
    let now = chrono::Utc::now();
    let book = Book {
        id: crate::models::new_id(),
        title,
        author_ref: author_id,
        series_ref: series_id,
        series_position: meta.series_position,
        file_path: path.to_string_lossy().to_string(),
        file_hash: hash,
        format,
        duration_seconds: None,
        narrator: tags.narrator,
        publisher: tags.publisher,
        language: tags.language,
        edition: None,
        print_year: None,
        isbn10: None,
        isbn13: None,
        media: Default::default(),
        library_state: LibraryState::Import,
        marked_for_deletion: false,
        version_group_id: None,
        is_primary_version: None,
        created_at: now,
        updated_at: now,
    };

    store.upsert_book_by_path(book).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn scans_supported_files_and_skips_excluded_dirs() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Jane Doe - Hello.m4b"), b"abc").unwrap();
        fs::create_dir(dir.path().join("excluded")).unwrap();
        fs::write(dir.path().join("excluded").join(EXCLUSION_SENTINEL), b"").unwrap();
        fs::write(dir.path().join("excluded").join("nope.m4b"), b"xyz").unwrap();
        fs::write(dir.path().join("ignored.txt"), b"not audio").unwrap();

        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let count = scan(
            dir.path().to_path_buf(),
            ScannerConfig::default(),
            store.clone(),
            vec![],
            CancellationToken::new(),
            |_, _| {},
        )
        .await
        .unwrap();

        assert_eq!(count, 1);
        let books = store.list_books().await.unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].author_ref.is_some(), true);
    }

    #[tokio::test]
    async fn rescanning_same_root_is_idempotent_on_file_path() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Jane Doe - Hello.m4b"), b"abc").unwrap();
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());

        for _ in 0..2 {
            scan(
                dir.path().to_path_buf(),
                ScannerConfig::default(),
                store.clone(),
                vec![],
                CancellationToken::new(),
                |_, _| {},
            )
            .await
            .unwrap();
        }

        let books = store.list_books().await.unwrap();
        assert_eq!(books.len(), 1);
    }

    #[tokio::test]
    async fn invalid_root_is_propagated() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let err = scan(
            PathBuf::from("/does/not/exist"),
            ScannerConfig::default(),
            store,
            vec![],
            CancellationToken::new(),
            |_, _| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ScanError::InvalidRoot(_)));
    }

    #[tokio::test]
    async fn blocklisted_hash_is_skipped_without_persisting() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Jane Doe - Hello.m4b"), b"blocked content").unwrap();
        let store = InMemoryStore::new();
        let hash = crate::hash::hash_file(
            dir.path().join("Jane Doe - Hello.m4b"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        store.block_hash(&hash, "test").await.unwrap();
        let store: Arc<dyn Store> = Arc::new(store);

        scan(
            dir.path().to_path_buf(),
            ScannerConfig::default(),
            store.clone(),
            vec![],
            CancellationToken::new(),
            |_, _| {},
        )
        .await
        .unwrap();

        assert!(store.list_books().await.unwrap().is_empty());
    }
}
