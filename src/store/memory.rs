//! An in-process reference `Store`, used by tests and any deployment that
//! doesn't need durability across restarts. Mirrors the get-or-create +
//! upsert-by-path semantics the `sqlx` implementation provides.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::models::{new_id, normalize_name, Author, BlockedHash, Book, Series, Work};

use super::{Store, StoreError};

#[derive(Default)]
struct Inner {
    authors_by_name: HashMap<String, Author>,
    series_by_key: HashMap<(String, Option<String>), Series>,
    works_by_key: HashMap<(String, Option<String>), Work>,
    books_by_path: HashMap<String, Book>,
    blocked: HashMap<String, BlockedHash>,
}

pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_or_create_author(&self, name: &str) -> Result<Author, StoreError> {
        let key = normalize_name(name);
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.authors_by_name.get(&key) {
            return Ok(existing.clone());
        }
        let author = Author {
            id: new_id(),
            name: name.trim().to_string(),
        };
        inner.authors_by_name.insert(key, author.clone());
        Ok(author)
    }

    async fn get_or_create_series(
        &self,
        name: &str,
        author_id: Option<String>,
    ) -> Result<Series, StoreError> {
        let key = (normalize_name(name), author_id.clone());
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.series_by_key.get(&key) {
            return Ok(existing.clone());
        }
        let series = Series {
            id: new_id(),
            name: name.trim().to_string(),
            author_id,
        };
        inner.series_by_key.insert(key, series.clone());
        Ok(series)
    }

    async fn get_or_create_work(&self, title: &str, author_id: Option<String>) -> Result<Work, StoreError> {
        let normalized_title = normalize_name(title);
        let key = (normalized_title.clone(), author_id.clone());
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.works_by_key.get(&key) {
            return Ok(existing.clone());
        }
        let work = Work {
            id: new_id(),
            normalized_title,
            author_id,
        };
        inner.works_by_key.insert(key, work.clone());
        Ok(work)
    }

    async fn upsert_book_by_path(&self, mut book: Book) -> Result<Book, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.books_by_path.get(&book.file_path) {
            book.id = existing.id.clone();
            book.created_at = existing.created_at;
        }
        inner.books_by_path.insert(book.file_path.clone(), book.clone());
        Ok(book)
    }

    async fn get_book(&self, id: &str) -> Result<Option<Book>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.books_by_path.values().find(|b| b.id == id).cloned())
    }

    async fn find_book_by_path(&self, file_path: &str) -> Result<Option<Book>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.books_by_path.get(file_path).cloned())
    }

    async fn find_book_by_hash(&self, file_hash: &str) -> Result<Option<Book>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .books_by_path
            .values()
            .find(|b| b.file_hash == file_hash && !b.marked_for_deletion)
            .cloned())
    }

    async fn list_books(&self) -> Result<Vec<Book>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.books_by_path.values().cloned().collect())
    }

    async fn save_book(&self, book: Book) -> Result<Book, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.books_by_path.insert(book.file_path.clone(), book.clone());
        Ok(book)
    }

    async fn is_blocked(&self, hash: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.blocked.contains_key(hash))
    }

    async fn block_hash(&self, hash: &str, reason: &str) -> Result<BlockedHash, StoreError> {
        let entry = BlockedHash {
            hash: hash.to_string(),
            reason: reason.to_string(),
            created_at: chrono::Utc::now(),
        };
        let mut inner = self.inner.lock().unwrap();
        inner.blocked.insert(hash.to_string(), entry.clone());
        Ok(entry)
    }

    async fn unblock_hash(&self, hash: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.blocked.remove(hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_author_dedupes_case_insensitively() {
        let store = InMemoryStore::new();
        let a = store.get_or_create_author("Jane Doe").await.unwrap();
        let b = store.get_or_create_author("  jane doe ").await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn get_or_create_work_dedupes_by_title_and_author() {
        let store = InMemoryStore::new();
        let author = store.get_or_create_author("Jane Doe").await.unwrap();
        let a = store.get_or_create_work("Hello World", Some(author.id.clone())).await.unwrap();
        let b = store.get_or_create_work("  hello   world ", Some(author.id.clone())).await.unwrap();
        assert_eq!(a.id, b.id);

        let c = store.get_or_create_work("Hello World", None).await.unwrap();
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn upsert_by_path_preserves_id_on_rescan() {
        let store = InMemoryStore::new();
        let book = test_book("/a/b.m4b", "hash1");
        let first = store.upsert_book_by_path(book.clone()).await.unwrap();

        let mut updated = book;
        updated.title = "New Title".to_string();
        let second = store.upsert_book_by_path(updated).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.title, "New Title");
        assert_eq!(store.list_books().await.unwrap().len(), 1);
    }

    fn test_book(path: &str, hash: &str) -> Book {
        let now = chrono::Utc::now();
        Book {
            id: new_id(),
            title: "Title".into(),
            author_ref: None,
            series_ref: None,
            series_position: None,
            file_path: path.into(),
            file_hash: hash.into(),
            format: ".m4b".into(),
            duration_seconds: None,
            narrator: None,
            publisher: None,
            language: None,
            edition: None,
            print_year: None,
            isbn10: None,
            isbn13: None,
            media: Default::default(),
            library_state: crate::models::LibraryState::Import,
            marked_for_deletion: false,
            version_group_id: None,
            is_primary_version: None,
            created_at: now,
            updated_at: now,
        }
    }
}
