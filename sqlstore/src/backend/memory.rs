//! Memory session backend
//!
//! # Examples
//!
//! ```
//! use sqlstore::backend::memory::MemoryBackend;
//! let backend = MemoryBackend::new();
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backend::{Result, SessionBackend};

/// An in-memory session backend.
///
/// Rows live in a hashmap behind an async mutex, and identifiers come from a
/// counter starting at 1. Clones share the same rows.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend(Arc<Mutex<Rows>>);

#[derive(Debug, Default)]
struct Rows {
    last_id: i64,
    rows: HashMap<i64, String>,
}

impl MemoryBackend {
    /// Creates a new, empty `MemoryBackend`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored rows.
    pub async fn len(&self) -> usize {
        self.0.lock().await.rows.len()
    }

    /// Returns `true` if no rows are stored.
    pub async fn is_empty(&self) -> bool {
        self.0.lock().await.rows.is_empty()
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn select(&self, id: i64) -> Result<Option<String>> {
        Ok(self.0.lock().await.rows.get(&id).cloned())
    }

    async fn insert(&self, data: &str) -> Result<i64> {
        let mut guard = self.0.lock().await;
        guard.last_id += 1;
        let id = guard.last_id;
        guard.rows.insert(id, data.to_owned());
        Ok(id)
    }

    async fn update(&self, id: i64, data: &str) -> Result<bool> {
        let mut guard = self.0.lock().await;
        match guard.rows.get_mut(&id) {
            Some(row) => {
                data.clone_into(row);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.0.lock().await.rows.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_generates_ids() {
        let backend = MemoryBackend::new();

        let first = backend.insert("a").await.unwrap();
        let second = backend.insert("b").await.unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(backend.len().await, 2);
    }

    #[tokio::test]
    async fn test_select() {
        let backend = MemoryBackend::new();
        let id = backend.insert("data").await.unwrap();

        assert_eq!(backend.select(id).await.unwrap().as_deref(), Some("data"));
        assert_eq!(backend.select(id + 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update() {
        let backend = MemoryBackend::new();
        let id = backend.insert("old").await.unwrap();

        assert!(backend.update(id, "new").await.unwrap());
        assert_eq!(backend.select(id).await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_update_missing() {
        let backend = MemoryBackend::new();

        assert!(!backend.update(1, "new").await.unwrap());
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = MemoryBackend::new();
        let id = backend.insert("data").await.unwrap();

        backend.delete(id).await.unwrap();
        assert_eq!(backend.select(id).await.unwrap(), None);

        backend.delete(id).await.expect("second delete");
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_delete() {
        let backend = MemoryBackend::new();
        let id = backend.insert("data").await.unwrap();
        backend.delete(id).await.unwrap();

        let next = backend.insert("data").await.unwrap();

        assert_ne!(id, next);
    }

    #[tokio::test]
    async fn test_clones_share_rows() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();

        let id = clone.insert("data").await.unwrap();

        assert_eq!(backend.select(id).await.unwrap().as_deref(), Some("data"));
    }
}
