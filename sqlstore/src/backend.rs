//! Session persistence backends.
//!
//! A [`SessionBackend`] stores one encoded payload per row, keyed by an
//! identifier it generates itself. The [`Store`](crate::store::Store) never
//! talks to a database directly; it only calls the four operations of this
//! trait.
//!
//! Two implementations are provided: [`db::DbBackend`], which keeps sessions in
//! a SQL table, and [`memory::MemoryBackend`], which keeps them in memory and is
//! mostly useful for development and tests.

#[cfg(feature = "db")]
pub mod db;
pub mod memory;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

#[cfg(feature = "db")]
use crate::db::DatabaseError;

pub(crate) const ERROR_PREFIX: &str = "session backend:";

/// Errors that can occur while interacting with a session backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// An error occurred while interacting with the database.
    #[cfg(feature = "db")]
    #[error("{ERROR_PREFIX} {0}")]
    Database(#[from] DatabaseError),
    /// The identifier of a newly inserted row could not be retrieved.
    #[error("{ERROR_PREFIX} the identifier of the inserted row could not be retrieved")]
    MissingInsertId,
    /// An error reported by a custom backend.
    #[error("{ERROR_PREFIX} {0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// An alias for [`Result`] that uses [`BackendError`] as the error type.
pub type Result<T> = std::result::Result<T, BackendError>;

/// The persistence adapter used by the [`Store`](crate::store::Store).
///
/// Implementations must be safe to share between all requests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Returns the encoded payload stored under `id`, or `None` if there is
    /// no such row.
    async fn select(&self, id: i64) -> Result<Option<String>>;

    /// Stores `data` in a new row and returns the identifier generated for it.
    async fn insert(&self, data: &str) -> Result<i64>;

    /// Replaces the payload stored under `id`. Returns `false` if there is no
    /// such row.
    async fn update(&self, id: i64, data: &str) -> Result<bool>;

    /// Deletes the row stored under `id`. Deleting a row that does not exist
    /// is not an error.
    async fn delete(&self, id: i64) -> Result<()>;
}
