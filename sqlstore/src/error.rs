use thiserror::Error;

use crate::backend::BackendError;
use crate::codec::CodecError;
#[cfg(feature = "db")]
use crate::db::DatabaseError;
use crate::session::SessionError;
use crate::store::{LoadError, SaveError};

/// An error that can occur while configuring or using the session store.
///
/// Errors specific to a single operation (such as [`SaveError`] or
/// [`LoadError`](crate::store::LoadError)) can be converted into this type so
/// that the `?` operator can be used in application code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The configuration could not be parsed.
    #[error("Could not parse the configuration: {0}")]
    Config(#[from] toml::de::Error),
    /// The configuration does not contain a database URL.
    #[cfg(feature = "db")]
    #[error("No database URL configured")]
    MissingDatabaseUrl,
    /// An error occurred while interacting with the database.
    #[cfg(feature = "db")]
    #[error(transparent)]
    Database(#[from] DatabaseError),
    /// The session backend could not be created.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// The codecs could not be created or used.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A session value could not be read or written.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// A session could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// A session could not be saved.
    #[error(transparent)]
    Save(#[from] SaveError),
}
